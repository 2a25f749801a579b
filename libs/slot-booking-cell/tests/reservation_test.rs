mod common;

use assert_matches::assert_matches;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;
use tokio_test::{assert_err, assert_ok};

use shared_models::{CandidateSlot, ErrorKind};
use shared_utils::test_utils::{date, seeded_store, slot, time};
use slot_booking_cell::{format_remaining, BookingOutcome, BookingRequest};

use common::coordinator;

const HOLD: Duration = Duration::from_secs(5 * 60);

#[tokio::test]
async fn test_reserved_slot_is_unavailable_to_others() {
    let booking = coordinator(seeded_store().await);
    let target = slot(date(2025, 12, 1), 10, 0);

    let hold = assert_ok!(booking.reservations().reserve(&target, "patient-a").await);
    assert_eq!(hold.holder_id, "patient-a");
    assert_eq!(hold.slot, target);

    let err = assert_err!(booking.reservations().reserve(&target, "patient-b").await);
    assert_eq!(err.kind(), ErrorKind::SlotUnavailable);

    let outcome = booking.attempt_booking(&BookingRequest::new(target.clone(), "patient-b")).await;
    let alternatives = assert_matches!(outcome, BookingOutcome::SlotUnavailable { alternatives } => alternatives);
    assert_eq!(alternatives[0], CandidateSlot::new(date(2025, 12, 1), time(9, 0)));
    assert!(!alternatives.contains(&CandidateSlot::new(date(2025, 12, 1), time(10, 0))));
}

#[tokio::test]
async fn test_holder_books_their_reserved_slot() {
    let store = seeded_store().await;
    let booking = coordinator(store.clone());
    let target = slot(date(2025, 12, 1), 10, 0);

    assert_ok!(booking.reservations().reserve(&target, "patient-a").await);
    let outcome = booking.attempt_booking(&BookingRequest::new(target.clone(), "patient-a")).await;

    assert!(outcome.is_confirmed());
    assert!(booking.reservations().holder_of(&target).is_none());
    assert_eq!(store.occupying_count(&target).await, 1);

    // Once committed, the slot cannot be reserved again.
    let err = assert_err!(booking.reservations().reserve(&target, "patient-b").await);
    assert_eq!(err.kind(), ErrorKind::SlotUnavailable);
}

#[tokio::test]
async fn test_reserve_respects_locks_and_validation() {
    let booking = coordinator(seeded_store().await);
    let target = slot(date(2025, 12, 1), 10, 0);
    assert!(booking.locks().acquire(&target, "someone-else"));

    let contended = assert_err!(booking.reservations().reserve(&target, "patient-a").await);
    assert_eq!(contended.kind(), ErrorKind::LockContended);

    let past = booking
        .reservations()
        .reserve(&slot(date(2025, 11, 29), 10, 0), "patient-a")
        .await
        .unwrap_err();
    assert_eq!(past.kind(), ErrorKind::ValidationFailed);
    assert!(booking.reservations().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_hold_lapses_after_its_duration() {
    let booking = coordinator(seeded_store().await);
    let target = slot(date(2025, 12, 1), 10, 0);

    assert_ok!(booking.reservations().reserve(&target, "patient-a").await);
    let remaining = booking.reservations().time_remaining(&target, "patient-a").unwrap();
    assert!(remaining > HOLD - Duration::from_secs(1) && remaining <= HOLD);
    assert_eq!(booking.reservations().time_remaining(&target, "patient-b"), None);

    sleep(HOLD - Duration::from_secs(1)).await;
    assert!(booking.reservations().is_held_by_other(&target, "patient-b"));

    sleep(Duration::from_secs(2)).await;
    assert_eq!(booking.reservations().time_remaining(&target, "patient-a"), None);
    let hold = assert_ok!(booking.reservations().reserve(&target, "patient-b").await);
    assert_eq!(hold.holder_id, "patient-b");
}

#[tokio::test(start_paused = true)]
async fn test_countdown_ticks_then_expires_once() {
    let booking = coordinator(seeded_store().await);
    let target = slot(date(2025, 12, 1), 10, 0);
    let hold = assert_ok!(booking.reservations().reserve(&target, "patient-a").await);

    let ticks = Arc::new(Mutex::new(Vec::new()));
    let expired = Arc::new(AtomicU32::new(0));
    let watch = {
        let ticks = ticks.clone();
        let expired = expired.clone();
        booking.reservations().watch_countdown(
            &hold,
            move |remaining| ticks.lock().unwrap().push(format_remaining(remaining)),
            move || {
                expired.fetch_add(1, Ordering::SeqCst);
            },
        )
    };

    sleep(Duration::from_secs(90)).await;
    assert_eq!(expired.load(Ordering::SeqCst), 0);
    assert_eq!(ticks.lock().unwrap().first().map(String::as_str), Some("5m 0s"));
    assert!(ticks.lock().unwrap().contains(&"4m 0s".to_string()));

    sleep(HOLD).await;
    assert_eq!(expired.load(Ordering::SeqCst), 1);
    assert!(watch.is_finished());

    let recorded = ticks.lock().unwrap().len();
    assert!((299..=301).contains(&recorded), "recorded {} ticks", recorded);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_countdown_never_expires() {
    let booking = coordinator(seeded_store().await);
    let target = slot(date(2025, 12, 1), 10, 0);
    let hold = assert_ok!(booking.reservations().reserve(&target, "patient-a").await);

    let expired = Arc::new(AtomicU32::new(0));
    let watch = {
        let expired = expired.clone();
        booking.reservations().watch_countdown(&hold, |_| {}, move || {
            expired.fetch_add(1, Ordering::SeqCst);
        })
    };

    sleep(Duration::from_secs(10)).await;
    watch.cancel();
    sleep(HOLD * 2).await;

    assert_eq!(expired.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_background_sweeps_clear_locks_and_holds() {
    let booking = coordinator(seeded_store().await);
    let reserved = slot(date(2025, 12, 1), 10, 0);
    let locked = slot(date(2025, 12, 1), 11, 0);

    assert_ok!(booking.reservations().reserve(&reserved, "patient-a").await);
    assert!(booking.locks().acquire(&locked, "patient-b"));
    let _sweeps = booking.start_background_sweeps();

    sleep(Duration::from_secs(4 * 60)).await;
    assert!(booking.locks().is_empty());
    assert_eq!(booking.reservations().len(), 1);

    sleep(Duration::from_secs(2 * 60 + 1)).await;
    assert!(booking.reservations().is_empty());
}
