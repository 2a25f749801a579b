use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use shared_config::BookingConfig;
use shared_models::{ClassifiedError, ErrorKind, SlotKey};

use crate::models::ReservationHold;
use crate::services::availability::SlotAvailabilityChecker;
use crate::services::expiry::{ReservationExpiryTracker, WatchHandle};
use crate::services::lock::{BookingLockCoordinator, SweeperHandle};
use crate::services::validation::BookingValidator;

/// Soft holds kept while a caller works through a multi-step booking flow.
/// They are advisory: other holders are turned away, but the slot is only
/// taken once an appointment is committed.
pub struct SlotReservationService {
    holds: Arc<BookingLockCoordinator>,
    locks: Arc<BookingLockCoordinator>,
    checker: Arc<SlotAvailabilityChecker>,
    validator: Arc<BookingValidator>,
    expiry: ReservationExpiryTracker,
}

impl SlotReservationService {
    pub fn new(
        locks: Arc<BookingLockCoordinator>,
        checker: Arc<SlotAvailabilityChecker>,
        validator: Arc<BookingValidator>,
        config: &BookingConfig,
    ) -> Self {
        Self {
            holds: Arc::new(BookingLockCoordinator::new(config.soft_hold_duration)),
            locks,
            checker,
            validator,
            expiry: ReservationExpiryTracker::from_config(config),
        }
    }

    /// Hold a free slot for `holder_id`. Reserving a slot the caller already
    /// holds restarts its TTL.
    #[instrument(skip(self, slot), fields(slot = %slot))]
    pub async fn reserve(&self, slot: &SlotKey, holder_id: &str) -> Result<ReservationHold, ClassifiedError> {
        self.validator.validate(slot, holder_id)?;

        let Some(_guard) = self.locks.lock(slot, holder_id) else {
            warn!(holder_id, "Slot is being booked by someone else");
            return Err(ClassifiedError::new(
                ErrorKind::LockContended,
                format!("Slot {} is locked by another booking", slot),
            ));
        };

        if self.holds.is_held_by_other(slot, holder_id) {
            return Err(ClassifiedError::new(
                ErrorKind::SlotUnavailable,
                format!("Slot {} is reserved by another patient", slot),
            ));
        }

        if !self
            .checker
            .is_available(&slot.resource_id, slot.date, slot.time, None)
            .await?
        {
            return Err(ClassifiedError::new(
                ErrorKind::SlotUnavailable,
                format!("Slot {} is already booked", slot),
            ));
        }

        let hold = self.holds.try_acquire(slot, holder_id).ok_or_else(|| {
            ClassifiedError::new(
                ErrorKind::SlotUnavailable,
                format!("Slot {} is reserved by another patient", slot),
            )
        })?;

        info!(holder_id, expires_in_secs = self.holds.ttl().as_secs(), "Slot reserved");
        Ok(hold)
    }

    pub fn release(&self, slot: &SlotKey, holder_id: &str) -> bool {
        self.holds.release(slot, holder_id)
    }

    pub fn holder_of(&self, slot: &SlotKey) -> Option<ReservationHold> {
        self.holds.holder_of(slot)
    }

    pub fn is_held_by_other(&self, slot: &SlotKey, holder_id: &str) -> bool {
        self.holds.is_held_by_other(slot, holder_id)
    }

    /// Remaining time on `holder_id`'s hold, if it still has one.
    pub fn time_remaining(&self, slot: &SlotKey, holder_id: &str) -> Option<Duration> {
        self.holds
            .holder_of(slot)
            .filter(|hold| hold.is_owned_by(holder_id))
            .map(|hold| self.expiry.time_remaining(hold.expires_at))
    }

    pub fn watch_countdown<T, E>(&self, hold: &ReservationHold, on_tick: T, on_expire: E) -> WatchHandle
    where
        T: FnMut(Duration) + Send + 'static,
        E: FnOnce() + Send + 'static,
    {
        self.expiry.watch(hold.expires_at, on_tick, on_expire)
    }

    pub fn sweep_expired(&self) -> usize {
        self.holds.sweep_expired()
    }

    pub fn spawn_sweeper(&self, interval: Duration) -> SweeperHandle {
        self.holds.spawn_sweeper(interval)
    }

    pub fn len(&self) -> usize {
        self.holds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.holds.is_empty()
    }
}
