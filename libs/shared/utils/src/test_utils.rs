use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::sync::Arc;
use std::time::Duration;

use shared_config::{AppConfig, BookingConfig, RetryConfig};
use shared_database::InMemoryAppointmentStore;
use shared_models::{AvailabilityWindow, NewAppointment, SlotKey};

pub struct TestConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
        }
    }
}

impl TestConfig {
    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
            supabase_request_timeout: Duration::from_secs(5),
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }

    /// Production timings, but with retry delays short enough for real-time tests.
    pub fn booking_config() -> BookingConfig {
        BookingConfig {
            retry: RetryConfig {
                max_attempts: 3,
                initial_delay: Duration::from_millis(10),
                backoff_multiplier: 2.0,
            },
            ..BookingConfig::default()
        }
    }
}

pub const TEST_RESOURCE: &str = "dentist-1";

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid test date")
}

pub fn time(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).expect("valid test time")
}

pub fn at(date: NaiveDate, h: u32, m: u32) -> NaiveDateTime {
    date.and_time(time(h, m))
}

pub fn slot(date: NaiveDate, h: u32, m: u32) -> SlotKey {
    SlotKey::new(TEST_RESOURCE, date, time(h, m))
}

/// 09:00-12:00 and 13:00-17:00 in 30 minute slots.
pub fn clinic_hours() -> Vec<AvailabilityWindow> {
    vec![
        AvailabilityWindow::new(time(9, 0), time(12, 0), 30),
        AvailabilityWindow::new(time(13, 0), time(17, 0), 30),
    ]
}

/// In-memory store where `TEST_RESOURCE` works `clinic_hours` every day.
pub async fn seeded_store() -> Arc<InMemoryAppointmentStore> {
    let store = Arc::new(InMemoryAppointmentStore::new());
    store.set_weekly_hours(TEST_RESOURCE, clinic_hours()).await;
    store
}

/// Book every slot of `clinic_hours` on `date` except the listed times.
pub async fn fill_day_except(store: &InMemoryAppointmentStore, date: NaiveDate, free: &[NaiveTime]) {
    use shared_database::AppointmentStore;

    for window in clinic_hours() {
        for start in window.slot_times() {
            if free.contains(&start) {
                continue;
            }
            let key = SlotKey::new(TEST_RESOURCE, date, start);
            store
                .commit_appointment(NewAppointment::for_slot(&key, "seed-patient"))
                .await
                .expect("seeding should not conflict");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fill_day_leaves_requested_gaps() {
        let store = seeded_store().await;
        let day = date(2025, 12, 1);
        fill_day_except(&store, day, &[time(10, 30), time(16, 30)]).await;

        // 6 + 8 slots per day, two left open
        assert_eq!(store.appointments().await.len(), 12);
        assert_eq!(store.occupying_count(&slot(day, 10, 30)).await, 0);
        assert_eq!(store.occupying_count(&slot(day, 9, 0)).await, 1);
    }
}
