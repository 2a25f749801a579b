#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use shared_config::BookingConfig;
use shared_database::{AppointmentStore, InMemoryAppointmentStore, StoreError};
use shared_models::{
    AppointmentRecord, AppointmentStatus, AvailabilityWindow, NewAppointment, OccupyingAppointment,
};
use shared_utils::test_utils::{at, date, seeded_store, TestConfig};
use slot_booking_cell::{BookingCoordinator, FixedClock, SessionListener};

// ==============================================================================
// SCRIPTED STORE
// ==============================================================================

#[derive(Debug, Clone, Copy)]
pub enum Failure {
    Network,
    Server,
    Validation,
    Auth,
}

impl Failure {
    fn to_error(self) -> StoreError {
        match self {
            Failure::Network => StoreError::Connection("connection reset by peer".to_string()),
            Failure::Server => StoreError::Api {
                status: 503,
                code: None,
                message: "Service Unavailable".to_string(),
                details: None,
            },
            Failure::Validation => StoreError::InvalidInput("invalid input syntax for type date".to_string()),
            Failure::Auth => StoreError::Api {
                status: 401,
                code: Some("PGRST301".to_string()),
                message: "JWT expired".to_string(),
                details: None,
            },
        }
    }
}

/// In-memory store with scripted failures and delays on reads.
pub struct FlakyStore {
    inner: Arc<InMemoryAppointmentStore>,
    read_failures: AtomicU32,
    failure: Mutex<Failure>,
    failing_dates: Mutex<HashSet<NaiveDate>>,
    read_delay: Mutex<Option<Duration>>,
    occupancy_calls: Mutex<Vec<Instant>>,
}

impl FlakyStore {
    pub fn new(inner: Arc<InMemoryAppointmentStore>) -> Self {
        Self {
            inner,
            read_failures: AtomicU32::new(0),
            failure: Mutex::new(Failure::Network),
            failing_dates: Mutex::new(HashSet::new()),
            read_delay: Mutex::new(None),
            occupancy_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn inner(&self) -> &Arc<InMemoryAppointmentStore> {
        &self.inner
    }

    /// Fail the next `count` occupancy queries with `failure`.
    pub fn fail_next_reads(&self, count: u32, failure: Failure) {
        *self.failure.lock().unwrap() = failure;
        self.read_failures.store(count, Ordering::SeqCst);
    }

    /// Make every day-wide query for these dates fail.
    pub fn fail_dates(&self, dates: &[NaiveDate]) {
        self.failing_dates.lock().unwrap().extend(dates.iter().copied());
    }

    pub fn delay_reads(&self, delay: Duration) {
        *self.read_delay.lock().unwrap() = Some(delay);
    }

    pub fn occupancy_call_times(&self) -> Vec<Instant> {
        self.occupancy_calls.lock().unwrap().clone()
    }

    fn take_failure(&self) -> Option<StoreError> {
        let remaining = self.read_failures.load(Ordering::SeqCst);
        if remaining == 0 {
            return None;
        }
        self.read_failures.store(remaining - 1, Ordering::SeqCst);
        Some(self.failure.lock().unwrap().to_error())
    }

    fn day_failure(&self, date: NaiveDate) -> Result<(), StoreError> {
        if self.failing_dates.lock().unwrap().contains(&date) {
            return Err(StoreError::Connection(format!("lost connection while reading {}", date)));
        }
        Ok(())
    }
}

#[async_trait]
impl AppointmentStore for FlakyStore {
    async fn find_occupying_appointments(
        &self,
        resource_id: &str,
        date: NaiveDate,
        time: NaiveTime,
        exclude_id: Option<Uuid>,
    ) -> Result<Vec<OccupyingAppointment>, StoreError> {
        self.occupancy_calls.lock().unwrap().push(Instant::now());

        let delay = *self.read_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        self.inner.find_occupying_appointments(resource_id, date, time, exclude_id).await
    }

    async fn find_occupied_times(&self, resource_id: &str, date: NaiveDate) -> Result<Vec<NaiveTime>, StoreError> {
        self.day_failure(date)?;
        self.inner.find_occupied_times(resource_id, date).await
    }

    async fn availability_windows(
        &self,
        resource_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<AvailabilityWindow>, StoreError> {
        self.day_failure(date)?;
        self.inner.availability_windows(resource_id, date).await
    }

    async fn commit_appointment(&self, details: NewAppointment) -> Result<AppointmentRecord, StoreError> {
        self.inner.commit_appointment(details).await
    }

    async fn update_appointment_status(
        &self,
        id: Uuid,
        status: AppointmentStatus,
        fields: Map<String, Value>,
    ) -> Result<AppointmentRecord, StoreError> {
        self.inner.update_appointment_status(id, status, fields).await
    }
}

// ==============================================================================
// COORDINATOR FIXTURES
// ==============================================================================

/// Clinic-local "now" used by every fixture: the day before the test slots.
pub fn test_now() -> NaiveDateTime {
    at(date(2025, 11, 30), 8, 0)
}

pub fn fixed_clock() -> Arc<FixedClock> {
    Arc::new(FixedClock::new(test_now()))
}

pub fn test_config() -> BookingConfig {
    TestConfig::booking_config()
}

pub async fn flaky_store() -> Arc<FlakyStore> {
    Arc::new(FlakyStore::new(seeded_store().await))
}

pub fn coordinator(store: Arc<dyn AppointmentStore>) -> BookingCoordinator {
    BookingCoordinator::with_clock(store, test_config(), fixed_clock())
}

// ==============================================================================
// SESSION LISTENER
// ==============================================================================

#[derive(Default)]
pub struct RecordingListener {
    pub warnings: AtomicU32,
    pub expiries: AtomicU32,
    pub autosaves: Mutex<Vec<Option<Value>>>,
    pub fail_autosave: std::sync::atomic::AtomicBool,
}

impl RecordingListener {
    pub fn warnings(&self) -> u32 {
        self.warnings.load(Ordering::SeqCst)
    }

    pub fn expiries(&self) -> u32 {
        self.expiries.load(Ordering::SeqCst)
    }

    pub fn autosaves(&self) -> Vec<Option<Value>> {
        self.autosaves.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionListener for RecordingListener {
    async fn on_warning(&self, _session_id: &str, _remaining: Duration) {
        self.warnings.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_expiry(&self, _session_id: &str) {
        self.expiries.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_autosave(&self, _session_id: &str, payload: Option<Value>) -> anyhow::Result<()> {
        self.autosaves.lock().unwrap().push(payload);
        if self.fail_autosave.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("draft storage unreachable".to_string()).into());
        }
        Ok(())
    }
}
