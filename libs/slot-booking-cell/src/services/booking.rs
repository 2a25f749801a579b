use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use shared_config::BookingConfig;
use shared_database::{AppointmentStore, StoreError};
use shared_models::{
    AppointmentRecord, AppointmentStatus, CandidateSlot, ClassifiedError, ErrorKind, NewAppointment,
    SlotKey,
};

use crate::models::{BookingOutcome, BookingRequest, Clock, SystemClock};
use crate::services::availability::SlotAvailabilityChecker;
use crate::services::classifier::ErrorClassifier;
use crate::services::lock::{BookingLockCoordinator, SweeperHandle};
use crate::services::reservation::SlotReservationService;
use crate::services::session::{SessionActivityMonitor, SessionHandle, SessionListener};
use crate::services::validation::BookingValidator;

/// Why a locked booking attempt did not produce an appointment.
enum Rejection {
    Unavailable,
    Failed(ClassifiedError),
}

/// Background sweeps of the lock table and soft holds. Dropping this stops
/// both.
#[derive(Debug)]
pub struct BackgroundSweeps {
    _locks: SweeperHandle,
    _holds: SweeperHandle,
}

/// Entry point for booking a slot: validate, lock, check, commit, and on a
/// conflict hand back alternatives instead of an error.
pub struct BookingCoordinator {
    store: Arc<dyn AppointmentStore>,
    locks: Arc<BookingLockCoordinator>,
    checker: Arc<SlotAvailabilityChecker>,
    reservations: Arc<SlotReservationService>,
    sessions: SessionActivityMonitor,
    validator: Arc<BookingValidator>,
    config: BookingConfig,
}

impl BookingCoordinator {
    pub fn new(store: Arc<dyn AppointmentStore>, config: BookingConfig) -> Self {
        let clock = Arc::new(SystemClock::from_config(&config));
        Self::with_clock(store, config, clock)
    }

    pub fn with_clock(store: Arc<dyn AppointmentStore>, config: BookingConfig, clock: Arc<dyn Clock>) -> Self {
        let locks = Arc::new(BookingLockCoordinator::new(config.lock_duration));
        let checker = Arc::new(SlotAvailabilityChecker::new(store.clone(), &config, clock.clone()));
        let validator = Arc::new(BookingValidator::new(clock, &config));
        let reservations = Arc::new(SlotReservationService::new(
            locks.clone(),
            checker.clone(),
            validator.clone(),
            &config,
        ));

        Self {
            store,
            locks,
            checker,
            reservations,
            sessions: SessionActivityMonitor::from_config(&config),
            validator,
            config,
        }
    }

    /// Start the periodic lock and soft-hold sweeps. Must be called from
    /// within a Tokio runtime.
    pub fn start_background_sweeps(&self) -> BackgroundSweeps {
        info!(
            interval_secs = self.config.lock_sweep_interval.as_secs(),
            "Starting slot hold sweepers"
        );
        BackgroundSweeps {
            _locks: self.locks.spawn_sweeper(self.config.lock_sweep_interval),
            _holds: self.reservations.spawn_sweeper(self.config.lock_sweep_interval),
        }
    }

    #[instrument(skip(self, request), fields(slot = %request.slot, holder_id = %request.holder_id))]
    pub async fn attempt_booking(&self, request: &BookingRequest) -> BookingOutcome {
        if let Err(err) = self.validator.validate(&request.slot, &request.holder_id) {
            warn!(kind = %err.kind(), "Rejected booking request: {}", err.message());
            return BookingOutcome::Failed(err);
        }

        match self.commit_under_lock(request).await {
            Ok(record) => {
                info!(appointment_id = %record.id, "Booking confirmed");
                BookingOutcome::Confirmed(record)
            }
            Err(Rejection::Unavailable) => {
                let alternatives = self.alternatives_for(&request.slot).await;
                warn!(alternatives = alternatives.len(), "Slot unavailable");
                BookingOutcome::SlotUnavailable { alternatives }
            }
            Err(Rejection::Failed(err)) => {
                error!(kind = %err.kind(), "Booking failed: {}", err.message());
                BookingOutcome::Failed(err)
            }
        }
    }

    /// The lock covers the availability read and the commit, and is released
    /// before any alternatives are searched.
    async fn commit_under_lock(&self, request: &BookingRequest) -> Result<AppointmentRecord, Rejection> {
        let slot = &request.slot;
        let holder_id = request.holder_id.as_str();

        // A re-entrant guard means this holder already has an attempt in
        // flight for the slot; only that attempt may commit.
        let guard = self.locks.lock(slot, holder_id);
        let Some(_guard) = guard.filter(|guard| !guard.is_reentrant()) else {
            return Err(Rejection::Failed(ClassifiedError::new(
                ErrorKind::LockContended,
                format!("Slot {} is being booked by another request", slot),
            )));
        };

        if self.reservations.is_held_by_other(slot, holder_id) {
            return Err(Rejection::Unavailable);
        }

        let available = self
            .checker
            .is_available(&slot.resource_id, slot.date, slot.time, request.exclude_appointment_id)
            .await
            .map_err(Rejection::Failed)?;
        if !available {
            return Err(Rejection::Unavailable);
        }

        // Reads may have outlasted the lock TTL; make sure it is still ours.
        if self.locks.try_acquire(slot, holder_id).is_none() {
            warn!("Booking lock lapsed and was taken over during availability checks");
            return Err(Rejection::Failed(ClassifiedError::new(
                ErrorKind::LockContended,
                format!("Slot {} is being booked by another request", slot),
            )));
        }

        let mut details = NewAppointment::for_slot(slot, request.patient());
        details.reschedule_of = request.exclude_appointment_id;
        details.notes = request.notes.clone();

        // Writes are not retried: a timed-out commit may still have landed.
        let record = self
            .with_deadline(self.store.commit_appointment(details))
            .await
            .map_err(|err| match err.kind() {
                ErrorKind::SlotUnavailable => Rejection::Unavailable,
                _ => Rejection::Failed(err),
            })?;

        self.reservations.release(slot, holder_id);
        Ok(record)
    }

    /// Suggestions for a taken slot. A failed search still reports the slot
    /// as unavailable, just without alternatives.
    async fn alternatives_for(&self, slot: &SlotKey) -> Vec<CandidateSlot> {
        match self
            .checker
            .find_alternatives(
                &slot.resource_id,
                slot.date,
                slot.time,
                self.checker.default_alternative_count(),
            )
            .await
        {
            Ok(alternatives) => alternatives,
            Err(err) => {
                warn!(kind = %err.kind(), "Could not compute alternatives: {}", err.message());
                Vec::new()
            }
        }
    }

    /// Move an appointment to `status`, e.g. to cancel or confirm it.
    #[instrument(skip(self, fields))]
    pub async fn update_status(
        &self,
        appointment_id: Uuid,
        status: AppointmentStatus,
        fields: Map<String, Value>,
    ) -> Result<AppointmentRecord, ClassifiedError> {
        let record = self
            .with_deadline(self.store.update_appointment_status(appointment_id, status, fields))
            .await?;
        info!(%status, "Appointment status updated");
        Ok(record)
    }

    async fn with_deadline<T, Fut>(&self, call: Fut) -> Result<T, ClassifiedError>
    where
        Fut: std::future::Future<Output = Result<T, StoreError>>,
    {
        let deadline: Duration = self.config.store_call_timeout;
        match timeout(deadline, call).await {
            Ok(result) => result.map_err(|err| ErrorClassifier::classify(&err)),
            Err(_) => Err(ErrorClassifier::classify(&StoreError::Timeout(deadline))),
        }
    }

    // ==========================================================================
    // SESSIONS
    // ==========================================================================

    pub fn begin_session(
        &self,
        session_id: impl Into<String>,
        listener: Arc<dyn SessionListener>,
    ) -> Result<SessionHandle, ClassifiedError> {
        self.sessions.begin_session(session_id, listener)
    }

    pub fn touch(&self, handle: &SessionHandle) -> bool {
        self.sessions.touch(handle)
    }

    pub fn end_session(&self, handle: &SessionHandle) -> bool {
        self.sessions.end_session(handle)
    }

    // ==========================================================================
    // COMPONENTS
    // ==========================================================================

    pub fn locks(&self) -> &Arc<BookingLockCoordinator> {
        &self.locks
    }

    pub fn checker(&self) -> &Arc<SlotAvailabilityChecker> {
        &self.checker
    }

    pub fn reservations(&self) -> &Arc<SlotReservationService> {
        &self.reservations
    }

    pub fn sessions(&self) -> &SessionActivityMonitor {
        &self.sessions
    }

    pub fn config(&self) -> &BookingConfig {
        &self.config
    }
}
