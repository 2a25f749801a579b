use chrono::{NaiveDate, NaiveTime};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, instrument};
use uuid::Uuid;

use shared_config::BookingConfig;
use shared_database::{AppointmentStore, StoreError};
use shared_models::{CandidateSlot, ClassifiedError};

use crate::models::Clock;
use crate::services::classifier::ErrorClassifier;
use crate::services::retry::RetryExecutor;
use crate::services::suggester::AlternativeSlotSuggester;

/// Read-only view of slot occupancy. Every store read runs under the call
/// deadline and the retry policy, and comes back as a `ClassifiedError` on
/// failure. A failed check never reads as "available".
pub struct SlotAvailabilityChecker {
    store: Arc<dyn AppointmentStore>,
    retry: RetryExecutor,
    call_timeout: Duration,
    suggester: AlternativeSlotSuggester,
}

impl SlotAvailabilityChecker {
    pub fn new(store: Arc<dyn AppointmentStore>, config: &BookingConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            retry: RetryExecutor::new(config.retry.clone()),
            call_timeout: config.store_call_timeout,
            suggester: AlternativeSlotSuggester::new(clock, config),
        }
    }

    /// True iff no occupying appointment other than `exclude_appointment_id`
    /// sits in the slot.
    #[instrument(skip(self))]
    pub async fn is_available(
        &self,
        resource_id: &str,
        date: NaiveDate,
        time: NaiveTime,
        exclude_appointment_id: Option<Uuid>,
    ) -> Result<bool, ClassifiedError> {
        let occupying = self
            .guarded_read("find_occupying_appointments", || {
                self.store.find_occupying_appointments(resource_id, date, time, exclude_appointment_id)
            })
            .await?;

        if !occupying.is_empty() {
            debug!(
                occupying = occupying.len(),
                "Slot occupied by {}",
                occupying.iter().map(|apt| apt.id.to_string()).collect::<Vec<_>>().join(", ")
            );
        }

        Ok(occupying.is_empty())
    }

    /// Free slots near the requested one, chronologically ordered.
    pub async fn find_alternatives(
        &self,
        resource_id: &str,
        date: NaiveDate,
        time: NaiveTime,
        max_count: usize,
    ) -> Result<Vec<CandidateSlot>, ClassifiedError> {
        self.suggester.suggest(self, resource_id, date, time, max_count).await
    }

    pub fn default_alternative_count(&self) -> usize {
        self.suggester.default_max_slots()
    }

    /// Unoccupied slot start times on `date`, ascending.
    pub async fn free_slots(&self, resource_id: &str, date: NaiveDate) -> Result<Vec<NaiveTime>, ClassifiedError> {
        let windows = self
            .guarded_read("availability_windows", || self.store.availability_windows(resource_id, date))
            .await?;

        let mut slots: Vec<NaiveTime> = windows.iter().flat_map(|window| window.slot_times()).collect();
        if slots.is_empty() {
            return Ok(slots);
        }

        let occupied = self
            .guarded_read("find_occupied_times", || self.store.find_occupied_times(resource_id, date))
            .await?;

        slots.sort();
        slots.dedup();
        slots.retain(|slot| !occupied.contains(slot));
        Ok(slots)
    }

    async fn guarded_read<T, F, Fut>(&self, operation: &'static str, mut call: F) -> Result<T, ClassifiedError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let deadline = self.call_timeout;

        let result = self
            .retry
            .run(|| {
                let pending = call();
                async move {
                    match timeout(deadline, pending).await {
                        Ok(Ok(value)) => Ok(value),
                        Ok(Err(err)) => Err(ErrorClassifier::classify(&err)),
                        Err(_) => Err(ErrorClassifier::classify(&StoreError::Timeout(deadline))),
                    }
                }
            })
            .await;

        if let Err(err) = &result {
            error!(operation, kind = %err.kind(), "Store read failed: {}", err.message());
        }
        result
    }
}
