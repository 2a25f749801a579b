use chrono::{Days, NaiveDate, NaiveTime};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use shared_config::BookingConfig;
use shared_models::{CandidateSlot, ClassifiedError};

use crate::models::Clock;
use crate::services::availability::SlotAvailabilityChecker;

/// Proposes free slots after a requested one turned out to be taken: the
/// rest of the requested day first, then a bounded walk over the following
/// days.
pub struct AlternativeSlotSuggester {
    clock: Arc<dyn Clock>,
    search_days: u32,
    per_day: usize,
    default_max_slots: usize,
}

impl AlternativeSlotSuggester {
    pub fn new(clock: Arc<dyn Clock>, config: &BookingConfig) -> Self {
        Self {
            clock,
            search_days: config.alternative_search_days,
            per_day: config.alternatives_per_day,
            default_max_slots: config.max_alternatives,
        }
    }

    pub fn default_max_slots(&self) -> usize {
        self.default_max_slots
    }

    /// A failed day is logged and skipped. Only when every checked day fails
    /// is the last error returned.
    #[instrument(skip(self, checker))]
    pub async fn suggest(
        &self,
        checker: &SlotAvailabilityChecker,
        resource_id: &str,
        requested_date: NaiveDate,
        requested_time: NaiveTime,
        max_slots: usize,
    ) -> Result<Vec<CandidateSlot>, ClassifiedError> {
        let mut suggestions = Vec::with_capacity(max_slots);
        if max_slots == 0 {
            return Ok(suggestions);
        }

        let now = self.clock.now();
        let mut days_checked = 0usize;
        let mut failures = 0usize;
        let mut last_error = None;

        for offset in 0..=self.search_days {
            if suggestions.len() >= max_slots {
                break;
            }
            let Some(date) = requested_date.checked_add_days(Days::new(u64::from(offset))) else {
                break;
            };

            days_checked += 1;
            let free = match checker.free_slots(resource_id, date).await {
                Ok(free) => free,
                Err(err) => {
                    warn!(%date, kind = %err.kind(), "Skipping day in alternative search: {}", err.message());
                    failures += 1;
                    last_error = Some(err);
                    continue;
                }
            };

            let remaining = max_slots - suggestions.len();
            let limit = if offset == 0 { remaining } else { remaining.min(self.per_day) };

            suggestions.extend(
                free.into_iter()
                    .filter(|time| !(offset == 0 && *time == requested_time))
                    .filter(|time| date.and_time(*time) > now)
                    .take(limit)
                    .map(|time| CandidateSlot::new(date, time)),
            );
        }

        if failures == days_checked {
            if let Some(err) = last_error {
                return Err(err);
            }
        }

        debug!(found = suggestions.len(), "Alternative slot search finished");
        Ok(suggestions)
    }
}
