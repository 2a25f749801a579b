use chrono::Duration as ChronoDuration;
use std::sync::Arc;

use shared_config::BookingConfig;
use shared_models::{ClassifiedError, SlotKey};

use crate::models::Clock;

/// Rejects booking and reservation requests that no store call could make
/// valid.
pub struct BookingValidator {
    clock: Arc<dyn Clock>,
    max_advance_days: i64,
}

impl BookingValidator {
    pub fn new(clock: Arc<dyn Clock>, config: &BookingConfig) -> Self {
        Self {
            clock,
            max_advance_days: config.max_advance_days,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn validate(&self, slot: &SlotKey, holder_id: &str) -> Result<(), ClassifiedError> {
        if slot.resource_id.trim().is_empty() {
            return Err(ClassifiedError::validation("Resource id is required"));
        }
        if holder_id.trim().is_empty() {
            return Err(ClassifiedError::validation("Holder id is required"));
        }
        if !slot.is_minute_aligned() {
            return Err(ClassifiedError::validation(format!(
                "Slot time {} must be on a whole minute",
                slot.time
            )));
        }

        let now = self.clock.now();
        let starts_at = slot.starts_at();
        if starts_at <= now {
            return Err(ClassifiedError::validation(format!(
                "Cannot book a time slot in the past ({})",
                slot
            )));
        }
        if starts_at > now + ChronoDuration::days(self.max_advance_days) {
            return Err(ClassifiedError::validation(format!(
                "Cannot book more than {} days in advance",
                self.max_advance_days
            )));
        }

        Ok(())
    }
}
