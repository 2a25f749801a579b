use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use shared_models::{
    AppointmentRecord, AppointmentStatus, AvailabilityWindow, NewAppointment, OccupyingAppointment,
};

/// Raw failure from a store implementation, before classification.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("API error ({status}): {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
        details: Option<Value>,
    },

    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Appointment not found: {0}")]
    NotFound(String),
}

/// Source of truth for appointments. Implementations must enforce that at
/// most one occupying appointment exists per (resource, date, time): that
/// constraint is what keeps separate service instances from double booking.
#[async_trait]
pub trait AppointmentStore: Send + Sync {
    /// Occupying appointments in exactly this slot, minus `exclude_id`.
    async fn find_occupying_appointments(
        &self,
        resource_id: &str,
        date: NaiveDate,
        time: NaiveTime,
        exclude_id: Option<Uuid>,
    ) -> Result<Vec<OccupyingAppointment>, StoreError>;

    /// Start times of every occupying appointment on `date`.
    async fn find_occupied_times(
        &self,
        resource_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<NaiveTime>, StoreError>;

    /// Working windows of the resource on `date`; empty when not working.
    async fn availability_windows(
        &self,
        resource_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<AvailabilityWindow>, StoreError>;

    /// Insert (or move, for reschedules) an appointment. Returns
    /// `StoreError::UniqueViolation` when the slot is already occupied.
    async fn commit_appointment(
        &self,
        details: NewAppointment,
    ) -> Result<AppointmentRecord, StoreError>;

    async fn update_appointment_status(
        &self,
        id: Uuid,
        status: AppointmentStatus,
        fields: Map<String, Value>,
    ) -> Result<AppointmentRecord, StoreError>;
}
