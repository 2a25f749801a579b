use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, NaiveTime, Weekday};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_models::{
    AppointmentRecord, AppointmentStatus, AvailabilityWindow, NewAppointment, OccupyingAppointment,
    SlotKey,
};

use crate::store::{AppointmentStore, StoreError};

const ALL_WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// Process-local appointment store. The occupancy check and the write happen
/// under the same lock, so it enforces slot uniqueness the same way the
/// database index does.
#[derive(Default)]
pub struct InMemoryAppointmentStore {
    appointments: Mutex<Vec<AppointmentRecord>>,
    availability: Mutex<HashMap<(String, Weekday), Vec<AvailabilityWindow>>>,
}

impl InMemoryAppointmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Same working windows on every day of the week.
    pub async fn set_weekly_hours(&self, resource_id: &str, windows: Vec<AvailabilityWindow>) {
        let mut availability = self.availability.lock().await;
        for weekday in ALL_WEEKDAYS {
            availability.insert((resource_id.to_string(), weekday), windows.clone());
        }
    }

    pub async fn set_availability(
        &self,
        resource_id: &str,
        weekday: Weekday,
        windows: Vec<AvailabilityWindow>,
    ) {
        self.availability
            .lock()
            .await
            .insert((resource_id.to_string(), weekday), windows);
    }

    pub async fn appointments(&self) -> Vec<AppointmentRecord> {
        self.appointments.lock().await.clone()
    }

    pub async fn occupying_count(&self, slot: &SlotKey) -> usize {
        self.appointments
            .lock()
            .await
            .iter()
            .filter(|apt| apt.status.is_occupying() && apt.slot_key() == *slot)
            .count()
    }

    fn conflicts(
        appointments: &[AppointmentRecord],
        slot: &SlotKey,
        exclude_id: Option<Uuid>,
    ) -> bool {
        appointments.iter().any(|apt| {
            apt.status.is_occupying()
                && Some(apt.id) != exclude_id
                && apt.resource_id == slot.resource_id
                && apt.date == slot.date
                && apt.time == slot.time
        })
    }
}

#[async_trait]
impl AppointmentStore for InMemoryAppointmentStore {
    async fn find_occupying_appointments(
        &self,
        resource_id: &str,
        date: NaiveDate,
        time: NaiveTime,
        exclude_id: Option<Uuid>,
    ) -> Result<Vec<OccupyingAppointment>, StoreError> {
        let appointments = self.appointments.lock().await;
        Ok(appointments
            .iter()
            .filter(|apt| {
                apt.status.is_occupying()
                    && Some(apt.id) != exclude_id
                    && apt.resource_id == resource_id
                    && apt.date == date
                    && apt.time == time
            })
            .map(|apt| OccupyingAppointment {
                id: apt.id,
                status: apt.status,
            })
            .collect())
    }

    async fn find_occupied_times(
        &self,
        resource_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<NaiveTime>, StoreError> {
        let appointments = self.appointments.lock().await;
        Ok(appointments
            .iter()
            .filter(|apt| apt.status.is_occupying() && apt.resource_id == resource_id && apt.date == date)
            .map(|apt| apt.time)
            .collect())
    }

    async fn availability_windows(
        &self,
        resource_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<AvailabilityWindow>, StoreError> {
        Ok(self
            .availability
            .lock()
            .await
            .get(&(resource_id.to_string(), date.weekday()))
            .cloned()
            .unwrap_or_default())
    }

    async fn commit_appointment(
        &self,
        details: NewAppointment,
    ) -> Result<AppointmentRecord, StoreError> {
        let slot = details.slot_key();
        let mut appointments = self.appointments.lock().await;

        if details.status.is_occupying()
            && Self::conflicts(&appointments, &slot, details.reschedule_of)
        {
            warn!("Rejecting commit for occupied slot {}", slot);
            return Err(StoreError::UniqueViolation(format!(
                "slot {} already has an occupying appointment",
                slot
            )));
        }

        let record = match details.reschedule_of {
            Some(id) => {
                let existing = appointments
                    .iter_mut()
                    .find(|apt| apt.id == id)
                    .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
                existing.resource_id = details.resource_id;
                existing.date = details.date;
                existing.time = details.time;
                existing.status = details.status;
                if details.notes.is_some() {
                    existing.notes = details.notes;
                }
                existing.clone()
            }
            None => {
                let record = AppointmentRecord {
                    id: Uuid::new_v4(),
                    resource_id: details.resource_id,
                    date: details.date,
                    time: details.time,
                    status: details.status,
                    patient_id: details.patient_id,
                    notes: details.notes,
                };
                appointments.push(record.clone());
                record
            }
        };

        debug!("Stored appointment {} in slot {}", record.id, slot);
        Ok(record)
    }

    async fn update_appointment_status(
        &self,
        id: Uuid,
        status: AppointmentStatus,
        fields: Map<String, Value>,
    ) -> Result<AppointmentRecord, StoreError> {
        let mut appointments = self.appointments.lock().await;

        let current = appointments
            .iter()
            .find(|apt| apt.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        // Re-activating a cancelled appointment must not double book its slot.
        if status.is_occupying()
            && !current.status.is_occupying()
            && Self::conflicts(&appointments, &current.slot_key(), Some(id))
        {
            return Err(StoreError::UniqueViolation(format!(
                "slot {} already has an occupying appointment",
                current.slot_key()
            )));
        }

        let record = appointments
            .iter_mut()
            .find(|apt| apt.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        record.status = status;
        if let Some(Value::String(notes)) = fields.get("notes") {
            record.notes = Some(notes.clone());
        }

        Ok(record.clone())
    }
}
