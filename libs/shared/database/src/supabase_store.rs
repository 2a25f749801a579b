use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, NaiveTime};
use reqwest::{
    header::{HeaderMap, HeaderValue},
    Method,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use shared_models::{
    AppointmentRecord, AppointmentStatus, AvailabilityWindow, NewAppointment, OccupyingAppointment,
};

use crate::store::{AppointmentStore, StoreError};
use crate::supabase::SupabaseClient;

const DEFAULT_SLOT_MINUTES: u32 = 30;

/// `status=in.(...)` filter matching every occupying status.
fn occupying_filter() -> String {
    let statuses: Vec<&str> = AppointmentStatus::OCCUPYING.iter().map(|s| s.as_str()).collect();
    format!("status=in.({})", statuses.join(","))
}

/// Times are stored as "HH:MM" but Postgres `time` columns come back as "HH:MM:SS".
fn parse_time(raw: &str) -> Result<NaiveTime, StoreError> {
    NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .map_err(|e| StoreError::InvalidInput(format!("Invalid time '{}': {}", raw, e)))
}

#[derive(Debug, Deserialize)]
struct AppointmentRow {
    id: Uuid,
    dentist_id: String,
    patient_id: String,
    appointment_date: NaiveDate,
    appointment_time: String,
    status: AppointmentStatus,
    notes: Option<String>,
}

impl AppointmentRow {
    fn into_record(self) -> Result<AppointmentRecord, StoreError> {
        Ok(AppointmentRecord {
            id: self.id,
            resource_id: self.dentist_id,
            date: self.appointment_date,
            time: parse_time(&self.appointment_time)?,
            status: self.status,
            patient_id: self.patient_id,
            notes: self.notes,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TimeRow {
    appointment_time: String,
}

#[derive(Debug, Deserialize)]
struct AvailabilityRow {
    start_time: String,
    end_time: String,
    slot_duration_minutes: Option<u32>,
}

/// `AppointmentStore` over Supabase's PostgREST API. The `appointments`
/// table is expected to carry a partial unique index on
/// (dentist_id, appointment_date, appointment_time) for occupying statuses.
pub struct SupabaseAppointmentStore {
    supabase: Arc<SupabaseClient>,
    auth_token: Option<String>,
}

impl SupabaseAppointmentStore {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self {
            supabase,
            auth_token: None,
        }
    }

    /// Run every request as the given user instead of the anon role.
    pub fn with_auth_token(mut self, auth_token: impl Into<String>) -> Self {
        self.auth_token = Some(auth_token.into());
        self
    }

    fn return_representation() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("Prefer", HeaderValue::from_static("return=representation"));
        headers
    }

    async fn write_returning(
        &self,
        method: Method,
        path: &str,
        body: Value,
    ) -> Result<AppointmentRecord, StoreError> {
        let rows: Vec<AppointmentRow> = self.supabase.request_with_headers(
            method,
            path,
            self.auth_token.as_deref(),
            Some(body),
            Some(Self::return_representation()),
        ).await?;

        rows.into_iter()
            .next()
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?
            .into_record()
    }
}

#[async_trait]
impl AppointmentStore for SupabaseAppointmentStore {
    async fn find_occupying_appointments(
        &self,
        resource_id: &str,
        date: NaiveDate,
        time: NaiveTime,
        exclude_id: Option<Uuid>,
    ) -> Result<Vec<OccupyingAppointment>, StoreError> {
        let mut query_parts = vec![
            format!("dentist_id=eq.{}", urlencoding::encode(resource_id)),
            format!("appointment_date=eq.{}", date),
            format!("appointment_time=eq.{}", time.format("%H:%M")),
            occupying_filter(),
        ];

        if let Some(exclude_id) = exclude_id {
            query_parts.push(format!("id=neq.{}", exclude_id));
        }

        let path = format!("/rest/v1/appointments?{}&select=id,status", query_parts.join("&"));

        let rows: Vec<OccupyingAppointment> = self.supabase.request(
            Method::GET,
            &path,
            self.auth_token.as_deref(),
            None,
        ).await?;

        debug!("Found {} occupying appointments for {} on {} at {}", rows.len(), resource_id, date, time);
        Ok(rows)
    }

    async fn find_occupied_times(
        &self,
        resource_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<NaiveTime>, StoreError> {
        let path = format!(
            "/rest/v1/appointments?dentist_id=eq.{}&appointment_date=eq.{}&{}&select=appointment_time",
            urlencoding::encode(resource_id),
            date,
            occupying_filter(),
        );

        let rows: Vec<TimeRow> = self.supabase.request(
            Method::GET,
            &path,
            self.auth_token.as_deref(),
            None,
        ).await?;

        rows.iter().map(|row| parse_time(&row.appointment_time)).collect()
    }

    async fn availability_windows(
        &self,
        resource_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<AvailabilityWindow>, StoreError> {
        // day_of_week follows the 0 = Sunday convention of the schedule table.
        let path = format!(
            "/rest/v1/dentist_availability?dentist_id=eq.{}&day_of_week=eq.{}&is_available=eq.true&select=start_time,end_time,slot_duration_minutes&order=start_time.asc",
            urlencoding::encode(resource_id),
            date.weekday().num_days_from_sunday(),
        );

        let rows: Vec<AvailabilityRow> = self.supabase.request(
            Method::GET,
            &path,
            self.auth_token.as_deref(),
            None,
        ).await?;

        rows.into_iter()
            .map(|row| {
                Ok(AvailabilityWindow::new(
                    parse_time(&row.start_time)?,
                    parse_time(&row.end_time)?,
                    row.slot_duration_minutes.unwrap_or(DEFAULT_SLOT_MINUTES),
                ))
            })
            .collect()
    }

    async fn commit_appointment(
        &self,
        details: NewAppointment,
    ) -> Result<AppointmentRecord, StoreError> {
        let appointment_time = details.time.format("%H:%M").to_string();

        let record = match details.reschedule_of {
            Some(appointment_id) => {
                let body = json!({
                    "dentist_id": details.resource_id,
                    "appointment_date": details.date,
                    "appointment_time": appointment_time,
                    "status": details.status,
                });
                let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
                self.write_returning(Method::PATCH, &path, body).await?
            }
            None => {
                let body = json!({
                    "dentist_id": details.resource_id,
                    "patient_id": details.patient_id,
                    "appointment_date": details.date,
                    "appointment_time": appointment_time,
                    "status": details.status,
                    "notes": details.notes,
                });
                self.write_returning(Method::POST, "/rest/v1/appointments", body).await?
            }
        };

        info!("Committed appointment {} for {} on {} at {}",
              record.id, record.resource_id, record.date, appointment_time);
        Ok(record)
    }

    async fn update_appointment_status(
        &self,
        id: Uuid,
        status: AppointmentStatus,
        fields: Map<String, Value>,
    ) -> Result<AppointmentRecord, StoreError> {
        let mut body = fields;
        body.insert("status".to_string(), json!(status));

        let path = format!("/rest/v1/appointments?id=eq.{}", id);
        let record = self.write_returning(Method::PATCH, &path, Value::Object(body)).await?;

        info!("Appointment {} moved to status {}", id, status);
        Ok(record)
    }
}
