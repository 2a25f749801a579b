use chrono::{Duration as ChronoDuration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use shared_config::BookingConfig;
use shared_models::{AppointmentRecord, CandidateSlot, ClassifiedError, ErrorKind, SlotKey};

// ==============================================================================
// BOOKING REQUESTS AND OUTCOMES
// ==============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct BookingRequest {
    pub slot: SlotKey,
    /// Lock and soft-hold owner, usually the patient or booking session id.
    pub holder_id: String,
    /// Patient recorded on the appointment. Falls back to `holder_id`.
    pub patient_id: Option<String>,
    /// Appointment being rescheduled; it never conflicts with itself.
    pub exclude_appointment_id: Option<Uuid>,
    pub notes: Option<String>,
}

impl BookingRequest {
    pub fn new(slot: SlotKey, holder_id: impl Into<String>) -> Self {
        Self {
            slot,
            holder_id: holder_id.into(),
            patient_id: None,
            exclude_appointment_id: None,
            notes: None,
        }
    }

    pub fn for_patient(mut self, patient_id: impl Into<String>) -> Self {
        self.patient_id = Some(patient_id.into());
        self
    }

    pub fn rescheduling(mut self, appointment_id: Uuid) -> Self {
        self.exclude_appointment_id = Some(appointment_id);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn patient(&self) -> &str {
        self.patient_id.as_deref().unwrap_or(&self.holder_id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BookingOutcome {
    Confirmed(AppointmentRecord),
    SlotUnavailable { alternatives: Vec<CandidateSlot> },
    Failed(ClassifiedError),
}

impl BookingOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, BookingOutcome::Confirmed(_))
    }

    /// Error kind a caller would report for this outcome, if any.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            BookingOutcome::Confirmed(_) => None,
            BookingOutcome::SlotUnavailable { .. } => Some(ErrorKind::SlotUnavailable),
            BookingOutcome::Failed(error) => Some(error.kind()),
        }
    }

    pub fn alternatives(&self) -> &[CandidateSlot] {
        match self {
            BookingOutcome::SlotUnavailable { alternatives } => alternatives,
            _ => &[],
        }
    }
}

// ==============================================================================
// RESERVATION HOLDS
// ==============================================================================

/// In-memory claim on a slot. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ReservationHold {
    pub slot: SlotKey,
    pub holder_id: String,
    pub created_at: Instant,
    pub expires_at: Instant,
}

impl ReservationHold {
    pub fn new(slot: SlotKey, holder_id: impl Into<String>, created_at: Instant, ttl: Duration) -> Self {
        Self {
            slot,
            holder_id: holder_id.into(),
            created_at,
            expires_at: created_at + ttl,
        }
    }

    pub fn is_live_at(&self, now: Instant) -> bool {
        now < self.expires_at
    }

    pub fn is_owned_by(&self, holder_id: &str) -> bool {
        self.holder_id == holder_id
    }
}

// ==============================================================================
// CLOCK
// ==============================================================================

/// Wall clock in clinic-local time, used to reject past slots and to keep
/// suggestions in the future. Timers use `tokio::time::Instant` instead.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

#[derive(Debug, Clone)]
pub struct SystemClock {
    utc_offset: ChronoDuration,
}

impl SystemClock {
    pub fn new(utc_offset_minutes: i32) -> Self {
        Self {
            utc_offset: ChronoDuration::minutes(i64::from(utc_offset_minutes)),
        }
    }

    pub fn from_config(config: &BookingConfig) -> Self {
        Self::new(config.clinic_utc_offset_minutes)
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Utc::now().naive_utc() + self.utc_offset
    }
}

#[derive(Debug)]
pub struct FixedClock {
    now: RwLock<NaiveDateTime>,
}

impl FixedClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            now: RwLock::new(now),
        }
    }

    pub fn set(&self, now: NaiveDateTime) {
        *self.now.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = now;
    }

    pub fn advance(&self, by: ChronoDuration) {
        let mut now = self.now.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ==============================================================================
// BOOKING SESSIONS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Active,
    Warned,
    Expired,
    /// Closed by the caller or by monitor shutdown.
    Ended,
}

impl SessionPhase {
    pub fn is_usable(&self) -> bool {
        matches!(self, SessionPhase::Active | SessionPhase::Warned)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub last_activity: Instant,
    pub expires_at: Instant,
    /// Kind of the latest autosave failure; cleared by the next good save.
    pub autosave_error: Option<ErrorKind>,
}
