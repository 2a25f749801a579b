use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ==============================================================================
// SLOT IDENTITY
// ==============================================================================

/// A (resource, date, time) slot. Equality is exact on all three fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotKey {
    pub resource_id: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
}

impl SlotKey {
    pub fn new(resource_id: impl Into<String>, date: NaiveDate, time: NaiveTime) -> Self {
        Self {
            resource_id: resource_id.into(),
            date,
            time,
        }
    }

    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.time)
    }

    /// Slot keys are minute-granular; anything with seconds is malformed.
    pub fn is_minute_aligned(&self) -> bool {
        self.time.second() == 0 && self.time.nanosecond() == 0
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.resource_id, self.date, self.time.format("%H:%M"))
    }
}

/// A free (date, time) pair proposed to a caller whose slot was taken.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CandidateSlot {
    pub date: NaiveDate,
    pub time: NaiveTime,
}

impl CandidateSlot {
    pub fn new(date: NaiveDate, time: NaiveTime) -> Self {
        Self { date, time }
    }
}

impl fmt::Display for CandidateSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.date, self.time.format("%H:%M"))
    }
}

// ==============================================================================
// APPOINTMENT RECORDS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Upcoming,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    pub const OCCUPYING: [AppointmentStatus; 3] = [
        AppointmentStatus::Pending,
        AppointmentStatus::Confirmed,
        AppointmentStatus::Upcoming,
    ];

    /// Whether an appointment in this status blocks its slot.
    pub fn is_occupying(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Pending | AppointmentStatus::Confirmed | AppointmentStatus::Upcoming
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Upcoming => "upcoming",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable appointment entity. Owned by the store; the booking core only
/// reads the occupancy projection and asks the store for transitions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppointmentRecord {
    pub id: Uuid,
    pub resource_id: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub status: AppointmentStatus,
    pub patient_id: String,
    pub notes: Option<String>,
}

impl AppointmentRecord {
    pub fn slot_key(&self) -> SlotKey {
        SlotKey::new(self.resource_id.clone(), self.date, self.time)
    }
}

/// The `{id, status}` projection returned by occupancy queries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OccupyingAppointment {
    pub id: Uuid,
    pub status: AppointmentStatus,
}

/// Details handed to the store when committing a booking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewAppointment {
    pub resource_id: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub patient_id: String,
    pub status: AppointmentStatus,
    /// Move this appointment instead of inserting a new one.
    pub reschedule_of: Option<Uuid>,
    pub notes: Option<String>,
}

impl NewAppointment {
    pub fn for_slot(slot: &SlotKey, patient_id: impl Into<String>) -> Self {
        Self {
            resource_id: slot.resource_id.clone(),
            date: slot.date,
            time: slot.time,
            patient_id: patient_id.into(),
            status: AppointmentStatus::Upcoming,
            reschedule_of: None,
            notes: None,
        }
    }

    pub fn slot_key(&self) -> SlotKey {
        SlotKey::new(self.resource_id.clone(), self.date, self.time)
    }
}

// ==============================================================================
// WORKING HOURS
// ==============================================================================

/// A resource's working window on a given date, cut into fixed-length slots.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AvailabilityWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub slot_minutes: u32,
}

impl AvailabilityWindow {
    pub fn new(start: NaiveTime, end: NaiveTime, slot_minutes: u32) -> Self {
        Self {
            start,
            end,
            slot_minutes,
        }
    }

    /// Start times of every slot that fits entirely inside the window.
    pub fn slot_times(&self) -> Vec<NaiveTime> {
        if self.slot_minutes == 0 || self.start >= self.end {
            return Vec::new();
        }

        let step = Duration::minutes(i64::from(self.slot_minutes));
        let mut times = Vec::new();
        let mut current = self.start;

        // NaiveTime arithmetic wraps at midnight, so compare via the offset
        // from the window start instead of the wrapped time.
        let window_len = self.end - self.start;
        let mut offset = Duration::zero();
        while offset + step <= window_len {
            times.push(current);
            current += step;
            offset += step;
        }

        times
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn window_yields_slots_that_fit() {
        let window = AvailabilityWindow::new(t(9, 0), t(10, 45), 30);
        assert_eq!(window.slot_times(), vec![t(9, 0), t(9, 30), t(10, 0)]);
    }

    #[test]
    fn window_ending_at_midnight_does_not_wrap() {
        let window = AvailabilityWindow::new(t(23, 0), NaiveTime::from_hms_opt(23, 59, 0).unwrap(), 30);
        assert_eq!(window.slot_times(), vec![t(23, 0)]);
    }

    #[test]
    fn empty_or_inverted_windows_have_no_slots() {
        assert!(AvailabilityWindow::new(t(10, 0), t(9, 0), 30).slot_times().is_empty());
        assert!(AvailabilityWindow::new(t(9, 0), t(10, 0), 0).slot_times().is_empty());
    }

    #[test]
    fn only_active_statuses_occupy() {
        assert!(AppointmentStatus::Pending.is_occupying());
        assert!(AppointmentStatus::Confirmed.is_occupying());
        assert!(AppointmentStatus::Upcoming.is_occupying());
        assert!(!AppointmentStatus::Completed.is_occupying());
        assert!(!AppointmentStatus::Cancelled.is_occupying());
    }

    #[test]
    fn slot_keys_compare_exactly() {
        let date = NaiveDate::from_ymd_opt(2025, 12, 1).unwrap();
        let a = SlotKey::new("dentist-1", date, t(10, 0));
        assert_eq!(a, SlotKey::new("dentist-1", date, t(10, 0)));
        assert_ne!(a, SlotKey::new("dentist-1", date, t(10, 30)));
        assert_ne!(a, SlotKey::new("Dentist-1", date, t(10, 0)));
        assert_eq!(a.to_string(), "dentist-1-2025-12-01-10:00");
    }
}
