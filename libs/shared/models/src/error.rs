use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Closed set of failure kinds surfaced by the booking core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    SlotUnavailable,
    LockContended,
    ValidationFailed,
    NetworkError,
    Timeout,
    ServerError,
    DatabaseError,
    UnknownError,
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::NetworkError
                | ErrorKind::Timeout
                | ErrorKind::ServerError
                | ErrorKind::DatabaseError
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::SlotUnavailable => "SLOT_UNAVAILABLE",
            ErrorKind::LockContended => "LOCK_CONTENDED",
            ErrorKind::ValidationFailed => "VALIDATION_FAILED",
            ErrorKind::NetworkError => "NETWORK_ERROR",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::ServerError => "SERVER_ERROR",
            ErrorKind::DatabaseError => "DATABASE_ERROR",
            ErrorKind::UnknownError => "UNKNOWN_ERROR",
        }
    }

    /// Text safe to show an end user. Never carries internal detail.
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorKind::SlotUnavailable => "This time slot is no longer available",
            ErrorKind::LockContended => {
                "Another patient is currently booking this slot. Please wait or select a different time."
            }
            ErrorKind::ValidationFailed => "Please check your input and try again",
            ErrorKind::NetworkError => {
                "Network connection error. Please check your internet connection"
            }
            ErrorKind::Timeout => "Request timed out. Please try again",
            ErrorKind::ServerError => "Server error. Please try again later",
            ErrorKind::DatabaseError => "Database error. Please try again",
            ErrorKind::UnknownError => {
                "An unexpected error occurred. Please try again or contact support if the problem persists."
            }
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The only error shape that leaves the booking core. Built once by the
/// classifier and never mutated afterwards.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct ClassifiedError {
    kind: ErrorKind,
    message: String,
    retryable: bool,
    details: Option<Value>,
}

impl ClassifiedError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: kind.is_retryable(),
            details: None,
        }
    }

    pub fn with_details(kind: ErrorKind, message: impl Into<String>, details: Value) -> Self {
        Self {
            details: Some(details),
            ..Self::new(kind, message)
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationFailed, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    pub fn details(&self) -> Option<&Value> {
        self.details.as_ref()
    }

    pub fn user_message(&self) -> &'static str {
        self.kind.user_message()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn retryability_is_fixed_per_kind() {
        let retryable: Vec<ErrorKind> = [
            ErrorKind::SlotUnavailable,
            ErrorKind::LockContended,
            ErrorKind::ValidationFailed,
            ErrorKind::NetworkError,
            ErrorKind::Timeout,
            ErrorKind::ServerError,
            ErrorKind::DatabaseError,
            ErrorKind::UnknownError,
        ]
        .into_iter()
        .filter(|kind| ClassifiedError::new(*kind, "x").is_retryable())
        .collect();

        assert_eq!(
            retryable,
            vec![
                ErrorKind::NetworkError,
                ErrorKind::Timeout,
                ErrorKind::ServerError,
                ErrorKind::DatabaseError
            ]
        );
    }

    #[test]
    fn user_message_hides_internal_detail() {
        let error = ClassifiedError::with_details(
            ErrorKind::DatabaseError,
            "relation \"appointments\" does not exist",
            json!({ "code": "42P01" }),
        );
        assert!(!error.user_message().contains("appointments"));
        assert_eq!(error.to_string(), "DATABASE_ERROR: relation \"appointments\" does not exist");
    }

    #[test]
    fn kinds_serialize_in_wire_case() {
        let value = serde_json::to_value(ErrorKind::LockContended).unwrap();
        assert_eq!(value, json!("LOCK_CONTENDED"));
    }
}
