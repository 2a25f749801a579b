use serde_json::json;
use tracing::debug;

use shared_database::StoreError;
use shared_models::{ClassifiedError, ErrorKind};

const UNIQUE_VIOLATION: &str = "23505";
const POSTGREST_CONFLICT: &str = "PGRST409";
const POSTGREST_JWT: &str = "PGRST301";
const POSTGREST_NO_ROWS: &str = "PGRST116";

/// Maps raw store failures onto the closed `ErrorKind` taxonomy. Nothing
/// downstream of this type looks at `StoreError` or HTTP details.
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn classify(error: &StoreError) -> ClassifiedError {
        let classified = match error {
            StoreError::UniqueViolation(message) => {
                ClassifiedError::new(ErrorKind::SlotUnavailable, message.clone())
            }
            StoreError::Api { status, code, message, details } => {
                let kind = Self::kind_for_api(*status, code.as_deref());
                ClassifiedError::with_details(
                    kind,
                    message.clone(),
                    json!({ "status": status, "code": code, "details": details }),
                )
            }
            StoreError::Transport(err) => Self::classify_transport(err),
            StoreError::Connection(message) => {
                ClassifiedError::new(ErrorKind::NetworkError, message.clone())
            }
            StoreError::Timeout(after) => {
                ClassifiedError::timeout(format!("Store call exceeded {}ms", after.as_millis()))
            }
            StoreError::Decode(err) => {
                ClassifiedError::new(ErrorKind::DatabaseError, format!("Unreadable store response: {}", err))
            }
            StoreError::InvalidInput(message) => ClassifiedError::validation(message.clone()),
            StoreError::NotFound(what) => {
                ClassifiedError::new(ErrorKind::UnknownError, format!("Not found: {}", what))
            }
        };

        debug!(kind = %classified.kind(), "Classified store error: {}", error);
        classified
    }

    /// Classify an arbitrary error, as returned by collaborator callbacks.
    pub fn classify_any(error: &anyhow::Error) -> ClassifiedError {
        if let Some(classified) = error.downcast_ref::<ClassifiedError>() {
            return classified.clone();
        }
        if let Some(store_error) = error.downcast_ref::<StoreError>() {
            return Self::classify(store_error);
        }
        if let Some(err) = error.downcast_ref::<reqwest::Error>() {
            return Self::classify_transport(err);
        }
        if error.downcast_ref::<tokio::time::error::Elapsed>().is_some() {
            return ClassifiedError::timeout(error.to_string());
        }

        Self::classify_message(&error.to_string())
    }

    fn kind_for_api(status: u16, code: Option<&str>) -> ErrorKind {
        if status == 409 || matches!(code, Some(UNIQUE_VIOLATION) | Some(POSTGREST_CONFLICT)) {
            return ErrorKind::SlotUnavailable;
        }
        if matches!(status, 401 | 403 | 404) || matches!(code, Some(POSTGREST_JWT) | Some(POSTGREST_NO_ROWS)) {
            return ErrorKind::UnknownError;
        }
        if matches!(status, 408 | 504) {
            return ErrorKind::Timeout;
        }
        // Postgres classes 22 (data exception) and 23 (integrity constraint)
        if code.is_some_and(|c| c.len() == 5 && (c.starts_with("22") || c.starts_with("23"))) {
            return ErrorKind::ValidationFailed;
        }
        if (500..600).contains(&status) {
            return ErrorKind::ServerError;
        }
        if code.is_some() {
            return ErrorKind::DatabaseError;
        }
        if matches!(status, 400 | 422) {
            return ErrorKind::ValidationFailed;
        }
        ErrorKind::UnknownError
    }

    fn classify_transport(err: &reqwest::Error) -> ClassifiedError {
        if err.is_timeout() {
            return ClassifiedError::timeout(err.to_string());
        }
        if let Some(status) = err.status() {
            return ClassifiedError::new(Self::kind_for_api(status.as_u16(), None), err.to_string());
        }
        if err.is_decode() {
            return ClassifiedError::new(ErrorKind::DatabaseError, err.to_string());
        }
        ClassifiedError::new(ErrorKind::NetworkError, err.to_string())
    }

    fn classify_message(message: &str) -> ClassifiedError {
        let lowered = message.to_lowercase();

        let kind = if lowered.contains("network") || lowered.contains("fetch") || lowered.contains("connection") {
            ErrorKind::NetworkError
        } else if lowered.contains("timeout") || lowered.contains("timed out") {
            ErrorKind::Timeout
        } else if lowered.contains("validation failed") {
            ErrorKind::ValidationFailed
        } else {
            ErrorKind::UnknownError
        };

        ClassifiedError::new(kind, message)
    }
}
