//! Typed error hierarchy for Pontual.
//!
//! A single `Error` enum flows from the storage adapters through the timer
//! lifecycle and the WhatsApp dispatcher up to the HTTP layer, where
//! `api::ApiError` maps each variant to a status code.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// A request that is well-formed but clashes with current state, such as
    /// starting a second timer on the same task.
    #[error("{0}")]
    Conflict(String),

    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(anyhow::Error::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_carries_entity_and_id() {
        let err = Error::not_found("Task", 42);
        match &err {
            Error::NotFound { entity, id } => {
                assert_eq!(*entity, "Task");
                assert_eq!(*id, 42);
            }
            _ => panic!("Expected NotFound"),
        }
        assert_eq!(err.to_string(), "Task 42 not found");
    }

    #[test]
    fn validation_names_the_field() {
        let err = Error::validation("name", "must not be empty");
        assert_eq!(err.to_string(), "Invalid name: must not be empty");
    }

    #[test]
    fn conflict_message_is_passed_through() {
        let err = Error::conflict("Timer already active for task 3");
        assert_eq!(err.to_string(), "Timer already active for task 3");
    }

    #[test]
    fn rusqlite_errors_become_database_errors() {
        let err: Error = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, Error::Database(_)));
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
