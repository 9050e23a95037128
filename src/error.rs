use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::utils::IsTransient;

// ============================================================================
// Event Sourcing Errors
// ============================================================================
//
// Conflicts and not-found are expected control flow for command handlers.
// Persistence and encryption failures abort the current command.
//
// ============================================================================

pub type Result<T, E = EventSourcingError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum EventSourcingError {
    #[error(
        "Concurrency conflict on stream {stream_id}: expected version {expected_version}, \
         but current is {actual_version}"
    )]
    ConcurrencyConflict {
        stream_id: Uuid,
        expected_version: i64,
        actual_version: i64,
    },

    #[error("No events found for aggregate {stream_id}{}", fmt_as_of(.desired_time))]
    EventsNotFoundForAggregate {
        stream_id: Uuid,
        desired_time: Option<DateTime<Utc>>,
    },

    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("Encryption failure: {0}")]
    EncryptionFailure(String),

    #[error("Encryption key already exists for user {0}")]
    KeyAlreadyExists(Uuid),

    #[error("Encryption key not found for user {0}")]
    KeyNotFound(Uuid),

    #[error("Event codec error: {0}")]
    Codec(String),

    #[error("Aggregate rejected event during replay: {0}")]
    Fold(String),

    #[error("Unit of work is not tracking aggregates")]
    UnitOfWorkNotTracking,

    #[error("Configuration error: {0}")]
    Config(String),
}

fn fmt_as_of(desired_time: &Option<DateTime<Utc>>) -> String {
    match desired_time {
        Some(at) => format!(" as of {}", at.to_rfc3339()),
        None => String::new(),
    }
}

impl EventSourcingError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::EventsNotFoundForAggregate { .. })
    }
}

impl IsTransient for EventSourcingError {
    fn is_transient(&self) -> bool {
        self.is_conflict()
    }

    fn conflict(&self) -> Option<&EventSourcingError> {
        self.is_conflict().then_some(self)
    }
}

impl From<sqlx::Error> for EventSourcingError {
    fn from(err: sqlx::Error) -> Self {
        Self::PersistenceFailure(err.to_string())
    }
}

impl From<serde_json::Error> for EventSourcingError {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

impl From<serde_yaml::Error> for EventSourcingError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Config(err.to_string())
    }
}
