use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::error::{EventSourcingError, Result};

// ============================================================================
// Event Envelope - Storage Shape of a Domain Event
// ============================================================================
//
// Three shapes flow through the core:
// - `NewEvent`: raised by an aggregate, ready to be appended
// - `StoredEvent`: one row of the event log, payload is a JSON document
// - `EventEnvelope<E>`: a stored event decoded back into its domain type
//
// ============================================================================

/// Request-scoped metadata recorded with every event.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EventMetadata {
    pub correlation_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, String>,
}

impl EventMetadata {
    pub fn new(correlation_id: Uuid) -> Self {
        Self {
            correlation_id,
            causation_id: None,
            attributes: HashMap::new(),
        }
    }

    /// Metadata for a request that has no upstream correlation id.
    pub fn for_request() -> Self {
        Self::new(Uuid::new_v4())
    }

    pub fn with_causation(mut self, causation_id: Uuid) -> Self {
        self.causation_id = Some(causation_id);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// An event waiting to be appended. Payload is already encoded (and, for
/// personal-data fields, already encrypted).
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct NewEvent {
    pub event_name: String,
    pub user_id: Uuid,
    pub payload: Value,
    pub metadata: EventMetadata,
    pub occurred_on: DateTime<Utc>,
}

/// One row of the append-only log.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct StoredEvent {
    pub sequence_id: i64,
    pub stream_id: Uuid,
    pub stream_name: String,
    pub stream_version: i64,
    pub event_name: String,
    pub user_id: Uuid,
    pub payload: Value,
    pub metadata: EventMetadata,
    pub occurred_on: DateTime<Utc>,
}

/// A stored event decoded into its domain type.
#[derive(Clone, Debug)]
pub struct EventEnvelope<E> {
    pub sequence_id: i64,
    pub stream_id: Uuid,
    pub stream_name: String,
    pub stream_version: i64,
    pub event_name: String,
    pub user_id: Uuid,
    pub event_data: E,
    pub metadata: EventMetadata,
    pub occurred_on: DateTime<Utc>,
}

impl<E> EventEnvelope<E> {
    pub fn from_stored(stored: StoredEvent, event_data: E) -> Self {
        Self {
            sequence_id: stored.sequence_id,
            stream_id: stored.stream_id,
            stream_name: stored.stream_name,
            stream_version: stored.stream_version,
            event_name: stored.event_name,
            user_id: stored.user_id,
            event_data,
            metadata: stored.metadata,
            occurred_on: stored.occurred_on,
        }
    }
}

// ============================================================================
// Domain Event Trait
// ============================================================================

/// Implemented by each aggregate's event enum.
///
/// The enum must serialize adjacently tagged (`#[serde(tag = "type", content = "data")]`);
/// the tag doubles as the last segment of the event's implementation path.
pub trait DomainEvent: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Module the event enum lives in, usually `module_path!()`.
    const MODULE_PATH: &'static str;

    /// Serde tag of this variant.
    fn event_type(&self) -> &'static str;

    /// Payload fields of `event_type` that carry personal data.
    fn personal_data_fields(_event_type: &str) -> &'static [&'static str] {
        &[]
    }

    /// Whether `event_type` is the owning user's own sign-up event.
    fn is_sign_up(_event_type: &str) -> bool {
        false
    }

    fn implementation_path(&self) -> String {
        implementation_path::<Self>(self.event_type())
    }
}

pub fn implementation_path<E: DomainEvent>(event_type: &str) -> String {
    format!("{}::{}", E::MODULE_PATH, event_type)
}

/// Last `::` segment of an implementation path (the variant tag).
pub fn variant_tag(path: &str) -> &str {
    path.rsplit("::").next().unwrap_or(path)
}

// ============================================================================
// Event Serialization Helpers
// ============================================================================

/// Split an event into its variant tag and its payload document.
pub fn encode_event<E: DomainEvent>(event: &E) -> Result<(String, Value)> {
    let encoded = serde_json::to_value(event)?;
    let Value::Object(mut fields) = encoded else {
        return Err(EventSourcingError::Codec(format!(
            "event {} did not serialize to an object",
            event.event_type()
        )));
    };

    let tag = match fields.remove("type") {
        Some(Value::String(tag)) => tag,
        _ => {
            return Err(EventSourcingError::Codec(format!(
                "event {} is missing its type tag",
                event.event_type()
            )))
        }
    };

    Ok((tag, fields.remove("data").unwrap_or(Value::Null)))
}

/// Rebuild an event from its variant tag and payload document.
pub fn decode_event<E: DomainEvent>(tag: &str, payload: Value) -> Result<E> {
    let mut fields = Map::new();
    fields.insert("type".to_string(), Value::String(tag.to_string()));
    if !payload.is_null() {
        fields.insert("data".to_string(), payload);
    }

    serde_json::from_value(Value::Object(fields))
        .map_err(|e| EventSourcingError::Codec(format!("cannot decode {}: {}", tag, e)))
}

// ============================================================================
// Tests
// ============================================================================
