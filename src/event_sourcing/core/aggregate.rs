use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{EventSourcingError, Result};
use super::event::{encode_event, DomainEvent, EventEnvelope};
use super::event_map::EventClassMap;

// ============================================================================
// Aggregate Root Pattern - Event Sourcing Core
// ============================================================================
//
// Key Principles:
// 1. State is derived from events (not stored directly)
// 2. Commands are validated before emitting events
// 3. Events represent facts that have already happened
// 4. All state changes flow through events
//
// `Aggregate` is the domain-facing trait. `AggregateRoot<A>` wraps it with
// identity, versioning and the uncommitted-event buffer.
//
// ============================================================================

/// Generic Aggregate trait - all event-sourced aggregates implement this
///
/// `Default` is the empty state a stream is folded onto.
pub trait Aggregate: Default + Send + Sync + 'static {
    type Event: DomainEvent;
    type Command;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Apply one event to the current state
    fn apply_event(&mut self, event: &Self::Event) -> Result<(), Self::Error>;

    /// Handle command and emit events (business logic)
    fn handle_command(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;
}

/// An event raised in memory but not yet persisted.
#[derive(Clone, Debug)]
pub struct RaisedEvent<E> {
    pub event: E,
    pub occurred_on: DateTime<Utc>,
}

/// An uncommitted event encoded for the store, before field encryption.
#[derive(Clone, Debug)]
pub struct PendingEvent {
    pub event_type: String,
    pub event_name: String,
    pub personal_data_fields: &'static [&'static str],
    pub is_sign_up: bool,
    pub user_id: Uuid,
    pub payload: Value,
    pub occurred_on: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AggregateRoot<A: Aggregate> {
    stream_id: Uuid,
    user_id: Uuid,
    stream_name: Option<String>,
    committed_version: i64,
    applied: usize,
    state: A,
    uncommitted: Vec<RaisedEvent<A::Event>>,
}

impl<A: Aggregate> AggregateRoot<A> {
    /// A brand-new stream owned by `user_id`.
    pub fn new(stream_id: Uuid, user_id: Uuid) -> Self {
        Self {
            stream_id,
            user_id,
            stream_name: None,
            committed_version: 0,
            applied: 0,
            state: A::default(),
            uncommitted: Vec::new(),
        }
    }

    /// Fold an ordered event history onto the empty state.
    pub fn fold<I>(stream_id: Uuid, events: I) -> Result<Self>
    where
        I: IntoIterator<Item = Result<EventEnvelope<A::Event>>>,
    {
        let mut root: Option<Self> = None;

        for envelope in events {
            let envelope = envelope?;
            let root = root.get_or_insert_with(|| {
                let mut root = Self::new(stream_id, envelope.user_id);
                root.stream_name = Some(envelope.stream_name.clone());
                root
            });

            if envelope.stream_version <= root.committed_version {
                return Err(EventSourcingError::Fold(format!(
                    "stream {} out of order: version {} after {}",
                    stream_id, envelope.stream_version, root.committed_version
                )));
            }

            root.state.apply_event(&envelope.event_data).map_err(|e| {
                EventSourcingError::Fold(format!(
                    "stream {} version {}: {}",
                    stream_id, envelope.stream_version, e
                ))
            })?;
            root.committed_version = envelope.stream_version;
            root.applied += 1;
        }

        root.ok_or(EventSourcingError::EventsNotFoundForAggregate {
            stream_id,
            desired_time: None,
        })
    }

    /// Load aggregate from an already materialised event history
    pub fn load_from_events(stream_id: Uuid, events: Vec<EventEnvelope<A::Event>>) -> Result<Self> {
        Self::fold(stream_id, events.into_iter().map(Ok))
    }

    /// Run a command against current state; emitted events are applied and
    /// buffered as uncommitted. Returns how many events were raised.
    pub fn handle(&mut self, command: &A::Command) -> Result<usize, A::Error> {
        let events = self.state.handle_command(command)?;
        let count = events.len();
        for event in events {
            self.record_that(event)?;
        }
        Ok(count)
    }

    /// Raise a single event directly.
    pub fn record_that(&mut self, event: A::Event) -> Result<(), A::Error> {
        self.state.apply_event(&event)?;
        self.applied += 1;
        self.uncommitted.push(RaisedEvent {
            event,
            occurred_on: Utc::now(),
        });
        Ok(())
    }

    pub fn stream_id(&self) -> Uuid {
        self.stream_id
    }

    /// Owner used for key lookup.
    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn state(&self) -> &A {
        &self.state
    }

    /// Number of events applied to this instance (loaded + raised).
    pub fn applied_events(&self) -> usize {
        self.applied
    }

    /// Stream version including uncommitted events.
    pub fn version(&self) -> i64 {
        self.committed_version + self.uncommitted.len() as i64
    }

    /// Version last confirmed by the store; the expected version for the next append.
    pub fn committed_version(&self) -> i64 {
        self.committed_version
    }

    pub fn uncommitted_events(&self) -> &[RaisedEvent<A::Event>] {
        &self.uncommitted
    }

    pub fn has_uncommitted_events(&self) -> bool {
        !self.uncommitted.is_empty()
    }

    /// Stream name recorded on load, else resolved from the first raised event.
    pub fn resolve_stream_name(&self, map: &EventClassMap) -> Option<String> {
        self.stream_name.clone().or_else(|| {
            self.uncommitted
                .first()
                .map(|raised| map.stream_name_for(&raised.event.implementation_path()))
        })
    }

    /// Encode uncommitted events for appending.
    pub fn pending_events(&self, map: &EventClassMap) -> Result<Vec<PendingEvent>> {
        self.uncommitted
            .iter()
            .map(|raised| {
                let (event_type, payload) = encode_event(&raised.event)?;
                Ok(PendingEvent {
                    event_name: map.logical_name(&raised.event.implementation_path()),
                    personal_data_fields: A::Event::personal_data_fields(&event_type),
                    is_sign_up: A::Event::is_sign_up(&event_type),
                    event_type,
                    user_id: self.user_id,
                    payload,
                    occurred_on: raised.occurred_on,
                })
            })
            .collect()
    }

    /// Clear the uncommitted buffer once the store confirmed `new_version`.
    pub fn mark_committed(&mut self, new_version: i64) {
        self.committed_version = new_version;
        self.uncommitted.clear();
    }
}
