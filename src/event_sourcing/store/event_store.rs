use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::crypto::SealedKey;
use crate::error::{EventSourcingError, Result};
use crate::event_sourcing::core::{NewEvent, StoredEvent};

// ============================================================================
// Event Store - Append-Only Log Contract
// ============================================================================
//
// Responsibilities:
// 1. Append events atomically (one stream or many in one commit)
// 2. Load a stream fully, up to a point in time, or by event type
// 3. Enforce optimistic concurrency on (stream_id, stream_version)
//
// Versions start at 1; an expected version of 0 means "stream must not exist".
//
// ============================================================================

/// New events for one stream, to be written after `expected_version`.
#[derive(Clone, Debug)]
pub struct StreamAppend {
    pub stream_id: Uuid,
    pub stream_name: String,
    pub expected_version: i64,
    pub events: Vec<NewEvent>,
}

impl StreamAppend {
    pub fn new(stream_id: Uuid, stream_name: impl Into<String>, expected_version: i64, events: Vec<NewEvent>) -> Self {
        Self {
            stream_id,
            stream_name: stream_name.into(),
            expected_version,
            events,
        }
    }

    pub fn new_version(&self) -> i64 {
        self.expected_version + self.events.len() as i64
    }
}

/// Everything one command persists: streams plus keys minted to encrypt them.
#[derive(Clone, Debug, Default)]
pub struct Commit {
    pub streams: Vec<StreamAppend>,
    pub new_keys: Vec<SealedKey>,
}

impl Commit {
    pub fn single(stream: StreamAppend) -> Self {
        Self {
            streams: vec![stream],
            new_keys: Vec::new(),
        }
    }

    pub fn event_count(&self) -> usize {
        self.streams.iter().map(|s| s.events.len()).sum()
    }

    pub(crate) fn check_distinct_streams(&self) -> Result<()> {
        for (i, stream) in self.streams.iter().enumerate() {
            if self.streams[..i].iter().any(|other| other.stream_id == stream.stream_id) {
                return Err(EventSourcingError::PersistenceFailure(format!(
                    "duplicate stream {} in commit",
                    stream.stream_id
                )));
            }
        }
        Ok(())
    }
}

/// Finite result of one load. Each `load` call re-reads storage; this is not
/// a live subscription.
#[derive(Debug)]
pub struct EventStream {
    events: std::vec::IntoIter<StoredEvent>,
}

impl EventStream {
    pub fn new(events: Vec<StoredEvent>) -> Self {
        Self {
            events: events.into_iter(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn into_vec(self) -> Vec<StoredEvent> {
        self.events.collect()
    }
}

impl Iterator for EventStream {
    type Item = StoredEvent;

    fn next(&mut self) -> Option<Self::Item> {
        self.events.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.events.size_hint()
    }
}

impl ExactSizeIterator for EventStream {}

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Events of a stream in version order, optionally only those with
    /// `occurred_on <= desired_time`.
    async fn load(&self, stream_id: Uuid, desired_time: Option<DateTime<Utc>>) -> Result<EventStream>;

    /// Like `load`, restricted to the given logical event names.
    async fn load_by_type(
        &self,
        stream_id: Uuid,
        event_names: &[String],
        desired_time: Option<DateTime<Utc>>,
    ) -> Result<EventStream>;

    /// Atomically persist every stream and key in the commit, or nothing.
    /// Returns the new version of each stream, in commit order.
    async fn commit(&self, commit: Commit) -> Result<Vec<i64>>;

    /// Current version of a stream, 0 if it has no events.
    async fn current_version(&self, stream_id: Uuid) -> Result<i64>;

    /// Append events to a single stream; returns the new version.
    async fn append(&self, stream: StreamAppend) -> Result<i64> {
        let versions = self.commit(Commit::single(stream)).await?;
        versions.into_iter().next().ok_or_else(|| {
            EventSourcingError::PersistenceFailure("commit returned no version".to_string())
        })
    }
}

pub(crate) fn event_allowed(event_name: &str, allow_list: Option<&[String]>) -> bool {
    allow_list.map_or(true, |names| names.iter().any(|name| name == event_name))
}

pub(crate) fn visible_at(occurred_on: DateTime<Utc>, desired_time: Option<DateTime<Utc>>) -> bool {
    desired_time.map_or(true, |at| occurred_on <= at)
}
