use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::crypto::{InMemoryKeyRepository, MasterKey, SealedKey};
use crate::error::{EventSourcingError, Result};
use crate::event_sourcing::core::StoredEvent;
use super::event_store::{event_allowed, visible_at, Commit, EventStore, EventStream};

// ============================================================================
// In-Memory Storage
// ============================================================================
//
// Events and keys live behind one mutex, so a commit that persists both is
// a single critical section: it either applies fully or not at all.
//
// ============================================================================

#[derive(Debug, Default)]
pub(crate) struct MemoryState {
    pub(crate) events: Vec<StoredEvent>,
    pub(crate) versions: HashMap<Uuid, i64>,
    pub(crate) keys: HashMap<Uuid, SealedKey>,
    pub(crate) next_sequence: i64,
}

#[derive(Clone, Debug, Default)]
pub struct MemoryStorage {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_store(&self) -> InMemoryEventStore {
        InMemoryEventStore {
            storage: self.clone(),
        }
    }

    pub fn key_repository(&self, master: Arc<MasterKey>) -> InMemoryKeyRepository {
        InMemoryKeyRepository::new(self.clone(), master)
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().await
    }
}

#[derive(Clone, Debug)]
pub struct InMemoryEventStore {
    storage: MemoryStorage,
}

impl InMemoryEventStore {
    async fn select(
        &self,
        stream_id: Uuid,
        allow_list: Option<&[String]>,
        desired_time: Option<DateTime<Utc>>,
    ) -> EventStream {
        let state = self.storage.lock().await;
        // Rows are appended in version order per stream.
        let events: Vec<StoredEvent> = state
            .events
            .iter()
            .filter(|e| e.stream_id == stream_id)
            .filter(|e| visible_at(e.occurred_on, desired_time))
            .filter(|e| event_allowed(&e.event_name, allow_list))
            .cloned()
            .collect();

        tracing::debug!(stream_id = %stream_id, event_count = events.len(), "Loaded events");
        EventStream::new(events)
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn load(&self, stream_id: Uuid, desired_time: Option<DateTime<Utc>>) -> Result<EventStream> {
        Ok(self.select(stream_id, None, desired_time).await)
    }

    async fn load_by_type(
        &self,
        stream_id: Uuid,
        event_names: &[String],
        desired_time: Option<DateTime<Utc>>,
    ) -> Result<EventStream> {
        Ok(self.select(stream_id, Some(event_names), desired_time).await)
    }

    async fn commit(&self, commit: Commit) -> Result<Vec<i64>> {
        commit.check_distinct_streams()?;
        let mut state = self.storage.lock().await;

        // Validate everything before touching state.
        for stream in &commit.streams {
            let actual_version = state.versions.get(&stream.stream_id).copied().unwrap_or(0);
            if actual_version != stream.expected_version {
                tracing::warn!(
                    stream_id = %stream.stream_id,
                    expected_version = stream.expected_version,
                    actual_version,
                    "Concurrency conflict"
                );
                return Err(EventSourcingError::ConcurrencyConflict {
                    stream_id: stream.stream_id,
                    expected_version: stream.expected_version,
                    actual_version,
                });
            }
        }
        if let Some(key) = commit.new_keys.iter().find(|key| state.keys.contains_key(&key.user_id)) {
            return Err(EventSourcingError::KeyAlreadyExists(key.user_id));
        }

        for key in commit.new_keys {
            state.keys.insert(key.user_id, key);
        }

        let mut versions = Vec::with_capacity(commit.streams.len());
        for stream in commit.streams {
            let mut version = stream.expected_version;
            for event in stream.events {
                version += 1;
                state.next_sequence += 1;
                let sequence_id = state.next_sequence;
                state.events.push(StoredEvent {
                    sequence_id,
                    stream_id: stream.stream_id,
                    stream_name: stream.stream_name.clone(),
                    stream_version: version,
                    event_name: event.event_name,
                    user_id: event.user_id,
                    payload: event.payload,
                    metadata: event.metadata,
                    occurred_on: event.occurred_on,
                });
            }
            state.versions.insert(stream.stream_id, version);
            versions.push(version);
        }

        Ok(versions)
    }

    async fn current_version(&self, stream_id: Uuid) -> Result<i64> {
        Ok(self.storage.lock().await.versions.get(&stream_id).copied().unwrap_or(0))
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_sourcing::core::{EventMetadata, NewEvent};
    use crate::event_sourcing::store::StreamAppend;
    use chrono::Duration;
    use serde_json::json;

    fn event(name: &str, occurred_on: DateTime<Utc>) -> NewEvent {
        NewEvent {
            event_name: name.to_string(),
            user_id: Uuid::nil(),
            payload: json!({ "amount": 10 }),
            metadata: EventMetadata::new(Uuid::new_v4()),
            occurred_on,
        }
    }

    fn names(stream: EventStream) -> Vec<String> {
        stream.map(|e| e.event_name).collect()
    }

    #[tokio::test]
    async fn test_append_advances_version() {
        let store = MemoryStorage::new().event_store();
        let stream_id = Uuid::new_v4();
        let now = Utc::now();

        let v = store
            .append(StreamAppend::new(stream_id, "envelope", 0, vec![event("created", now), event("credited", now)]))
            .await
            .unwrap();
        assert_eq!(v, 2);

        let v = store
            .append(StreamAppend::new(stream_id, "envelope", 2, vec![event("debited", now)]))
            .await
            .unwrap();
        assert_eq!(v, 3);
        assert_eq!(store.current_version(stream_id).await.unwrap(), 3);

        let loaded = store.load(stream_id, None).await.unwrap().into_vec();
        let versions: Vec<i64> = loaded.iter().map(|e| e.stream_version).collect();
        assert_eq!(versions, vec![1, 2, 3]);
        assert!(loaded.windows(2).all(|w| w[0].sequence_id < w[1].sequence_id));
    }

    #[tokio::test]
    async fn test_stale_version_conflicts_without_partial_write() {
        let store = MemoryStorage::new().event_store();
        let stream_id = Uuid::new_v4();
        let now = Utc::now();

        store.append(StreamAppend::new(stream_id, "envelope", 0, vec![event("created", now)])).await.unwrap();
        // Concurrent writer advances the stream first.
        store.append(StreamAppend::new(stream_id, "envelope", 1, vec![event("credited", now)])).await.unwrap();

        let result = store
            .append(StreamAppend::new(stream_id, "envelope", 1, vec![event("debited", now), event("debited", now)]))
            .await;
        assert!(matches!(
            result,
            Err(EventSourcingError::ConcurrencyConflict { expected_version: 1, actual_version: 2, .. })
        ));
        assert_eq!(names(store.load(stream_id, None).await.unwrap()), vec!["created", "credited"]);
    }

    #[tokio::test]
    async fn test_expected_version_zero_requires_new_stream() {
        let store = MemoryStorage::new().event_store();
        let stream_id = Uuid::new_v4();
        let now = Utc::now();

        store.append(StreamAppend::new(stream_id, "envelope", 0, vec![event("created", now)])).await.unwrap();
        let result = store.append(StreamAppend::new(stream_id, "envelope", 0, vec![event("created", now)])).await;
        assert!(result.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn test_load_up_to_desired_time_is_inclusive() {
        let store = MemoryStorage::new().event_store();
        let stream_id = Uuid::new_v4();
        let t0 = Utc::now() - Duration::hours(3);
        let t1 = t0 + Duration::hours(1);
        let t2 = t0 + Duration::hours(2);

        store
            .append(StreamAppend::new(
                stream_id,
                "envelope",
                0,
                vec![event("created", t0), event("credited", t1), event("debited", t2)],
            ))
            .await
            .unwrap();

        assert_eq!(names(store.load(stream_id, Some(t1)).await.unwrap()), vec!["created", "credited"]);
        assert_eq!(
            names(store.load(stream_id, Some(t2 - Duration::seconds(1))).await.unwrap()),
            vec!["created", "credited"]
        );
        assert!(store.load(stream_id, Some(t0 - Duration::seconds(1))).await.unwrap().is_empty());
        assert_eq!(store.load(stream_id, None).await.unwrap().remaining(), 3);
    }

    #[tokio::test]
    async fn test_load_by_type_filters_event_names() {
        let store = MemoryStorage::new().event_store();
        let stream_id = Uuid::new_v4();
        let now = Utc::now();

        store
            .append(StreamAppend::new(
                stream_id,
                "registry",
                0,
                vec![event("registered", now), event("renamed", now), event("released", now)],
            ))
            .await
            .unwrap();

        let allow = vec!["registered".to_string(), "released".to_string()];
        let loaded = store.load_by_type(stream_id, &allow, None).await.unwrap().into_vec();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].stream_version, 3);
    }

    #[tokio::test]
    async fn test_multi_stream_commit_is_all_or_nothing() {
        let storage = MemoryStorage::new();
        let store = storage.event_store();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let now = Utc::now();

        store.append(StreamAppend::new(second, "envelope", 0, vec![event("created", now)])).await.unwrap();

        let commit = Commit {
            streams: vec![
                StreamAppend::new(first, "envelope", 0, vec![event("created", now)]),
                // Stale: `second` is already at version 1.
                StreamAppend::new(second, "envelope", 0, vec![event("created", now)]),
            ],
            new_keys: Vec::new(),
        };
        assert!(store.commit(commit).await.unwrap_err().is_conflict());

        assert_eq!(store.current_version(first).await.unwrap(), 0);
        assert_eq!(store.current_version(second).await.unwrap(), 1);
        assert!(store.load(first, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_stream_in_commit_rejected() {
        let store = MemoryStorage::new().event_store();
        let stream_id = Uuid::new_v4();
        let now = Utc::now();

        let commit = Commit {
            streams: vec![
                StreamAppend::new(stream_id, "envelope", 0, vec![event("created", now)]),
                StreamAppend::new(stream_id, "envelope", 1, vec![event("credited", now)]),
            ],
            new_keys: Vec::new(),
        };
        assert!(matches!(store.commit(commit).await, Err(EventSourcingError::PersistenceFailure(_))));
    }

    #[tokio::test]
    async fn test_empty_append_is_version_probe() {
        let store = MemoryStorage::new().event_store();
        let stream_id = Uuid::new_v4();

        assert_eq!(store.append(StreamAppend::new(stream_id, "envelope", 0, vec![])).await.unwrap(), 0);
        assert!(store.append(StreamAppend::new(stream_id, "envelope", 4, vec![])).await.is_err());
    }
}
