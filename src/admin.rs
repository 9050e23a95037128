use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::crypto::KeyManagementRepository;
use crate::error::Result;
use crate::event_sourcing::core::Aggregate;
use crate::event_sourcing::repository::EventSourcedRepository;
use crate::metrics::Metrics;

// ============================================================================
// Administrative Operations
// ============================================================================
//
// Rewind and replay rebuild an aggregate for inspection; neither writes
// events. Erasure deletes a user's key, which makes every personal field
// encrypted under it unreadable (crypto-shredding).
//
// ============================================================================

#[derive(Debug, Clone)]
pub enum AdminCommand {
    /// State as of `to` (inclusive).
    RewindAggregate { aggregate_id: Uuid, to: DateTime<Utc> },
    /// Full fold, or a fold of only the listed logical event names.
    ReplayAggregate {
        aggregate_id: Uuid,
        only: Option<Vec<String>>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregateSnapshot<A> {
    pub aggregate_id: Uuid,
    /// Version of the last event folded.
    pub version: i64,
    pub as_of: Option<DateTime<Utc>>,
    pub event_count: usize,
    pub state: A,
}

pub struct AdminService<A: Aggregate> {
    repository: EventSourcedRepository<A>,
    keys: Arc<dyn KeyManagementRepository>,
    metrics: Arc<Metrics>,
}

impl<A: Aggregate + Clone> AdminService<A> {
    pub fn new(
        repository: EventSourcedRepository<A>,
        keys: Arc<dyn KeyManagementRepository>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            repository,
            keys,
            metrics,
        }
    }

    pub async fn execute(&self, command: AdminCommand) -> Result<AggregateSnapshot<A>> {
        match command {
            AdminCommand::RewindAggregate { aggregate_id, to } => self.rewind(aggregate_id, to).await,
            AdminCommand::ReplayAggregate { aggregate_id, only } => {
                self.replay(aggregate_id, only.as_deref()).await
            }
        }
    }

    pub async fn rewind(&self, aggregate_id: Uuid, to: DateTime<Utc>) -> Result<AggregateSnapshot<A>> {
        let root = self.repository.get(aggregate_id, Some(to)).await?;

        tracing::info!(
            aggregate_id = %aggregate_id,
            to = %to,
            version = root.committed_version(),
            "⏪ Rewound aggregate"
        );

        Ok(AggregateSnapshot {
            aggregate_id,
            version: root.committed_version(),
            as_of: Some(to),
            event_count: root.applied_events(),
            state: root.state().clone(),
        })
    }

    pub async fn replay(&self, aggregate_id: Uuid, only: Option<&[String]>) -> Result<AggregateSnapshot<A>> {
        let root = match only {
            Some(names) => self.repository.get_filtered(aggregate_id, names, None).await?,
            None => self.repository.get(aggregate_id, None).await?,
        };

        tracing::info!(
            aggregate_id = %aggregate_id,
            filtered = only.is_some(),
            event_count = root.applied_events(),
            "🔁 Replayed aggregate"
        );

        Ok(AggregateSnapshot {
            aggregate_id,
            version: root.committed_version(),
            as_of: None,
            event_count: root.applied_events(),
            state: root.state().clone(),
        })
    }

    /// Delete the user's key. Returns whether a key existed.
    pub async fn erase_user(&self, user_id: Uuid) -> Result<bool> {
        let deleted = self.keys.delete_key(user_id).await?;
        if deleted {
            self.metrics.record_key_shredded();
            tracing::info!(user_id = %user_id, "🗑️ Erased user: encryption key deleted");
        } else {
            tracing::warn!(user_id = %user_id, "Erase requested but user has no key");
        }
        Ok(deleted)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::master_key::test_master_key;
    use crate::crypto::FieldEncryptor;
    use crate::domain::default_event_map;
    use crate::domain::envelope::{Envelope, EnvelopeCommand, EnvelopeEvent};
    use crate::domain::user::{SignUp, User, UserCommand};
    use crate::error::EventSourcingError;
    use crate::event_sourcing::core::{AggregateRoot, EventClassMap, EventMetadata};
    use crate::event_sourcing::store::{EventStore, MemoryStorage};
    use std::time::Duration;

    struct Fixture {
        store: Arc<dyn EventStore>,
        keys: Arc<dyn KeyManagementRepository>,
        encryptor: Arc<FieldEncryptor>,
        event_map: Arc<EventClassMap>,
    }

    fn fixture() -> Fixture {
        let storage = MemoryStorage::new();
        let master = Arc::new(test_master_key());
        let keys: Arc<dyn KeyManagementRepository> = Arc::new(storage.key_repository(master.clone()));
        Fixture {
            store: Arc::new(storage.event_store()),
            encryptor: Arc::new(FieldEncryptor::new(keys.clone(), master)),
            keys,
            event_map: Arc::new(default_event_map().unwrap()),
        }
    }

    impl Fixture {
        fn repository<A: Aggregate>(&self) -> EventSourcedRepository<A> {
            EventSourcedRepository::new(self.store.clone(), self.encryptor.clone(), self.event_map.clone())
        }

        fn admin<A: Aggregate + Clone>(&self) -> AdminService<A> {
            AdminService::new(self.repository(), self.keys.clone(), Arc::new(Metrics::new().unwrap()))
        }
    }

    #[tokio::test]
    async fn test_rewind_between_versions() {
        let fx = fixture();
        let envelopes = fx.repository::<Envelope>();
        let id = Uuid::new_v4();

        let mut root = AggregateRoot::<Envelope>::new(id, Uuid::new_v4());
        root.handle(&EnvelopeCommand::Create { name: "S1".to_string() }).unwrap();
        root.handle(&EnvelopeCommand::Credit { amount: 100 }).unwrap();
        assert_eq!(envelopes.save(&mut root, &EventMetadata::for_request()).await.unwrap(), 2);

        tokio::time::sleep(Duration::from_millis(5)).await;
        let between = Utc::now();
        tokio::time::sleep(Duration::from_millis(5)).await;

        root.handle(&EnvelopeCommand::Debit { amount: 30 }).unwrap();
        assert_eq!(envelopes.save(&mut root, &EventMetadata::for_request()).await.unwrap(), 3);

        let history = envelopes.history(id, Some(between)).await.unwrap();
        let events: Vec<&EnvelopeEvent> = history.iter().map(|e| &e.event_data).collect();
        assert!(matches!(events.as_slice(), [EnvelopeEvent::Created(_), EnvelopeEvent::Credited(_)]));

        let snapshot = fx
            .admin::<Envelope>()
            .execute(AdminCommand::RewindAggregate { aggregate_id: id, to: between })
            .await
            .unwrap();
        assert_eq!(snapshot.version, 2);
        assert_eq!(snapshot.state.balance, 100);
        assert_eq!(snapshot.as_of, Some(between));

        // Read-only: the stream is still at version 3.
        assert_eq!(fx.store.current_version(id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_rewind_before_first_event_is_not_found() {
        let fx = fixture();
        let id = Uuid::new_v4();
        let before = Utc::now() - chrono::Duration::minutes(1);

        let mut root = AggregateRoot::<Envelope>::new(id, Uuid::new_v4());
        root.handle(&EnvelopeCommand::Create { name: "S1".to_string() }).unwrap();
        fx.repository::<Envelope>().save(&mut root, &EventMetadata::for_request()).await.unwrap();

        let result = fx.admin::<Envelope>().rewind(id, before).await;
        assert!(matches!(
            result,
            Err(EventSourcingError::EventsNotFoundForAggregate { desired_time: Some(t), .. }) if t == before
        ));
    }

    #[tokio::test]
    async fn test_replay_full_and_filtered() {
        let fx = fixture();
        let id = Uuid::new_v4();

        let mut root = AggregateRoot::<Envelope>::new(id, Uuid::new_v4());
        root.handle(&EnvelopeCommand::Create { name: "S1".to_string() }).unwrap();
        root.handle(&EnvelopeCommand::Credit { amount: 100 }).unwrap();
        root.handle(&EnvelopeCommand::Debit { amount: 40 }).unwrap();
        root.handle(&EnvelopeCommand::Rename { name: "S2".to_string() }).unwrap();
        fx.repository::<Envelope>().save(&mut root, &EventMetadata::for_request()).await.unwrap();

        let admin = fx.admin::<Envelope>();
        let full = admin
            .execute(AdminCommand::ReplayAggregate { aggregate_id: id, only: None })
            .await
            .unwrap();
        assert_eq!(full.version, 4);
        assert_eq!(full.state.balance, 60);
        assert_eq!(full.state.name.as_deref(), Some("S2"));

        let only = vec!["envelope_created".to_string(), "envelope_credited".to_string()];
        let filtered = admin
            .execute(AdminCommand::ReplayAggregate { aggregate_id: id, only: Some(only) })
            .await
            .unwrap();
        assert_eq!(filtered.event_count, 2);
        assert_eq!(filtered.version, 2);
        assert_eq!(filtered.state.balance, 100);
        assert_eq!(filtered.state.name.as_deref(), Some("S1"));

        // Skipping the creation event makes the fold fail.
        let result = admin.replay(id, Some(&["envelope_debited".to_string()])).await;
        assert!(matches!(result, Err(EventSourcingError::Fold(_))));
    }

    #[tokio::test]
    async fn test_erase_user_shreds_personal_data_only() {
        let fx = fixture();
        let user_id = Uuid::new_v4();
        let envelope_id = Uuid::new_v4();

        let mut user = AggregateRoot::<User>::new(user_id, user_id);
        user.handle(&UserCommand::SignUp(SignUp::sample(user_id))).unwrap();
        fx.repository::<User>().save(&mut user, &EventMetadata::for_request()).await.unwrap();

        let mut envelope = AggregateRoot::<Envelope>::new(envelope_id, user_id);
        envelope.handle(&EnvelopeCommand::Create { name: "rent".to_string() }).unwrap();
        fx.repository::<Envelope>().save(&mut envelope, &EventMetadata::for_request()).await.unwrap();

        let admin = fx.admin::<User>();
        assert!(admin.erase_user(user_id).await.unwrap());
        assert!(!admin.erase_user(user_id).await.unwrap());

        let result = fx.repository::<User>().get(user_id, None).await;
        assert!(matches!(result, Err(EventSourcingError::KeyNotFound(id)) if id == user_id));

        // Non-personal streams of the same user still replay.
        let envelope = fx.repository::<Envelope>().get(envelope_id, None).await.unwrap();
        assert_eq!(envelope.state().name.as_deref(), Some("rent"));
    }
}
