use std::marker::PhantomData;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::crypto::{FieldEncryptor, KeyRing};
use crate::error::{EventSourcingError, Result};
use crate::event_sourcing::core::{
    decode_event, variant_tag, Aggregate, AggregateRoot, DomainEvent, EventClassMap, EventEnvelope,
    EventMetadata,
};
use crate::event_sourcing::store::{Commit, EventStore, EventStream};
use crate::event_sourcing::unit_of_work::prepare_stream;

// ============================================================================
// Event-Sourced Repository
// ============================================================================
//
// Load:  store → decrypt personal fields → decode → fold
// Save:  encode → encrypt personal fields → append
//
// Holds no state across calls; every load uses its own key ring.
//
// ============================================================================

pub struct EventSourcedRepository<A: Aggregate> {
    store: Arc<dyn EventStore>,
    encryptor: Arc<FieldEncryptor>,
    event_map: Arc<EventClassMap>,
    _phantom: PhantomData<fn() -> A>,
}

impl<A: Aggregate> Clone for EventSourcedRepository<A> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            encryptor: self.encryptor.clone(),
            event_map: self.event_map.clone(),
            _phantom: PhantomData,
        }
    }
}

impl<A: Aggregate> EventSourcedRepository<A> {
    pub fn new(
        store: Arc<dyn EventStore>,
        encryptor: Arc<FieldEncryptor>,
        event_map: Arc<EventClassMap>,
    ) -> Self {
        Self {
            store,
            encryptor,
            event_map,
            _phantom: PhantomData,
        }
    }

    /// Reconstruct the aggregate as of `desired_time` (or now).
    pub async fn get(&self, stream_id: Uuid, desired_time: Option<DateTime<Utc>>) -> Result<AggregateRoot<A>> {
        let history = self.history(stream_id, desired_time).await?;
        fold_history(stream_id, history, desired_time)
    }

    /// Reconstruct from only the listed logical event names.
    pub async fn get_filtered(
        &self,
        stream_id: Uuid,
        event_names: &[String],
        desired_time: Option<DateTime<Utc>>,
    ) -> Result<AggregateRoot<A>> {
        let stream = self.store.load_by_type(stream_id, event_names, desired_time).await?;
        let history = self.decode_stream(stream).await?;
        fold_history(stream_id, history, desired_time)
    }

    /// Decrypted, decoded events of a stream.
    pub async fn history(
        &self,
        stream_id: Uuid,
        desired_time: Option<DateTime<Utc>>,
    ) -> Result<Vec<EventEnvelope<A::Event>>> {
        let stream = self.store.load(stream_id, desired_time).await?;
        self.decode_stream(stream).await
    }

    pub async fn exists(&self, stream_id: Uuid) -> Result<bool> {
        Ok(self.store.current_version(stream_id).await? > 0)
    }

    /// Encrypt and append the aggregate's uncommitted events.
    pub async fn save(&self, root: &mut AggregateRoot<A>, metadata: &EventMetadata) -> Result<i64> {
        if !root.has_uncommitted_events() {
            return Ok(root.committed_version());
        }

        let mut ring = KeyRing::new();
        let stream = prepare_stream(&*root, &self.event_map, &self.encryptor, &mut ring, metadata).await?;
        let event_count = stream.events.len();
        let commit = Commit {
            streams: vec![stream],
            new_keys: ring.take_minted(),
        };

        let new_version = self
            .store
            .commit(commit)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EventSourcingError::PersistenceFailure("commit returned no version".to_string()))?;
        root.mark_committed(new_version);

        tracing::info!(
            stream_id = %root.stream_id(),
            new_version,
            event_count,
            "✅ Saved aggregate"
        );
        Ok(new_version)
    }

    async fn decode_stream(&self, stream: EventStream) -> Result<Vec<EventEnvelope<A::Event>>> {
        let mut ring = KeyRing::new();
        let mut history = Vec::with_capacity(stream.remaining());

        for mut stored in stream {
            let path = self.event_map.implementation_path(&stored.event_name);
            let tag = variant_tag(&path).to_string();
            let fields = <A::Event as DomainEvent>::personal_data_fields(&tag);

            self.encryptor.decrypt(&mut ring, fields, &mut stored).await?;
            let event = decode_event::<A::Event>(&tag, std::mem::take(&mut stored.payload))?;
            history.push(EventEnvelope::from_stored(stored, event));
        }

        Ok(history)
    }
}

fn fold_history<A: Aggregate>(
    stream_id: Uuid,
    history: Vec<EventEnvelope<A::Event>>,
    desired_time: Option<DateTime<Utc>>,
) -> Result<AggregateRoot<A>> {
    AggregateRoot::load_from_events(stream_id, history).map_err(|err| match err {
        EventSourcingError::EventsNotFoundForAggregate { stream_id, .. } => {
            EventSourcingError::EventsNotFoundForAggregate { stream_id, desired_time }
        }
        other => other,
    })
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::master_key::test_master_key;
    use crate::crypto::KeyManagementRepository;
    use crate::domain::default_event_map;
    use crate::domain::envelope::{Envelope, EnvelopeCommand};
    use crate::domain::user::{SignUp, User, UserCommand};
    use crate::event_sourcing::core::NewEvent;
    use crate::event_sourcing::store::{MemoryStorage, StreamAppend};
    use serde_json::json;

    fn repository<A: Aggregate>() -> (EventSourcedRepository<A>, Arc<dyn EventStore>) {
        let storage = MemoryStorage::new();
        let master = Arc::new(test_master_key());
        let store: Arc<dyn EventStore> = Arc::new(storage.event_store());
        let keys: Arc<dyn KeyManagementRepository> = Arc::new(storage.key_repository(master.clone()));
        let repository = EventSourcedRepository::new(
            store.clone(),
            Arc::new(FieldEncryptor::new(keys, master)),
            Arc::new(default_event_map().unwrap()),
        );
        (repository, store)
    }

    #[tokio::test]
    async fn test_save_and_get_round_trip() {
        let (envelopes, _) = repository::<Envelope>();
        let id = Uuid::new_v4();
        let owner = Uuid::new_v4();

        let mut root = AggregateRoot::<Envelope>::new(id, owner);
        root.handle(&EnvelopeCommand::Create { name: "travel".to_string() }).unwrap();
        root.handle(&EnvelopeCommand::Credit { amount: 75 }).unwrap();
        assert_eq!(envelopes.save(&mut root, &EventMetadata::for_request()).await.unwrap(), 2);
        assert!(!root.has_uncommitted_events());

        let loaded = envelopes.get(id, None).await.unwrap();
        assert_eq!(loaded.state(), root.state());
        assert_eq!(loaded.committed_version(), 2);
        assert_eq!(loaded.user_id(), owner);
        assert!(envelopes.exists(id).await.unwrap());
    }

    #[tokio::test]
    async fn test_save_without_changes_is_noop() {
        let (envelopes, store) = repository::<Envelope>();
        let id = Uuid::new_v4();
        let mut root = AggregateRoot::<Envelope>::new(id, Uuid::new_v4());

        assert_eq!(envelopes.save(&mut root, &EventMetadata::for_request()).await.unwrap(), 0);
        assert_eq!(store.current_version(id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_get_empty_stream_is_not_found() {
        let (envelopes, _) = repository::<Envelope>();
        let id = Uuid::new_v4();

        let result = envelopes.get(id, None).await;
        assert!(matches!(
            result,
            Err(EventSourcingError::EventsNotFoundForAggregate { stream_id, desired_time: None }) if stream_id == id
        ));
        assert!(!envelopes.exists(id).await.unwrap());
    }

    #[tokio::test]
    async fn test_stale_save_conflicts() {
        let (envelopes, _) = repository::<Envelope>();
        let id = Uuid::new_v4();
        let mut root = AggregateRoot::<Envelope>::new(id, Uuid::new_v4());
        root.handle(&EnvelopeCommand::Create { name: "fuel".to_string() }).unwrap();
        envelopes.save(&mut root, &EventMetadata::for_request()).await.unwrap();

        let mut first = envelopes.get(id, None).await.unwrap();
        let mut second = envelopes.get(id, None).await.unwrap();
        first.handle(&EnvelopeCommand::Credit { amount: 1 }).unwrap();
        second.handle(&EnvelopeCommand::Credit { amount: 2 }).unwrap();

        envelopes.save(&mut first, &EventMetadata::for_request()).await.unwrap();
        let result = envelopes.save(&mut second, &EventMetadata::for_request()).await;
        assert!(result.unwrap_err().is_conflict());
        assert!(second.has_uncommitted_events());
    }

    #[tokio::test]
    async fn test_personal_data_is_encrypted_at_rest() {
        let (users, store) = repository::<User>();
        let user_id = Uuid::new_v4();

        let mut root = AggregateRoot::<User>::new(user_id, user_id);
        root.handle(&UserCommand::SignUp(SignUp::sample(user_id))).unwrap();
        users.save(&mut root, &EventMetadata::for_request()).await.unwrap();

        let stored = store.load(user_id, None).await.unwrap().into_vec();
        assert_eq!(stored[0].event_name, "user_signed_up");
        assert_eq!(stored[0].stream_name, "user");
        let payload = &stored[0].payload;
        for field in ["email", "first_name", "last_name"] {
            assert!(payload[field].as_str().unwrap().starts_with("ENCv1:s:"), "{} not encrypted", field);
        }
        assert_eq!(payload["locale"], json!("en-GB"));

        let loaded = users.get(user_id, None).await.unwrap();
        assert_eq!(loaded.state().email.as_deref(), Some("ada@example.com"));
        assert_eq!(loaded.state().last_name.as_deref(), Some("Lovelace"));
    }

    #[tokio::test]
    async fn test_prefix_lookalike_name_is_encrypted_and_restored() {
        let (users, store) = repository::<User>();
        let user_id = Uuid::new_v4();
        let mut sign_up = SignUp::sample(user_id);
        sign_up.first_name = "ENCv1:Ada".to_string();

        let mut root = AggregateRoot::<User>::new(user_id, user_id);
        root.handle(&UserCommand::SignUp(sign_up)).unwrap();
        assert_eq!(users.save(&mut root, &EventMetadata::for_request()).await.unwrap(), 1);

        let stored = store.load(user_id, None).await.unwrap().into_vec();
        let first_name = stored[0].payload["first_name"].as_str().unwrap();
        assert!(first_name.starts_with("ENCv1:s:"));
        assert_ne!(first_name, "ENCv1:Ada");

        let loaded = users.get(user_id, None).await.unwrap();
        assert_eq!(loaded.state().first_name.as_deref(), Some("ENCv1:Ada"));
    }

    #[tokio::test]
    async fn test_later_events_reuse_sign_up_key() {
        let (users, store) = repository::<User>();
        let user_id = Uuid::new_v4();

        let mut root = AggregateRoot::<User>::new(user_id, user_id);
        root.handle(&UserCommand::SignUp(SignUp::sample(user_id))).unwrap();
        users.save(&mut root, &EventMetadata::for_request()).await.unwrap();

        let mut root = users.get(user_id, None).await.unwrap();
        root.handle(&UserCommand::ChangeEmail { email: "ada@lovelace.org".to_string() }).unwrap();
        users.save(&mut root, &EventMetadata::for_request()).await.unwrap();

        let stored = store.load(user_id, None).await.unwrap().into_vec();
        assert!(stored[1].payload["email"].as_str().unwrap().starts_with("ENCv1:k:"));
        let loaded = users.get(user_id, None).await.unwrap();
        assert_eq!(loaded.state().email.as_deref(), Some("ada@lovelace.org"));
    }

    #[tokio::test]
    async fn test_plaintext_history_still_loads() {
        let (users, store) = repository::<User>();
        let user_id = Uuid::new_v4();

        // Written before field encryption existed: no key for this user.
        store
            .append(StreamAppend::new(
                user_id,
                "user",
                0,
                vec![NewEvent {
                    event_name: "user_signed_up".to_string(),
                    user_id,
                    payload: json!({
                        "email": "grace@example.com",
                        "first_name": "Grace",
                        "last_name": "Hopper",
                        "locale": "en-US"
                    }),
                    metadata: EventMetadata::for_request(),
                    occurred_on: chrono::Utc::now(),
                }],
            ))
            .await
            .unwrap();

        let loaded = users.get(user_id, None).await.unwrap();
        assert_eq!(loaded.state().first_name.as_deref(), Some("Grace"));
    }
}
