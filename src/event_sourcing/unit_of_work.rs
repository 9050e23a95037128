use std::any::Any;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use uuid::Uuid;

use crate::crypto::{FieldEncryptor, KeyRing};
use crate::error::{EventSourcingError, Result};
use crate::event_sourcing::core::{Aggregate, AggregateRoot, EventClassMap, EventMetadata, NewEvent, PendingEvent};
use crate::event_sourcing::store::{Commit, EventStore, StreamAppend};
use crate::metrics::{CommitOutcome, Metrics};
use crate::utils::IsTransient;

// ============================================================================
// Unit of Work - Capture Mutated Aggregates, Persist Once
// ============================================================================
//
// Flow per command:
// 1. Middleware opens a fresh UnitOfWork (Idle → Tracking)
// 2. Handler loads aggregates, runs commands, tracks the roots it changed
// 3. Middleware flushes (Tracking → Flushing): encrypts every uncommitted
//    event and writes all streams plus minted keys in ONE commit
// 4. Back to Idle, whether the commit succeeded or not
//
// A handler error discards the unit of work: nothing reaches storage.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOfWorkPhase {
    Idle,
    Tracking,
    Flushing,
}

/// Object-safe view of an `AggregateRoot<A>` so one unit of work can hold
/// aggregates of different types.
pub trait TrackedAggregate: Send + Sync {
    fn stream_id(&self) -> Uuid;
    fn committed_version(&self) -> i64;
    fn has_uncommitted_events(&self) -> bool;
    fn stream_name(&self, map: &EventClassMap) -> Option<String>;
    fn pending_events(&self, map: &EventClassMap) -> Result<Vec<PendingEvent>>;
    fn mark_committed(&mut self, new_version: i64);
    fn as_any(&self) -> &dyn Any;
}

impl<A: Aggregate> TrackedAggregate for AggregateRoot<A> {
    fn stream_id(&self) -> Uuid {
        AggregateRoot::stream_id(self)
    }

    fn committed_version(&self) -> i64 {
        AggregateRoot::committed_version(self)
    }

    fn has_uncommitted_events(&self) -> bool {
        AggregateRoot::has_uncommitted_events(self)
    }

    fn stream_name(&self, map: &EventClassMap) -> Option<String> {
        self.resolve_stream_name(map)
    }

    fn pending_events(&self, map: &EventClassMap) -> Result<Vec<PendingEvent>> {
        AggregateRoot::pending_events(self, map)
    }

    fn mark_committed(&mut self, new_version: i64) {
        AggregateRoot::mark_committed(self, new_version)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Encrypt one aggregate's uncommitted events into a stream append.
pub(crate) async fn prepare_stream(
    aggregate: &dyn TrackedAggregate,
    map: &EventClassMap,
    encryptor: &FieldEncryptor,
    ring: &mut KeyRing,
    metadata: &EventMetadata,
) -> Result<StreamAppend> {
    let stream_id = aggregate.stream_id();
    let stream_name = aggregate.stream_name(map).ok_or_else(|| {
        EventSourcingError::PersistenceFailure(format!("no stream name for aggregate {}", stream_id))
    })?;

    let mut events = Vec::new();
    for mut pending in aggregate.pending_events(map)? {
        encryptor.encrypt(ring, &mut pending).await?;
        events.push(NewEvent {
            event_name: pending.event_name,
            user_id: pending.user_id,
            payload: pending.payload,
            metadata: metadata.clone(),
            occurred_on: pending.occurred_on,
        });
    }

    Ok(StreamAppend::new(stream_id, stream_name, aggregate.committed_version(), events))
}

pub struct UnitOfWork {
    phase: UnitOfWorkPhase,
    tracked: Vec<Box<dyn TrackedAggregate>>,
    metadata: EventMetadata,
}

impl UnitOfWork {
    pub fn new(metadata: EventMetadata) -> Self {
        Self {
            phase: UnitOfWorkPhase::Idle,
            tracked: Vec::new(),
            metadata,
        }
    }

    /// Clear the tracked set and start tracking.
    pub fn begin(&mut self) {
        self.tracked.clear();
        self.phase = UnitOfWorkPhase::Tracking;
    }

    /// Register a mutated aggregate. Tracking the same stream again replaces
    /// the earlier instance.
    pub fn track<A: Aggregate>(&mut self, root: AggregateRoot<A>) -> Result<()> {
        if self.phase != UnitOfWorkPhase::Tracking {
            return Err(EventSourcingError::UnitOfWorkNotTracking);
        }

        let stream_id = root.stream_id();
        match self.tracked.iter_mut().find(|tracked| tracked.stream_id() == stream_id) {
            Some(slot) => *slot = Box::new(root),
            None => self.tracked.push(Box::new(root)),
        }
        Ok(())
    }

    /// The tracked root for `stream_id`, if it is an `AggregateRoot<A>`.
    pub fn tracked<A: Aggregate>(&self, stream_id: Uuid) -> Option<&AggregateRoot<A>> {
        self.tracked
            .iter()
            .find(|tracked| tracked.stream_id() == stream_id)
            .and_then(|tracked| tracked.as_any().downcast_ref::<AggregateRoot<A>>())
    }

    pub fn is_tracked(&self, stream_id: Uuid) -> bool {
        self.tracked.iter().any(|tracked| tracked.stream_id() == stream_id)
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }

    pub fn phase(&self) -> UnitOfWorkPhase {
        self.phase
    }

    pub fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    fn start_flush(&mut self) -> Result<Vec<Box<dyn TrackedAggregate>>> {
        if self.phase != UnitOfWorkPhase::Tracking {
            return Err(EventSourcingError::UnitOfWorkNotTracking);
        }
        self.phase = UnitOfWorkPhase::Flushing;
        Ok(std::mem::take(&mut self.tracked))
    }

    /// Drop everything tracked and return to Idle.
    fn discard(&mut self) -> usize {
        let discarded = self.tracked.len();
        self.tracked.clear();
        self.phase = UnitOfWorkPhase::Idle;
        discarded
    }
}

// ============================================================================
// Command Handling
// ============================================================================

#[async_trait]
pub trait CommandHandler: Send + Sync {
    type Command: Send + 'static;
    type Output: Send + 'static;

    async fn handle(&self, command: Self::Command, uow: &mut UnitOfWork) -> anyhow::Result<Self::Output>;
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Command handler failed: {0:#}")]
    Handler(anyhow::Error),

    #[error(transparent)]
    Store(#[from] EventSourcingError),
}

impl IsTransient for DispatchError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Store(err) => err.is_transient(),
            Self::Handler(err) => err
                .downcast_ref::<EventSourcingError>()
                .is_some_and(|err| err.is_transient()),
        }
    }

    fn conflict(&self) -> Option<&EventSourcingError> {
        match self {
            Self::Store(err) => err.conflict(),
            Self::Handler(err) => err.downcast_ref::<EventSourcingError>().and_then(|err| err.conflict()),
        }
    }
}

pub struct UnitOfWorkMiddleware {
    store: Arc<dyn EventStore>,
    encryptor: Arc<FieldEncryptor>,
    event_map: Arc<EventClassMap>,
    metrics: Arc<Metrics>,
}

impl UnitOfWorkMiddleware {
    pub fn new(
        store: Arc<dyn EventStore>,
        encryptor: Arc<FieldEncryptor>,
        event_map: Arc<EventClassMap>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            encryptor,
            event_map,
            metrics,
        }
    }

    /// Run one command inside its own unit of work and persist everything the
    /// handler tracked, atomically.
    pub async fn dispatch<H: CommandHandler>(
        &self,
        handler: &H,
        command: H::Command,
        metadata: EventMetadata,
    ) -> std::result::Result<H::Output, DispatchError> {
        let correlation_id = metadata.correlation_id;
        let mut uow = UnitOfWork::new(metadata);
        uow.begin();

        let output = match handler.handle(command, &mut uow).await {
            Ok(output) => output,
            Err(err) => {
                let discarded = uow.discard();
                tracing::warn!(
                    correlation_id = %correlation_id,
                    discarded,
                    error = %err,
                    "Command handler failed, unit of work discarded"
                );
                return Err(DispatchError::Handler(err));
            }
        };

        self.flush(&mut uow).await?;
        Ok(output)
    }

    /// Persist the tracked aggregates of `uow` in one commit. Returns the new
    /// version of each written stream.
    pub async fn flush(&self, uow: &mut UnitOfWork) -> Result<Vec<i64>> {
        let started = Instant::now();
        let mut tracked = uow.start_flush()?;
        let dirty: Vec<usize> = (0..tracked.len())
            .filter(|&i| tracked[i].has_uncommitted_events())
            .collect();

        if dirty.is_empty() {
            uow.discard();
            self.metrics.record_commit(CommitOutcome::Noop, started.elapsed().as_secs_f64());
            tracing::debug!(correlation_id = %uow.metadata().correlation_id, "Nothing to commit");
            return Ok(Vec::new());
        }

        let result = self.commit_tracked(&mut tracked, &dirty, uow.metadata()).await;
        uow.discard();

        let elapsed = started.elapsed().as_secs_f64();
        match result {
            Ok(versions) => {
                self.metrics.record_commit(CommitOutcome::Committed, elapsed);
                Ok(versions)
            }
            Err(err) => {
                let outcome = if err.is_conflict() {
                    CommitOutcome::Conflict
                } else {
                    CommitOutcome::Failed
                };
                self.metrics.record_commit(outcome, elapsed);
                match &err {
                    EventSourcingError::ConcurrencyConflict { .. } => {
                        tracing::warn!(
                            correlation_id = %uow.metadata().correlation_id,
                            error = %err,
                            "Unit of work rejected, nothing persisted"
                        );
                    }
                    _ => {
                        tracing::error!(
                            correlation_id = %uow.metadata().correlation_id,
                            error = %err,
                            "Unit of work failed, nothing persisted"
                        );
                    }
                }
                Err(err)
            }
        }
    }

    async fn commit_tracked(
        &self,
        tracked: &mut [Box<dyn TrackedAggregate>],
        dirty: &[usize],
        metadata: &EventMetadata,
    ) -> Result<Vec<i64>> {
        let mut ring = KeyRing::new();
        let mut streams = Vec::with_capacity(dirty.len());

        for &i in dirty {
            match prepare_stream(tracked[i].as_ref(), &self.event_map, &self.encryptor, &mut ring, metadata).await {
                Ok(stream) => streams.push(stream),
                Err(err) => {
                    if matches!(
                        err,
                        EventSourcingError::EncryptionFailure(_) | EventSourcingError::KeyNotFound(_)
                    ) {
                        self.metrics.record_encryption_failure("encrypt");
                    }
                    return Err(err);
                }
            }
        }

        let appended: Vec<(String, usize)> = streams
            .iter()
            .map(|stream| (stream.stream_name.clone(), stream.events.len()))
            .collect();
        let commit = Commit {
            streams,
            new_keys: ring.take_minted(),
        };
        let minted = commit.new_keys.len();
        let event_count = commit.event_count();

        let versions = self.store.commit(commit).await?;

        for (&i, &version) in dirty.iter().zip(&versions) {
            tracked[i].mark_committed(version);
        }
        for (stream_name, count) in &appended {
            self.metrics.record_appended(stream_name, *count);
        }
        self.metrics.record_keys_generated(minted);

        if dirty.len() == 1 {
            tracing::info!(
                correlation_id = %metadata.correlation_id,
                stream_id = %tracked[dirty[0]].stream_id(),
                new_version = versions[0],
                event_count,
                "✅ Committed unit of work"
            );
        } else {
            tracing::info!(
                correlation_id = %metadata.correlation_id,
                aggregates = dirty.len(),
                event_count,
                keys_minted = minted,
                "✅ Committed multi-aggregate unit of work"
            );
        }

        Ok(versions)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
