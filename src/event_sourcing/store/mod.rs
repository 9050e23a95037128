// ============================================================================
// Event Sourcing Store - Generic Persistence Layer
// ============================================================================
//
// This module contains GENERIC persistence infrastructure for event sourcing.
// Backends store raw `StoredEvent` rows; decoding and decryption happen in
// the repository.
//
// ============================================================================

pub mod event_store;
pub mod memory;
pub mod postgres;

pub use event_store::{Commit, EventStore, EventStream, StreamAppend};
pub use memory::{InMemoryEventStore, MemoryStorage};
pub use postgres::PostgresEventStore;
