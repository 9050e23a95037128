// ============================================================================
// Event Sourcing Core - Generic Infrastructure Abstractions
// ============================================================================
//
// This module contains GENERIC, reusable event sourcing infrastructure
// that works with ANY domain aggregate.
//
// Key Principles:
// - No domain-specific code (no Envelope, User, etc.)
// - Generic over aggregate types
// - Reusable across all aggregates
//
// ============================================================================

pub mod aggregate;
pub mod event;
pub mod event_map;

// Re-export core types for convenience
pub use aggregate::{Aggregate, AggregateRoot, PendingEvent, RaisedEvent};
pub use event::{
    decode_event, encode_event, implementation_path, variant_tag, DomainEvent, EventEnvelope,
    EventMetadata, NewEvent, StoredEvent,
};
pub use event_map::{EventClassMap, EventMapConfig, EventMapping};
