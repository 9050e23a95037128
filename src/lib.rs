// ============================================================================
// event_vault - Event-sourced persistence with crypto-shredding
// ============================================================================
//
// Layers, leaves first:
// - event_sourcing::core    events, codec, event map, aggregate root
// - event_sourcing::store   append-only log (in-memory, Postgres)
// - crypto                  per-user keys and field-level encryption
// - event_sourcing          repository and unit-of-work middleware
// - admin                   rewind, replay, erase
//
// ============================================================================

pub mod admin;
pub mod config;
pub mod crypto;
pub mod domain;
pub mod error;
pub mod event_sourcing;
pub mod metrics;
pub mod utils;

pub use error::{EventSourcingError, Result};
