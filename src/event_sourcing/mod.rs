// ============================================================================
// Event Sourcing Infrastructure
// ============================================================================
//
// Generic, reusable event sourcing infrastructure.
// Domain-specific code is in src/domain/
//
// ============================================================================

// Core abstractions (GENERIC - works with any aggregate)
pub mod core;
pub mod store;

// Load/save and command-scoped persistence built on the two above
pub mod repository;
pub mod unit_of_work;

// Re-export core infrastructure
pub use self::core::*;
pub use self::store::*;
pub use repository::EventSourcedRepository;
pub use unit_of_work::{
    CommandHandler, DispatchError, TrackedAggregate, UnitOfWork, UnitOfWorkMiddleware, UnitOfWorkPhase,
};
