// ============================================================================
// Envelope Domain - Budget Envelope Aggregate
// ============================================================================
//
// This module contains ALL Envelope-specific code:
// - Events (EnvelopeCreated, EnvelopeCredited, etc.)
// - Commands (Create, Credit, Debit, Rename, TransferFunds)
// - Errors (EnvelopeError enum)
// - Aggregate (Envelope with its balance rules)
// - Command Handlers (EnvelopeCommandHandler, TransferHandler)
//
// ============================================================================

pub mod events;
pub mod commands;
pub mod errors;
pub mod aggregate;
pub mod command_handler;

// Re-export for convenience
pub use events::*;
pub use commands::*;
pub use errors::*;
pub use aggregate::*;
pub use command_handler::*;
