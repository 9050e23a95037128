// ============================================================================
// User Domain - Account Holder Aggregate
// ============================================================================
//
// The only aggregate here that carries personal data. Its sign-up event
// mints the user's encryption key; deleting that key erases every
// personal field the user ever recorded.
//
// ============================================================================

pub mod value_objects;
pub mod events;
pub mod commands;
pub mod errors;
pub mod aggregate;
pub mod command_handler;

// Re-export for convenience
pub use value_objects::*;
pub use events::*;
pub use commands::*;
pub use errors::*;
pub use aggregate::*;
pub use command_handler::*;
