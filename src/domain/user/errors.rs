// ============================================================================
// User Business Rule Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum UserError {
    #[error("User has already signed up")]
    AlreadySignedUp,

    #[error("User has not signed up")]
    NotSignedUp,

    #[error("User is deactivated")]
    Deactivated,

    #[error("Email cannot be empty")]
    EmptyEmail,

    #[error("Invalid email format: {0}")]
    InvalidEmail(String),
}
