// ============================================================================
// Envelope Business Rule Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("Envelope already exists")]
    AlreadyCreated,

    #[error("Envelope has not been created")]
    NotCreated,

    #[error("Envelope name cannot be empty")]
    EmptyName,

    #[error("Amount must be positive, got {0}")]
    NonPositiveAmount(i64),

    #[error("Insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds { balance: i64, requested: i64 },

    #[error("Balance {balance} cannot take a credit of {amount}")]
    BalanceOverflow { balance: i64, amount: i64 },

    #[error("Cannot transfer from an envelope to itself")]
    SameEnvelope,
}
