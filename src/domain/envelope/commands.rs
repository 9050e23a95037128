use uuid::Uuid;

// ============================================================================
// Envelope Commands - Represent user intent
// ============================================================================

#[derive(Debug, Clone)]
pub enum EnvelopeCommand {
    Create { name: String },
    Credit { amount: i64 },
    Debit { amount: i64 },
    Rename { name: String },
}

/// Move money between two envelopes in one unit of work.
#[derive(Debug, Clone)]
pub struct TransferFunds {
    pub from: Uuid,
    pub to: Uuid,
    pub amount: i64,
}

/// An `EnvelopeCommand` addressed to one envelope owned by `owner_id`.
#[derive(Debug, Clone)]
pub struct EnvelopeRequest {
    pub envelope_id: Uuid,
    pub owner_id: Uuid,
    pub command: EnvelopeCommand,
}
