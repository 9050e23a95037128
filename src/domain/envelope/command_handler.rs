use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::event_sourcing::core::AggregateRoot;
use crate::event_sourcing::repository::EventSourcedRepository;
use crate::event_sourcing::unit_of_work::{CommandHandler, UnitOfWork};

use super::aggregate::Envelope;
use super::commands::{EnvelopeCommand, EnvelopeRequest, TransferFunds};
use super::errors::EnvelopeError;

// ============================================================================
// Envelope Command Handlers
// ============================================================================
//
// Orchestrates: Command → Aggregate → Events → Unit of Work
//
// Handlers never write; the middleware persists whatever they track.
//
// ============================================================================

pub struct EnvelopeCommandHandler {
    envelopes: EventSourcedRepository<Envelope>,
}

impl EnvelopeCommandHandler {
    pub fn new(envelopes: EventSourcedRepository<Envelope>) -> Self {
        Self { envelopes }
    }
}

#[async_trait]
impl CommandHandler for EnvelopeCommandHandler {
    type Command = EnvelopeRequest;
    /// Stream version once the unit of work commits.
    type Output = i64;

    async fn handle(&self, request: EnvelopeRequest, uow: &mut UnitOfWork) -> Result<i64> {
        let mut root = match &request.command {
            EnvelopeCommand::Create { .. } => {
                if self.envelopes.exists(request.envelope_id).await? {
                    bail!(EnvelopeError::AlreadyCreated);
                }
                AggregateRoot::new(request.envelope_id, request.owner_id)
            }
            _ => self.envelopes.get(request.envelope_id, None).await?,
        };

        root.handle(&request.command)?;
        let version = root.version();
        uow.track(root)?;
        Ok(version)
    }
}

/// Debits one envelope and credits another; both streams commit together.
pub struct TransferHandler {
    envelopes: EventSourcedRepository<Envelope>,
}

impl TransferHandler {
    pub fn new(envelopes: EventSourcedRepository<Envelope>) -> Self {
        Self { envelopes }
    }
}

#[async_trait]
impl CommandHandler for TransferHandler {
    type Command = TransferFunds;
    type Output = ();

    async fn handle(&self, transfer: TransferFunds, uow: &mut UnitOfWork) -> Result<()> {
        if transfer.from == transfer.to {
            bail!(EnvelopeError::SameEnvelope);
        }

        let mut source = self.envelopes.get(transfer.from, None).await?;
        let mut target = self.envelopes.get(transfer.to, None).await?;

        source.handle(&EnvelopeCommand::Debit { amount: transfer.amount })?;
        target.handle(&EnvelopeCommand::Credit { amount: transfer.amount })?;

        tracing::debug!(
            from = %transfer.from,
            to = %transfer.to,
            amount = transfer.amount,
            "Transfer staged"
        );

        uow.track(source)?;
        uow.track(target)?;
        Ok(())
    }
}
