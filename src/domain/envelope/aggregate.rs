use serde::{Deserialize, Serialize};

use crate::event_sourcing::core::Aggregate;
use super::commands::EnvelopeCommand;
use super::errors::EnvelopeError;
use super::events::*;

// ============================================================================
// Envelope Aggregate - Domain Logic
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub name: Option<String>,
    pub balance: i64,
}

impl Envelope {
    pub fn is_created(&self) -> bool {
        self.name.is_some()
    }

    fn validate_amount(amount: i64) -> Result<(), EnvelopeError> {
        if amount <= 0 {
            return Err(EnvelopeError::NonPositiveAmount(amount));
        }
        Ok(())
    }

    fn validate_name(name: &str) -> Result<(), EnvelopeError> {
        if name.trim().is_empty() {
            return Err(EnvelopeError::EmptyName);
        }
        Ok(())
    }

    fn credited(&self, amount: i64) -> Result<i64, EnvelopeError> {
        self.balance
            .checked_add(amount)
            .ok_or(EnvelopeError::BalanceOverflow { balance: self.balance, amount })
    }

    fn require_created(&self) -> Result<(), EnvelopeError> {
        if !self.is_created() {
            return Err(EnvelopeError::NotCreated);
        }
        Ok(())
    }
}

// ============================================================================
// Aggregate Trait Implementation
// ============================================================================

impl Aggregate for Envelope {
    type Event = EnvelopeEvent;
    type Command = EnvelopeCommand;
    type Error = EnvelopeError;

    fn apply_event(&mut self, event: &Self::Event) -> Result<(), Self::Error> {
        match event {
            EnvelopeEvent::Created(e) => {
                if self.is_created() {
                    return Err(EnvelopeError::AlreadyCreated);
                }
                self.name = Some(e.name.clone());
                Ok(())
            }
            EnvelopeEvent::Credited(e) => {
                self.require_created()?;
                self.balance = self.credited(e.amount)?;
                Ok(())
            }
            EnvelopeEvent::Debited(e) => {
                self.require_created()?;
                self.balance = self.balance.checked_sub(e.amount).ok_or(EnvelopeError::InsufficientFunds {
                    balance: self.balance,
                    requested: e.amount,
                })?;
                Ok(())
            }
            EnvelopeEvent::Renamed(e) => {
                self.require_created()?;
                self.name = Some(e.name.clone());
                Ok(())
            }
        }
    }

    fn handle_command(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            EnvelopeCommand::Create { name } => {
                if self.is_created() {
                    return Err(EnvelopeError::AlreadyCreated);
                }
                Self::validate_name(name)?;

                Ok(vec![EnvelopeEvent::Created(EnvelopeCreated { name: name.clone() })])
            }

            EnvelopeCommand::Credit { amount } => {
                self.require_created()?;
                Self::validate_amount(*amount)?;
                self.credited(*amount)?;

                Ok(vec![EnvelopeEvent::Credited(EnvelopeCredited { amount: *amount })])
            }

            EnvelopeCommand::Debit { amount } => {
                self.require_created()?;
                Self::validate_amount(*amount)?;
                if *amount > self.balance {
                    return Err(EnvelopeError::InsufficientFunds {
                        balance: self.balance,
                        requested: *amount,
                    });
                }

                Ok(vec![EnvelopeEvent::Debited(EnvelopeDebited { amount: *amount })])
            }

            EnvelopeCommand::Rename { name } => {
                self.require_created()?;
                Self::validate_name(name)?;
                if self.name.as_deref() == Some(name.as_str()) {
                    return Ok(vec![]);
                }

                Ok(vec![EnvelopeEvent::Renamed(EnvelopeRenamed { name: name.clone() })])
            }
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_sourcing::core::AggregateRoot;
    use uuid::Uuid;

    fn created(balance: i64) -> AggregateRoot<Envelope> {
        let mut root = AggregateRoot::new(Uuid::new_v4(), Uuid::new_v4());
        root.handle(&EnvelopeCommand::Create { name: "groceries".to_string() }).unwrap();
        if balance > 0 {
            root.handle(&EnvelopeCommand::Credit { amount: balance }).unwrap();
        }
        root
    }

    #[test]
    fn test_create_and_credit() {
        let root = created(250);
        assert_eq!(root.state().balance, 250);
        assert_eq!(root.state().name.as_deref(), Some("groceries"));
        assert_eq!(root.uncommitted_events().len(), 2);
        assert_eq!(root.version(), 2);
        assert_eq!(root.committed_version(), 0);
    }

    #[test]
    fn test_cannot_create_twice() {
        let mut root = created(0);
        let result = root.handle(&EnvelopeCommand::Create { name: "again".to_string() });
        assert!(matches!(result, Err(EnvelopeError::AlreadyCreated)));
    }

    #[test]
    fn test_amount_must_be_positive() {
        let mut root = created(10);
        assert!(matches!(
            root.handle(&EnvelopeCommand::Credit { amount: 0 }),
            Err(EnvelopeError::NonPositiveAmount(0))
        ));
        assert!(matches!(
            root.handle(&EnvelopeCommand::Debit { amount: -5 }),
            Err(EnvelopeError::NonPositiveAmount(-5))
        ));
    }

    #[test]
    fn test_debit_cannot_overdraw() {
        let mut root = created(10);
        let result = root.handle(&EnvelopeCommand::Debit { amount: 11 });
        assert!(matches!(
            result,
            Err(EnvelopeError::InsufficientFunds { balance: 10, requested: 11 })
        ));
        // Rejected commands raise nothing.
        assert_eq!(root.uncommitted_events().len(), 2);
    }

    #[test]
    fn test_credit_cannot_overflow_balance() {
        let mut root = created(i64::MAX);
        let result = root.handle(&EnvelopeCommand::Credit { amount: i64::MAX });
        assert!(matches!(
            result,
            Err(EnvelopeError::BalanceOverflow { balance: i64::MAX, amount: i64::MAX })
        ));
        assert_eq!(root.state().balance, i64::MAX);
        assert_eq!(root.uncommitted_events().len(), 2);
    }

    #[test]
    fn test_replaying_overflowing_credit_is_rejected() {
        let mut envelope = Envelope::default();
        envelope
            .apply_event(&EnvelopeEvent::Created(EnvelopeCreated { name: "x".to_string() }))
            .unwrap();
        let credit = EnvelopeEvent::Credited(EnvelopeCredited { amount: i64::MAX });
        envelope.apply_event(&credit).unwrap();
        assert!(matches!(envelope.apply_event(&credit), Err(EnvelopeError::BalanceOverflow { .. })));
    }

    #[test]
    fn test_commands_require_created_envelope() {
        let mut root = AggregateRoot::<Envelope>::new(Uuid::new_v4(), Uuid::new_v4());
        assert!(matches!(
            root.handle(&EnvelopeCommand::Credit { amount: 5 }),
            Err(EnvelopeError::NotCreated)
        ));
    }

    #[test]
    fn test_rename_to_same_name_is_noop() {
        let mut root = created(0);
        let raised = root.handle(&EnvelopeCommand::Rename { name: "groceries".to_string() }).unwrap();
        assert_eq!(raised, 0);
    }
}
