use serde::{Deserialize, Serialize};

use crate::event_sourcing::core::DomainEvent;

// ============================================================================
// Envelope Events - Domain Events for Envelope Aggregate
// ============================================================================

/// Envelope Event - Union type for all envelope events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EnvelopeEvent {
    Created(EnvelopeCreated),
    Credited(EnvelopeCredited),
    Debited(EnvelopeDebited),
    Renamed(EnvelopeRenamed),
}

impl DomainEvent for EnvelopeEvent {
    const MODULE_PATH: &'static str = module_path!();

    fn event_type(&self) -> &'static str {
        match self {
            EnvelopeEvent::Created(_) => "Created",
            EnvelopeEvent::Credited(_) => "Credited",
            EnvelopeEvent::Debited(_) => "Debited",
            EnvelopeEvent::Renamed(_) => "Renamed",
        }
    }
}

// ============================================================================
// Individual Event Types
// ============================================================================

/// Envelope Created - Initial event in envelope lifecycle
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EnvelopeCreated {
    pub name: String,
}

/// Amounts are in minor currency units.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EnvelopeCredited {
    pub amount: i64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EnvelopeDebited {
    pub amount: i64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EnvelopeRenamed {
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_sourcing::core::encode_event;

    #[test]
    fn test_event_type_matches_serde_tag() {
        let events = vec![
            EnvelopeEvent::Created(EnvelopeCreated { name: "rent".to_string() }),
            EnvelopeEvent::Credited(EnvelopeCredited { amount: 1 }),
            EnvelopeEvent::Debited(EnvelopeDebited { amount: 1 }),
            EnvelopeEvent::Renamed(EnvelopeRenamed { name: "housing".to_string() }),
        ];

        for event in events {
            let (tag, _) = encode_event(&event).unwrap();
            assert_eq!(tag, event.event_type());
        }
    }

    #[test]
    fn test_envelope_events_carry_no_personal_data() {
        for tag in ["Created", "Credited", "Debited", "Renamed"] {
            assert!(EnvelopeEvent::personal_data_fields(tag).is_empty());
            assert!(!EnvelopeEvent::is_sign_up(tag));
        }
    }
}
