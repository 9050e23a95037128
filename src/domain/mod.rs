// ============================================================================
// Domain Layer - Demonstration Aggregates
// ============================================================================
//
// This module contains domain-specific aggregates used by the demo binary
// and the tests. Each aggregate has its own subdirectory with:
// - Events
// - Commands
// - Errors
// - Aggregate implementation
// - Command handlers
//
// This layer is completely separate from the event sourcing infrastructure.
//
// ============================================================================

pub mod envelope;
pub mod user;

use crate::error::Result;
use crate::event_sourcing::core::{implementation_path, EventClassMap, EventMapConfig, EventMapping};
use envelope::EnvelopeEvent;
use user::UserEvent;

fn mapping<E: crate::event_sourcing::core::DomainEvent>(name: &str, tag: &str) -> EventMapping {
    EventMapping {
        name: name.to_string(),
        path: implementation_path::<E>(tag),
    }
}

/// Event map covering the demonstration aggregates.
pub fn event_map_config() -> EventMapConfig {
    EventMapConfig {
        aggregates: vec!["envelope".to_string(), "user".to_string()],
        events: vec![
            mapping::<EnvelopeEvent>("envelope_created", "Created"),
            mapping::<EnvelopeEvent>("envelope_credited", "Credited"),
            mapping::<EnvelopeEvent>("envelope_debited", "Debited"),
            mapping::<EnvelopeEvent>("envelope_renamed", "Renamed"),
            mapping::<UserEvent>("user_signed_up", "SignedUp"),
            mapping::<UserEvent>("user_email_changed", "EmailChanged"),
            mapping::<UserEvent>("user_deactivated", "Deactivated"),
        ],
        overrides: Default::default(),
    }
}

pub fn default_event_map() -> Result<EventClassMap> {
    EventClassMap::new(event_map_config())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_sourcing::core::DomainEvent;
    use std::path::Path;

    #[test]
    fn test_default_map_names_and_streams() {
        let map = default_event_map().unwrap();
        let credited = EnvelopeEvent::Credited(envelope::EnvelopeCredited { amount: 1 });
        assert_eq!(map.logical_name(&credited.implementation_path()), "envelope_credited");
        assert_eq!(map.stream_name_for(&credited.implementation_path()), "envelope");
        assert_eq!(map.stream_name_for(&UserEvent::Deactivated.implementation_path()), "user");
        assert_eq!(map.implementation_path("user_deactivated"), UserEvent::Deactivated.implementation_path());
    }

    #[test]
    fn test_shipped_yaml_matches_default_map() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/event_map.yaml");
        let shipped = EventMapConfig::load(&path).unwrap();
        let default = event_map_config();
        assert_eq!(shipped.aggregates, default.aggregates);
        assert_eq!(shipped.events, default.events);
    }
}
