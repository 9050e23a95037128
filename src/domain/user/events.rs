use serde::{Deserialize, Serialize};

use crate::event_sourcing::core::DomainEvent;
use super::value_objects::Email;

// ============================================================================
// User Domain Events
// ============================================================================

/// Union type for all user events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum UserEvent {
    SignedUp(UserSignedUp),
    EmailChanged(UserEmailChanged),
    Deactivated,
}

const SIGNED_UP_PERSONAL_DATA: &[&str] = &["email", "first_name", "last_name"];
const EMAIL_CHANGED_PERSONAL_DATA: &[&str] = &["email"];

impl DomainEvent for UserEvent {
    const MODULE_PATH: &'static str = module_path!();

    fn event_type(&self) -> &'static str {
        match self {
            UserEvent::SignedUp(_) => "SignedUp",
            UserEvent::EmailChanged(_) => "EmailChanged",
            UserEvent::Deactivated => "Deactivated",
        }
    }

    fn personal_data_fields(event_type: &str) -> &'static [&'static str] {
        match event_type {
            "SignedUp" => SIGNED_UP_PERSONAL_DATA,
            "EmailChanged" => EMAIL_CHANGED_PERSONAL_DATA,
            _ => &[],
        }
    }

    fn is_sign_up(event_type: &str) -> bool {
        event_type == "SignedUp"
    }
}

// Individual event types

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSignedUp {
    pub email: Email,
    pub first_name: String,
    pub last_name: String,
    /// Not personal data; stays plaintext.
    pub locale: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserEmailChanged {
    pub email: Email,
}
