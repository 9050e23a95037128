use serde::{Deserialize, Serialize};

use crate::event_sourcing::core::Aggregate;
use super::commands::UserCommand;
use super::errors::UserError;
use super::events::*;
use super::value_objects::Email;

// ============================================================================
// User Aggregate - Business Logic
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub locale: Option<String>,
    pub signed_up: bool,
    pub active: bool,
}

impl User {
    fn validate_active(&self) -> Result<(), UserError> {
        if !self.signed_up {
            return Err(UserError::NotSignedUp);
        }
        if !self.active {
            return Err(UserError::Deactivated);
        }
        Ok(())
    }
}

impl Aggregate for User {
    type Event = UserEvent;
    type Command = UserCommand;
    type Error = UserError;

    fn apply_event(&mut self, event: &Self::Event) -> Result<(), Self::Error> {
        match event {
            UserEvent::SignedUp(e) => {
                if self.signed_up {
                    return Err(UserError::AlreadySignedUp);
                }
                self.email = Some(e.email.as_str().to_string());
                self.first_name = Some(e.first_name.clone());
                self.last_name = Some(e.last_name.clone());
                self.locale = Some(e.locale.clone());
                self.signed_up = true;
                self.active = true;
            }
            UserEvent::EmailChanged(e) => {
                self.email = Some(e.email.as_str().to_string());
            }
            UserEvent::Deactivated => {
                self.active = false;
            }
        }
        Ok(())
    }

    fn handle_command(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            UserCommand::SignUp(cmd) => {
                if self.signed_up {
                    return Err(UserError::AlreadySignedUp);
                }
                Ok(vec![UserEvent::SignedUp(UserSignedUp {
                    email: Email::parse(cmd.email.clone())?,
                    first_name: cmd.first_name.clone(),
                    last_name: cmd.last_name.clone(),
                    locale: cmd.locale.clone(),
                })])
            }

            UserCommand::ChangeEmail { email } => {
                self.validate_active()?;
                let email = Email::parse(email.clone())?;
                if self.email.as_deref() == Some(email.as_str()) {
                    return Ok(vec![]);
                }
                Ok(vec![UserEvent::EmailChanged(UserEmailChanged { email })])
            }

            UserCommand::Deactivate => {
                self.validate_active()?;
                Ok(vec![UserEvent::Deactivated])
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
    use crate::domain::user::SignUp;
    use crate::event_sourcing::core::{AggregateRoot, DomainEvent};
    use uuid::Uuid;

    fn signed_up() -> AggregateRoot<User> {
        let user_id = Uuid::new_v4();
        let mut root = AggregateRoot::new(user_id, user_id);
        root.handle(&UserCommand::SignUp(SignUp::sample(user_id))).unwrap();
        root
    }

    #[test]
    fn test_sign_up() {
        let root = signed_up();
        assert!(root.state().signed_up);
        assert_eq!(root.state().first_name.as_deref(), Some("Ada"));
        assert_eq!(root.uncommitted_events().len(), 1);
    }

    #[test]
    fn test_sign_up_only_once() {
        let mut root = signed_up();
        let again = UserCommand::SignUp(SignUp::sample(root.stream_id()));
        assert!(matches!(root.handle(&again), Err(UserError::AlreadySignedUp)));
    }

    #[test]
    fn test_sign_up_rejects_invalid_email() {
        let user_id = Uuid::new_v4();
        let mut root = AggregateRoot::<User>::new(user_id, user_id);
        let mut cmd = SignUp::sample(user_id);
        cmd.email = "not-an-email".to_string();
        assert!(matches!(root.handle(&UserCommand::SignUp(cmd)), Err(UserError::InvalidEmail(_))));
    }

    #[test]
    fn test_deactivated_user_cannot_change_email() {
        let mut root = signed_up();
        root.handle(&UserCommand::Deactivate).unwrap();
        let result = root.handle(&UserCommand::ChangeEmail {
            email: "ada@lovelace.org".to_string(),
        });
        assert!(matches!(result, Err(UserError::Deactivated)));
    }

    #[test]
    fn test_personal_data_declaration() {
        assert_eq!(UserEvent::personal_data_fields("SignedUp"), &["email", "first_name", "last_name"]);
        assert_eq!(UserEvent::personal_data_fields("EmailChanged"), &["email"]);
        assert!(UserEvent::personal_data_fields("Deactivated").is_empty());
        assert!(UserEvent::is_sign_up("SignedUp"));
        assert!(!UserEvent::is_sign_up("EmailChanged"));
    }
}
