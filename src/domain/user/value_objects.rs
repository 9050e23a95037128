use serde::{Deserialize, Serialize};

use super::errors::UserError;

// ============================================================================
// User Value Objects
// ============================================================================

/// User email address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Email(String);

impl Email {
    pub fn parse(email: impl Into<String>) -> Result<Self, UserError> {
        let email = email.into();
        if email.is_empty() {
            return Err(UserError::EmptyEmail);
        }
        match email.split_once('@') {
            Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(Self(email)),
            _ => Err(UserError::InvalidEmail(email)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_validation() {
        assert!(Email::parse("ada@example.com").is_ok());
        assert!(matches!(Email::parse(""), Err(UserError::EmptyEmail)));
        assert!(matches!(Email::parse("ada.example.com"), Err(UserError::InvalidEmail(_))));
        assert!(matches!(Email::parse("@example.com"), Err(UserError::InvalidEmail(_))));
    }

    #[test]
    fn test_email_serializes_as_plain_string() {
        let email = Email::parse("ada@example.com").unwrap();
        assert_eq!(serde_json::to_value(&email).unwrap(), serde_json::json!("ada@example.com"));
    }
}
