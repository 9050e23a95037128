use uuid::Uuid;

// ============================================================================
// User Commands
// ============================================================================

#[derive(Debug, Clone)]
pub struct SignUp {
    pub user_id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub locale: String,
}

#[derive(Debug, Clone)]
pub struct ChangeEmail {
    pub user_id: Uuid,
    pub email: String,
}

#[derive(Debug, Clone)]
pub enum UserCommand {
    SignUp(SignUp),
    ChangeEmail { email: String },
    Deactivate,
}

#[cfg(test)]
impl SignUp {
    pub fn sample(user_id: Uuid) -> Self {
        Self {
            user_id,
            email: "ada@example.com".to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            locale: "en-GB".to_string(),
        }
    }
}
