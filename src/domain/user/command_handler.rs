use anyhow::{bail, Result};
use async_trait::async_trait;
use uuid::Uuid;

use crate::event_sourcing::core::AggregateRoot;
use crate::event_sourcing::repository::EventSourcedRepository;
use crate::event_sourcing::unit_of_work::{CommandHandler, UnitOfWork};

use super::aggregate::User;
use super::commands::{ChangeEmail, SignUp, UserCommand};
use super::errors::UserError;

// ============================================================================
// User Command Handlers
// ============================================================================

pub struct SignUpHandler {
    users: EventSourcedRepository<User>,
}

impl SignUpHandler {
    pub fn new(users: EventSourcedRepository<User>) -> Self {
        Self { users }
    }
}

#[async_trait]
impl CommandHandler for SignUpHandler {
    type Command = SignUp;
    type Output = Uuid;

    async fn handle(&self, command: SignUp, uow: &mut UnitOfWork) -> Result<Uuid> {
        if self.users.exists(command.user_id).await? {
            bail!(UserError::AlreadySignedUp);
        }

        // The user's stream is keyed by, and owned by, the user itself.
        let user_id = command.user_id;
        let mut root = AggregateRoot::<User>::new(user_id, user_id);
        root.handle(&UserCommand::SignUp(command))?;
        uow.track(root)?;

        tracing::debug!(user_id = %user_id, "Sign-up staged");
        Ok(user_id)
    }
}

pub struct ChangeEmailHandler {
    users: EventSourcedRepository<User>,
}

impl ChangeEmailHandler {
    pub fn new(users: EventSourcedRepository<User>) -> Self {
        Self { users }
    }
}

#[async_trait]
impl CommandHandler for ChangeEmailHandler {
    type Command = ChangeEmail;
    type Output = ();

    async fn handle(&self, command: ChangeEmail, uow: &mut UnitOfWork) -> Result<()> {
        let mut root = self.users.get(command.user_id, None).await?;
        root.handle(&UserCommand::ChangeEmail { email: command.email })?;
        uow.track(root)?;
        Ok(())
    }
}
