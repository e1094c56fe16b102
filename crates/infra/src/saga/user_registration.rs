//! User registration saga: create the user, then send the welcome email.
//!
//! Context keys: `username` (the email address, `email` is accepted too),
//! `password`, optional `role`. The create step adds `userId`.

use std::sync::Arc;

use anyhow::{Context as _, anyhow};
use async_trait::async_trait;
use tracing::info;

use stratum_core::AggregateId;
use stratum_events::{SagaContext, SagaStep};
use stratum_identity::{RegisterUser, Role};

use super::{SagaError, SagaOrchestrator};
use crate::command_dispatcher::UserCommands;

pub const USER_REGISTRATION_SAGA: &str = "USER_REGISTRATION_SAGA";

pub const USER_ID_KEY: &str = "userId";

/// Delivers the welcome message for a freshly registered user.
#[async_trait]
pub trait WelcomeNotifier: Send + Sync {
    async fn send_welcome_email(&self, to: &str) -> anyhow::Result<()>;
}

pub struct CreateUserStep {
    commands: Arc<dyn UserCommands>,
}

impl CreateUserStep {
    pub fn new(commands: Arc<dyn UserCommands>) -> Self {
        Self { commands }
    }
}

fn email_of(context: &SagaContext) -> anyhow::Result<&str> {
    context
        .get_str("username")
        .or_else(|| context.get_str("email"))
        .ok_or_else(|| anyhow!("saga context is missing 'username'"))
}

#[async_trait]
impl SagaStep for CreateUserStep {
    fn name(&self) -> &str {
        "createUser"
    }

    async fn action(&self, context: SagaContext) -> anyhow::Result<SagaContext> {
        let email = email_of(&context)?;
        let password = context
            .get_str("password")
            .ok_or_else(|| anyhow!("saga context is missing 'password'"))?;
        let mut command = RegisterUser::new(email, password);
        if let Some(role) = context.get_str("role") {
            command = command.with_role(role.parse::<Role>()?);
        }

        let id = self.commands.register_user(command)?;
        info!(aggregate_id = %id, "saga created user");
        Ok(context.with(USER_ID_KEY, id.as_str()))
    }

    async fn compensate(&self, context: &SagaContext) -> anyhow::Result<()> {
        let Some(raw) = context.get_str(USER_ID_KEY) else {
            return Ok(());
        };
        let id: AggregateId = raw
            .parse()
            .with_context(|| format!("invalid user id '{raw}' in saga context"))?;
        self.commands.deactivate_user(&id)?;
        info!(aggregate_id = %id, "saga deactivated user");
        Ok(())
    }
}

pub struct SendWelcomeEmailStep {
    notifier: Arc<dyn WelcomeNotifier>,
}

impl SendWelcomeEmailStep {
    pub fn new(notifier: Arc<dyn WelcomeNotifier>) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl SagaStep for SendWelcomeEmailStep {
    fn name(&self) -> &str {
        "sendWelcomeEmail"
    }

    async fn action(&self, context: SagaContext) -> anyhow::Result<SagaContext> {
        self.notifier.send_welcome_email(email_of(&context)?).await?;
        Ok(context)
    }

    async fn compensate(&self, _context: &SagaContext) -> anyhow::Result<()> {
        // A sent email cannot be recalled.
        info!("welcome email compensation is a no-op");
        Ok(())
    }
}

pub fn define_user_registration_saga(
    orchestrator: &SagaOrchestrator,
    commands: Arc<dyn UserCommands>,
    notifier: Arc<dyn WelcomeNotifier>,
) -> Result<(), SagaError> {
    orchestrator.define(
        USER_REGISTRATION_SAGA,
        vec![
            Arc::new(CreateUserStep::new(commands)),
            Arc::new(SendWelcomeEmailStep::new(notifier)),
        ],
    )
}
