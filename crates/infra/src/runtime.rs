//! Composition root: one instance of every component, wired together.
//!
//! Subscriptions on the bus, in registration order:
//! - `UserRegistered` → user read model, notification queue
//! - `*` → event store
//!
//! Dispatcher registrations get their welcome email from the notification
//! queue. Saga registrations get it from the saga's own step only.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use stratum_events::{DeadLetter, MessageBus, SagaContext, SchemaRegistry};

use crate::circuit_breaker::{BreakerStatus, CircuitBreaker, CircuitBreakerRegistry};
use crate::command_dispatcher::{CommandDispatcher, UserCommands};
use crate::config::{ConfigError, RuntimeConfig};
use crate::event_store::{EventStore, EventStoreError};
use crate::notifications::{
    EMAIL_SERVICE_BREAKER, EmailClient, EmailService, LoggingEmailClient, NotificationHandler,
    with_inline_welcome,
};
use crate::projections::{
    ProjectorManager, ReplayError, ReplayReport, USER_READ_MODEL, UserReadModelProjector,
};
use crate::repository::UserRepository;
use crate::saga::{SagaError, SagaOrchestrator, USER_REGISTRATION_SAGA, define_user_registration_saga};
use crate::schemas::register_builtin_schemas;
use crate::snapshot_store::{SnapshotStore, SnapshotStoreError};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("event store unavailable: {0}")]
    EventStore(#[from] EventStoreError),

    #[error("snapshot store unavailable: {0}")]
    SnapshotStore(#[from] SnapshotStoreError),

    #[error(transparent)]
    Saga(#[from] SagaError),
}

#[derive(Debug)]
pub struct Runtime {
    config: RuntimeConfig,
    bus: Arc<MessageBus>,
    event_store: Arc<EventStore>,
    snapshot_store: Arc<SnapshotStore>,
    dispatcher: Arc<CommandDispatcher>,
    projector: Arc<UserReadModelProjector>,
    projectors: ProjectorManager,
    orchestrator: SagaOrchestrator,
    breakers: CircuitBreakerRegistry,
    email: Arc<EmailService>,
    notifications: NotificationHandler,
}

impl Runtime {
    /// Load configuration, initialize logging from it and build the runtime.
    pub fn from_env() -> Result<Self, RuntimeError> {
        let config = RuntimeConfig::load()?;
        stratum_observability::init_with(&config.log.filter, config.log.json);
        Self::new(config)
    }

    pub fn new(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        Self::with_email_client(config, Arc::new(LoggingEmailClient))
    }

    pub fn with_email_client(
        config: RuntimeConfig,
        email_client: Arc<dyn EmailClient>,
    ) -> Result<Self, RuntimeError> {
        let registry = Arc::new(SchemaRegistry::new());
        register_builtin_schemas(&registry);
        let bus = Arc::new(MessageBus::new(registry));

        let event_store = Arc::new(match &config.storage.event_store_path {
            Some(path) => EventStore::open(path.clone())?,
            None => EventStore::in_memory(),
        });
        let snapshot_store = Arc::new(match &config.storage.snapshot_store_path {
            Some(path) => SnapshotStore::open(path.clone())?,
            None => SnapshotStore::in_memory(),
        });

        let repository = UserRepository::new(event_store.clone(), snapshot_store.clone())
            .with_snapshot_interval(config.snapshot_interval);
        let dispatcher = Arc::new(CommandDispatcher::new(
            bus.clone(),
            event_store.clone(),
            repository,
        ));

        let projector = Arc::new(UserReadModelProjector::new());
        projector.subscribe_live(&bus);
        let projectors = ProjectorManager::new(event_store.clone());
        projectors.register(USER_READ_MODEL, projector.clone());

        let breakers = CircuitBreakerRegistry::new();
        let email_breaker = Arc::new(CircuitBreaker::new(
            EMAIL_SERVICE_BREAKER,
            config.email_breaker.into(),
        ));
        breakers.register(email_breaker.clone());
        let email = Arc::new(EmailService::new(email_client, email_breaker));

        let notifications = NotificationHandler::new(bus.clone(), email.clone());
        notifications.subscribe();

        event_store.subscribe_to_all(&bus);

        let orchestrator = SagaOrchestrator::new();
        define_user_registration_saga(&orchestrator, dispatcher.clone(), email.clone())?;

        info!(
            snapshot_interval = config.snapshot_interval,
            persistent = config.storage.event_store_path.is_some(),
            "runtime ready"
        );

        Ok(Self {
            config,
            bus,
            event_store,
            snapshot_store,
            dispatcher,
            projector,
            projectors,
            orchestrator,
            breakers,
            email,
            notifications,
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Command entry points.
    pub fn dispatcher(&self) -> &Arc<CommandDispatcher> {
        &self.dispatcher
    }

    pub fn commands(&self) -> Arc<dyn UserCommands> {
        self.dispatcher.clone()
    }

    /// Run the user registration saga for `email`/`password`.
    ///
    /// The saga sends the welcome email itself; nothing is queued, so a
    /// rolled-back registration is never welcomed.
    pub async fn register_user_with_welcome(
        &self,
        email: &str,
        password: &str,
    ) -> Result<SagaContext, SagaError> {
        let input = SagaContext::new()
            .with("username", email)
            .with("password", password);
        with_inline_welcome(self.orchestrator.execute(USER_REGISTRATION_SAGA, input)).await
    }

    pub fn replay_projector(&self, name: &str) -> Result<ReplayReport, ReplayError> {
        self.projectors.replay(name)
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.bus.dead_letters()
    }

    pub fn circuit_breaker_status(&self) -> BTreeMap<String, BreakerStatus> {
        self.breakers.all_status()
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn event_store(&self) -> &Arc<EventStore> {
        &self.event_store
    }

    pub fn snapshot_store(&self) -> &Arc<SnapshotStore> {
        &self.snapshot_store
    }

    pub fn projector(&self) -> &Arc<UserReadModelProjector> {
        &self.projector
    }

    pub fn projectors(&self) -> &ProjectorManager {
        &self.projectors
    }

    pub fn orchestrator(&self) -> &SagaOrchestrator {
        &self.orchestrator
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    pub fn email(&self) -> &Arc<EmailService> {
        &self.email
    }

    pub fn notifications(&self) -> &NotificationHandler {
        &self.notifications
    }
}
