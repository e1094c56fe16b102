//! Command execution pipeline for the user aggregate.
//!
//! ```text
//! Command
//!   ↓
//! 1. Hydrate the aggregate (repository: snapshot + event tail)
//!   ↓
//! 2. Decide (pure aggregate method, produces an event)
//!   ↓
//! 3. Validate the event against the latest registered schema
//!   ↓
//! 4. Apply the event to the in-memory aggregate
//!   ↓
//! 5. Publish on the bus (the event store persists it as a subscriber)
//!   ↓
//! 6. Verify the event reached the store
//!   ↓
//! 7. Repository save (snapshot policy)
//! ```
//!
//! Validation happens before publishing so that a malformed event is
//! reported to the caller rather than only landing in the dead-letter queue.
//! Each command runs in a child of the caller's correlation context (a new
//! trace when the caller has none).

use std::sync::Arc;

use serde_json::{Map, Value as JsonValue};
use thiserror::Error;
use tracing::{debug, info, info_span};

use stratum_core::{Aggregate, AggregateId, DomainError};
use stratum_events::context::{self, CorrelationContext};
use stratum_events::{
    BusError, DEFAULT_SCHEMA_VERSION, Event, MessageBus, ValidationError,
};
use stratum_identity::{RegisterUser, User};

use crate::event_store::EventStore;
use crate::repository::{RepositoryError, UserRepository};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Command input failed domain validation.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// The decided event does not satisfy its message contract.
    #[error("event '{event_type}' failed schema validation")]
    InvalidEvent {
        event_type: String,
        errors: Vec<ValidationError>,
    },

    /// Publication succeeded but the event is not in the store.
    #[error("event {version} of '{aggregate_id}' was not persisted")]
    NotPersisted { aggregate_id: AggregateId, version: u64 },

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Repository(RepositoryError),
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => {
                DispatchError::Validation(msg)
            }
            DomainError::InvariantViolation(msg) => DispatchError::InvariantViolation(msg),
            DomainError::NotFound(msg) => DispatchError::NotFound(msg),
            DomainError::Conflict(msg) => DispatchError::Conflict(msg),
        }
    }
}

impl From<RepositoryError> for DispatchError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::NotFound(id) => DispatchError::NotFound(format!("user '{id}'")),
            other => DispatchError::Repository(other),
        }
    }
}

/// Write-side entry points for users.
///
/// The saga steps depend on this trait rather than on the dispatcher so they
/// can be exercised with stubs.
pub trait UserCommands: Send + Sync {
    fn register_user(&self, command: RegisterUser) -> Result<AggregateId, DispatchError>;

    /// `Ok(None)` when the user was already inactive.
    fn deactivate_user(&self, aggregate_id: &AggregateId) -> Result<Option<Event>, DispatchError>;

    fn touch_user(
        &self,
        aggregate_id: &AggregateId,
        data: Map<String, JsonValue>,
    ) -> Result<Event, DispatchError>;
}

impl<C> UserCommands for Arc<C>
where
    C: UserCommands + ?Sized,
{
    fn register_user(&self, command: RegisterUser) -> Result<AggregateId, DispatchError> {
        (**self).register_user(command)
    }

    fn deactivate_user(&self, aggregate_id: &AggregateId) -> Result<Option<Event>, DispatchError> {
        (**self).deactivate_user(aggregate_id)
    }

    fn touch_user(
        &self,
        aggregate_id: &AggregateId,
        data: Map<String, JsonValue>,
    ) -> Result<Event, DispatchError> {
        (**self).touch_user(aggregate_id, data)
    }
}

#[derive(Debug, Clone)]
pub struct CommandDispatcher {
    bus: Arc<MessageBus>,
    store: Arc<EventStore>,
    repository: UserRepository,
}

impl CommandDispatcher {
    pub fn new(bus: Arc<MessageBus>, store: Arc<EventStore>, repository: UserRepository) -> Self {
        Self {
            bus,
            store,
            repository,
        }
    }

    pub fn repository(&self) -> &UserRepository {
        &self.repository
    }

    fn in_command_scope<R>(&self, command: &'static str, f: impl FnOnce() -> R) -> R {
        let ctx = context::current()
            .map(|parent| parent.child())
            .unwrap_or_else(CorrelationContext::new_root);
        let span = info_span!(
            "command",
            command,
            trace_id = ctx.trace_id(),
            span_id = ctx.span_id()
        );
        context::with_context_sync(ctx, || span.in_scope(f))
    }

    fn commit(&self, user: &mut User, event: Event) -> Result<Event, DispatchError> {
        let event_type = event.event_type().to_string();
        let version = self
            .bus
            .registry()
            .latest_version(&event_type)
            .unwrap_or(DEFAULT_SCHEMA_VERSION);
        let outcome = self.bus.validate(&event_type, version, &event);
        if !outcome.valid {
            return Err(DispatchError::InvalidEvent {
                event_type,
                errors: outcome.errors,
            });
        }

        user.apply(&event);
        self.bus.publish(&event_type, &event)?;

        let persisted = self.store.stream_version(event.aggregate_id());
        if persisted != event.version() as i64 {
            return Err(DispatchError::NotPersisted {
                aggregate_id: event.aggregate_id().clone(),
                version: event.version(),
            });
        }

        if let Some(snapshot_version) = self.repository.save(user, std::slice::from_ref(&event))? {
            debug!(aggregate_id = %event.aggregate_id(), snapshot_version, "snapshot taken");
        }
        Ok(event)
    }
}

impl UserCommands for CommandDispatcher {
    fn register_user(&self, command: RegisterUser) -> Result<AggregateId, DispatchError> {
        self.in_command_scope("register_user", || {
            let mut user = User::new();
            let event = user.register_user(&command)?;
            let event = self.commit(&mut user, event)?;
            info!(aggregate_id = %event.aggregate_id(), "user registered");
            Ok(event.aggregate_id().clone())
        })
    }

    fn deactivate_user(&self, aggregate_id: &AggregateId) -> Result<Option<Event>, DispatchError> {
        self.in_command_scope("deactivate_user", || {
            let mut user = self.repository.find_by_id(aggregate_id)?;
            let Some(event) = user.deactivate_user() else {
                debug!(aggregate_id = %aggregate_id, "user already inactive");
                return Ok(None);
            };
            let event = self.commit(&mut user, event)?;
            info!(aggregate_id = %aggregate_id, "user deactivated");
            Ok(Some(event))
        })
    }

    fn touch_user(
        &self,
        aggregate_id: &AggregateId,
        data: Map<String, JsonValue>,
    ) -> Result<Event, DispatchError> {
        self.in_command_scope("touch_user", || {
            let mut user = self.repository.find_by_id(aggregate_id)?;
            let event = user.touch(data)?;
            self.commit(&mut user, event)
        })
    }
}
