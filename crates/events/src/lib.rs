//! Messaging layer: events, commands, correlation context, schema validation,
//! the message bus and the read-side / saga contracts built on top of it.

pub mod bus;
pub mod command;
pub mod context;
pub mod envelope;
pub mod event;
pub mod projection;
pub mod saga;
pub mod schema;

pub use bus::{BusError, DEFAULT_SCHEMA_VERSION, DeadLetter, EventHandler, MessageBus, WILDCARD_TOPIC};
pub use command::Command;
pub use context::CorrelationContext;
pub use envelope::MessageEnvelope;
pub use event::Event;
pub use projection::Projection;
pub use saga::{SagaContext, SagaStep};
pub use schema::{SchemaError, SchemaRegistry, SchemaValidator, ValidationError, ValidationOutcome};
