//! In-process message bus.
//!
//! Two delivery patterns share one bus:
//!
//! - **publish/subscribe** for events: every subscriber of a topic (plus every
//!   wildcard subscriber) receives the event, after it has been validated
//!   against the schema version that subscriber declared;
//! - **point-to-point** for commands: `send` appends to a named FIFO queue and
//!   `process_queue` drains it.
//!
//! Messages that fail validation never reach the handler. They are recorded in
//! the dead-letter queue and the publisher carries on; only handler errors are
//! returned to the publisher.
//!
//! Handlers are cloned out of the subscription table before they run, so a
//! handler may publish or send on the same bus.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, debug_span, warn};

use crate::context::CorrelationContext;
use crate::schema::{SchemaRegistry, SchemaValidator, ValidationError, ValidationOutcome};
use crate::{Command, Event, MessageEnvelope};

/// Topic that receives every published event.
pub const WILDCARD_TOPIC: &str = "*";

/// Schema version assumed by [`MessageBus::subscribe`].
pub const DEFAULT_SCHEMA_VERSION: u32 = 1;

pub type EventHandler = Arc<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

#[derive(Clone)]
struct Subscription {
    schema_version: u32,
    handler: EventHandler,
}

/// A message that was diverted instead of delivered.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub topic: String,
    pub schema_version: u32,
    pub message: JsonValue,
    pub errors: Vec<ValidationError>,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("handler for topic '{topic}' failed")]
    Handler {
        topic: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("handler for queue '{queue}' failed")]
    QueueHandler {
        queue: String,
        #[source]
        source: anyhow::Error,
    },
}

pub struct MessageBus {
    validator: SchemaValidator,
    subscriptions: RwLock<HashMap<String, Vec<Subscription>>>,
    queues: Mutex<HashMap<String, VecDeque<MessageEnvelope<Command>>>>,
    dead_letters: Mutex<Vec<DeadLetter>>,
}

impl fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let topics: Vec<String> = self
            .subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        f.debug_struct("MessageBus")
            .field("topics", &topics)
            .finish_non_exhaustive()
    }
}

impl MessageBus {
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self {
            validator: SchemaValidator::new(registry),
            subscriptions: RwLock::new(HashMap::new()),
            queues: Mutex::new(HashMap::new()),
            dead_letters: Mutex::new(Vec::new()),
        }
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        self.validator.registry()
    }

    /// Subscribe to `topic`, validating against schema version 1.
    pub fn subscribe<F>(&self, topic: &str, handler: F)
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe_versioned(topic, DEFAULT_SCHEMA_VERSION, handler);
    }

    /// Subscribe to `topic`, validating against `schema_version`.
    ///
    /// Use [`WILDCARD_TOPIC`] to receive every event; wildcard subscribers are
    /// validated against the published topic's schema.
    pub fn subscribe_versioned<F>(&self, topic: &str, schema_version: u32, handler: F)
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        debug!(topic, schema_version, "subscribed");
        self.subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(topic.to_string())
            .or_default()
            .push(Subscription {
                schema_version,
                handler: Arc::new(handler),
            });
    }

    /// Deliver `event` to the subscribers of `topic`, then to wildcard subscribers.
    ///
    /// Each handler runs under the publisher's correlation context. The first
    /// handler error stops delivery and is returned. A message that fails a
    /// schema version is dead-lettered once per publish, however many
    /// subscribers share that version.
    pub fn publish(&self, topic: &str, event: &Event) -> Result<(), BusError> {
        let subscribers = self.subscribers_for(topic);
        if subscribers.is_empty() {
            debug!(topic, "published with no subscribers");
            return Ok(());
        }

        let envelope = MessageEnvelope::capture(event);
        let message = event.to_json();
        let mut outcomes: HashMap<u32, ValidationOutcome> = HashMap::new();

        for subscription in subscribers {
            let version = subscription.schema_version;
            let outcome = match outcomes.entry(version) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    let outcome = self.validate_json(topic, version, &message);
                    if !outcome.valid {
                        self.dead_letter(topic, version, &message, outcome.errors.clone());
                    }
                    entry.insert(outcome)
                }
            };
            if !outcome.valid {
                continue;
            }

            let span = dispatch_span("bus.publish", topic, envelope.context());
            span.in_scope(|| envelope.open(|event: &&Event| (subscription.handler)(*event)))
                .map_err(|source| BusError::Handler {
                    topic: topic.to_string(),
                    source,
                })?;
        }
        Ok(())
    }

    /// Append `command` to the named queue, remembering the sender's context.
    pub fn send(&self, queue: &str, command: Command) {
        debug!(queue, command_type = command.command_type(), "command queued");
        let envelope = MessageEnvelope::capture(command);
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(queue.to_string())
            .or_default()
            .push_back(envelope);
    }

    /// Drain `queue` in FIFO order, returning how many commands were handled.
    ///
    /// Commands sent while draining are processed in the same call. A handler
    /// error consumes the failing command and stops the drain; the rest stay
    /// queued.
    pub fn process_queue<F>(&self, queue: &str, mut handler: F) -> Result<usize, BusError>
    where
        F: FnMut(&Command) -> anyhow::Result<()>,
    {
        let mut processed = 0;
        while let Some(envelope) = self.pop(queue) {
            let span = dispatch_span("bus.process_queue", queue, envelope.context());
            span.in_scope(|| envelope.open(|command| handler(command)))
                .map_err(|source| BusError::QueueHandler {
                    queue: queue.to_string(),
                    source,
                })?;
            processed += 1;
        }
        Ok(processed)
    }

    pub fn queue_len(&self, queue: &str) -> usize {
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(queue)
            .map_or(0, VecDeque::len)
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Validate `event` as the bus would for a subscriber of `topic` at `version`.
    pub fn validate(&self, topic: &str, version: u32, event: &Event) -> ValidationOutcome {
        self.validate_json(topic, version, &event.to_json())
    }

    fn subscribers_for(&self, topic: &str) -> Vec<Subscription> {
        let subscriptions = self
            .subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let direct = subscriptions.get(topic).into_iter().flatten();
        let wildcard = if topic == WILDCARD_TOPIC {
            None
        } else {
            subscriptions.get(WILDCARD_TOPIC)
        };
        direct.chain(wildcard.into_iter().flatten()).cloned().collect()
    }

    fn pop(&self, queue: &str) -> Option<MessageEnvelope<Command>> {
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(queue)
            .and_then(VecDeque::pop_front)
    }

    fn validate_json(&self, topic: &str, version: u32, message: &JsonValue) -> ValidationOutcome {
        match self.validator.validate(topic, version, message) {
            Ok(outcome) => outcome,
            Err(err) => ValidationOutcome::from_errors(vec![ValidationError {
                instance_path: String::new(),
                keyword: "schema".to_string(),
                message: err.to_string(),
            }]),
        }
    }

    fn dead_letter(
        &self,
        topic: &str,
        schema_version: u32,
        message: &JsonValue,
        errors: Vec<ValidationError>,
    ) {
        warn!(
            topic,
            schema_version,
            errors = ?errors.iter().map(|e| e.message.as_str()).collect::<Vec<_>>(),
            "message failed validation; moved to dead-letter queue"
        );
        self.dead_letters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(DeadLetter {
                topic: topic.to_string(),
                schema_version,
                message: message.clone(),
                errors,
                received_at: Utc::now(),
            });
    }
}

fn dispatch_span(
    name: &'static str,
    destination: &str,
    context: Option<&CorrelationContext>,
) -> tracing::Span {
    let trace_id = context.map_or("-", CorrelationContext::trace_id);
    let span_id = context.map_or("-", CorrelationContext::span_id);
    debug_span!("dispatch", op = name, destination, trace_id, span_id)
}
