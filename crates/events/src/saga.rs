//! Saga step contract.
//!
//! A saga is an ordered list of steps threaded through a shared
//! [`SagaContext`]. Each step's `action` returns the context passed to the next
//! step. When a later step fails, the orchestrator calls `compensate` on the
//! steps that already succeeded, newest first, with the context as it stood at
//! the failure.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Key/value state carried from one saga step to the next.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SagaContext(Map<String, JsonValue>);

impl SagaContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(JsonValue::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<JsonValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn into_inner(self) -> Map<String, JsonValue> {
        self.0
    }
}

impl From<Map<String, JsonValue>> for SagaContext {
    fn from(map: Map<String, JsonValue>) -> Self {
        Self(map)
    }
}

#[async_trait]
pub trait SagaStep: Send + Sync {
    fn name(&self) -> &str;

    async fn action(&self, context: SagaContext) -> anyhow::Result<SagaContext>;

    /// Undo the effects of a successful `action`. Steps without side effects
    /// keep the default no-op.
    async fn compensate(&self, _context: &SagaContext) -> anyhow::Result<()> {
        Ok(())
    }
}
