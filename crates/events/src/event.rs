use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use stratum_core::AggregateId;

/// A domain event: an immutable fact appended to an aggregate stream.
///
/// Events are:
/// - **immutable** (treat them as facts; there are no setters)
/// - **positioned** (`version` is the 0-based position inside the stream)
/// - identified by `(aggregate_id, version)`
///
/// The wire form uses camelCase keys:
/// `{"type", "aggregateId", "version", "timestamp", "data"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(rename = "type")]
    event_type: String,
    aggregate_id: AggregateId,
    version: u64,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    data: Map<String, JsonValue>,
}

impl Event {
    /// Create an event stamped with the current time.
    pub fn new(
        event_type: impl Into<String>,
        aggregate_id: AggregateId,
        version: u64,
        data: Map<String, JsonValue>,
    ) -> Self {
        Self::with_timestamp(event_type, aggregate_id, version, Utc::now(), data)
    }

    pub fn with_timestamp(
        event_type: impl Into<String>,
        aggregate_id: AggregateId,
        version: u64,
        timestamp: DateTime<Utc>,
        data: Map<String, JsonValue>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            aggregate_id,
            version,
            timestamp,
            data,
        }
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn aggregate_id(&self) -> &AggregateId {
        &self.aggregate_id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn data(&self) -> &Map<String, JsonValue> {
        &self.data
    }

    /// Convenience accessor for string-valued data fields.
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(JsonValue::as_str)
    }

    /// JSON representation used for schema validation and dead-lettering.
    pub fn to_json(&self) -> JsonValue {
        // Serializing a struct of strings, integers and JSON maps cannot fail.
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}
