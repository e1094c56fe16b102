use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// A point-to-point message: a request for a specific consumer to act.
///
/// Commands represent **intent** and are transient. Unlike events they are
/// not validated by the bus and not persisted; they travel through named
/// queues (`MessageBus::send` / `MessageBus::process_queue`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    #[serde(rename = "type")]
    command_type: String,
    #[serde(default)]
    data: Map<String, JsonValue>,
}

impl Command {
    pub fn new(command_type: impl Into<String>, data: Map<String, JsonValue>) -> Self {
        Self {
            command_type: command_type.into(),
            data,
        }
    }

    pub fn command_type(&self) -> &str {
        &self.command_type
    }

    pub fn data(&self) -> &Map<String, JsonValue> {
        &self.data
    }

    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(JsonValue::as_str)
    }
}
