//! Message contracts for the user events.
//!
//! Versions are assigned by the registry in registration order, so the
//! definitions here must only ever be appended to.

use serde_json::{Value as JsonValue, json};

use stratum_events::SchemaRegistry;
use stratum_identity::{USER_DEACTIVATED, USER_REGISTERED, USER_UPDATED};

pub fn user_registered_v1() -> JsonValue {
    json!({
        "type": "object",
        "properties": {
            "aggregateId": { "type": "string", "format": "uuid" },
            "version": { "type": "integer", "minimum": 0 },
            "data": {
                "type": "object",
                "properties": {
                    "email": { "type": "string", "format": "email" },
                    "passwordHash": { "type": "string", "minLength": 1 },
                    "role": { "type": "string", "enum": ["customer", "admin"] }
                },
                "required": ["email", "passwordHash", "role"]
            }
        },
        "required": ["aggregateId", "data"]
    })
}

pub fn user_deactivated_v1() -> JsonValue {
    json!({
        "type": "object",
        "properties": {
            "aggregateId": { "type": "string", "format": "uuid" },
            "data": { "type": "object", "properties": {} }
        },
        "required": ["aggregateId", "data"]
    })
}

pub fn user_updated_v1() -> JsonValue {
    json!({
        "type": "object",
        "properties": {
            "aggregateId": { "type": "string", "format": "uuid" },
            "data": { "type": "object" }
        },
        "required": ["aggregateId", "data"]
    })
}

/// Register version 1 of every user event contract.
pub fn register_builtin_schemas(registry: &SchemaRegistry) {
    registry.register(USER_REGISTERED, user_registered_v1());
    registry.register(USER_DEACTIVATED, user_deactivated_v1());
    registry.register(USER_UPDATED, user_updated_v1());
}
