use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use serde_json::Value as JsonValue;

/// One registered version of a schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Schema {
    pub name: String,
    /// 1-indexed, assigned by the registry.
    pub version: u32,
    pub definition: JsonValue,
}

/// In-memory, append-only schema registry.
///
/// Registering never overwrites: each call adds the next version. Several
/// versions coexist so consumers can keep validating against the one they
/// understand.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: RwLock<HashMap<String, Vec<Arc<Schema>>>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new version of `name` and return its version number.
    pub fn register(&self, name: impl Into<String>, definition: JsonValue) -> u32 {
        let name = name.into();
        let mut schemas = self.schemas.write().unwrap_or_else(PoisonError::into_inner);
        let versions = schemas.entry(name.clone()).or_default();
        let version = versions.len() as u32 + 1;
        versions.push(Arc::new(Schema {
            name: name.clone(),
            version,
            definition,
        }));
        tracing::info!(schema = %name, version, "registered schema");
        version
    }

    pub fn get_schema(&self, name: &str, version: u32) -> Option<Arc<Schema>> {
        if version == 0 {
            return None;
        }
        let schemas = self.schemas.read().unwrap_or_else(PoisonError::into_inner);
        schemas.get(name)?.get(version as usize - 1).cloned()
    }

    pub fn get_latest_schema(&self, name: &str) -> Option<Arc<Schema>> {
        let schemas = self.schemas.read().unwrap_or_else(PoisonError::into_inner);
        schemas.get(name)?.last().cloned()
    }

    pub fn latest_version(&self, name: &str) -> Option<u32> {
        self.get_latest_schema(name).map(|s| s.version)
    }

    /// Registered schema names, sorted.
    pub fn names(&self) -> Vec<String> {
        let schemas = self.schemas.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = schemas.keys().cloned().collect();
        names.sort();
        names
    }
}
