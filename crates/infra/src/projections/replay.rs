//! Projection replay: rebuild a registered read model from the full event
//! history.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use stratum_events::Projection;

use crate::event_store::EventStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReplayError {
    #[error("projector '{0}' not found")]
    NotFound(String),
}

/// Outcome of a completed replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub projector: String,
    pub events_replayed: usize,
    pub elapsed_ms: u64,
}

/// Named registry of projections that can be rebuilt on demand.
pub struct ProjectorManager {
    store: Arc<EventStore>,
    projectors: RwLock<BTreeMap<String, Arc<dyn Projection>>>,
}

impl std::fmt::Debug for ProjectorManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectorManager")
            .field("projectors", &self.names())
            .finish_non_exhaustive()
    }
}

impl ProjectorManager {
    pub fn new(store: Arc<EventStore>) -> Self {
        Self {
            store,
            projectors: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register `projector` under `name`, replacing any previous one.
    pub fn register(&self, name: impl Into<String>, projector: Arc<dyn Projection>) {
        let name = name.into();
        let previous = self
            .projectors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), projector);
        if previous.is_some() {
            warn!(projector = %name, "projector already registered; overwriting");
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.projectors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Clear the named projection and re-project every stored event into it.
    pub fn replay(&self, name: &str) -> Result<ReplayReport, ReplayError> {
        let projector = self
            .projectors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| ReplayError::NotFound(name.to_string()))?;

        info!(projector = name, "replay started");
        let started = Instant::now();
        projector.clear();
        let events = self.store.read_all_events();
        projector.project(&events);

        let report = ReplayReport {
            projector: name.to_string(),
            events_replayed: events.len(),
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        info!(
            projector = name,
            events = report.events_replayed,
            elapsed_ms = report.elapsed_ms,
            "replay completed"
        );
        Ok(report)
    }
}
