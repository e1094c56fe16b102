use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info};

use stratum_core::AggregateId;

use crate::persistence::{DocumentStorage, InMemoryStorage, JsonFileStorage, PersistenceError};

/// Aggregate state captured at `version` (the version of the last event
/// folded into `state`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub aggregate_id: AggregateId,
    pub version: u64,
    pub state: JsonValue,
}

/// Persisted form of a snapshot; the aggregate id is the document key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub version: u64,
    pub state: JsonValue,
}

pub type SnapshotDocument = BTreeMap<AggregateId, SnapshotRecord>;

#[derive(Debug, Error)]
pub enum SnapshotStoreError {
    #[error("snapshot store lock poisoned")]
    LockPoisoned,

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Latest snapshot per aggregate.
pub struct SnapshotStore {
    snapshots: RwLock<SnapshotDocument>,
    storage: Box<dyn DocumentStorage<SnapshotDocument>>,
}

impl std::fmt::Debug for SnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshots = self.snapshots.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("SnapshotStore")
            .field("snapshots", &snapshots.len())
            .finish_non_exhaustive()
    }
}

impl SnapshotStore {
    pub fn in_memory() -> Self {
        Self {
            snapshots: RwLock::new(SnapshotDocument::new()),
            storage: Box::new(InMemoryStorage::new()),
        }
    }

    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SnapshotStoreError> {
        Self::with_storage(Box::new(JsonFileStorage::new(path)))
    }

    pub fn with_storage(
        storage: Box<dyn DocumentStorage<SnapshotDocument>>,
    ) -> Result<Self, SnapshotStoreError> {
        let snapshots = storage.load()?;
        Ok(Self {
            snapshots: RwLock::new(snapshots),
            storage,
        })
    }

    /// Store `snapshot` unless a newer one is already held. Returns whether it
    /// was stored.
    pub fn save(&self, snapshot: Snapshot) -> Result<bool, SnapshotStoreError> {
        let mut snapshots = self
            .snapshots
            .write()
            .map_err(|_| SnapshotStoreError::LockPoisoned)?;

        if let Some(current) = snapshots.get(&snapshot.aggregate_id) {
            if current.version > snapshot.version {
                debug!(
                    aggregate_id = %snapshot.aggregate_id,
                    held = current.version,
                    offered = snapshot.version,
                    "ignoring older snapshot"
                );
                return Ok(false);
            }
        }

        let Snapshot {
            aggregate_id,
            version,
            state,
        } = snapshot;
        let previous = snapshots.insert(aggregate_id.clone(), SnapshotRecord { version, state });

        if let Err(err) = self.storage.save(&snapshots) {
            match previous {
                Some(record) => snapshots.insert(aggregate_id, record),
                None => snapshots.remove(&aggregate_id),
            };
            return Err(err.into());
        }

        info!(aggregate_id = %aggregate_id, version, "snapshot saved");
        Ok(true)
    }

    pub fn get(&self, aggregate_id: &AggregateId) -> Option<Snapshot> {
        self.snapshots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(aggregate_id)
            .map(|record| Snapshot {
                aggregate_id: aggregate_id.clone(),
                version: record.version,
                state: record.state.clone(),
            })
    }

    pub fn clear(&self) -> Result<(), SnapshotStoreError> {
        let mut snapshots = self
            .snapshots
            .write()
            .map_err(|_| SnapshotStoreError::LockPoisoned)?;
        snapshots.clear();
        self.storage.save(&snapshots)?;
        Ok(())
    }
}
