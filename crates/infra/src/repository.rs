//! User repository: hydration from snapshot + event tail, and the snapshot
//! policy applied after each save.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use stratum_core::{Aggregate, AggregateId, AggregateRoot};
use stratum_events::Event;
use stratum_identity::{User, UserState};

use crate::event_store::EventStore;
use crate::snapshot_store::{Snapshot, SnapshotStore, SnapshotStoreError};

pub const DEFAULT_SNAPSHOT_INTERVAL: u64 = 10;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("user '{0}' not found")]
    NotFound(AggregateId),

    #[error("snapshot for '{aggregate_id}' could not be decoded: {source}")]
    CorruptSnapshot {
        aggregate_id: AggregateId,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Snapshot(#[from] SnapshotStoreError),
}

#[derive(Debug, Clone)]
pub struct UserRepository {
    events: Arc<EventStore>,
    snapshots: Arc<SnapshotStore>,
    snapshot_interval: u64,
}

impl UserRepository {
    pub fn new(events: Arc<EventStore>, snapshots: Arc<SnapshotStore>) -> Self {
        Self {
            events,
            snapshots,
            snapshot_interval: DEFAULT_SNAPSHOT_INTERVAL,
        }
    }

    /// Snapshot every `interval` events. `0` disables snapshotting.
    pub fn with_snapshot_interval(mut self, interval: u64) -> Self {
        self.snapshot_interval = interval;
        self
    }

    pub fn snapshot_interval(&self) -> u64 {
        self.snapshot_interval
    }

    /// Rebuild a user from its latest snapshot (if any) plus the events after it.
    pub fn find_by_id(&self, aggregate_id: &AggregateId) -> Result<User, RepositoryError> {
        let snapshot = self.snapshots.get(aggregate_id);
        let events = self.events.read_stream(aggregate_id);
        if snapshot.is_none() && events.is_empty() {
            return Err(RepositoryError::NotFound(aggregate_id.clone()));
        }

        let (mut user, after) = match snapshot {
            Some(snapshot) => {
                let state: UserState =
                    serde_json::from_value(snapshot.state).map_err(|source| {
                        RepositoryError::CorruptSnapshot {
                            aggregate_id: aggregate_id.clone(),
                            source,
                        }
                    })?;
                (User::from_snapshot(state, snapshot.version), Some(snapshot.version))
            }
            None => (User::new(), None),
        };

        let mut replayed = 0usize;
        for event in events
            .iter()
            .filter(|event| after.is_none_or(|version| event.version() > version))
        {
            user.apply(event);
            replayed += 1;
        }

        debug!(
            aggregate_id = %aggregate_id,
            snapshot_version = ?after,
            replayed,
            version = user.version(),
            "user hydrated"
        );
        Ok(user)
    }

    /// Apply the snapshot policy after `events` were persisted for `user`.
    ///
    /// Returns the snapshot version when one was written.
    pub fn save(&self, user: &User, events: &[Event]) -> Result<Option<u64>, RepositoryError> {
        if self.snapshot_interval == 0 {
            return Ok(None);
        }
        let Some(last) = events.last() else {
            return Ok(None);
        };
        if (last.version() + 1) % self.snapshot_interval != 0 {
            return Ok(None);
        }
        let Some(aggregate_id) = user.id() else {
            return Ok(None);
        };

        let state = serde_json::to_value(user.state()).map_err(|source| {
            RepositoryError::CorruptSnapshot {
                aggregate_id: aggregate_id.clone(),
                source,
            }
        })?;
        let stored = self.snapshots.save(Snapshot {
            aggregate_id: aggregate_id.clone(),
            version: last.version(),
            state,
        })?;
        Ok(stored.then_some(last.version()))
    }
}
