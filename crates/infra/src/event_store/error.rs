use thiserror::Error;

use stratum_core::AggregateId;

use crate::persistence::PersistenceError;

/// Event store operation error.
///
/// These are infrastructure errors (stream positioning, storage) as opposed to
/// domain errors (validation, invariants).
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// The event's version is not the next position of its stream.
    #[error("stream '{aggregate_id}' expects version {expected}, got {actual}")]
    VersionConflict {
        aggregate_id: AggregateId,
        expected: u64,
        actual: u64,
    },

    #[error("event store lock poisoned")]
    LockPoisoned,

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}
