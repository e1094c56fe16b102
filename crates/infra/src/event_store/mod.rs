//! Append-only event store.
//!
//! Streams are keyed by aggregate id and kept fully in memory; every mutation
//! writes the whole document through the configured
//! [`DocumentStorage`](crate::persistence::DocumentStorage).

pub mod error;
pub mod store;

pub use error::EventStoreError;
pub use store::{EventStore, EventStreams};
