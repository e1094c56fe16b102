//! Infrastructure layer: stores, projections, sagas, resilience and wiring.

pub mod circuit_breaker;
pub mod command_dispatcher;
pub mod config;
pub mod event_store;
pub mod notifications;
pub mod persistence;
pub mod projections;
pub mod repository;
pub mod runtime;
pub mod saga;
pub mod schemas;
pub mod snapshot_store;


pub use runtime::{Runtime, RuntimeError};
