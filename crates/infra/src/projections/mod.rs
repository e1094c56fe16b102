//! Projection implementations (read model builders).
//!
//! Projections consume domain events and build query-optimized read models.
//! They are rebuildable from the event store and idempotent under repeated
//! delivery.

pub mod replay;
pub mod users;

pub use replay::{ProjectorManager, ReplayError, ReplayReport};
pub use users::{USER_READ_MODEL, UserReadModelProjector, UserView};
