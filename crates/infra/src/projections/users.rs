//! User read model.
//!
//! Holds the query-side view of registered users. Password hashes never enter
//! the view.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::debug;

use stratum_core::AggregateId;
use stratum_events::{Event, MessageBus, Projection};
use stratum_identity::{Role, USER_REGISTERED};

pub const USER_READ_MODEL: &str = "UserReadModel";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserView {
    pub id: AggregateId,
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Default)]
pub struct UserReadModelProjector {
    views: RwLock<BTreeMap<AggregateId, UserView>>,
}

impl UserReadModelProjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep the read model current with events published on `bus`.
    pub fn subscribe_live(self: &Arc<Self>, bus: &MessageBus) {
        let projector = Arc::clone(self);
        bus.subscribe(USER_REGISTERED, move |event| {
            projector.apply(event);
            Ok(())
        });
    }

    pub fn find_by_id(&self, id: &AggregateId) -> Option<UserView> {
        self.views
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// All views ordered by id.
    pub fn entries(&self) -> Vec<UserView> {
        self.views
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.views.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub(crate) fn overwrite(&self, view: UserView) {
        self.views
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(view.id.clone(), view);
    }
}

impl Projection for UserReadModelProjector {
    fn apply(&self, event: &Event) {
        if event.event_type() != USER_REGISTERED {
            return;
        }
        let Some(email) = event.data_str("email") else {
            debug!(aggregate_id = %event.aggregate_id(), "registration without email ignored");
            return;
        };
        let role = event
            .data_str("role")
            .and_then(|role| role.parse().ok())
            .unwrap_or_default();
        let view = UserView {
            id: event.aggregate_id().clone(),
            email: email.to_string(),
            role,
        };
        self.views
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(view.id.clone(), view);
    }

    fn clear(&self) {
        self.views
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        debug!("user read model cleared");
    }
}
