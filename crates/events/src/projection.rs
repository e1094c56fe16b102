use crate::Event;

/// A projection builds a read model from the event stream.
///
/// Read models are disposable: `clear` followed by `project` over the full
/// history must rebuild the same state. `apply` must therefore be idempotent,
/// and events a projection does not care about are ignored.
///
/// Projections are shared between the bus (live updates) and replay, so they
/// take `&self` and keep their state behind interior mutability.
pub trait Projection: Send + Sync {
    fn apply(&self, event: &Event);

    /// Drop all read-model state.
    fn clear(&self);

    fn project(&self, events: &[Event]) {
        for event in events {
            self.apply(event);
        }
    }
}

impl<P> Projection for std::sync::Arc<P>
where
    P: Projection + ?Sized,
{
    fn apply(&self, event: &Event) {
        (**self).apply(event)
    }

    fn clear(&self) {
        (**self).clear()
    }

    fn project(&self, events: &[Event]) {
        (**self).project(events)
    }
}
