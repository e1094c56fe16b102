use serde::{Deserialize, Serialize};

use crate::context::{self, CorrelationContext};

/// Envelope wrapping a message in transit, carrying the correlation context
/// of whoever published or sent it.
///
/// Handlers receive the payload only; the bus restores the envelope's context
/// around each handler call. The context is not kept on the message after
/// delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEnvelope<M> {
    context: Option<CorrelationContext>,
    payload: M,
}

impl<M> MessageEnvelope<M> {
    pub fn new(context: Option<CorrelationContext>, payload: M) -> Self {
        Self { context, payload }
    }

    /// Wrap `payload` with the caller's ambient context.
    pub fn capture(payload: M) -> Self {
        Self::new(context::current(), payload)
    }

    pub fn context(&self) -> Option<&CorrelationContext> {
        self.context.as_ref()
    }

    pub fn payload(&self) -> &M {
        &self.payload
    }

    pub fn into_payload(self) -> M {
        self.payload
    }

    /// Run `f` on the payload with the envelope's context restored.
    pub fn open<R>(&self, f: impl FnOnce(&M) -> R) -> R {
        context::maybe_with_context_sync(self.context.clone(), || f(&self.payload))
    }
}
