//! Correlation context: trace/span identifiers that follow a unit of work
//! through the bus, queues, saga steps and circuit-breaker calls.
//!
//! The current context is ambient per task, held in a `tokio::task_local!`.
//! It can only be changed by entering a scope (`with_context`,
//! `with_context_sync`, `traced`), and the previous value is restored when the
//! scope exits, whether the inner code succeeds, fails or panics. Interleaved
//! tasks never observe each other's identifiers.

use std::future::Future;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

tokio::task_local! {
    static CURRENT: CorrelationContext;
}

/// Trace + span identifiers for one operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrelationContext {
    trace_id: String,
    span_id: String,
}

impl CorrelationContext {
    pub fn new(trace_id: impl Into<String>, span_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            span_id: span_id.into(),
        }
    }

    /// Start a new trace.
    pub fn new_root() -> Self {
        Self::new(Uuid::new_v4().to_string(), new_span_id())
    }

    /// Same trace, fresh span.
    pub fn child(&self) -> Self {
        Self::new(self.trace_id.clone(), new_span_id())
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn span_id(&self) -> &str {
        &self.span_id
    }
}

fn new_span_id() -> String {
    let mut simple = Uuid::new_v4().simple().to_string();
    simple.truncate(8);
    simple
}

/// The context of the calling task, if any scope is active.
pub fn current() -> Option<CorrelationContext> {
    CURRENT.try_with(Clone::clone).ok()
}

/// Run `fut` with `context` as the ambient context.
pub async fn with_context<F>(context: CorrelationContext, fut: F) -> F::Output
where
    F: Future,
{
    CURRENT.scope(context, fut).await
}

/// Run `f` synchronously with `context` as the ambient context.
pub fn with_context_sync<R>(context: CorrelationContext, f: impl FnOnce() -> R) -> R {
    CURRENT.sync_scope(context, f)
}

/// Run `f` under `context` when one is given, otherwise leave the ambient
/// context untouched.
pub fn maybe_with_context_sync<R>(context: Option<CorrelationContext>, f: impl FnOnce() -> R) -> R {
    match context {
        Some(ctx) => with_context_sync(ctx, f),
        None => f(),
    }
}

/// Run `fut` inside a child span of the current context (or a new root
/// trace when none is active).
pub async fn traced<F>(fut: F) -> F::Output
where
    F: Future,
{
    let context = current()
        .map(|parent| parent.child())
        .unwrap_or_else(CorrelationContext::new_root);
    with_context(context, fut).await
}
