//! Saga orchestration: run named step sequences and roll them back on failure.
//!
//! On a step failure, every step that already succeeded is compensated in
//! reverse order with the context as it stood at the failure. Compensation
//! failures are logged and swallowed so the remaining compensations still run.

pub mod user_registration;

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;
use tracing::{Instrument, error, info, info_span};

use stratum_events::context::{self, CorrelationContext};
use stratum_events::{SagaContext, SagaStep};

pub use user_registration::{
    CreateUserStep, SendWelcomeEmailStep, USER_REGISTRATION_SAGA, WelcomeNotifier,
    define_user_registration_saga,
};

#[derive(Debug, Error)]
pub enum SagaError {
    #[error("saga '{0}' is not defined")]
    NotDefined(String),

    #[error("saga '{0}' is already defined")]
    AlreadyDefined(String),

    #[error("saga '{saga}' failed and was rolled back")]
    Failed {
        saga: String,
        step: String,
        #[source]
        source: anyhow::Error,
    },
}

struct SagaDefinition {
    steps: Vec<Arc<dyn SagaStep>>,
}

#[derive(Default)]
pub struct SagaOrchestrator {
    sagas: RwLock<HashMap<String, Arc<SagaDefinition>>>,
}

impl std::fmt::Debug for SagaOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaOrchestrator")
            .field("sagas", &self.names())
            .finish()
    }
}

impl SagaOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(
        &self,
        name: impl Into<String>,
        steps: Vec<Arc<dyn SagaStep>>,
    ) -> Result<(), SagaError> {
        let name = name.into();
        let mut sagas = self.sagas.write().unwrap_or_else(PoisonError::into_inner);
        if sagas.contains_key(&name) {
            return Err(SagaError::AlreadyDefined(name));
        }
        info!(saga = %name, steps = steps.len(), "saga defined");
        sagas.insert(name, Arc::new(SagaDefinition { steps }));
        Ok(())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .sagas
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Run the saga's steps in order, threading the context through them.
    pub async fn execute(&self, name: &str, initial: SagaContext) -> Result<SagaContext, SagaError> {
        let definition = self
            .sagas
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| SagaError::NotDefined(name.to_string()))?;

        let run = child_of_current();
        context::with_context(run, self.run(name, &definition, initial)).await
    }

    async fn run(
        &self,
        saga: &str,
        definition: &SagaDefinition,
        initial: SagaContext,
    ) -> Result<SagaContext, SagaError> {
        let mut executed: Vec<&Arc<dyn SagaStep>> = Vec::with_capacity(definition.steps.len());
        let mut current = initial;

        for step in &definition.steps {
            let attempt = current.clone();
            match in_step_scope(saga, step.name(), "action", step.action(attempt)).await {
                Ok(next) => {
                    current = next;
                    executed.push(step);
                }
                Err(source) => {
                    error!(saga, step = step.name(), error = %source, "saga step failed; compensating");
                    compensate(saga, &executed, &current).await;
                    return Err(SagaError::Failed {
                        saga: saga.to_string(),
                        step: step.name().to_string(),
                        source,
                    });
                }
            }
        }

        info!(saga, "saga completed");
        Ok(current)
    }
}

async fn compensate(saga: &str, executed: &[&Arc<dyn SagaStep>], context: &SagaContext) {
    for step in executed.iter().rev() {
        let result = in_step_scope(saga, step.name(), "compensate", step.compensate(context)).await;
        if let Err(err) = result {
            error!(saga, step = step.name(), error = %err, "compensation failed");
        }
    }
    info!(saga, compensated = executed.len(), "compensation finished");
}

fn child_of_current() -> CorrelationContext {
    context::current()
        .map(|parent| parent.child())
        .unwrap_or_else(CorrelationContext::new_root)
}

async fn in_step_scope<F>(saga: &str, step: &str, phase: &'static str, fut: F) -> F::Output
where
    F: Future,
{
    let ctx = child_of_current();
    let span = info_span!(
        "saga_step",
        saga,
        step,
        phase,
        trace_id = ctx.trace_id(),
        span_id = ctx.span_id()
    );
    context::with_context(ctx, fut.instrument(span)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    type Log = Arc<Mutex<Vec<String>>>;

    struct Recording {
        name: &'static str,
        fail_action: bool,
        fail_compensation: bool,
        log: Log,
    }

    impl Recording {
        fn ok(name: &'static str, log: &Log) -> Arc<dyn SagaStep> {
            Arc::new(Self {
                name,
                fail_action: false,
                fail_compensation: false,
                log: log.clone(),
            })
        }

        fn failing(name: &'static str, log: &Log) -> Arc<dyn SagaStep> {
            Arc::new(Self {
                name,
                fail_action: true,
                fail_compensation: false,
                log: log.clone(),
            })
        }

        fn broken_compensation(name: &'static str, log: &Log) -> Arc<dyn SagaStep> {
            Arc::new(Self {
                name,
                fail_action: false,
                fail_compensation: true,
                log: log.clone(),
            })
        }
    }

    #[async_trait]
    impl SagaStep for Recording {
        fn name(&self) -> &str {
            self.name
        }

        async fn action(&self, context: SagaContext) -> anyhow::Result<SagaContext> {
            self.log.lock().unwrap().push(format!("action:{}", self.name));
            if self.fail_action {
                anyhow::bail!("{} exploded", self.name);
            }
            Ok(context.with(self.name, true))
        }

        async fn compensate(&self, context: &SagaContext) -> anyhow::Result<()> {
            let seen: Vec<_> = ["a", "b", "c"]
                .into_iter()
                .filter(|key| context.get(key).is_some())
                .collect();
            self.log
                .lock()
                .unwrap()
                .push(format!("compensate:{}:{}", self.name, seen.join("")));
            if self.fail_compensation {
                anyhow::bail!("cannot undo {}", self.name);
            }
            Ok(())
        }
    }

    fn log() -> Log {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[tokio::test]
    async fn successful_run_threads_context_through_steps() {
        let log = log();
        let orchestrator = SagaOrchestrator::new();
        orchestrator
            .define("demo", vec![Recording::ok("a", &log), Recording::ok("b", &log)])
            .unwrap();

        let result = orchestrator
            .execute("demo", SagaContext::new().with("seed", 1))
            .await
            .unwrap();

        assert_eq!(result.get("seed"), Some(&json!(1)));
        assert_eq!(result.get("a"), Some(&json!(true)));
        assert_eq!(result.get("b"), Some(&json!(true)));
        assert_eq!(*log.lock().unwrap(), vec!["action:a", "action:b"]);
    }

    #[tokio::test]
    async fn failure_compensates_executed_steps_in_reverse() {
        let log = log();
        let orchestrator = SagaOrchestrator::new();
        orchestrator
            .define(
                "demo",
                vec![
                    Recording::ok("a", &log),
                    Recording::ok("b", &log),
                    Recording::failing("c", &log),
                ],
            )
            .unwrap();

        let err = orchestrator.execute("demo", SagaContext::new()).await.unwrap_err();

        assert_eq!(err.to_string(), "saga 'demo' failed and was rolled back");
        let SagaError::Failed { step, source, .. } = err else {
            panic!("expected saga failure");
        };
        assert_eq!(step, "c");
        assert_eq!(source.to_string(), "c exploded");
        assert_eq!(
            *log.lock().unwrap(),
            vec!["action:a", "action:b", "action:c", "compensate:b:ab", "compensate:a:ab"]
        );
    }

    #[tokio::test]
    async fn compensation_failures_do_not_stop_rollback() {
        let log = log();
        let orchestrator = SagaOrchestrator::new();
        orchestrator
            .define(
                "demo",
                vec![
                    Recording::ok("a", &log),
                    Recording::broken_compensation("b", &log),
                    Recording::failing("c", &log),
                ],
            )
            .unwrap();

        let err = orchestrator.execute("demo", SagaContext::new()).await.unwrap_err();
        assert!(matches!(err, SagaError::Failed { .. }));
        let log = log.lock().unwrap();
        assert!(log.contains(&"compensate:b:ab".to_string()));
        assert!(log.contains(&"compensate:a:ab".to_string()));
    }

    #[tokio::test]
    async fn first_step_failure_compensates_nothing() {
        let log = log();
        let orchestrator = SagaOrchestrator::new();
        orchestrator
            .define("demo", vec![Recording::failing("a", &log), Recording::ok("b", &log)])
            .unwrap();

        assert!(orchestrator.execute("demo", SagaContext::new()).await.is_err());
        assert_eq!(*log.lock().unwrap(), vec!["action:a"]);
    }

    #[tokio::test]
    async fn unknown_and_duplicate_sagas_are_rejected() {
        let orchestrator = SagaOrchestrator::new();
        assert!(matches!(
            orchestrator.execute("missing", SagaContext::new()).await,
            Err(SagaError::NotDefined(_))
        ));

        orchestrator.define("demo", Vec::new()).unwrap();
        assert!(matches!(
            orchestrator.define("demo", Vec::new()),
            Err(SagaError::AlreadyDefined(_))
        ));
        assert_eq!(orchestrator.names(), vec!["demo".to_string()]);
    }

    struct ContextProbe {
        seen: Arc<Mutex<Option<CorrelationContext>>>,
    }

    #[async_trait]
    impl SagaStep for ContextProbe {
        fn name(&self) -> &str {
            "probe"
        }

        async fn action(&self, context: SagaContext) -> anyhow::Result<SagaContext> {
            tokio::task::yield_now().await;
            *self.seen.lock().unwrap() = context::current();
            Ok(context)
        }
    }

    #[tokio::test]
    async fn steps_run_in_child_spans_of_the_caller() {
        let seen = Arc::new(Mutex::new(None));
        let orchestrator = SagaOrchestrator::new();
        orchestrator
            .define("probe", vec![Arc::new(ContextProbe { seen: seen.clone() })])
            .unwrap();

        let caller = CorrelationContext::new("trace-saga", "span-caller");
        context::with_context(caller.clone(), async {
            orchestrator.execute("probe", SagaContext::new()).await.unwrap();
            assert_eq!(context::current(), Some(caller.clone()));
        })
        .await;

        let step_ctx = seen.lock().unwrap().clone().unwrap();
        assert_eq!(step_ctx.trace_id(), "trace-saga");
        assert_ne!(step_ctx.span_id(), "span-caller");
    }
}
