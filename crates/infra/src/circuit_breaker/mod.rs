//! Circuit breaker for calls to unreliable dependencies.
//!
//! ```text
//! CLOSED --(failure_threshold failures)--> OPEN
//! OPEN --(timeout elapsed, next call)--> HALF_OPEN
//! HALF_OPEN --(success_threshold successes)--> CLOSED
//! HALF_OPEN --(any failure)--> OPEN
//! ```

pub mod registry;

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub use registry::CircuitBreakerRegistry;

/// Breaker thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open a closed circuit.
    pub failure_threshold: u32,
    /// Successful trials that close a half-open circuit.
    pub success_threshold: u32,
    /// How long the circuit stays open before allowing a trial call.
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: 1,
            timeout: Duration::from_millis(5000),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new(failure_threshold: u32, success_threshold: u32, timeout: Duration) -> Self {
        Self {
            failure_threshold,
            success_threshold,
            timeout,
        }
    }

    /// Zero values fall back to the defaults.
    fn normalized(self) -> Self {
        let defaults = Self::default();
        Self {
            failure_threshold: if self.failure_threshold == 0 {
                defaults.failure_threshold
            } else {
                self.failure_threshold
            },
            success_threshold: if self.success_threshold == 0 {
                defaults.success_threshold
            } else {
                self.success_threshold
            },
            timeout: if self.timeout.is_zero() {
                defaults.timeout
            } else {
                self.timeout
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a breaker, for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerStatus {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The circuit is open; the operation was not attempted.
    #[error("circuit breaker '{name}' is open; operation rejected")]
    Open { name: String },

    /// The operation ran and failed.
    #[error("{0}")]
    Inner(E),
}

impl<E> BreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }

    pub fn into_inner(self) -> Option<E> {
        match self {
            BreakerError::Inner(err) => Some(err),
            BreakerError::Open { .. } => None,
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    tripped_at: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config: config.normalized(),
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                tripped_at: None,
                last_failure_at: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> CircuitBreakerConfig {
        self.config
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn status(&self) -> BreakerStatus {
        let inner = self.lock();
        BreakerStatus {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            last_failure_at: inner.last_failure_at,
        }
    }

    /// Run `operation` unless the circuit is open.
    ///
    /// An open circuit whose timeout has elapsed moves to HALF_OPEN and lets
    /// the call through as a trial.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.admit()?;
        match operation().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) => {
                self.on_failure();
                Err(BreakerError::Inner(err))
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn admit<E>(&self) -> Result<(), BreakerError<E>> {
        let mut inner = self.lock();
        if inner.state != CircuitState::Open {
            return Ok(());
        }
        let elapsed = inner
            .tripped_at
            .map(|at| Instant::now().duration_since(at))
            .unwrap_or(Duration::MAX);
        if elapsed > self.config.timeout {
            inner.state = CircuitState::HalfOpen;
            inner.success_count = 0;
            info!(breaker = %self.name, "circuit half-open");
            Ok(())
        } else {
            debug!(breaker = %self.name, "circuit open; call rejected");
            Err(BreakerError::Open {
                name: self.name.clone(),
            })
        }
    }

    fn on_success(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.success_count += 1;
            if inner.success_count >= self.config.success_threshold {
                inner.state = CircuitState::Closed;
                inner.success_count = 0;
                info!(breaker = %self.name, "circuit closed");
            }
        }
        inner.failure_count = 0;
    }

    fn on_failure(&self) {
        let mut inner = self.lock();
        inner.failure_count += 1;
        if inner.state == CircuitState::HalfOpen
            || inner.failure_count >= self.config.failure_threshold
        {
            inner.state = CircuitState::Open;
            inner.failure_count = 0;
            inner.tripped_at = Some(Instant::now());
            inner.last_failure_at = Some(Utc::now());
            warn!(breaker = %self.name, "circuit opened");
        }
    }
}
