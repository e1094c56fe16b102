//! Named circuit breakers, discoverable for status reporting.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::warn;

use super::{BreakerStatus, CircuitBreaker};

#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    breakers: RwLock<BTreeMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `breaker` under its own name, replacing any previous one.
    pub fn register(&self, breaker: Arc<CircuitBreaker>) {
        let name = breaker.name().to_string();
        let previous = self
            .breakers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), breaker);
        if previous.is_some() {
            warn!(breaker = %name, "circuit breaker already registered; overwriting");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn all_status(&self) -> BTreeMap<String, BreakerStatus> {
        self.breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.status()))
            .collect()
    }
}
