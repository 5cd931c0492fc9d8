//! Named breakers shared across call sites.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot};
use crate::retry::RetryExecutor;

/// Hands out one [`CircuitBreaker`] per resource name.
///
/// Every lookup of the same name returns the same breaker, so failures
/// observed at one call site open the circuit for all of them.
///
/// ```rust
/// use steadfast::circuit::{CircuitBreakerConfig, CircuitRegistry};
/// use std::sync::Arc;
///
/// let registry = CircuitRegistry::new(CircuitBreakerConfig::default());
/// let a = registry.get("inventory");
/// let b = registry.get("inventory");
///
/// assert!(Arc::ptr_eq(&a, &b));
/// assert_eq!(registry.names(), vec!["inventory".to_string()]);
/// ```
#[derive(Debug)]
pub struct CircuitRegistry {
    config: CircuitBreakerConfig,
    executor: RetryExecutor,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitRegistry {
    /// Create an empty registry whose breakers default to `config`.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            executor: RetryExecutor::new(),
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Build breakers on `executor`.
    pub fn with_executor(mut self, executor: RetryExecutor) -> Self {
        self.executor = executor;
        self
    }

    /// The breaker for `name`, created with the registry's config on first use.
    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        self.get_with(name, self.config)
    }

    /// The breaker for `name`, created with `config` on first use.
    ///
    /// `config` is ignored when the breaker already exists.
    pub fn get_with(&self, name: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        let mut breakers = self.lock();
        if let Some(existing) = breakers.get(name) {
            return existing.clone();
        }

        tracing::debug!(circuit = name, "registering circuit breaker");
        let breaker = Arc::new(CircuitBreaker::new(name, config).with_executor(self.executor.clone()));
        breakers.insert(name.to_string(), breaker.clone());
        breaker
    }

    /// Returns true if a breaker named `name` exists.
    pub fn contains(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Every breaker's snapshot, sorted by name.
    pub fn snapshots(&self) -> Vec<(String, CircuitSnapshot)> {
        let breakers: Vec<_> = self
            .lock()
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.clone()))
            .collect();

        let mut snapshots: Vec<_> = breakers
            .into_iter()
            .map(|(name, breaker)| (name, breaker.snapshot()))
            .collect();
        snapshots.sort_by(|a, b| a.0.cmp(&b.0));
        snapshots
    }

    /// Forget the breaker for `name`. Holders of the old `Arc` keep using it.
    pub fn remove(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.lock().remove(name)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<CircuitBreaker>>> {
        self.breakers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for CircuitRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
