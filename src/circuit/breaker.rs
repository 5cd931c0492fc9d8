//! The breaker state machine.

use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::retry::{CircuitOpenError, RetryError, RetryExecutor, RetryOutcome, RetryPolicy};

/// When a breaker opens and how long it stays open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failed calls that open the circuit. Values below 1 act as 1.
    pub failure_threshold: u32,
    /// Time after the last failure before a probe is admitted.
    pub reset_timeout: Duration,
}

impl CircuitBreakerConfig {
    /// Default consecutive failures before opening.
    pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
    /// Default time an open circuit waits before probing.
    pub const DEFAULT_RESET_TIMEOUT: Duration = Duration::from_secs(30);

    /// Create a config.
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            reset_timeout,
        }
    }

    fn threshold(&self) -> u32 {
        self.failure_threshold.max(1)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::new(Self::DEFAULT_FAILURE_THRESHOLD, Self::DEFAULT_RESET_TIMEOUT)
    }
}

/// Where a breaker is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum CircuitState {
    /// Calls pass through.
    Closed,
    /// Calls are rejected until the reset timeout elapses.
    Open,
    /// A single probe call is in flight.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// A read-only view of a breaker at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CircuitSnapshot {
    /// Current state.
    pub state: CircuitState,
    /// Failed calls since the last success.
    pub consecutive_failures: u32,
    /// Failures that open the circuit.
    pub failure_threshold: u32,
    /// Wait between opening and probing.
    pub reset_timeout: Duration,
    /// Time since the failure that last opened or re-opened the circuit.
    pub since_last_failure: Option<Duration>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    // Bumped by `reset`; permits from an older epoch settle as no-ops.
    epoch: u64,
}

impl BreakerState {
    fn closed(epoch: u64) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure: None,
            epoch,
        }
    }
}

/// Guards a resource by refusing calls after repeated failures.
///
/// Every call is a full retried call on the breaker's [`RetryExecutor`];
/// the breaker only sees its final result. A successful call resets the
/// failure count. A call that fails after exhausting (or aborting) its
/// retries counts once. Calls cut short by cancellation or a total timeout
/// do not count at all.
///
/// The state lock is never held across an await, so a breaker can be
/// shared freely between tasks.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    executor: RetryExecutor,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Create a closed breaker named `name`.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            executor: RetryExecutor::new(),
            state: Mutex::new(BreakerState::closed(0)),
        }
    }

    /// Run calls on `executor`. Reset windows are measured on its clock.
    pub fn with_executor(mut self, executor: RetryExecutor) -> Self {
        self.executor = executor;
        self
    }

    /// The breaker's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The breaker's configuration.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state.
    ///
    /// An open breaker whose reset timeout has passed still reports
    /// [`CircuitState::Open`] until a call arrives to probe it.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Current state and counters.
    pub fn snapshot(&self) -> CircuitSnapshot {
        let now = self.executor.clock().now();
        let state = self.lock();
        CircuitSnapshot {
            state: state.state,
            consecutive_failures: state.consecutive_failures,
            failure_threshold: self.config.threshold(),
            reset_timeout: self.config.reset_timeout,
            since_last_failure: state
                .last_failure
                .map(|at| now.saturating_duration_since(at)),
        }
    }

    /// Force the breaker closed and forget its failures.
    ///
    /// Calls already in flight, including a probe, no longer affect the
    /// breaker when they finish.
    pub fn reset(&self) {
        let mut state = self.lock();
        let epoch = state.epoch.wrapping_add(1);
        *state = BreakerState::closed(epoch);
        drop(state);
        tracing::info!(circuit = %self.name, "circuit reset");
    }

    /// Retry `operation` under `policy` if the circuit admits the call.
    ///
    /// Returns [`RetryError::CircuitOpen`] without invoking `operation` when
    /// the circuit is open, or half-open with a probe already in flight.
    pub async fn call<T, E, F, Fut>(
        &self,
        operation: F,
        policy: &RetryPolicy<E>,
    ) -> Result<RetryOutcome<T, E>, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let permit = self.admit()?;
        let result = self.executor.retry(operation, policy).await;
        permit.settle(&result);
        result
    }

    /// Like [`CircuitBreaker::call`], retrying until `condition` accepts the
    /// value.
    pub async fn call_until<T, E, F, Fut, P>(
        &self,
        operation: F,
        condition: P,
        policy: &RetryPolicy<E>,
    ) -> Result<RetryOutcome<T, E>, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnMut(&T) -> bool,
        E: fmt::Display,
    {
        let permit = self.admit()?;
        let result = self.executor.retry_until(operation, condition, policy).await;
        permit.settle(&result);
        result
    }

    fn admit(&self) -> Result<Permit<'_>, CircuitOpenError> {
        let now = self.executor.clock().now();
        let mut state = self.lock();
        let epoch = state.epoch;
        let current = state.state;

        match current {
            CircuitState::Closed => Ok(Permit::new(self, epoch, false)),
            CircuitState::Open => {
                let reset = self.config.reset_timeout;
                let since = state
                    .last_failure
                    .map_or(reset, |at| now.saturating_duration_since(at));
                if since < reset {
                    return Err(CircuitOpenError::new(self.name.as_str(), reset - since));
                }
                state.state = CircuitState::HalfOpen;
                tracing::info!(circuit = %self.name, "circuit half-open; admitting probe");
                Ok(Permit::new(self, epoch, true))
            }
            // Half-open always has its probe in flight.
            CircuitState::HalfOpen => Err(CircuitOpenError::new(self.name.as_str(), Duration::ZERO)),
        }
    }

    /// Lock the state for a permit, or `None` if `reset` has run since the
    /// permit was issued.
    fn lock_current(&self, epoch: u64) -> Option<MutexGuard<'_, BreakerState>> {
        let state = self.lock();
        if state.epoch == epoch {
            Some(state)
        } else {
            tracing::debug!(circuit = %self.name, "call settled after reset; ignored");
            None
        }
    }

    fn record_success(&self, epoch: u64, probe: bool) {
        let Some(mut state) = self.lock_current(epoch) else {
            return;
        };
        if probe {
            *state = BreakerState::closed(epoch);
            tracing::info!(circuit = %self.name, "probe succeeded; circuit closed");
        } else if state.state == CircuitState::Closed {
            state.consecutive_failures = 0;
        }
    }

    fn record_failure(&self, epoch: u64, probe: bool) {
        let now = self.executor.clock().now();
        let Some(mut state) = self.lock_current(epoch) else {
            return;
        };

        if probe {
            state.state = CircuitState::Open;
            state.consecutive_failures = state.consecutive_failures.saturating_add(1);
            state.last_failure = Some(now);
            tracing::warn!(
                circuit = %self.name,
                consecutive_failures = state.consecutive_failures,
                "probe failed; circuit re-opened"
            );
            return;
        }

        // Calls admitted while closed but settling after the circuit opened
        // carry no new information.
        if state.state != CircuitState::Closed {
            return;
        }

        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        if state.consecutive_failures >= self.config.threshold() {
            state.state = CircuitState::Open;
            state.last_failure = Some(now);
            tracing::warn!(
                circuit = %self.name,
                consecutive_failures = state.consecutive_failures,
                reset_timeout_ms = self.config.reset_timeout.as_millis() as u64,
                "failure threshold reached; circuit opened"
            );
        }
    }

    fn release(&self, epoch: u64, probe: bool) {
        if !probe {
            return;
        }
        let Some(mut state) = self.lock_current(epoch) else {
            return;
        };
        if state.state == CircuitState::HalfOpen {
            state.state = CircuitState::Open;
            tracing::debug!(circuit = %self.name, "probe abandoned; circuit open");
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        // Every critical section leaves the state consistent.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Admission to one call. Releases a probe slot if dropped unsettled.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    epoch: u64,
    probe: bool,
    settled: bool,
}

impl<'a> Permit<'a> {
    fn new(breaker: &'a CircuitBreaker, epoch: u64, probe: bool) -> Self {
        Self {
            breaker,
            epoch,
            probe,
            settled: false,
        }
    }

    fn settle<T, E>(mut self, result: &Result<RetryOutcome<T, E>, RetryError<E>>) {
        self.settled = true;
        match result {
            Ok(outcome) if outcome.is_success() => self.breaker.record_success(self.epoch, self.probe),
            Ok(_)
            | Err(RetryError::Exhausted(_))
            | Err(RetryError::Aborted(_))
            | Err(RetryError::ConditionUnmet(_)) => self.breaker.record_failure(self.epoch, self.probe),
            Err(RetryError::Interrupted(_))
            | Err(RetryError::InvalidPolicy(_))
            | Err(RetryError::CircuitOpen(_)) => self.breaker.release(self.epoch, self.probe),
        }
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.release(self.epoch, self.probe);
        }
    }
}
