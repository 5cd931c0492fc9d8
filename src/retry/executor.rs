//! The retry loop.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::error::{
    AttemptFailure, InterruptReason, PollConditionUnmet, RetryAborted, RetryError, RetryInterrupted,
};
use super::outcome::{AttemptRecord, RetryDecision, RetryOutcome};
use super::policy::{RetryEvent, RetryPolicy};
use super::timeout::{Raced, TimeoutGuard};
use crate::clock::{tokio_clock, Clock};

/// Drives repeated attempts of an operation under a [`RetryPolicy`].
///
/// Attempts of one call run strictly one after another: attempt `n`'s
/// backoff fully elapses before attempt `n + 1` starts. The only suspension
/// points are the operation itself and the backoff sleep; both give way
/// promptly to the executor's cancellation token and the policy's total
/// timeout.
///
/// The executor holds no per-call state, so one instance can serve any
/// number of concurrent calls.
///
/// # Examples
///
/// ```rust
/// use steadfast::{RetryExecutor, RetryPolicy};
/// use std::sync::atomic::{AtomicU32, Ordering};
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let calls = AtomicU32::new(0);
/// let policy = RetryPolicy::exponential(Duration::from_millis(1)).with_max_attempts(5);
///
/// let outcome = RetryExecutor::new()
///     .retry(
///         || async {
///             if calls.fetch_add(1, Ordering::SeqCst) < 2 {
///                 Err("not yet")
///             } else {
///                 Ok("ready")
///             }
///         },
///         &policy,
///     )
///     .await
///     .unwrap();
///
/// assert_eq!(outcome.value(), Some(&"ready"));
/// assert_eq!(outcome.attempts().len(), 3);
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    clock: Arc<dyn Clock>,
    cancel: Option<CancellationToken>,
}

impl RetryExecutor {
    /// Create an executor on the tokio clock, without cancellation.
    pub fn new() -> Self {
        Self {
            clock: tokio_clock(),
            cancel: None,
        }
    }

    /// Use `clock` for timestamps, timeouts and backoff sleeps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Abort in-flight attempts and pending backoff once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// The executor's clock.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Retry `operation` until it succeeds, the policy is exhausted, or the
    /// retry predicate refuses a failure.
    ///
    /// Returns the successful outcome, or on exhaustion either
    /// [`RetryError::Exhausted`] (the default) or a failed outcome when the
    /// policy does not throw. Non-retryable failures always return
    /// [`RetryError::Aborted`].
    pub async fn retry<T, E, F, Fut>(
        &self,
        operation: F,
        policy: &RetryPolicy<E>,
    ) -> Result<RetryOutcome<T, E>, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        self.run(operation, |_: &T| true, policy).await
    }

    /// Retry `operation` until it returns a value accepted by `condition`.
    ///
    /// A value the condition rejects counts as a failed attempt and is
    /// retried on the same backoff schedule as an error. If the last attempt
    /// was rejected this way, exhaustion is reported as
    /// [`RetryError::ConditionUnmet`].
    pub async fn retry_until<T, E, F, Fut, P>(
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
        self.run(operation, condition, policy).await
    }

    /// Call `check` until it reports `true`.
    ///
    /// Errors from `check` are logged and counted as failed attempts; they
    /// are retried unless the policy's predicate refuses them. Exhaustion is
    /// always [`RetryError::ConditionUnmet`], or `Ok(false)` when the policy
    /// does not throw. Use [`RetryExecutor::poll_outcome`] to keep the
    /// attempt history.
    pub async fn poll<E, F, Fut>(&self, check: F, policy: &RetryPolicy<E>) -> Result<bool, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool, E>>,
        E: fmt::Display,
    {
        self.poll_outcome(check, policy)
            .await
            .map(|outcome| outcome.is_success())
    }

    /// Like [`RetryExecutor::poll`], returning every check's record.
    pub async fn poll_outcome<E, F, Fut>(
        &self,
        check: F,
        policy: &RetryPolicy<E>,
    ) -> Result<RetryOutcome<bool, E>, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool, E>>,
        E: fmt::Display,
    {
        match self.run(check, |ready: &bool| *ready, policy).await {
            Err(RetryError::Exhausted(exhausted)) => Err(RetryError::ConditionUnmet(
                PollConditionUnmet::new(exhausted.attempts, exhausted.total_duration),
            )),
            other => other,
        }
    }

    async fn run<T, E, F, Fut, P>(
        &self,
        mut operation: F,
        mut accept: P,
        policy: &RetryPolicy<E>,
    ) -> Result<RetryOutcome<T, E>, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnMut(&T) -> bool,
        E: fmt::Display,
    {
        policy.validate()?;

        let start = self.clock.now();
        // A deadline past the clock's range is no deadline at all.
        let deadline = policy
            .total_timeout()
            .and_then(|timeout| start.checked_add(timeout));
        let guard = TimeoutGuard::new(self.clock.clone());
        let guard = match &self.cancel {
            Some(token) => guard.with_cancellation(token.clone()),
            None => guard,
        };
        let max_attempts = policy.max_attempts();
        let mut attempts = Vec::new();
        let mut attempt = 0u32;

        loop {
            if let Some(reason) = self.interruption(deadline) {
                return Err(self.interrupted(reason, attempts, start));
            }

            attempt += 1;
            let attempt_start = self.clock.now();
            let raced = tokio::select! {
                biased;
                raced = guard.race(operation(), policy.per_attempt_timeout()) => raced,
                _ = self.deadline(deadline) => {
                    return Err(self.interrupted(InterruptReason::DeadlineExceeded, attempts, start));
                }
            };
            let duration = self.clock.now().saturating_duration_since(attempt_start);

            let failure = match raced {
                Raced::Completed(Ok(value)) => {
                    if accept(&value) {
                        attempts.push(AttemptRecord::succeeded(attempt, duration));
                        tracing::debug!(
                            attempt,
                            max_attempts,
                            duration_ms = duration.as_millis() as u64,
                            "attempt succeeded"
                        );
                        return Ok(RetryOutcome::success(value, attempts, self.elapsed(start)));
                    }
                    AttemptFailure::Unsatisfied
                }
                Raced::Completed(Err(error)) => AttemptFailure::Error(error),
                Raced::TimedOut(duration) => AttemptFailure::Timeout { duration },
                Raced::Cancelled => {
                    return Err(self.interrupted(InterruptReason::Cancelled, attempts, start));
                }
            };

            if let Some(observer) = policy.error_observer() {
                observer.on_error(&RetryEvent {
                    attempt,
                    max_attempts,
                    failure: &failure,
                    elapsed: self.elapsed(start),
                });
            }

            let decision = policy.decide(attempt, &failure);
            let record = AttemptRecord::failed(attempt, duration, &failure, Some(decision));
            tracing::debug!(
                attempt,
                max_attempts,
                duration_ms = duration.as_millis() as u64,
                delay_ms = record.delay().map(|delay| delay.as_millis() as u64),
                kind = ?failure.kind(),
                decision = ?decision,
                error = %failure,
                "attempt failed"
            );
            attempts.push(record);

            match decision {
                RetryDecision::Retry { delay } => {
                    if let Err(reason) = self.pause(delay, deadline).await {
                        return Err(self.interrupted(reason, attempts, start));
                    }
                }
                RetryDecision::Abort => {
                    let total = self.elapsed(start);
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        total_ms = total.as_millis() as u64,
                        error = %failure,
                        "non-retryable failure; giving up"
                    );
                    return Err(RetryError::Aborted(RetryAborted::new(failure, attempts, total)));
                }
                RetryDecision::Exhausted => {
                    let total = self.elapsed(start);
                    tracing::warn!(
                        attempts = attempt,
                        total_ms = total.as_millis() as u64,
                        error = %failure,
                        "retry attempts exhausted"
                    );
                    return if policy.throw_on_exhaustion() {
                        Err(RetryError::exhausted(failure, attempts, total))
                    } else {
                        Ok(RetryOutcome::failure(failure, attempts, total))
                    };
                }
            }
        }
    }

    fn elapsed(&self, start: Instant) -> Duration {
        self.clock.now().saturating_duration_since(start)
    }

    fn interruption(&self, deadline: Option<Instant>) -> Option<InterruptReason> {
        if self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            Some(InterruptReason::Cancelled)
        } else if deadline.is_some_and(|deadline| self.clock.now() >= deadline) {
            Some(InterruptReason::DeadlineExceeded)
        } else {
            None
        }
    }

    fn interrupted<E>(
        &self,
        reason: InterruptReason,
        attempts: Vec<AttemptRecord>,
        start: Instant,
    ) -> RetryError<E> {
        let total = self.elapsed(start);
        tracing::warn!(
            reason = ?reason,
            attempts = attempts.len(),
            total_ms = total.as_millis() as u64,
            "retry interrupted"
        );
        RetryError::Interrupted(RetryInterrupted::new(reason, attempts, total))
    }

    /// Completes when the total deadline passes; never without one.
    async fn deadline(&self, deadline: Option<Instant>) {
        match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(self.clock.now());
                self.clock.sleep(remaining).await
            }
            None => std::future::pending().await,
        }
    }

    async fn pause(&self, delay: Duration, deadline: Option<Instant>) -> Result<(), InterruptReason> {
        let cancelled = async {
            match &self.cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.clock.sleep(delay) => Ok(()),
            _ = cancelled => Err(InterruptReason::Cancelled),
            _ = self.deadline(deadline) => Err(InterruptReason::DeadlineExceeded),
        }
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new()
    }
}
