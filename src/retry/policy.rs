//! Retry policy types and configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::backoff;
use super::error::{AttemptFailure, PolicyError};
use super::outcome::RetryDecision;

/// Decides whether an operation error is worth another attempt.
///
/// Implemented for every `Fn(&E) -> bool`, so a closure is usually enough.
pub trait RetryPredicate<E>: Send + Sync {
    /// Return `false` to stop retrying immediately.
    fn should_retry(&self, error: &E) -> bool;
}

impl<E, F> RetryPredicate<E> for F
where
    F: Fn(&E) -> bool + Send + Sync,
{
    fn should_retry(&self, error: &E) -> bool {
        self(error)
    }
}

/// Receives every failed attempt, before the retry decision is made.
///
/// Observers are notified synchronously and should not block; use them for
/// logging, metrics or test bookkeeping.
pub trait ErrorObserver<E>: Send + Sync {
    /// Called once per failed attempt.
    fn on_error(&self, event: &RetryEvent<'_, E>);
}

impl<E, F> ErrorObserver<E> for F
where
    F: Fn(&RetryEvent<'_, E>) + Send + Sync,
{
    fn on_error(&self, event: &RetryEvent<'_, E>) {
        self(event)
    }
}

/// Information about a failed attempt, passed to [`ErrorObserver`]s.
#[derive(Debug, Clone)]
pub struct RetryEvent<'a, E> {
    /// Which attempt just failed (1-indexed).
    pub attempt: u32,
    /// The policy's attempt limit.
    pub max_attempts: u32,
    /// Why the attempt failed.
    pub failure: &'a AttemptFailure<E>,
    /// Total elapsed time since the first attempt started.
    pub elapsed: Duration,
}

/// A retry policy describing how to retry failed operations.
///
/// Policies are immutable once built: every `with_*` method consumes the
/// policy and returns a new one. Cloning is cheap (callbacks are shared), and
/// a policy can be read from many tasks at once.
///
/// The error type `E` only matters for the optional
/// [retry predicate](RetryPolicy::with_retry_predicate) and
/// [error observer](RetryPolicy::with_error_observer); it is normally
/// inferred from the operation being retried.
///
/// # Defaults
///
/// | Setting | Default |
/// |---------|---------|
/// | `max_attempts` | 3 |
/// | `base_interval` | 1000 ms |
/// | backoff | exponential, multiplier 2 |
/// | `max_interval` | uncapped |
/// | `per_attempt_timeout` | 60 s |
/// | `throw_on_exhaustion` | true |
/// | jitter | none |
/// | `total_timeout` | none |
///
/// # Examples
///
/// ```rust
/// use steadfast::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::<String>::exponential(Duration::from_millis(100))
///     .with_max_attempts(5)
///     .with_max_interval(Duration::from_secs(2));
///
/// assert_eq!(policy.max_attempts(), 5);
/// assert_eq!(policy.delay_for_attempt(1), Some(Duration::from_millis(100)));
/// assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_millis(200)));
/// assert_eq!(policy.delay_for_attempt(5), None); // no retry after the last attempt
/// ```
pub struct RetryPolicy<E> {
    max_attempts: u32,
    base_interval: Duration,
    use_exponential_backoff: bool,
    backoff_multiplier: f64,
    max_interval: Option<Duration>,
    per_attempt_timeout: Duration,
    total_timeout: Option<Duration>,
    throw_on_exhaustion: bool,
    jitter_factor: Option<f64>,
    retry_predicate: Option<Arc<dyn RetryPredicate<E>>>,
    on_error: Option<Arc<dyn ErrorObserver<E>>>,
}

impl<E> RetryPolicy<E> {
    /// Default number of attempts.
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
    /// Default base interval between attempts.
    pub const DEFAULT_BASE_INTERVAL: Duration = Duration::from_millis(1000);
    /// Default exponential multiplier.
    pub const DEFAULT_MULTIPLIER: f64 = 2.0;
    /// Default per-attempt timeout.
    pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_millis(60_000);

    /// Create a policy with the documented defaults.
    pub fn new() -> Self {
        Self {
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            base_interval: Self::DEFAULT_BASE_INTERVAL,
            use_exponential_backoff: true,
            backoff_multiplier: Self::DEFAULT_MULTIPLIER,
            max_interval: None,
            per_attempt_timeout: Self::DEFAULT_ATTEMPT_TIMEOUT,
            total_timeout: None,
            throw_on_exhaustion: true,
            jitter_factor: None,
            retry_predicate: None,
            on_error: None,
        }
    }

    /// Create a policy with a fixed delay between attempts.
    ///
    /// ```rust
    /// use steadfast::RetryPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = RetryPolicy::<String>::constant(Duration::from_millis(500));
    ///
    /// assert_eq!(policy.delay_for_attempt(1), Some(Duration::from_millis(500)));
    /// assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_millis(500)));
    /// ```
    pub fn constant(delay: Duration) -> Self {
        Self {
            base_interval: delay,
            use_exponential_backoff: false,
            ..Self::new()
        }
    }

    /// Create a policy whose delay doubles after every failed attempt.
    ///
    /// Delay before attempt `n + 1` = `base * 2^(n - 1)`.
    pub fn exponential(base: Duration) -> Self {
        Self {
            base_interval: base,
            use_exponential_backoff: true,
            ..Self::new()
        }
    }

    /// Set the maximum number of attempts, including the first one.
    pub fn with_max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    /// Set the base interval between attempts.
    pub fn with_base_interval(mut self, interval: Duration) -> Self {
        self.base_interval = interval;
        self
    }

    /// Switch exponential growth of the delay on or off.
    pub fn with_exponential_backoff(mut self, enabled: bool) -> Self {
        self.use_exponential_backoff = enabled;
        self
    }

    /// Set the exponential growth factor. Must be greater than 1.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Cap exponential delays at `max`.
    ///
    /// ```rust
    /// use steadfast::RetryPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = RetryPolicy::<String>::exponential(Duration::from_millis(100))
    ///     .with_max_attempts(10)
    ///     .with_max_interval(Duration::from_millis(500));
    ///
    /// // 100ms, 200ms, 400ms, then capped at 500ms
    /// assert_eq!(policy.delay_for_attempt(4), Some(Duration::from_millis(500)));
    /// ```
    pub fn with_max_interval(mut self, max: Duration) -> Self {
        self.max_interval = Some(max);
        self
    }

    /// Set the timeout applied to each individual attempt.
    pub fn with_per_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.per_attempt_timeout = timeout;
        self
    }

    /// Bound the whole call, attempts and backoff included.
    pub fn with_total_timeout(mut self, timeout: Duration) -> Self {
        self.total_timeout = Some(timeout);
        self
    }

    /// Choose between raising an error on exhaustion (the default) and
    /// returning a failed [`RetryOutcome`](super::RetryOutcome).
    pub fn with_throw_on_exhaustion(mut self, throw: bool) -> Self {
        self.throw_on_exhaustion = throw;
        self
    }

    /// Add proportional jitter to delays.
    ///
    /// The factor determines the range of randomness. For example, `0.25`
    /// means the actual delay will be within ±25% of the calculated delay.
    /// Values are clamped to `0.0..=1.0`.
    pub fn with_jitter(mut self, factor: f64) -> Self {
        self.jitter_factor = Some(factor.clamp(0.0, 1.0));
        self
    }

    /// Only retry operation errors the predicate accepts.
    ///
    /// Timeouts and unmet conditions are always retried.
    ///
    /// ```rust
    /// use steadfast::RetryPolicy;
    /// use std::time::Duration;
    ///
    /// #[derive(Debug)]
    /// enum ApiError { Unavailable, NotFound }
    ///
    /// let policy = RetryPolicy::exponential(Duration::from_millis(50))
    ///     .with_retry_predicate(|e: &ApiError| matches!(e, ApiError::Unavailable));
    ///
    /// assert!(policy.is_retryable(&ApiError::Unavailable));
    /// assert!(!policy.is_retryable(&ApiError::NotFound));
    /// ```
    pub fn with_retry_predicate<P>(mut self, predicate: P) -> Self
    where
        P: RetryPredicate<E> + 'static,
    {
        self.retry_predicate = Some(Arc::new(predicate));
        self
    }

    /// Notify `observer` about every failed attempt.
    pub fn with_error_observer<O>(mut self, observer: O) -> Self
    where
        O: ErrorObserver<E> + 'static,
    {
        self.on_error = Some(Arc::new(observer));
        self
    }

    /// Get the maximum number of attempts.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Get the base interval.
    pub fn base_interval(&self) -> Duration {
        self.base_interval
    }

    /// Whether delays grow exponentially.
    pub fn uses_exponential_backoff(&self) -> bool {
        self.use_exponential_backoff
    }

    /// Get the exponential multiplier.
    pub fn backoff_multiplier(&self) -> f64 {
        self.backoff_multiplier
    }

    /// Get the delay cap.
    pub fn max_interval(&self) -> Option<Duration> {
        self.max_interval
    }

    /// Get the per-attempt timeout.
    pub fn per_attempt_timeout(&self) -> Duration {
        self.per_attempt_timeout
    }

    /// Get the total timeout.
    pub fn total_timeout(&self) -> Option<Duration> {
        self.total_timeout
    }

    /// Whether exhaustion raises an error.
    pub fn throw_on_exhaustion(&self) -> bool {
        self.throw_on_exhaustion
    }

    /// Get the jitter factor.
    pub fn jitter_factor(&self) -> Option<f64> {
        self.jitter_factor
    }

    pub(crate) fn error_observer(&self) -> Option<&dyn ErrorObserver<E>> {
        self.on_error.as_deref()
    }

    /// Whether the retry predicate accepts `error`. True when no predicate
    /// is set.
    pub fn is_retryable(&self, error: &E) -> bool {
        self.retry_predicate
            .as_ref()
            .is_none_or(|predicate| predicate.should_retry(error))
    }

    /// Decide what follows a failed attempt.
    ///
    /// The predicate is consulted first, so a non-retryable error aborts even
    /// on the last attempt.
    pub fn decide(&self, attempt: u32, failure: &AttemptFailure<E>) -> RetryDecision {
        let retryable = match failure {
            AttemptFailure::Error(error) => self.is_retryable(error),
            AttemptFailure::Timeout { .. } | AttemptFailure::Unsatisfied => true,
        };

        if !retryable {
            RetryDecision::Abort
        } else if attempt >= self.max_attempts {
            RetryDecision::Exhausted
        } else {
            RetryDecision::Retry {
                delay: backoff::compute_delay(attempt, self),
            }
        }
    }

    /// The delay waited after failed attempt `attempt` (1-indexed), jitter
    /// included.
    ///
    /// Returns `None` if no further attempt would follow.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        (attempt < self.max_attempts).then(|| backoff::compute_delay(attempt, self))
    }

    /// Check that the policy can be executed.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.max_attempts == 0 {
            return Err(PolicyError::ZeroAttempts);
        }
        let multiplier = self.backoff_multiplier;
        if self.use_exponential_backoff && !(multiplier.is_finite() && multiplier > 1.0) {
            return Err(PolicyError::InvalidMultiplier(multiplier));
        }
        if self.per_attempt_timeout.is_zero() {
            return Err(PolicyError::ZeroAttemptTimeout);
        }
        if self.total_timeout.is_some_and(|t| t.is_zero()) {
            return Err(PolicyError::ZeroTotalTimeout);
        }
        if let Some(jitter) = self.jitter_factor {
            if !(0.0..=1.0).contains(&jitter) {
                return Err(PolicyError::InvalidJitter(jitter));
            }
        }
        Ok(())
    }

    /// Layer `overrides` on top of this policy, field by field.
    ///
    /// Fields left `None` in the overrides keep this policy's value.
    /// Callbacks are always kept.
    ///
    /// ```rust
    /// use steadfast::{PolicyOverrides, RetryPolicy};
    /// use std::time::Duration;
    ///
    /// let defaults = RetryPolicy::<String>::exponential(Duration::from_millis(200));
    /// let merged = defaults.merged(&PolicyOverrides {
    ///     max_attempts: Some(6),
    ///     ..PolicyOverrides::default()
    /// });
    ///
    /// assert_eq!(merged.max_attempts(), 6);
    /// assert_eq!(merged.base_interval(), Duration::from_millis(200));
    /// ```
    pub fn merged(&self, overrides: &PolicyOverrides) -> Self {
        let mut policy = self.clone();
        if let Some(n) = overrides.max_attempts {
            policy.max_attempts = n;
        }
        if let Some(ms) = overrides.base_interval_ms {
            policy.base_interval = Duration::from_millis(ms);
        }
        if let Some(exponential) = overrides.use_exponential_backoff {
            policy.use_exponential_backoff = exponential;
        }
        if let Some(multiplier) = overrides.backoff_multiplier {
            policy.backoff_multiplier = multiplier;
        }
        if let Some(ms) = overrides.max_interval_ms {
            policy.max_interval = Some(Duration::from_millis(ms));
        }
        if let Some(ms) = overrides.per_attempt_timeout_ms {
            policy.per_attempt_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = overrides.total_timeout_ms {
            policy.total_timeout = Some(Duration::from_millis(ms));
        }
        if let Some(throw) = overrides.throw_on_exhaustion {
            policy.throw_on_exhaustion = throw;
        }
        if let Some(jitter) = overrides.jitter_factor {
            policy = policy.with_jitter(jitter);
        }
        policy
    }
}

impl<E> Default for RetryPolicy<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            max_attempts: self.max_attempts,
            base_interval: self.base_interval,
            use_exponential_backoff: self.use_exponential_backoff,
            backoff_multiplier: self.backoff_multiplier,
            max_interval: self.max_interval,
            per_attempt_timeout: self.per_attempt_timeout,
            total_timeout: self.total_timeout,
            throw_on_exhaustion: self.throw_on_exhaustion,
            jitter_factor: self.jitter_factor,
            retry_predicate: self.retry_predicate.clone(),
            on_error: self.on_error.clone(),
        }
    }
}

impl<E> fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_interval", &self.base_interval)
            .field("use_exponential_backoff", &self.use_exponential_backoff)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("max_interval", &self.max_interval)
            .field("per_attempt_timeout", &self.per_attempt_timeout)
            .field("total_timeout", &self.total_timeout)
            .field("throw_on_exhaustion", &self.throw_on_exhaustion)
            .field("jitter_factor", &self.jitter_factor)
            .field("retry_predicate", &self.retry_predicate.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Per-call adjustments merged over a default policy.
///
/// Plain data, so it can be deserialized from a config file when the
/// `serde` feature is enabled. Durations are in milliseconds.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default, deny_unknown_fields))]
pub struct PolicyOverrides {
    /// Overrides `max_attempts`.
    pub max_attempts: Option<u32>,
    /// Overrides `base_interval`.
    pub base_interval_ms: Option<u64>,
    /// Overrides exponential growth.
    pub use_exponential_backoff: Option<bool>,
    /// Overrides the exponential multiplier.
    pub backoff_multiplier: Option<f64>,
    /// Sets the delay cap.
    pub max_interval_ms: Option<u64>,
    /// Overrides the per-attempt timeout.
    pub per_attempt_timeout_ms: Option<u64>,
    /// Sets the total timeout.
    pub total_timeout_ms: Option<u64>,
    /// Overrides exhaustion handling.
    pub throw_on_exhaustion: Option<bool>,
    /// Sets the jitter factor.
    pub jitter_factor: Option<f64>,
}

#[cfg(test)]
mod policy_tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let policy = RetryPolicy::<String>::default();

        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.base_interval(), Duration::from_millis(1000));
        assert!(policy.uses_exponential_backoff());
        assert_eq!(policy.backoff_multiplier(), 2.0);
        assert_eq!(policy.per_attempt_timeout(), Duration::from_secs(60));
        assert!(policy.throw_on_exhaustion());
        assert_eq!(policy.max_interval(), None);
        assert_eq!(policy.jitter_factor(), None);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_constant_delay() {
        let policy = RetryPolicy::<String>::constant(Duration::from_millis(100)).with_max_attempts(4);

        assert_eq!(policy.delay_for_attempt(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_millis(100)));
        assert_eq!(policy.delay_for_attempt(3), Some(Duration::from_millis(100)));
        assert_eq!(policy.delay_for_attempt(4), None);
    }

    #[test]
    fn test_exponential_delay() {
        let policy =
            RetryPolicy::<String>::exponential(Duration::from_millis(100)).with_max_attempts(6);

        assert_eq!(policy.delay_for_attempt(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_millis(200)));
        assert_eq!(policy.delay_for_attempt(3), Some(Duration::from_millis(400)));
        assert_eq!(policy.delay_for_attempt(4), Some(Duration::from_millis(800)));
    }

    #[test]
    fn test_max_interval_cap() {
        let policy = RetryPolicy::<String>::exponential(Duration::from_millis(100))
            .with_max_attempts(10)
            .with_max_interval(Duration::from_millis(500));

        assert_eq!(policy.delay_for_attempt(3), Some(Duration::from_millis(400)));
        assert_eq!(policy.delay_for_attempt(4), Some(Duration::from_millis(500))); // capped
        assert_eq!(policy.delay_for_attempt(9), Some(Duration::from_millis(500))); // capped
    }

    #[test]
    fn test_decide_retry_abort_exhausted() {
        let policy = RetryPolicy::constant(Duration::from_millis(10))
            .with_max_attempts(2)
            .with_retry_predicate(|e: &&str| *e != "fatal");

        assert_eq!(
            policy.decide(1, &AttemptFailure::Error("flaky")),
            RetryDecision::Retry {
                delay: Duration::from_millis(10)
            }
        );
        assert_eq!(policy.decide(1, &AttemptFailure::Error("fatal")), RetryDecision::Abort);
        assert_eq!(policy.decide(2, &AttemptFailure::Error("flaky")), RetryDecision::Exhausted);
        // Predicate wins over exhaustion.
        assert_eq!(policy.decide(2, &AttemptFailure::Error("fatal")), RetryDecision::Abort);
    }

    #[test]
    fn test_timeouts_and_unmet_conditions_bypass_predicate() {
        let policy = RetryPolicy::constant(Duration::from_millis(10))
            .with_max_attempts(3)
            .with_retry_predicate(|_: &String| false);

        let timeout = AttemptFailure::Timeout {
            duration: Duration::from_secs(1),
        };
        assert!(matches!(policy.decide(1, &timeout), RetryDecision::Retry { .. }));
        assert!(matches!(
            policy.decide(1, &AttemptFailure::Unsatisfied),
            RetryDecision::Retry { .. }
        ));
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let base = || RetryPolicy::<String>::default();

        assert_eq!(
            base().with_max_attempts(0).validate(),
            Err(PolicyError::ZeroAttempts)
        );
        assert_eq!(
            base().with_multiplier(1.0).validate(),
            Err(PolicyError::InvalidMultiplier(1.0))
        );
        assert_eq!(
            base().with_per_attempt_timeout(Duration::ZERO).validate(),
            Err(PolicyError::ZeroAttemptTimeout)
        );
        assert_eq!(
            base().with_total_timeout(Duration::ZERO).validate(),
            Err(PolicyError::ZeroTotalTimeout)
        );
        assert!(matches!(
            base().with_jitter(f64::NAN).validate(),
            Err(PolicyError::InvalidJitter(_))
        ));
    }

    #[test]
    fn test_multiplier_ignored_for_constant_backoff() {
        let policy = RetryPolicy::<String>::constant(Duration::from_millis(10)).with_multiplier(0.5);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_jitter_is_clamped() {
        let policy = RetryPolicy::<String>::default().with_jitter(3.0);
        assert_eq!(policy.jitter_factor(), Some(1.0));
    }

    #[test]
    fn test_merged_overrides_field_by_field() {
        let defaults = RetryPolicy::exponential(Duration::from_millis(100))
            .with_max_attempts(5)
            .with_per_attempt_timeout(Duration::from_secs(2))
            .with_retry_predicate(|e: &&str| *e == "retry me");

        let merged = defaults.merged(&PolicyOverrides {
            base_interval_ms: Some(250),
            throw_on_exhaustion: Some(false),
            jitter_factor: Some(0.1),
            ..PolicyOverrides::default()
        });

        assert_eq!(merged.base_interval(), Duration::from_millis(250));
        assert!(!merged.throw_on_exhaustion());
        assert_eq!(merged.jitter_factor(), Some(0.1));
        // Untouched fields survive.
        assert_eq!(merged.max_attempts(), 5);
        assert_eq!(merged.per_attempt_timeout(), Duration::from_secs(2));
        assert!(merged.uses_exponential_backoff());
        assert!(!merged.is_retryable(&"other"));
    }

    #[test]
    fn test_policy_is_debug() {
        let policy = RetryPolicy::<String>::default().with_retry_predicate(|_: &String| true);
        let debug = format!("{:?}", policy);
        assert!(debug.contains("RetryPolicy"));
        assert!(debug.contains("retry_predicate: true"));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_overrides_deserialize() {
        let overrides: PolicyOverrides =
            serde_json::from_str(r#"{"max_attempts": 8, "base_interval_ms": 50}"#).unwrap();

        assert_eq!(overrides.max_attempts, Some(8));
        assert_eq!(overrides.base_interval_ms, Some(50));
        assert_eq!(overrides.jitter_factor, None);

        let unknown = serde_json::from_str::<PolicyOverrides>(r#"{"retries": 2}"#);
        assert!(unknown.is_err());
    }
}
