//! Error types for retry operations.

use std::fmt;
use std::time::Duration;

use super::outcome::{AttemptRecord, FailureKind};

/// Why a single attempt failed.
///
/// `Error` carries the operation's own error unchanged; the other variants
/// are produced by the engine itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptFailure<E> {
    /// The operation returned an error.
    Error(E),
    /// The attempt did not settle within the per-attempt timeout.
    Timeout {
        /// The timeout that was exceeded.
        duration: Duration,
    },
    /// The operation succeeded, but its value did not satisfy the caller's
    /// condition (`retry_until`), or a poll check returned `false`.
    Unsatisfied,
}

impl<E> AttemptFailure<E> {
    /// The coarse category of this failure.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Error(_) => FailureKind::Error,
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::Unsatisfied => FailureKind::Unsatisfied,
        }
    }

    /// The operation's error, if this failure carries one.
    pub fn error(&self) -> Option<&E> {
        match self {
            Self::Error(e) => Some(e),
            _ => None,
        }
    }

    /// Extract the operation's error, if this failure carries one.
    pub fn into_error(self) -> Option<E> {
        match self {
            Self::Error(e) => Some(e),
            _ => None,
        }
    }

    /// Returns true if the attempt timed out.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl<E: fmt::Display> fmt::Display for AttemptFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(e) => write!(f, "{}", e),
            Self::Timeout { duration } => write!(f, "attempt timed out after {:?}", duration),
            Self::Unsatisfied => write!(f, "condition not satisfied"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for AttemptFailure<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Error(e) => e.source(),
            _ => None,
        }
    }
}

/// Error returned by [`TimeoutGuard`](super::TimeoutGuard).
///
/// # Examples
///
/// ```rust
/// use steadfast::{with_timeout, TimeoutError};
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let result = with_timeout(
///     async {
///         tokio::time::sleep(Duration::from_secs(10)).await;
///         Ok::<_, String>(42)
///     },
///     Duration::from_millis(10),
/// )
/// .await;
///
/// match result {
///     Err(TimeoutError::Timeout { duration }) => {
///         assert_eq!(duration, Duration::from_millis(10));
///     }
///     _ => panic!("Expected timeout"),
/// }
/// # });
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeoutError<E> {
    /// The operation timed out.
    Timeout {
        /// The timeout duration that was exceeded.
        duration: Duration,
    },
    /// The operation failed before the timeout.
    Inner(E),
    /// The guard's cancellation token fired first.
    Cancelled,
    /// A zero timeout was requested. The operation was not started.
    InvalidDuration,
}

impl<E> TimeoutError<E> {
    /// Create a timeout error.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    /// Create an inner error.
    pub fn inner(error: E) -> Self {
        Self::Inner(error)
    }

    /// Returns true if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns true if this is an inner error.
    pub fn is_inner(&self) -> bool {
        matches!(self, Self::Inner(_))
    }

    /// Get the inner error if present.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for TimeoutError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { duration } => write!(f, "operation timed out after {:?}", duration),
            Self::Inner(e) => write!(f, "{}", e),
            Self::Cancelled => write!(f, "operation cancelled"),
            Self::InvalidDuration => write!(f, "timeout must be greater than zero"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for TimeoutError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
}

/// Error returned when all retry attempts are exhausted.
///
/// Contains the final attempt's failure along with the full attempt history.
///
/// # Examples
///
/// ```rust
/// use steadfast::{RetryExecutor, RetryPolicy, RetryError};
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let policy = RetryPolicy::constant(Duration::from_millis(1)).with_max_attempts(3);
///
/// let result = RetryExecutor::new()
///     .retry(|| async { Err::<(), _>("always fails") }, &policy)
///     .await;
///
/// match result {
///     Err(RetryError::Exhausted(exhausted)) => {
///         assert_eq!(exhausted.final_error.error(), Some(&"always fails"));
///         assert_eq!(exhausted.attempts.len(), 3);
///     }
///     _ => panic!("Expected exhaustion"),
/// }
/// # });
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryExhausted<E> {
    /// The failure of the final attempt.
    pub final_error: AttemptFailure<E>,
    /// Every attempt made, in order.
    pub attempts: Vec<AttemptRecord>,
    /// Total time spent retrying.
    pub total_duration: Duration,
}

impl<E> RetryExhausted<E> {
    /// Create a new RetryExhausted error.
    pub fn new(
        final_error: AttemptFailure<E>,
        attempts: Vec<AttemptRecord>,
        total_duration: Duration,
    ) -> Self {
        Self {
            final_error,
            attempts,
            total_duration,
        }
    }

    /// Extract the final failure, discarding the history.
    pub fn into_error(self) -> AttemptFailure<E> {
        self.final_error
    }

    /// Get a reference to the final failure.
    pub fn error(&self) -> &AttemptFailure<E> {
        &self.final_error
    }
}

impl<E: fmt::Display> fmt::Display for RetryExhausted<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "retry exhausted after {} attempts ({:?}): {}",
            self.attempts.len(),
            self.total_duration,
            self.final_error
        )
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryExhausted<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.final_error)
    }
}

/// Error returned when the retry predicate refused to retry a failure.
///
/// Remaining attempts were skipped. The last history entry carries
/// [`RetryDecision::Abort`](super::RetryDecision::Abort), which is what
/// tells this apart from exhaustion.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryAborted<E> {
    /// The failure that was judged non-retryable.
    pub final_error: AttemptFailure<E>,
    /// Every attempt made, in order.
    pub attempts: Vec<AttemptRecord>,
    /// Total time spent before aborting.
    pub total_duration: Duration,
}

impl<E> RetryAborted<E> {
    /// Create a new RetryAborted error.
    pub fn new(
        final_error: AttemptFailure<E>,
        attempts: Vec<AttemptRecord>,
        total_duration: Duration,
    ) -> Self {
        Self {
            final_error,
            attempts,
            total_duration,
        }
    }
}

impl<E: fmt::Display> fmt::Display for RetryAborted<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "non-retryable failure on attempt {}: {}",
            self.attempts.len(),
            self.final_error
        )
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryAborted<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.final_error)
    }
}

/// Error returned by `poll` and `retry_until` when the condition never held.
#[derive(Debug, Clone, PartialEq)]
pub struct PollConditionUnmet {
    /// Every attempt made, in order.
    pub attempts: Vec<AttemptRecord>,
    /// Total time spent polling.
    pub total_duration: Duration,
}

impl PollConditionUnmet {
    /// Create a new PollConditionUnmet error.
    pub fn new(attempts: Vec<AttemptRecord>, total_duration: Duration) -> Self {
        Self {
            attempts,
            total_duration,
        }
    }
}

impl fmt::Display for PollConditionUnmet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "condition not met after {} attempts ({:?})",
            self.attempts.len(),
            self.total_duration
        )
    }
}

impl std::error::Error for PollConditionUnmet {}

/// What stopped an interrupted retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptReason {
    /// The executor's cancellation token fired.
    Cancelled,
    /// The policy's total timeout elapsed.
    DeadlineExceeded,
}

/// Error returned when a retry is cut short by cancellation or a deadline.
///
/// Only attempts that settled before the interruption are in the history.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryInterrupted {
    /// What stopped the retry.
    pub reason: InterruptReason,
    /// Attempts that settled before the interruption.
    pub attempts: Vec<AttemptRecord>,
    /// Total time spent before the interruption.
    pub total_duration: Duration,
}

impl RetryInterrupted {
    /// Create a new RetryInterrupted error.
    pub fn new(
        reason: InterruptReason,
        attempts: Vec<AttemptRecord>,
        total_duration: Duration,
    ) -> Self {
        Self {
            reason,
            attempts,
            total_duration,
        }
    }
}

impl fmt::Display for RetryInterrupted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self.reason {
            InterruptReason::Cancelled => "retry cancelled",
            InterruptReason::DeadlineExceeded => "retry deadline exceeded",
        };
        write!(
            f,
            "{} after {} settled attempts ({:?})",
            what,
            self.attempts.len(),
            self.total_duration
        )
    }
}

impl std::error::Error for RetryInterrupted {}

/// Error returned when a circuit breaker rejects a call outright.
///
/// The operation was not invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitOpenError {
    /// Name of the rejecting circuit.
    pub circuit: String,
    /// Time left until the circuit admits a probe. Zero while a probe is
    /// already in flight.
    pub retry_after: Duration,
}

impl CircuitOpenError {
    /// Create a new CircuitOpenError.
    pub fn new(circuit: impl Into<String>, retry_after: Duration) -> Self {
        Self {
            circuit: circuit.into(),
            retry_after,
        }
    }
}

impl fmt::Display for CircuitOpenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "circuit '{}' is open; retry after {:?}",
            self.circuit, self.retry_after
        )
    }
}

impl std::error::Error for CircuitOpenError {}

/// A retry policy that cannot be executed.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyError {
    /// `max_attempts` was zero.
    ZeroAttempts,
    /// Exponential backoff with a multiplier that is not a finite value above 1.
    InvalidMultiplier(f64),
    /// The per-attempt timeout was zero.
    ZeroAttemptTimeout,
    /// The total timeout was zero.
    ZeroTotalTimeout,
    /// The jitter factor was not a number in `0.0..=1.0`.
    InvalidJitter(f64),
}

impl fmt::Display for PolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroAttempts => write!(f, "max_attempts must be at least 1"),
            Self::InvalidMultiplier(m) => {
                write!(f, "backoff multiplier must be greater than 1 (got {})", m)
            }
            Self::ZeroAttemptTimeout => write!(f, "per-attempt timeout must be greater than zero"),
            Self::ZeroTotalTimeout => write!(f, "total timeout must be greater than zero"),
            Self::InvalidJitter(j) => write!(f, "jitter factor must be within 0..=1 (got {})", j),
        }
    }
}

impl std::error::Error for PolicyError {}

/// Every way a retried call can fail.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryError<E> {
    /// All attempts failed and the policy asked for an error.
    Exhausted(RetryExhausted<E>),
    /// The retry predicate judged a failure non-retryable.
    Aborted(RetryAborted<E>),
    /// The awaited condition never held.
    ConditionUnmet(PollConditionUnmet),
    /// A circuit breaker rejected the call without invoking the operation.
    CircuitOpen(CircuitOpenError),
    /// Cancellation or the total timeout cut the retry short.
    Interrupted(RetryInterrupted),
    /// The policy failed validation. No attempt was made.
    InvalidPolicy(PolicyError),
}

impl<E> RetryError<E> {
    /// Build the error for a run whose last attempt exhausted the policy.
    ///
    /// An unmet condition becomes [`RetryError::ConditionUnmet`], everything
    /// else [`RetryError::Exhausted`].
    pub(crate) fn exhausted(
        final_error: AttemptFailure<E>,
        attempts: Vec<AttemptRecord>,
        total_duration: Duration,
    ) -> Self {
        match final_error {
            AttemptFailure::Unsatisfied => {
                Self::ConditionUnmet(PollConditionUnmet::new(attempts, total_duration))
            }
            failure => Self::Exhausted(RetryExhausted::new(failure, attempts, total_duration)),
        }
    }

    /// The attempt history carried by this error. Empty when no attempt was
    /// made.
    pub fn attempts(&self) -> &[AttemptRecord] {
        match self {
            Self::Exhausted(e) => &e.attempts,
            Self::Aborted(e) => &e.attempts,
            Self::ConditionUnmet(e) => &e.attempts,
            Self::Interrupted(e) => &e.attempts,
            Self::CircuitOpen(_) | Self::InvalidPolicy(_) => &[],
        }
    }

    /// Total time spent, when any attempt was made.
    pub fn total_duration(&self) -> Option<Duration> {
        match self {
            Self::Exhausted(e) => Some(e.total_duration),
            Self::Aborted(e) => Some(e.total_duration),
            Self::ConditionUnmet(e) => Some(e.total_duration),
            Self::Interrupted(e) => Some(e.total_duration),
            Self::CircuitOpen(_) | Self::InvalidPolicy(_) => None,
        }
    }

    /// The last failed attempt, when the call ran to a final failure.
    pub fn final_failure(&self) -> Option<&AttemptFailure<E>> {
        match self {
            Self::Exhausted(e) => Some(&e.final_error),
            Self::Aborted(e) => Some(&e.final_error),
            _ => None,
        }
    }

    /// The operation's own error from the last attempt, if it ended in one.
    pub fn operation_error(&self) -> Option<&E> {
        self.final_failure().and_then(AttemptFailure::error)
    }

    /// Extract the operation's own error from the last attempt.
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            Self::Exhausted(e) => e.final_error.into_error(),
            Self::Aborted(e) => e.final_error.into_error(),
            _ => None,
        }
    }

    /// Returns true if all attempts were used up.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted(_))
    }

    /// Returns true if the retry predicate stopped the retry.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted(_))
    }

    /// Returns true if a polled condition never held.
    pub fn is_condition_unmet(&self) -> bool {
        matches!(self, Self::ConditionUnmet(_))
    }

    /// Returns true if a circuit breaker rejected the call.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen(_))
    }

    /// Returns true if cancellation or a deadline interrupted the retry.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted(_))
    }
}

impl<E> From<CircuitOpenError> for RetryError<E> {
    fn from(error: CircuitOpenError) -> Self {
        Self::CircuitOpen(error)
    }
}

impl<E> From<PolicyError> for RetryError<E> {
    fn from(error: PolicyError) -> Self {
        Self::InvalidPolicy(error)
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted(e) => fmt::Display::fmt(e, f),
            Self::Aborted(e) => fmt::Display::fmt(e, f),
            Self::ConditionUnmet(e) => fmt::Display::fmt(e, f),
            Self::CircuitOpen(e) => fmt::Display::fmt(e, f),
            Self::Interrupted(e) => fmt::Display::fmt(e, f),
            Self::InvalidPolicy(e) => write!(f, "invalid retry policy: {}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Exhausted(e) => Some(&e.final_error),
            Self::Aborted(e) => Some(&e.final_error),
            Self::InvalidPolicy(e) => Some(e),
            Self::ConditionUnmet(_) | Self::CircuitOpen(_) | Self::Interrupted(_) => None,
        }
    }
}

#[cfg(test)]
mod error_tests {
    use super::*;
    use crate::retry::outcome::AttemptRecord;

    fn history(n: u32) -> Vec<AttemptRecord> {
        (1..=n)
            .map(|attempt| {
                AttemptRecord::failed(
                    attempt,
                    Duration::from_millis(5),
                    &AttemptFailure::Error("connection failed"),
                    None,
                )
            })
            .collect()
    }

    #[test]
    fn test_retry_exhausted_display() {
        let err = RetryExhausted::new(
            AttemptFailure::Error("connection failed"),
            history(3),
            Duration::from_millis(500),
        );
        let display = format!("{}", err);
        assert!(display.contains("retry exhausted"));
        assert!(display.contains("3 attempts"));
        assert!(display.contains("connection failed"));
    }

    #[test]
    fn test_retry_exhausted_into_error() {
        let err = RetryExhausted::new(AttemptFailure::Error("test error"), history(5), Duration::ZERO);
        assert_eq!(err.into_error(), AttemptFailure::Error("test error"));
    }

    #[test]
    fn test_attempt_failure_display() {
        let timeout: AttemptFailure<String> = AttemptFailure::Timeout {
            duration: Duration::from_secs(2),
        };
        assert!(timeout.to_string().contains("timed out after 2s"));
        assert_eq!(AttemptFailure::Error("boom").to_string(), "boom");
        assert_eq!(
            AttemptFailure::<String>::Unsatisfied.to_string(),
            "condition not satisfied"
        );
    }

    #[test]
    fn test_timeout_error_timeout() {
        let err: TimeoutError<String> = TimeoutError::timeout(Duration::from_secs(5));
        assert!(err.is_timeout());
        assert!(!err.is_inner());
        assert!(err.into_inner().is_none());
    }

    #[test]
    fn test_timeout_error_inner() {
        let err = TimeoutError::inner("inner error".to_string());
        assert!(!err.is_timeout());
        assert!(err.is_inner());
        assert_eq!(err.into_inner(), Some("inner error".to_string()));
    }

    #[test]
    fn test_timeout_error_display() {
        let timeout: TimeoutError<String> = TimeoutError::timeout(Duration::from_secs(5));
        assert!(format!("{}", timeout).contains("timed out"));

        let inner = TimeoutError::inner("failed".to_string());
        assert_eq!(format!("{}", inner), "failed");

        let invalid: TimeoutError<String> = TimeoutError::InvalidDuration;
        assert!(invalid.to_string().contains("greater than zero"));
    }

    #[test]
    fn test_exhausted_constructor_splits_unmet_conditions() {
        let unmet: RetryError<&str> =
            RetryError::exhausted(AttemptFailure::Unsatisfied, history(2), Duration::ZERO);
        assert!(unmet.is_condition_unmet());
        assert_eq!(unmet.attempts().len(), 2);

        let failed = RetryError::exhausted(AttemptFailure::Error("boom"), history(2), Duration::ZERO);
        assert!(failed.is_exhausted());
        assert_eq!(failed.operation_error(), Some(&"boom"));
        assert_eq!(failed.into_operation_error(), Some("boom"));
    }

    #[test]
    fn test_circuit_open_has_no_history() {
        let err: RetryError<String> =
            CircuitOpenError::new("payments", Duration::from_secs(3)).into();
        assert!(err.is_circuit_open());
        assert!(err.attempts().is_empty());
        assert!(err.total_duration().is_none());
        assert!(err.to_string().contains("'payments' is open"));
    }

    #[test]
    fn test_policy_error_display() {
        let err: RetryError<String> = PolicyError::InvalidMultiplier(0.5).into();
        assert_eq!(
            err.to_string(),
            "invalid retry policy: backoff multiplier must be greater than 1 (got 0.5)"
        );
    }
}
