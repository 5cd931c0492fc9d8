//! Attempt history and the structured result of a retried call.

use std::fmt;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::error::{AttemptFailure, RetryError};

/// Coarse category of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum FailureKind {
    /// The operation returned an error.
    Error,
    /// The attempt exceeded its timeout.
    Timeout,
    /// The operation's value did not satisfy the awaited condition.
    Unsatisfied,
}

/// How a single attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum AttemptOutcome {
    /// The attempt produced an accepted value.
    Success,
    /// The attempt failed.
    Failed {
        /// What kind of failure it was.
        kind: FailureKind,
        /// The failure rendered with `Display`.
        message: String,
    },
}

/// What the executor decided after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum RetryDecision {
    /// Wait `delay`, then try again.
    Retry {
        /// Backoff before the next attempt.
        delay: Duration,
    },
    /// The retry predicate refused; stop now.
    Abort,
    /// No attempts remain.
    Exhausted,
}

/// One entry of an attempt history.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AttemptRecord {
    /// 1-based attempt number.
    pub attempt: u32,
    /// Time from starting the attempt until it settled.
    pub duration: Duration,
    /// How the attempt ended.
    pub outcome: AttemptOutcome,
    /// The decision taken after a failure. `None` for the successful attempt.
    pub decision: Option<RetryDecision>,
}

impl AttemptRecord {
    pub(crate) fn succeeded(attempt: u32, duration: Duration) -> Self {
        Self {
            attempt,
            duration,
            outcome: AttemptOutcome::Success,
            decision: None,
        }
    }

    pub(crate) fn failed<E: fmt::Display>(
        attempt: u32,
        duration: Duration,
        failure: &AttemptFailure<E>,
        decision: Option<RetryDecision>,
    ) -> Self {
        Self {
            attempt,
            duration,
            outcome: AttemptOutcome::Failed {
                kind: failure.kind(),
                message: failure.to_string(),
            },
            decision,
        }
    }

    /// Returns true if this attempt succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Success)
    }

    /// The failure category, for failed attempts.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match &self.outcome {
            AttemptOutcome::Success => None,
            AttemptOutcome::Failed { kind, .. } => Some(*kind),
        }
    }

    /// The backoff waited after this attempt, if any.
    pub fn delay(&self) -> Option<Duration> {
        match self.decision {
            Some(RetryDecision::Retry { delay }) => Some(delay),
            _ => None,
        }
    }
}

/// The structured result of a retried call.
///
/// Holds either the accepted value or the final failure, never both, along
/// with the complete attempt history.
///
/// # Examples
///
/// ```rust
/// use steadfast::{RetryExecutor, RetryPolicy};
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let policy = RetryPolicy::constant(Duration::from_millis(1))
///     .with_max_attempts(2)
///     .with_throw_on_exhaustion(false);
///
/// let outcome = RetryExecutor::new()
///     .retry(|| async { Err::<u32, _>("offline") }, &policy)
///     .await
///     .unwrap();
///
/// assert!(!outcome.is_success());
/// assert_eq!(outcome.attempts().len(), 2);
/// assert!(outcome.value().is_none());
/// # });
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOutcome<T, E> {
    result: Result<T, AttemptFailure<E>>,
    attempts: Vec<AttemptRecord>,
    total_duration: Duration,
}

impl<T, E> RetryOutcome<T, E> {
    pub(crate) fn success(value: T, attempts: Vec<AttemptRecord>, total_duration: Duration) -> Self {
        Self {
            result: Ok(value),
            attempts,
            total_duration,
        }
    }

    pub(crate) fn failure(
        failure: AttemptFailure<E>,
        attempts: Vec<AttemptRecord>,
        total_duration: Duration,
    ) -> Self {
        Self {
            result: Err(failure),
            attempts,
            total_duration,
        }
    }

    /// Returns true if an attempt succeeded.
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// The accepted value, present iff the call succeeded.
    pub fn value(&self) -> Option<&T> {
        self.result.as_ref().ok()
    }

    /// Extract the accepted value.
    pub fn into_value(self) -> Option<T> {
        self.result.ok()
    }

    /// The last attempt's failure, present iff the call failed.
    pub fn final_error(&self) -> Option<&AttemptFailure<E>> {
        self.result.as_ref().err()
    }

    /// Every attempt made, in order.
    pub fn attempts(&self) -> &[AttemptRecord] {
        &self.attempts
    }

    /// Number of attempts made.
    pub fn attempt_count(&self) -> u32 {
        self.attempts.len() as u32
    }

    /// Wall time from the first attempt until the call returned.
    pub fn total_duration(&self) -> Duration {
        self.total_duration
    }

    /// Convert into a plain `Result`, turning a failed outcome into the
    /// error the executor would have raised had it been asked to.
    pub fn into_result(self) -> Result<T, RetryError<E>> {
        match self.result {
            Ok(value) => Ok(value),
            Err(failure) => Err(RetryError::exhausted(
                failure,
                self.attempts,
                self.total_duration,
            )),
        }
    }
}
