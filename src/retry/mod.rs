//! Retrying fallible async operations.
//!
//! A [`RetryPolicy`] is plain data: how many attempts, how long to wait
//! between them, how long one attempt may take and which errors are worth
//! another try. A [`RetryExecutor`] drives an operation under a policy and
//! hands back a [`RetryOutcome`] carrying the value together with the full
//! attempt history.
//!
//! # Quick Start
//!
//! ```rust
//! use steadfast::{RetryExecutor, RetryPolicy};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let policy = RetryPolicy::exponential(Duration::from_millis(1))
//!     .with_max_attempts(4)
//!     .with_per_attempt_timeout(Duration::from_secs(5));
//!
//! let outcome = RetryExecutor::new()
//!     .retry(|| async { Ok::<_, String>("pong") }, &policy)
//!     .await
//!     .unwrap();
//!
//! assert_eq!(outcome.into_value(), Some("pong"));
//! # });
//! ```
//!
//! # Strategies
//!
//! - **Constant**: the same `base_interval` after every failure
//! - **Exponential**: `base_interval * multiplier^(n - 1)`, capped by
//!   `max_interval` when one is set
//!
//! Either can be perturbed with symmetric jitter via
//! [`RetryPolicy::with_jitter`].
//!
//! # Errors
//!
//! Every failure path is a [`RetryError`] variant:
//!
//! - [`RetryExhausted`]: all attempts failed
//! - [`RetryAborted`]: the retry predicate refused an error
//! - [`PollConditionUnmet`]: the awaited condition never held
//! - [`CircuitOpenError`]: a circuit breaker rejected the call
//! - [`RetryInterrupted`]: cancellation or the total timeout cut the call short
//! - [`PolicyError`]: the policy itself is invalid

pub mod backoff;
mod error;
mod executor;
mod outcome;
mod policy;
mod sequential;
mod timeout;

pub use error::{
    AttemptFailure, CircuitOpenError, InterruptReason, PolicyError, PollConditionUnmet,
    RetryAborted, RetryError, RetryExhausted, RetryInterrupted, TimeoutError,
};
pub use executor::RetryExecutor;
pub use outcome::{AttemptOutcome, AttemptRecord, FailureKind, RetryDecision, RetryOutcome};
pub use policy::{ErrorObserver, PolicyOverrides, RetryEvent, RetryPolicy, RetryPredicate};
pub use sequential::{boxed_operation, create_retrier, sequential, BoxedOperation, Retrier};
pub use timeout::{with_timeout, TimeoutGuard};
