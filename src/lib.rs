//! # Steadfast
//!
//! Retry, backoff, timeout, polling and circuit breaking for async Rust.
//!
//! Policies are plain data. The [`RetryExecutor`] runs an operation under a
//! policy and returns the value together with the full attempt history, so
//! callers can see exactly what happened: how many attempts, how long each
//! took, why each failed and what was decided afterwards.
//!
//! ## Quick Example
//!
//! ```rust
//! use steadfast::{RetryExecutor, RetryPolicy};
//! use std::sync::atomic::{AtomicU32, Ordering};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let calls = AtomicU32::new(0);
//! let policy = RetryPolicy::exponential(Duration::from_millis(1))
//!     .with_max_attempts(5)
//!     .with_jitter(0.1)
//!     .with_retry_predicate(|err: &String| !err.starts_with("fatal"));
//!
//! let outcome = RetryExecutor::new()
//!     .retry(
//!         || async {
//!             match calls.fetch_add(1, Ordering::SeqCst) {
//!                 0 | 1 => Err("temporarily unavailable".to_string()),
//!                 _ => Ok(42),
//!             }
//!         },
//!         &policy,
//!     )
//!     .await
//!     .unwrap();
//!
//! assert_eq!(outcome.value(), Some(&42));
//! assert_eq!(outcome.attempts().len(), 3);
//! # });
//! ```
//!
//! ## Modules
//!
//! - [`retry`]: policies, the executor, timeouts and ordered batches
//! - [`circuit`]: circuit breakers and a registry of named breakers
//! - [`clock`]: the time source every delay goes through
//! - [`testing`]: helpers for tests of retrying code

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod circuit;
pub mod clock;
pub mod retry;
pub mod testing;

// Re-exports
pub use circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitRegistry, CircuitSnapshot, CircuitState};
pub use clock::{Clock, ManualClock, TokioClock};
pub use retry::backoff;
pub use retry::{
    boxed_operation, create_retrier, sequential, with_timeout, AttemptFailure, AttemptOutcome,
    AttemptRecord, BoxedOperation, CircuitOpenError, ErrorObserver, FailureKind, InterruptReason,
    PolicyError, PolicyOverrides, PollConditionUnmet, Retrier, RetryAborted, RetryDecision,
    RetryError, RetryEvent, RetryExecutor, RetryExhausted, RetryInterrupted, RetryOutcome,
    RetryPolicy, RetryPredicate, TimeoutError, TimeoutGuard,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitRegistry, CircuitState};
    pub use crate::retry::{
        create_retrier, with_timeout, PolicyOverrides, RetryError, RetryExecutor, RetryOutcome,
        RetryPolicy, TimeoutGuard,
    };
}
