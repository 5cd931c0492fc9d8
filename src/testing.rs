//! Helpers for testing code that retries.
//!
//! # Examples
//!
//! ## FlakyOperation
//!
//! ```rust
//! use steadfast::testing::FlakyOperation;
//! use steadfast::{assert_attempts, RetryExecutor, RetryPolicy};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let flaky = FlakyOperation::new(2, "payload", "connection reset");
//! let policy = RetryPolicy::constant(Duration::from_millis(1)).with_max_attempts(5);
//!
//! let outcome = RetryExecutor::new().retry(|| flaky.call(), &policy).await.unwrap();
//!
//! assert_eq!(outcome.value(), Some(&"payload"));
//! assert_eq!(flaky.calls(), 3);
//! assert_attempts!(outcome, 3);
//! # });
//! ```

use std::future::{ready, Ready};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// An operation that fails a fixed number of times, then succeeds.
///
/// Clones share the call counter, so a clone can be moved into the retried
/// closure while the original is kept for assertions.
#[derive(Debug, Clone)]
pub struct FlakyOperation<T, E> {
    failures: u32,
    value: Option<T>,
    error: E,
    calls: Arc<AtomicU32>,
}

impl<T: Clone, E: Clone> FlakyOperation<T, E> {
    /// Fail the first `failures` calls with `error`, then return `value`.
    pub fn new(failures: u32, value: T, error: E) -> Self {
        Self {
            failures,
            value: Some(value),
            error,
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Fail every call with `error`.
    pub fn always_failing(error: E) -> Self {
        Self {
            failures: u32::MAX,
            value: None,
            error,
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Invoke the operation once.
    pub fn call(&self) -> Ready<Result<T, E>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        match &self.value {
            Some(value) if call > self.failures => ready(Ok(value.clone())),
            _ => ready(Err(self.error.clone())),
        }
    }

    /// How many times the operation has been invoked.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Assert how many attempts a retried call made.
///
/// Works on anything with an `attempts()` method returning a slice of
/// records: [`RetryOutcome`](crate::RetryOutcome) and
/// [`RetryError`](crate::RetryError).
///
/// # Example
///
/// ```rust
/// use steadfast::{assert_attempts, RetryExecutor, RetryPolicy};
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let policy = RetryPolicy::constant(Duration::from_millis(1)).with_max_attempts(2);
/// let err = RetryExecutor::new()
///     .retry(|| async { Err::<(), _>("nope") }, &policy)
///     .await
///     .unwrap_err();
///
/// assert_attempts!(err, 2);
/// # });
/// ```
#[macro_export]
macro_rules! assert_attempts {
    ($subject:expr, $expected:expr) => {{
        let attempts = $subject.attempts();
        let expected = $expected as usize;
        assert_eq!(
            attempts.len(),
            expected,
            "expected {} attempts, got {}: {:?}",
            expected,
            attempts.len(),
            attempts
        );
    }};
}

#[cfg(test)]
mod testing_tests {
    use super::*;

    #[tokio::test]
    async fn test_flaky_fails_then_succeeds() {
        let flaky = FlakyOperation::new(2, 10, "err");
        assert_eq!(flaky.call().await, Err("err"));
        assert_eq!(flaky.call().await, Err("err"));
        assert_eq!(flaky.call().await, Ok(10));
        assert_eq!(flaky.call().await, Ok(10));
        assert_eq!(flaky.calls(), 4);
    }

    #[tokio::test]
    async fn test_always_failing_never_succeeds() {
        let flaky: FlakyOperation<(), _> = FlakyOperation::always_failing("down");
        for _ in 0..5 {
            assert_eq!(flaky.call().await, Err("down"));
        }
        assert_eq!(flaky.calls(), 5);
    }

    #[test]
    fn test_clones_share_the_counter() {
        let flaky = FlakyOperation::new(0, 'x', ());
        let clone = flaky.clone();
        let _ = clone.call();
        let _ = clone.call();
        assert_eq!(flaky.calls(), 2);
    }
}
