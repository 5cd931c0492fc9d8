//! Racing an operation against a deadline.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::error::TimeoutError;
use crate::clock::{tokio_clock, Clock};

/// How a race between an operation, its timer and a cancellation token ended.
pub(crate) enum Raced<T, E> {
    Completed(Result<T, E>),
    TimedOut(Duration),
    Cancelled,
}

/// Bounds an operation by a timeout and, optionally, a cancellation token.
///
/// When the timer or the token wins, the operation future is dropped. Work
/// it already handed off elsewhere is not aborted, so treat the operation as
/// abandoned rather than rolled back.
///
/// # Examples
///
/// ```rust
/// use steadfast::{TimeoutError, TimeoutGuard};
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let guard = TimeoutGuard::default();
///
/// let fast = guard.run(async { Ok::<_, String>(1) }, Duration::from_secs(1)).await;
/// assert_eq!(fast, Ok(1));
///
/// let zero = guard.run(async { Ok::<_, String>(1) }, Duration::ZERO).await;
/// assert_eq!(zero, Err(TimeoutError::InvalidDuration));
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct TimeoutGuard {
    clock: Arc<dyn Clock>,
    cancel: Option<CancellationToken>,
}

impl TimeoutGuard {
    /// Create a guard that measures time with `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            cancel: None,
        }
    }

    /// Also give up as soon as `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Run `operation`, failing with [`TimeoutError::Timeout`] if it has not
    /// settled within `timeout`.
    ///
    /// A zero `timeout` is a configuration error, reported as
    /// [`TimeoutError::InvalidDuration`] without polling the operation.
    pub async fn run<T, E, Fut>(&self, operation: Fut, timeout: Duration) -> Result<T, TimeoutError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        if timeout.is_zero() {
            return Err(TimeoutError::InvalidDuration);
        }

        match self.race(operation, timeout).await {
            Raced::Completed(Ok(value)) => Ok(value),
            Raced::Completed(Err(error)) => Err(TimeoutError::Inner(error)),
            Raced::TimedOut(duration) => Err(TimeoutError::Timeout { duration }),
            Raced::Cancelled => Err(TimeoutError::Cancelled),
        }
    }

    pub(crate) async fn race<T, E, Fut>(&self, operation: Fut, timeout: Duration) -> Raced<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        let cancelled = async {
            match &self.cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };

        // An operation that settles on the same poll as the timer wins.
        tokio::select! {
            biased;
            result = operation => Raced::Completed(result),
            _ = self.clock.sleep(timeout) => Raced::TimedOut(timeout),
            _ = cancelled => Raced::Cancelled,
        }
    }
}

impl Default for TimeoutGuard {
    fn default() -> Self {
        Self::new(tokio_clock())
    }
}

/// Run `operation` under `timeout` on the tokio clock.
///
/// Shorthand for `TimeoutGuard::default().run(operation, timeout)`.
pub async fn with_timeout<T, E, Fut>(operation: Fut, timeout: Duration) -> Result<T, TimeoutError<E>>
where
    Fut: Future<Output = Result<T, E>>,
{
    TimeoutGuard::default().run(operation, timeout).await
}

#[cfg(test)]
mod timeout_tests {
    use super::*;
    use crate::clock::ManualClock;
    use tokio::time::Instant;

    #[tokio::test]
    async fn test_success_passes_through() {
        let result = with_timeout(async { Ok::<_, String>(42) }, Duration::from_secs(1)).await;
        assert_eq!(result, Ok(42));
    }

    #[tokio::test]
    async fn test_inner_error_passes_through() {
        let result = with_timeout(async { Err::<i32, _>("inner error") }, Duration::from_secs(1)).await;
        assert_eq!(result, Err(TimeoutError::Inner("inner error")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_resolving_operation_times_out_on_schedule() {
        let start = Instant::now();
        let result = with_timeout(
            std::future::pending::<Result<(), String>>(),
            Duration::from_millis(100),
        )
        .await;

        assert_eq!(
            result,
            Err(TimeoutError::Timeout {
                duration: Duration::from_millis(100)
            })
        );
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed <= Duration::from_millis(105));
    }

    #[tokio::test]
    async fn test_zero_timeout_is_rejected_without_running() {
        let mut ran = false;
        let result = with_timeout(
            async {
                ran = true;
                Ok::<_, String>(())
            },
            Duration::ZERO,
        )
        .await;

        assert_eq!(result, Err(TimeoutError::InvalidDuration));
        assert!(!ran);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_wins_over_slow_operation() {
        let token = CancellationToken::new();
        let guard = TimeoutGuard::default().with_cancellation(token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let start = Instant::now();
        let result = guard
            .run(std::future::pending::<Result<(), String>>(), Duration::from_secs(60))
            .await;

        assert_eq!(result, Err(TimeoutError::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(1));
        canceller.await.unwrap();
    }

    #[tokio::test]
    async fn test_manual_clock_only_advances_when_timer_is_polled() {
        let clock = ManualClock::new();
        let guard = TimeoutGuard::new(Arc::new(clock.clone()));

        let result = guard.run(async { Ok::<_, String>(5) }, Duration::from_secs(10)).await;
        assert_eq!(result, Ok(5));
        assert_eq!(clock.elapsed(), Duration::ZERO);

        let stalled = guard
            .run(std::future::pending::<Result<(), String>>(), Duration::from_secs(10))
            .await;
        assert!(stalled.unwrap_err().is_timeout());
        assert_eq!(clock.elapsed(), Duration::from_secs(10));
    }
}
