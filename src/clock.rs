//! Injectable time sources.
//!
//! Every delay the engine waits on (backoff sleeps, per-attempt timeouts,
//! total deadlines) and every timestamp it takes (attempt durations, circuit
//! breaker reset windows) goes through a [`Clock`]. Production code uses
//! [`TokioClock`]; tests either pause tokio's timer
//! (`#[tokio::test(start_paused = true)]`) or swap in a [`ManualClock`].
//!
//! # Examples
//!
//! ```rust
//! use steadfast::clock::{Clock, ManualClock};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let clock = ManualClock::new();
//! let start = clock.now();
//!
//! clock.sleep(Duration::from_millis(250)).await;
//!
//! assert_eq!(clock.now() - start, Duration::from_millis(250));
//! assert_eq!(clock.sleeps(), vec![Duration::from_millis(250)]);
//! # });
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::Instant;

/// A source of "now" and of sleeps.
pub trait Clock: Send + Sync + fmt::Debug {
    /// The current instant.
    fn now(&self) -> Instant;

    /// A future that completes once `duration` has elapsed on this clock.
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Clock backed by `tokio::time`.
///
/// Honours tokio's paused test time, so tests that run with
/// `start_paused = true` observe exact, instantly-advanced delays.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// The default clock, shared.
pub(crate) fn tokio_clock() -> Arc<dyn Clock> {
    Arc::new(TokioClock)
}

/// A virtual clock for tests.
///
/// Sleeps complete immediately, advance the virtual time by the requested
/// duration and are recorded. Time only moves through sleeps or
/// [`ManualClock::advance`].
///
/// A sleep advances the clock when it is first polled, not when it is
/// created. A timeout raced against an operation that completes on its first
/// poll therefore never fires, while an operation that has to wait for
/// anything always times out.
#[derive(Clone)]
pub struct ManualClock {
    inner: Arc<Mutex<ManualState>>,
}

// Where `now` pins once virtual time runs past what `Instant` can hold.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

#[derive(Debug)]
struct ManualState {
    origin: Instant,
    elapsed: Duration,
    sleeps: Vec<Duration>,
}

impl ManualClock {
    /// Create a clock whose virtual time starts at the current instant.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ManualState {
                origin: Instant::now(),
                elapsed: Duration::ZERO,
                sleeps: Vec::new(),
            })),
        }
    }

    /// Move virtual time forward without recording a sleep.
    pub fn advance(&self, duration: Duration) {
        let mut state = self.lock();
        state.elapsed = state.elapsed.saturating_add(duration);
    }

    /// Every sleep requested so far, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.lock().sleeps.clone()
    }

    /// Total virtual time elapsed since construction.
    pub fn elapsed(&self) -> Duration {
        self.lock().elapsed
    }

    fn lock(&self) -> MutexGuard<'_, ManualState> {
        // A panic while holding this lock cannot leave the state half-written.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ManualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("ManualClock")
            .field("elapsed", &state.elapsed)
            .field("sleeps", &state.sleeps.len())
            .finish()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let state = self.lock();
        state
            .origin
            .checked_add(state.elapsed)
            .unwrap_or_else(|| state.origin + FAR_FUTURE)
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        let clock = self.clone();
        Box::pin(async move {
            let mut state = clock.lock();
            state.elapsed = state.elapsed.saturating_add(duration);
            state.sleeps.push(duration);
        })
    }
}
