//! Circuit breaking on top of the retry executor.
//!
//! A [`CircuitBreaker`] wraps whole retried calls: once `failure_threshold`
//! calls in a row have failed (after their own retries), the circuit opens
//! and further calls are rejected without touching the operation until
//! `reset_timeout` has passed. The next call is then let through as a single
//! probe whose result closes or re-opens the circuit.
//!
//! Breaker state lives in the breaker value. Share one breaker per protected
//! resource, either behind an `Arc` or through a [`CircuitRegistry`].
//!
//! ```rust
//! use steadfast::circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
//! use steadfast::RetryPolicy;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let breaker = CircuitBreaker::new(
//!     "billing",
//!     CircuitBreakerConfig::new(2, Duration::from_secs(30)),
//! );
//! let policy = RetryPolicy::constant(Duration::from_millis(1)).with_max_attempts(1);
//!
//! for _ in 0..2 {
//!     let _ = breaker.call(|| async { Err::<(), _>("503") }, &policy).await;
//! }
//! assert_eq!(breaker.state(), CircuitState::Open);
//!
//! let rejected = breaker.call(|| async { Ok::<_, &str>(()) }, &policy).await;
//! assert!(rejected.unwrap_err().is_circuit_open());
//! # });
//! ```

mod breaker;
mod registry;

pub use breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState};
pub use registry::CircuitRegistry;
