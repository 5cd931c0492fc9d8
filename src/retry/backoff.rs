//! Delay computation between attempts.
//!
//! Everything here is a pure function of the attempt number, the policy and
//! (for jitter) a random source, so it can be tested without touching time.
//!
//! ```rust
//! use steadfast::backoff::{base_delay, compute_delay_with};
//! use steadfast::RetryPolicy;
//! use rand::SeedableRng;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::<String>::exponential(Duration::from_millis(100)).with_jitter(0.2);
//!
//! assert_eq!(base_delay(3, &policy), Duration::from_millis(400));
//!
//! let mut rng = rand::rngs::StdRng::seed_from_u64(42);
//! let jittered = compute_delay_with(3, &policy, &mut rng);
//! assert!(jittered >= Duration::from_millis(320) && jittered <= Duration::from_millis(480));
//! ```

use std::time::Duration;

use rand::Rng;

use super::policy::RetryPolicy;

/// The delay after failed attempt `attempt` (1-indexed), before jitter.
///
/// Constant policies always return `base_interval`. Exponential policies
/// return `min(base_interval * multiplier^(attempt - 1), max_interval)`.
/// Attempt 0 is treated as attempt 1, and the result saturates instead of
/// overflowing.
pub fn base_delay<E>(attempt: u32, policy: &RetryPolicy<E>) -> Duration {
    if !policy.uses_exponential_backoff() {
        return policy.base_interval();
    }

    let exponent = i32::try_from(attempt.max(1) - 1).unwrap_or(i32::MAX);
    let nanos = policy.base_interval().as_nanos() as f64 * policy.backoff_multiplier().powi(exponent);
    let delay = duration_from_nanos(nanos);

    match policy.max_interval() {
        Some(cap) => delay.min(cap),
        None => delay,
    }
}

/// The delay after failed attempt `attempt`, with the policy's jitter drawn
/// from `rng`.
///
/// Deterministic for a seeded `rng`.
pub fn compute_delay_with<E, R>(attempt: u32, policy: &RetryPolicy<E>, rng: &mut R) -> Duration
where
    R: Rng + ?Sized,
{
    let delay = base_delay(attempt, policy);
    match policy.jitter_factor() {
        Some(factor) => apply_jitter(delay, factor, rng),
        None => delay,
    }
}

/// The delay after failed attempt `attempt`, jittered with the thread-local
/// random source.
pub fn compute_delay<E>(attempt: u32, policy: &RetryPolicy<E>) -> Duration {
    compute_delay_with(attempt, policy, &mut rand::rng())
}

/// Perturb `delay` by a uniform offset in `[-delay * factor, +delay * factor]`,
/// clamped at zero.
///
/// The offset is symmetric, so the expected delay is unchanged.
pub fn apply_jitter<R>(delay: Duration, factor: f64, rng: &mut R) -> Duration
where
    R: Rng + ?Sized,
{
    let factor = factor.clamp(0.0, 1.0);
    if factor == 0.0 || delay.is_zero() {
        return delay;
    }

    let nanos = delay.as_nanos() as f64;
    let spread = nanos * factor;
    let offset = rng.random_range(-spread..=spread);
    duration_from_nanos(nanos + offset)
}

fn duration_from_nanos(nanos: f64) -> Duration {
    if nanos.is_nan() || nanos <= 0.0 {
        Duration::ZERO
    } else if nanos >= u64::MAX as f64 {
        Duration::from_nanos(u64::MAX)
    } else {
        Duration::from_nanos(nanos.round() as u64)
    }
}
