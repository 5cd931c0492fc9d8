//! Circuit breaker behaviour through the public API.

use std::sync::Arc;
use std::time::Duration;
use steadfast::circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitRegistry, CircuitState};
use steadfast::testing::FlakyOperation;
use steadfast::{ManualClock, RetryError, RetryExecutor, RetryPolicy};

fn manual() -> (ManualClock, RetryExecutor) {
    let clock = ManualClock::new();
    let executor = RetryExecutor::new().with_clock(Arc::new(clock.clone()));
    (clock, executor)
}

#[tokio::test]
async fn full_lifecycle_closed_open_half_open_closed() {
    let (clock, executor) = manual();
    let breaker = CircuitBreaker::new("payments", CircuitBreakerConfig::new(3, Duration::from_secs(30)))
        .with_executor(executor);
    let policy = RetryPolicy::constant(Duration::from_millis(100)).with_max_attempts(2);
    let outage = FlakyOperation::<(), _>::always_failing("503".to_string());

    // Each failed call retries internally but counts once.
    for _ in 0..3 {
        let err = breaker.call(|| outage.call(), &policy).await.unwrap_err();
        assert!(err.is_exhausted());
    }
    assert_eq!(outage.calls(), 6);
    assert_eq!(breaker.state(), CircuitState::Open);

    // Rejected without touching the operation.
    let err = breaker.call(|| outage.call(), &policy).await.unwrap_err();
    assert!(matches!(err, RetryError::CircuitOpen(_)));
    assert_eq!(outage.calls(), 6);

    clock.advance(Duration::from_secs(30));
    let recovered = FlakyOperation::new(0, "ok", "unused".to_string());
    let outcome = breaker.call(|| recovered.call(), &policy).await.unwrap();

    assert_eq!(outcome.value(), Some(&"ok"));
    assert_eq!(recovered.calls(), 1);
    let snapshot = breaker.snapshot();
    assert_eq!(snapshot.state, CircuitState::Closed);
    assert_eq!(snapshot.consecutive_failures, 0);
}

#[tokio::test]
async fn circuit_open_is_never_retried_internally() {
    let (_, executor) = manual();
    let breaker = CircuitBreaker::new("search", CircuitBreakerConfig::new(1, Duration::from_secs(5)))
        .with_executor(executor);
    let policy = RetryPolicy::constant(Duration::from_millis(10)).with_max_attempts(5);
    let down = FlakyOperation::<(), _>::always_failing("down".to_string());

    let _ = breaker.call(|| down.call(), &policy).await;
    let err = breaker.call(|| down.call(), &policy).await.unwrap_err();

    assert!(err.is_circuit_open());
    assert!(err.attempts().is_empty());
    assert_eq!(down.calls(), 5);
}

#[tokio::test]
async fn shared_breaker_opens_for_every_task() {
    let (_, executor) = manual();
    let breaker = Arc::new(
        CircuitBreaker::new("shared", CircuitBreakerConfig::new(2, Duration::from_secs(60)))
            .with_executor(executor),
    );

    let mut tasks = Vec::new();
    for _ in 0..2 {
        let breaker = breaker.clone();
        tasks.push(tokio::spawn(async move {
            let policy = RetryPolicy::constant(Duration::from_millis(1)).with_max_attempts(1);
            breaker
                .call(|| async { Err::<(), _>("timeout".to_string()) }, &policy)
                .await
        }));
    }
    for task in tasks {
        assert!(task.await.unwrap().is_err());
    }

    assert_eq!(breaker.state(), CircuitState::Open);
}

#[tokio::test]
async fn breaker_recreated_per_call_cannot_protect_anything() {
    let (_, executor) = manual();
    let down = FlakyOperation::<(), _>::always_failing("down".to_string());
    let policy = RetryPolicy::constant(Duration::from_millis(1)).with_max_attempts(1);

    for _ in 0..5 {
        let breaker = CircuitBreaker::new("local", CircuitBreakerConfig::new(1, Duration::from_secs(60)))
            .with_executor(executor.clone());
        let _ = breaker.call(|| down.call(), &policy).await;
    }

    // Every call reached the operation.
    assert_eq!(down.calls(), 5);
}

#[tokio::test]
async fn registry_keeps_state_across_lookups() {
    let (clock, executor) = manual();
    let registry = CircuitRegistry::new(CircuitBreakerConfig::new(1, Duration::from_secs(10)))
        .with_executor(executor);
    let down = FlakyOperation::<(), _>::always_failing("down".to_string());
    let policy = RetryPolicy::constant(Duration::from_millis(1)).with_max_attempts(1);

    for _ in 0..5 {
        let _ = registry.get("orders").call(|| down.call(), &policy).await;
    }
    assert_eq!(down.calls(), 1);

    let snapshots = registry.snapshots();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].1.state, CircuitState::Open);

    clock.advance(Duration::from_secs(10));
    let _ = registry.get("orders").call(|| down.call(), &policy).await;
    assert_eq!(down.calls(), 2);
    assert_eq!(registry.get("orders").state(), CircuitState::Open);
}
