//! Flaky Service Example
//!
//! Drives a simulated unreliable service through the retry toolkit:
//! - Exponential backoff with jitter
//! - Non-retryable errors that abort early
//! - Per-attempt timeouts
//! - Polling until a resource is ready
//! - A circuit breaker shared through a registry
//!
//! Run with `cargo run --example flaky_service` to see the structured
//! `tracing` events the executor emits for every attempt.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use steadfast::circuit::{CircuitBreakerConfig, CircuitRegistry};
use steadfast::{RetryError, RetryExecutor, RetryPolicy};

#[derive(Debug, Clone, PartialEq)]
enum ServiceError {
    Unavailable,
    BadRequest,
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceError::Unavailable => write!(f, "503 service unavailable"),
            ServiceError::BadRequest => write!(f, "400 bad request"),
        }
    }
}

impl std::error::Error for ServiceError {}

/// A service that answers every `healthy_every`-th request.
struct FlakyService {
    requests: AtomicU32,
    healthy_every: u32,
}

impl FlakyService {
    fn new(healthy_every: u32) -> Self {
        Self {
            requests: AtomicU32::new(0),
            healthy_every,
        }
    }

    async fn fetch(&self, key: &str) -> Result<String, ServiceError> {
        let n = self.requests.fetch_add(1, Ordering::SeqCst) + 1;
        if n % self.healthy_every == 0 {
            Ok(format!("{key}=42"))
        } else {
            Err(ServiceError::Unavailable)
        }
    }
}

// ==================== Backoff ====================

async fn example_backoff(executor: &RetryExecutor) {
    println!("\n=== Example 1: Exponential Backoff with Jitter ===");

    let service = FlakyService::new(3);
    let policy = RetryPolicy::exponential(Duration::from_millis(50))
        .with_max_attempts(5)
        .with_jitter(0.2);

    match executor.retry(|| service.fetch("config"), &policy).await {
        Ok(outcome) => {
            println!(
                "Fetched {:?} after {} attempts in {:?}",
                outcome.value(),
                outcome.attempt_count(),
                outcome.total_duration()
            );
            for record in outcome.attempts() {
                println!("  #{} {:?} -> {:?}", record.attempt, record.outcome, record.delay());
            }
        }
        Err(err) => println!("Gave up: {err}"),
    }
}

// ==================== Abort ====================

async fn example_abort(executor: &RetryExecutor) {
    println!("\n=== Example 2: Non-retryable Errors ===");

    let policy = RetryPolicy::exponential(Duration::from_millis(50))
        .with_max_attempts(5)
        .with_retry_predicate(|e: &ServiceError| *e == ServiceError::Unavailable);

    let result = executor
        .retry(|| async { Err::<(), _>(ServiceError::BadRequest) }, &policy)
        .await;

    if let Err(err @ RetryError::Aborted(_)) = result {
        println!("Aborted after {} attempt(s): {err}", err.attempts().len());
    }
}

// ==================== Timeout ====================

async fn example_timeout(executor: &RetryExecutor) {
    println!("\n=== Example 3: Per-attempt Timeout ===");

    let calls = AtomicU32::new(0);
    let policy = RetryPolicy::constant(Duration::from_millis(20))
        .with_max_attempts(3)
        .with_per_attempt_timeout(Duration::from_millis(100));

    let outcome = executor
        .retry(
            || async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                Ok::<_, ServiceError>("fast enough")
            },
            &policy,
        )
        .await;

    match outcome {
        Ok(outcome) => println!(
            "Got {:?}; first attempt: {:?}",
            outcome.value(),
            outcome.attempts()[0].failure_kind()
        ),
        Err(err) => println!("Failed: {err}"),
    }
}

// ==================== Polling ====================

async fn example_poll(executor: &RetryExecutor) {
    println!("\n=== Example 4: Polling for Readiness ===");

    let checks = AtomicU32::new(0);
    let policy = RetryPolicy::constant(Duration::from_millis(25)).with_max_attempts(10);

    let ready = executor
        .poll(
            || async { Ok::<_, ServiceError>(checks.fetch_add(1, Ordering::SeqCst) >= 3) },
            &policy,
        )
        .await;

    println!("Ready: {:?} after {} checks", ready, checks.load(Ordering::SeqCst));
}

// ==================== Circuit Breaker ====================

async fn example_circuit_breaker(executor: &RetryExecutor) {
    println!("\n=== Example 5: Circuit Breaker ===");

    let registry = CircuitRegistry::new(CircuitBreakerConfig::new(2, Duration::from_millis(200)))
        .with_executor(executor.clone());
    let service = FlakyService::new(u32::MAX);
    let policy = RetryPolicy::constant(Duration::from_millis(10)).with_max_attempts(2);

    for call in 1..=4 {
        let breaker = registry.get("inventory");
        match breaker.call(|| service.fetch("stock"), &policy).await {
            Ok(_) => println!("  call {call}: ok"),
            Err(err) => println!("  call {call}: {err} (state: {})", breaker.state()),
        }
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    let healthy = FlakyService::new(1);
    let probe = registry
        .get("inventory")
        .call(|| healthy.fetch("stock"), &policy)
        .await;
    println!("  probe: {:?}", probe.map(|outcome| outcome.into_value()));

    for (name, snapshot) in registry.snapshots() {
        println!("  {name}: {snapshot:?}");
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .init();

    let executor = RetryExecutor::new();

    example_backoff(&executor).await;
    example_abort(&executor).await;
    example_timeout(&executor).await;
    example_poll(&executor).await;
    example_circuit_breaker(&executor).await;
}
