//! End-to-end retry scenarios against the public API.
//!
//! Time-sensitive tests run on tokio's paused clock, so the delays they
//! observe are exact and cost nothing.

use proptest::prelude::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use steadfast::prelude::*;
use steadfast::testing::FlakyOperation;
use steadfast::{
    assert_attempts, boxed_operation, sequential, BoxedOperation, ManualClock, TimeoutError,
};
use tokio::time::Instant;

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

#[tokio::test(start_paused = true)]
async fn fails_twice_then_succeeds_with_growing_delays() {
    let policy = RetryPolicy::exponential(ms(100))
        .with_max_attempts(3)
        .with_multiplier(2.0);
    let started = Arc::new(std::sync::Mutex::new(Vec::new()));
    let origin = Instant::now();

    let outcome = RetryExecutor::new()
        .retry(
            || {
                let started = started.clone();
                async move {
                    let mut started = started.lock().unwrap();
                    started.push(origin.elapsed());
                    if started.len() < 3 {
                        Err("transient")
                    } else {
                        Ok("done")
                    }
                }
            },
            &policy,
        )
        .await
        .unwrap();

    assert!(outcome.is_success());
    assert_attempts!(outcome, 3);

    let started = started.lock().unwrap();
    let gaps: Vec<_> = started.windows(2).map(|w| w[1] - w[0]).collect();
    assert_eq!(gaps.len(), 2);
    assert!(gaps[0] >= ms(100) && gaps[0] < ms(105), "{:?}", gaps[0]);
    assert!(gaps[1] >= ms(200) && gaps[1] < ms(205), "{:?}", gaps[1]);
}

#[tokio::test(start_paused = true)]
async fn with_timeout_rejects_a_hung_operation_on_time() {
    let start = Instant::now();
    let result = with_timeout(std::future::pending::<Result<(), String>>(), ms(100)).await;

    assert_eq!(result, Err(TimeoutError::Timeout { duration: ms(100) }));
    assert!(start.elapsed() >= ms(100) && start.elapsed() <= ms(105));
}

#[tokio::test]
async fn sequential_stops_at_the_first_exhausted_operation() {
    let clock = ManualClock::new();
    let executor = RetryExecutor::new().with_clock(Arc::new(clock.clone()));
    let first = FlakyOperation::<(), _>::always_failing("op1 failed".to_string());
    let second = FlakyOperation::new(0, (), "unused".to_string());

    let ops: Vec<BoxedOperation<'_, (), String>> = vec![
        boxed_operation(|| first.call()),
        boxed_operation(|| second.call()),
    ];
    let err = sequential(&executor, ops, &RetryPolicy::constant(ms(10)).with_max_attempts(3))
        .await
        .unwrap_err();

    assert_eq!(err.into_operation_error(), Some("op1 failed".to_string()));
    assert_eq!(first.calls(), 3);
    assert_eq!(second.calls(), 0);
}

#[tokio::test]
async fn retry_until_matches_retry_on_always_failing_work() {
    let clock = ManualClock::new();
    let executor = RetryExecutor::new().with_clock(Arc::new(clock.clone()));
    let policy = RetryPolicy::exponential(ms(20)).with_max_attempts(4);

    let until_calls = AtomicU32::new(0);
    let until = executor
        .retry_until(
            || async {
                until_calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(0)
            },
            |n| *n > 0,
            &policy,
        )
        .await
        .unwrap_err();
    let until_sleeps = clock.sleeps();

    let failing = FlakyOperation::<(), _>::always_failing("nope".to_string());
    let plain = executor.retry(|| failing.call(), &policy).await.unwrap_err();
    let plain_sleeps = clock.sleeps()[until_sleeps.len()..].to_vec();

    assert_eq!(until_calls.load(Ordering::SeqCst), failing.calls());
    assert_eq!(until.attempts().len(), plain.attempts().len());
    assert_eq!(until_sleeps, plain_sleeps);
    assert!(until.is_condition_unmet());
    assert!(plain.is_exhausted());
}

#[tokio::test]
async fn history_survives_into_the_error() {
    let executor = RetryExecutor::new().with_clock(Arc::new(ManualClock::new()));
    let flaky = FlakyOperation::<(), _>::always_failing("disk full".to_string());

    let err = executor
        .retry(|| flaky.call(), &RetryPolicy::constant(ms(1)).with_max_attempts(3))
        .await
        .unwrap_err();

    let message = err.to_string();
    assert!(message.starts_with("retry exhausted after 3 attempts"), "{message}");
    assert!(message.ends_with("disk full"), "{message}");
    assert_eq!(err.total_duration(), Some(ms(2)));
    for (index, record) in err.attempts().iter().enumerate() {
        assert_eq!(record.attempt as usize, index + 1);
        assert!(!record.is_success());
    }
}

#[tokio::test]
async fn retrier_defaults_and_overrides() {
    let clock = ManualClock::new();
    let retrier = create_retrier(RetryPolicy::constant(ms(30)).with_max_attempts(2))
        .with_executor(RetryExecutor::new().with_clock(Arc::new(clock.clone())));
    let flaky = FlakyOperation::new(3, "ok", "flap");

    assert!(retrier.call(|| flaky.call()).await.is_err());
    assert_eq!(flaky.calls(), 2);

    let value = retrier
        .call_with(
            || flaky.call(),
            &PolicyOverrides {
                max_attempts: Some(3),
                ..PolicyOverrides::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(value, "ok");
    assert_eq!(clock.sleeps(), vec![ms(30); 2]);
}

#[cfg(feature = "serde")]
#[test]
fn overrides_load_from_json() {
    let overrides: PolicyOverrides =
        serde_json::from_str(r#"{ "max_attempts": 7, "jitter_factor": 0.25 }"#).unwrap();
    let policy = RetryPolicy::<String>::default().merged(&overrides);

    assert_eq!(policy.max_attempts(), 7);
    assert_eq!(policy.jitter_factor(), Some(0.25));
    assert_eq!(policy.base_interval(), ms(1000));

    let unknown = serde_json::from_str::<PolicyOverrides>(r#"{ "retries": 2 }"#);
    assert!(unknown.is_err());
}

proptest! {
    #[test]
    fn always_failing_runs_exactly_max_attempts(max_attempts in 1u32..12) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let executor = RetryExecutor::new().with_clock(Arc::new(ManualClock::new()));
        let flaky = FlakyOperation::<(), _>::always_failing("down".to_string());
        let policy = RetryPolicy::exponential(ms(10)).with_max_attempts(max_attempts);

        let err = runtime
            .block_on(executor.retry(|| flaky.call(), &policy))
            .unwrap_err();

        prop_assert_eq!(flaky.calls(), max_attempts);
        prop_assert_eq!(err.attempts().len(), max_attempts as usize);
    }
}
