//! Ordered batches and pre-bound retriers.

use std::fmt;
use std::future::Future;

use futures::future::BoxFuture;

use super::error::RetryError;
use super::executor::RetryExecutor;
use super::outcome::RetryOutcome;
use super::policy::{PolicyOverrides, RetryPolicy};

/// A type-erased operation, for mixing different closures in one batch.
pub type BoxedOperation<'a, T, E> = Box<dyn FnMut() -> BoxFuture<'a, Result<T, E>> + Send + 'a>;

/// Erase the type of `operation` so it can sit next to other operations in a
/// `Vec`.
///
/// ```rust
/// use steadfast::{boxed_operation, sequential, BoxedOperation, RetryExecutor, RetryPolicy};
///
/// # tokio_test::block_on(async {
/// let steps: Vec<BoxedOperation<'_, String, String>> = vec![
///     boxed_operation(|| async { Ok("login".to_string()) }),
///     boxed_operation(|| async { Ok(format!("open {}", "dashboard")) }),
/// ];
///
/// let done = sequential(&RetryExecutor::new(), steps, &RetryPolicy::default()).await.unwrap();
/// assert_eq!(done, vec!["login", "open dashboard"]);
/// # });
/// ```
pub fn boxed_operation<'a, T, E, F, Fut>(mut operation: F) -> BoxedOperation<'a, T, E>
where
    F: FnMut() -> Fut + Send + 'a,
    Fut: Future<Output = Result<T, E>> + Send + 'a,
{
    Box::new(move || Box::pin(operation()))
}

/// Run `operations` strictly in order, retrying each to resolution before
/// the next one starts.
///
/// The first operation that fails (for any reason, including a failed
/// outcome under a non-throwing policy) stops the batch; its error is
/// returned and the remaining operations are never invoked.
pub async fn sequential<T, E, I, F, Fut>(
    executor: &RetryExecutor,
    operations: I,
    policy: &RetryPolicy<E>,
) -> Result<Vec<T>, RetryError<E>>
where
    I: IntoIterator<Item = F>,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let mut values = Vec::new();
    for (index, operation) in operations.into_iter().enumerate() {
        let result = executor
            .retry(operation, policy)
            .await
            .and_then(RetryOutcome::into_result);

        match result {
            Ok(value) => values.push(value),
            Err(error) => {
                tracing::warn!(step = index, completed = values.len(), error = %error, "sequence aborted");
                return Err(error);
            }
        }
    }
    Ok(values)
}

impl RetryExecutor {
    /// Run `operations` in order on this executor. See [`sequential`].
    pub async fn sequential<T, E, I, F, Fut>(
        &self,
        operations: I,
        policy: &RetryPolicy<E>,
    ) -> Result<Vec<T>, RetryError<E>>
    where
        I: IntoIterator<Item = F>,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        sequential(self, operations, policy).await
    }
}

/// A retry entry point pre-bound to a default policy.
///
/// Created by [`create_retrier`].
///
/// ```rust
/// use steadfast::{create_retrier, PolicyOverrides, RetryPolicy};
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let retrier = create_retrier(
///     RetryPolicy::constant(Duration::from_millis(1)).with_max_attempts(2),
/// );
///
/// let value = retrier.call(|| async { Ok::<_, String>(3) }).await.unwrap();
/// assert_eq!(value, 3);
///
/// let patient = PolicyOverrides { max_attempts: Some(5), ..PolicyOverrides::default() };
/// let err = retrier
///     .call_with(|| async { Err::<(), _>("down".to_string()) }, &patient)
///     .await
///     .unwrap_err();
/// assert_eq!(err.attempts().len(), 5);
/// # });
/// ```
pub struct Retrier<E> {
    executor: RetryExecutor,
    defaults: RetryPolicy<E>,
}

/// Bind `defaults` into a reusable [`Retrier`].
pub fn create_retrier<E>(defaults: RetryPolicy<E>) -> Retrier<E> {
    Retrier {
        executor: RetryExecutor::new(),
        defaults,
    }
}

impl<E> Retrier<E> {
    /// Run calls on `executor` instead of a default one.
    pub fn with_executor(mut self, executor: RetryExecutor) -> Self {
        self.executor = executor;
        self
    }

    /// The bound default policy.
    pub fn policy(&self) -> &RetryPolicy<E> {
        &self.defaults
    }
}

impl<E: fmt::Display> Retrier<E> {
    /// Retry `operation` under the default policy and return its value.
    pub async fn call<T, F, Fut>(&self, operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.executor
            .retry(operation, &self.defaults)
            .await
            .and_then(RetryOutcome::into_result)
    }

    /// Retry `operation` under the default policy with `overrides` merged on
    /// top, field by field.
    pub async fn call_with<T, F, Fut>(
        &self,
        operation: F,
        overrides: &PolicyOverrides,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let policy = self.defaults.merged(overrides);
        self.executor
            .retry(operation, &policy)
            .await
            .and_then(RetryOutcome::into_result)
    }
}

impl<E> Clone for Retrier<E> {
    fn clone(&self) -> Self {
        Self {
            executor: self.executor.clone(),
            defaults: self.defaults.clone(),
        }
    }
}

impl<E> fmt::Debug for Retrier<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retrier")
            .field("executor", &self.executor)
            .field("defaults", &self.defaults)
            .finish()
    }
}
