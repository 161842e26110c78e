// nofx-resilience/src/retry.rs
// ============================================================================
// Module: Retry
// Description: executeWithRetry — exponential backoff with a configurable
// retryable-error predicate (§4.J).
// ============================================================================

//! Not retried: assertion-style errors, permanent validation errors. The
//! default predicate matches [`nofx_core::CoreError::Transient`] and nothing
//! else, mirroring §7's "only transient errors are retryable" rule.

use std::future::Future;

use crate::backoff::BackoffConfig;

/// Configuration for [`execute_with_retry`].
#[derive(Clone)]
pub struct RetryConfig<E> {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Backoff parameters between attempts.
    pub backoff: BackoffConfig,
    /// Returns whether `err` should be retried. Defaults to "never", so
    /// callers working with [`nofx_core::CoreError`] should set this to
    /// [`nofx_core::CoreError::is_retryable`].
    pub is_retryable: std::sync::Arc<dyn Fn(&E) -> bool + Send + Sync>,
}

impl<E> RetryConfig<E> {
    /// Creates a config with the given attempt budget and retryable
    /// predicate, default backoff parameters.
    #[must_use]
    pub fn new(max_attempts: u32, is_retryable: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        Self { max_attempts, backoff: BackoffConfig::default(), is_retryable: std::sync::Arc::new(is_retryable) }
    }
}

/// Executes `operation`, retrying on retryable errors per `cfg`'s backoff
/// and predicate, up to `cfg.max_attempts` total attempts.
///
/// # Errors
///
/// Returns the last error `operation` produced once attempts are exhausted,
/// or immediately once the predicate reports the error as non-retryable.
pub async fn execute_with_retry<T, E, F, Fut>(mut operation: F, cfg: &RetryConfig<E>) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < cfg.max_attempts && (cfg.is_retryable)(&err) => {
                tracing::warn!(attempt, max_attempts = cfg.max_attempts, "retrying after retryable error");
                tokio::time::sleep(cfg.backoff.jittered_delay(attempt)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicU32;
    use std::sync::atomic::Ordering;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum FakeError {
        Transient,
        Permanent,
    }

    fn fast_cfg(max_attempts: u32) -> RetryConfig<FakeError> {
        let mut cfg = RetryConfig::new(max_attempts, |err: &FakeError| *err == FakeError::Transient);
        cfg.backoff = BackoffConfig { base_ms: 1, cap_ms: 2, jitter_fraction: 0.0 };
        cfg
    }

    #[tokio::test]
    async fn retries_until_success() {
        let attempts = Arc::new(AtomicU32::new(0));
        let cfg = fast_cfg(5);
        let counter = attempts.clone();
        let result = execute_with_retry(
            move || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    if n < 2 { Err(FakeError::Transient) } else { Ok(42) }
                }
            },
            &cfg,
        )
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_on_non_retryable_error_immediately() {
        let attempts = Arc::new(AtomicU32::new(0));
        let cfg = fast_cfg(5);
        let counter = attempts.clone();
        let result: Result<u32, FakeError> = execute_with_retry(
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(FakeError::Permanent)
                }
            },
            &cfg,
        )
        .await;
        assert_eq!(result, Err(FakeError::Permanent));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_attempts_budget() {
        let attempts = Arc::new(AtomicU32::new(0));
        let cfg = fast_cfg(3);
        let counter = attempts.clone();
        let result: Result<u32, FakeError> = execute_with_retry(
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(FakeError::Transient)
                }
            },
            &cfg,
        )
        .await;
        assert_eq!(result, Err(FakeError::Transient));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
