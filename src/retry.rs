//! Generic retry execution with jittered exponential backoff.
//!
//! Any network-calling pipeline stage wraps its operation in a
//! [`RetryExecutor`] rather than hand-rolling sleep loops. The executor
//! retries up to `max_retries` additional times after the initial attempt,
//! waiting `min(max_delay, base_delay * 2^attempt * jitter)` between
//! attempts, with jitter drawn uniformly from `[0.5, 1.0)`.
//!
//! Validation is deterministic and is never wrapped in the executor; the
//! download and storage-upload stages always are.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use libharvest::retry::RetryExecutor;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let executor = RetryExecutor::new(3, Duration::from_secs(1), Duration::from_secs(32));
//! let body = executor
//!     .execute("fetch manifest", || async {
//!         reqwest::get("https://example.com/manifest.json").await?.text().await
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tracing::{debug, warn};

/// Default maximum retry attempts (after the initial attempt).
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay for exponential backoff (1 second).
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default maximum delay cap (32 seconds).
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);

/// An operation that kept failing after every allowed attempt.
///
/// Carries the human-supplied context string and the final underlying
/// error for diagnosis.
#[derive(Debug, Error)]
#[error("{context} failed after {attempts} attempts: {source}")]
pub struct RetryError<E>
where
    E: std::error::Error + 'static,
{
    /// Operation description supplied by the caller.
    pub context: String,
    /// Total number of attempts made (initial + retries).
    pub attempts: u32,
    /// The error from the final attempt.
    #[source]
    pub source: E,
}

/// Retry executor with jittered exponential backoff.
///
/// Cheap to clone; holds only configuration.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryExecutor {
    /// Creates an executor with explicit settings.
    ///
    /// `max_retries` is the number of retries after the initial attempt,
    /// so an operation runs at most `max_retries + 1` times.
    #[must_use]
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// Returns the configured number of retries.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Runs `op`, retrying every failure until attempts are exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`RetryError`] wrapping the last error once all
    /// `max_retries + 1` attempts have failed.
    pub async fn execute<T, E, F, Fut>(&self, context: &str, op: F) -> Result<T, RetryError<E>>
    where
        E: std::error::Error + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_classified(context, |_| true, op).await
    }

    /// Runs `op`, retrying only while `is_retryable` approves the error.
    ///
    /// A non-retryable error short-circuits the loop immediately; it is
    /// still wrapped in [`RetryError`] with the attempt count so far so
    /// that callers get uniform context annotation.
    ///
    /// # Errors
    ///
    /// Returns [`RetryError`] wrapping the last error on exhaustion or on
    /// the first non-retryable error.
    pub async fn execute_classified<T, E, F, Fut>(
        &self,
        context: &str,
        is_retryable: impl Fn(&E) -> bool,
        mut op: F,
    ) -> Result<T, RetryError<E>>
    where
        E: std::error::Error + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            match op().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if attempt > self.max_retries || !is_retryable(&error) {
                        warn!(
                            context,
                            attempts = attempt,
                            error = %error,
                            "operation failed, not retrying"
                        );
                        return Err(RetryError {
                            context: context.to_string(),
                            attempts: attempt,
                            source: error,
                        });
                    }

                    let delay = self.backoff_delay(attempt);
                    debug!(
                        context,
                        attempt,
                        next_attempt = attempt + 1,
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "operation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Delay before the retry that follows failed attempt `attempt` (1-indexed).
    ///
    /// `min(max_delay, base_delay * 2^attempt * jitter)` with jitter uniform
    /// in `[0.5, 1.0)`. Jitter spreads simultaneous retries so concurrent
    /// jobs hitting the same host do not stampede it.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let jitter: f64 = rand::thread_rng().gen_range(0.5..1.0);
        let exp = 2f64.powi(i32::try_from(attempt).unwrap_or(i32::MAX));
        let delay_ms = self.base_delay.as_millis() as f64 * exp * jitter;
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[derive(Debug, Error)]
    #[error("boom")]
    struct Boom;

    fn fast_executor(max_retries: u32) -> RetryExecutor {
        RetryExecutor::new(max_retries, Duration::from_millis(1), Duration::from_millis(8))
    }

    // ==================== Attempt Count Tests ====================

    #[tokio::test]
    async fn test_execute_permanent_failure_makes_max_plus_one_attempts() {
        let executor = fast_executor(3);
        let calls = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&calls);
        let result: Result<(), _> = executor
            .execute("always fails", move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), Boom>(Boom)
                }
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 4, "maxRetries=3 means 4 invocations");
        assert_eq!(err.attempts, 4);
        assert!(err.to_string().contains("always fails"));
    }

    #[tokio::test]
    async fn test_execute_succeeds_after_transient_failures() {
        let executor = fast_executor(3);
        let calls = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&calls);
        let result = executor
            .execute("flaky", move || {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(Boom)
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_execute_first_try_success_makes_one_attempt() {
        let executor = fast_executor(3);
        let calls = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&calls);
        let result = executor
            .execute("instant", move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, Boom>("ok")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    // ==================== Classifier Tests ====================

    #[tokio::test]
    async fn test_execute_classified_stops_on_non_retryable() {
        let executor = fast_executor(5);
        let calls = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&calls);
        let result: Result<(), _> = executor
            .execute_classified(
                "permanent",
                |_: &Boom| false,
                move || {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err::<(), Boom>(Boom)
                    }
                },
            )
            .await;

        assert!(result.is_err());
        assert_eq!(
            calls.load(Ordering::SeqCst),
            1,
            "non-retryable error must not be retried"
        );
    }

    // ==================== Delay Bound Tests ====================

    #[test]
    fn test_backoff_delay_respects_exponential_bound() {
        let executor =
            RetryExecutor::new(5, Duration::from_millis(100), Duration::from_secs(60));

        for attempt in 1..=5u32 {
            for _ in 0..50 {
                let delay = executor.backoff_delay(attempt);
                let upper = Duration::from_millis(100 * 2u64.pow(attempt));
                assert!(
                    delay <= upper,
                    "delay {delay:?} exceeds base*2^{attempt} = {upper:?}"
                );
                assert!(
                    delay >= upper / 2,
                    "delay {delay:?} below jitter floor for attempt {attempt}"
                );
            }
        }
    }

    #[test]
    fn test_backoff_delay_respects_max_delay_cap() {
        let executor =
            RetryExecutor::new(10, Duration::from_secs(1), Duration::from_secs(5));

        // 1s * 2^6 = 64s uncapped; must be clamped to 5s.
        for _ in 0..50 {
            let delay = executor.backoff_delay(6);
            assert!(delay <= Duration::from_secs(5));
        }
    }

    #[test]
    fn test_default_executor_values() {
        let executor = RetryExecutor::default();
        assert_eq!(executor.max_retries(), DEFAULT_MAX_RETRIES);
    }
}
