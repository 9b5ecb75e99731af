//! Retry with exponential backoff.
//!
//! [`RetryExecutor::run`] calls an async closure until it succeeds, fails with
//! a non-retryable error, or runs out of retries. Retry `n` (zero based) waits
//! `base_delay × 2^n` before the next attempt; there is no jitter.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use api_guard::metrics::InMemoryMetrics;
//! use api_guard::retry::RetryExecutor;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let executor = RetryExecutor::new(3, Duration::from_millis(100), Arc::new(InMemoryMetrics::new(100)));
//!
//! let value = executor
//!     .run("get_answer", || async { Ok::<_, api_guard::ApiGuardError>(42) })
//!     .await
//!     .unwrap();
//! assert_eq!(value, 42);
//! # }
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

use crate::error::ApiGuardError;
use crate::metrics::MetricsSink;
use crate::retry::{ErrorRecord, classify};

/// Structured failure returned once an operation is given up on.
///
/// Returned as the `Err` side of [`RetryExecutor::run`], which is how callers
/// tell a failure apart from a payload.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[error("{error} (after {attempts_made} attempt(s))")]
pub struct RetryFailure {
    /// Classification of the last failure
    pub error: ErrorRecord,
    /// 1 + the number of retries actually performed
    pub attempts_made: u32,
    /// Retry budget the executor was configured with
    pub max_retries: u32,
}

impl RetryFailure {
    /// Server-provided wait time, when the last failure was a rate limit.
    pub fn retry_after(&self) -> Option<Duration> {
        self.error.retry_after()
    }
}

/// Delay before retry number `attempt` (zero based): `base × 2^attempt`.
///
/// Saturates at [`Duration::MAX`].
pub fn backoff_delay(attempt: u32, base: Duration) -> Duration {
    2u32.checked_pow(attempt)
        .and_then(|factor| base.checked_mul(factor))
        .unwrap_or(Duration::MAX)
}

/// Runs operations with classified retries and per-attempt metrics.
#[derive(Clone)]
pub struct RetryExecutor {
    max_retries: u32,
    base_delay: Duration,
    metrics: Arc<dyn MetricsSink>,
}

impl RetryExecutor {
    /// Create an executor.
    ///
    /// # Arguments
    ///
    /// * `max_retries` - Retries after the first attempt
    /// * `base_delay` - Delay before the first retry
    /// * `metrics` - Receives one observation per attempt
    pub fn new(max_retries: u32, base_delay: Duration, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            max_retries,
            base_delay,
            metrics,
        }
    }

    /// Retries after the first attempt.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before the first retry.
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Run `operation`, retrying retryable failures.
    ///
    /// The executor cannot be cancelled from outside; wrap the returned future
    /// in a timeout to bound its latency.
    pub async fn run<T, F, Fut>(&self, name: &str, mut operation: F) -> Result<T, RetryFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiGuardError>>,
    {
        let mut attempt: u32 = 0;

        loop {
            let started = Instant::now();
            let error = match operation().await {
                Ok(value) => {
                    self.metrics.record_request(true, started.elapsed());
                    if attempt > 0 {
                        tracing::debug!(operation = name, attempts = attempt + 1, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => {
                    self.metrics.record_request(false, started.elapsed());
                    error
                }
            };

            let record = classify(&error, name);

            if record.retryable && attempt < self.max_retries {
                let delay = backoff_delay(attempt, self.base_delay);
                tracing::warn!(
                    operation = name,
                    attempt = attempt + 1,
                    kind = %record.kind,
                    delay_ms = delay.as_millis() as u64,
                    "request failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            tracing::warn!(
                operation = name,
                attempts = attempt + 1,
                kind = %record.kind,
                retryable = record.retryable,
                "request failed, giving up"
            );
            return Err(RetryFailure {
                error: record,
                attempts_made: attempt + 1,
                max_retries: self.max_retries,
            });
        }
    }
}

impl std::fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .finish()
    }
}
