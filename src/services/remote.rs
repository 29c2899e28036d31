//! Timeout and retry helpers for remote calls.
//!
//! Providers, embedders and stores expose blocking APIs. These helpers run
//! them on the blocking pool so async workers only suspend at remote calls,
//! bound each call by a timeout, and retry retryable failures with capped
//! exponential backoff.

use crate::{Error, Result};
use std::future::Future;
use std::time::Duration;

/// Retry budget and timeout for one remote stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Backoff before the first retry.
    pub base_backoff_ms: u64,
    /// Backoff ceiling.
    pub max_backoff_ms: u64,
    /// Timeout per attempt.
    pub timeout_ms: u64,
}

impl RetryPolicy {
    /// No retries, the given timeout.
    #[must_use]
    pub const fn once(timeout_ms: u64) -> Self {
        Self {
            max_retries: 0,
            base_backoff_ms: 0,
            max_backoff_ms: 0,
            timeout_ms,
        }
    }

    /// Per-attempt timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Backoff before retry number `retry` (1-based): `base * 2^(retry-1)`, capped.
    #[must_use]
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(20);
        let millis = self
            .base_backoff_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_backoff_ms.max(self.base_backoff_ms));
        Duration::from_millis(millis)
    }
}

/// Runs a blocking call on the blocking pool, bounded by `timeout`.
///
/// On timeout the worker stops waiting and gets [`Error::Timeout`]; the
/// blocking thread finishes on its own and its result is discarded.
pub async fn run_blocking<T, F>(operation: &str, timeout: Duration, call: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let handle = tokio::task::spawn_blocking(call);
    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(Error::OperationFailed {
            operation: operation.to_string(),
            cause: join_err.to_string(),
        }),
        Err(_) => Err(Error::Timeout {
            operation: operation.to_string(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}

/// Runs `attempt` until it succeeds, fails with a non-retryable error, or
/// the retry budget is spent.
///
/// `attempt` receives the zero-based attempt number. The last error is
/// returned when every attempt failed.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, operation: &str, mut attempt: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt_no = 0;
    loop {
        match attempt(attempt_no).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt_no < policy.max_retries => {
                attempt_no += 1;
                let delay = policy.backoff(attempt_no);
                metrics::counter!("analysis_retries_total", "operation" => operation.to_string())
                    .increment(1);
                tracing::debug!(
                    operation,
                    attempt = attempt_no,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "Retrying after retryable failure"
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            },
            Err(err) => return Err(err),
        }
    }
}
