//! Retry logic for transient failures
//!
//! Concatenation and transcoding use fixed-delay policies (external tools can
//! transiently fail under load); segment downloads use a short backoff policy.
//! One combinator serves all call sites.

use std::future::Future;
use std::time::Duration;

use crate::error::Error;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (network timeouts, tool failures under load) should
/// return `true`. Permanent failures (validation, missing files) should
/// return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            // Network errors are retryable when they look transient
            Error::Network(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().is_some_and(|s| s.is_server_error())
            }
            // External tools (concat/transcode) can transiently fail under load
            Error::AudioTool(_) => true,
            // I/O errors are retryable for connection-shaped failures
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
            ),
            // Everything else is permanent for the current job
            _ => false,
        }
    }
}

/// Retry policy: attempt count plus delay shape
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Total number of attempts (including the first)
    pub max_attempts: u32,
    /// Delay before the first retry
    pub delay: Duration,
    /// Multiplier applied to the delay after each retry (1.0 = fixed delay)
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    /// Fixed-delay policy: the same delay between every attempt
    pub const fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            backoff_multiplier: 1.0,
        }
    }

    /// Exponential-backoff policy
    pub const fn backoff(max_attempts: u32, delay: Duration, multiplier: f64) -> Self {
        Self {
            max_attempts,
            delay,
            backoff_multiplier: multiplier,
        }
    }
}

/// Execute an async operation under a retry policy
///
/// Retries only errors that report themselves retryable; a permanent error is
/// returned immediately. Returns the last error once attempts are exhausted.
/// The `label` identifies the operation in log lines.
pub async fn retry_with_policy<F, Fut, T, E>(
    policy: &RetryPolicy,
    label: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt: u32 = 1;
    let mut delay = policy.delay;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(label, attempts = attempt, "operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                tracing::warn!(
                    label,
                    error = %e,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis(),
                    "operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
                delay = Duration::from_secs_f64(delay.as_secs_f64() * policy.backoff_multiplier);
                attempt += 1;
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        label,
                        error = %e,
                        attempts = attempt,
                        "operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::error!(label, error = %e, "operation failed with non-retryable error");
                }
                return Err(e);
            }
        }
    }
}
