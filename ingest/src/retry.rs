//! Bounded retries for transient failures.
//!
//! A [`RetryPolicy`] is a plain value threaded through every retryable call. Whether a given
//! failure is retried is decided by [`build_error_handling_policy`], never by the caller.

use std::future::Future;
use std::time::Duration;

use ingest_config::shared::{BackoffConfig, RetryConfig};
use rand::Rng;
use tracing::{error, warn};

use crate::error::IngestResult;
use crate::policy::{RetryDirective, build_error_handling_policy};

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// The same delay before every retry.
    Fixed(Duration),
    /// `step * n` before the n-th retry.
    Linear(Duration),
    /// `initial * 2^(n-1)` before the n-th retry, capped at `max`. With jitter, the delay is drawn
    /// uniformly from `[0, computed]`.
    Exponential {
        initial: Duration,
        max: Duration,
        jitter: bool,
    },
}

/// Maximum attempts and backoff for one class of operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Backoff,
}

impl RetryPolicy {
    /// Creates a policy performing at most `max_attempts` attempts, at least one.
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Returns a policy that performs a single attempt.
    pub fn no_retry() -> Self {
        Self::new(1, Backoff::Fixed(Duration::ZERO))
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the delay to wait after the `failed_attempts`-th failed attempt.
    ///
    /// Without jitter the result only depends on the arguments.
    pub fn delay_for(&self, failed_attempts: u32) -> Duration {
        let failed_attempts = failed_attempts.max(1);
        match self.backoff {
            Backoff::Fixed(delay) => delay,
            Backoff::Linear(step) => step.saturating_mul(failed_attempts),
            Backoff::Exponential {
                initial,
                max,
                jitter,
            } => {
                let factor = 1u32
                    .checked_shl(failed_attempts - 1)
                    .unwrap_or(u32::MAX);
                let delay = initial.saturating_mul(factor).min(max);
                if jitter && !delay.is_zero() {
                    let millis = delay.as_millis() as u64;
                    Duration::from_millis(rand::rng().random_range(0..=millis))
                } else {
                    delay
                }
            }
        }
    }
}

impl From<RetryConfig> for RetryPolicy {
    fn from(config: RetryConfig) -> Self {
        let backoff = match config.backoff {
            BackoffConfig::Fixed { delay_ms } => Backoff::Fixed(Duration::from_millis(delay_ms)),
            BackoffConfig::Linear { step_ms } => Backoff::Linear(Duration::from_millis(step_ms)),
            BackoffConfig::Exponential {
                initial_ms,
                max_ms,
                jitter,
            } => Backoff::Exponential {
                initial: Duration::from_millis(initial_ms),
                max: Duration::from_millis(max_ms),
                jitter,
            },
        };

        Self::new(config.max_attempts, backoff)
    }
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or `policy` runs out of
/// attempts, in which case the last error is returned.
///
/// The closure is invoked with the 1-based attempt number.
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> IngestResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = IngestResult<T>>,
{
    let mut attempt = 1;
    loop {
        let err = match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        let policy_for_error = build_error_handling_policy(&err);
        if policy_for_error.retry_directive() == RetryDirective::NoRetry {
            return Err(err);
        }

        if attempt >= policy.max_attempts() {
            error!(
                operation = operation_name,
                attempts = attempt,
                error = %err,
                "retries exhausted"
            );
            return Err(err);
        }

        let delay = policy.delay_for(attempt);
        warn!(
            operation = operation_name,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error_kind = ?err.kind(),
            "transient failure, retrying"
        );
        tokio::time::sleep(delay).await;

        attempt += 1;
    }
}
