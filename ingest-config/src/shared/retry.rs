use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Backoff applied between two attempts of a retryable operation.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffConfig {
    /// The same delay before every retry.
    Fixed { delay_ms: u64 },
    /// A delay growing by `step_ms` with every failed attempt.
    Linear { step_ms: u64 },
    /// A delay doubling with every failed attempt, capped at `max_ms`.
    Exponential {
        initial_ms: u64,
        max_ms: u64,
        #[serde(default)]
        jitter: bool,
    },
}

/// Bounded retry configuration for one class of operations.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay schedule between attempts.
    pub backoff: BackoffConfig,
}

impl RetryConfig {
    /// Default retry configuration for source page fetches.
    pub const fn default_page_fetch() -> Self {
        Self {
            max_attempts: 5,
            backoff: BackoffConfig::Exponential {
                initial_ms: 1_000,
                max_ms: 60_000,
                jitter: false,
            },
        }
    }

    /// Default retry configuration for chunk inserts.
    ///
    /// A freshly created table can take a while to accept streamed rows, hence the long linear
    /// steps.
    pub const fn default_chunk_insert() -> Self {
        Self {
            max_attempts: 6,
            backoff: BackoffConfig::Linear { step_ms: 10_000 },
        }
    }

    /// Validates the retry configuration.
    pub fn validate(&self, field: &str) -> Result<(), ValidationError> {
        if self.max_attempts == 0 {
            return Err(ValidationError::invalid(
                format!("{field}.max_attempts"),
                "must be greater than 0",
            ));
        }

        if let BackoffConfig::Exponential {
            initial_ms, max_ms, ..
        } = self.backoff
            && initial_ms > max_ms
        {
            return Err(ValidationError::invalid(
                format!("{field}.backoff.initial_ms"),
                "must not exceed `max_ms`",
            ));
        }

        Ok(())
    }
}
