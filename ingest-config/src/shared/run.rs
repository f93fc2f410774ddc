use serde::{Deserialize, Serialize};

use crate::shared::{RetryConfig, ValidationError};

/// Run-wide settings shared by every table loaded into one live namespace.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RunConfig {
    /// The live namespace (dataset/schema) readers query.
    pub target_namespace: String,
    /// Suffix appended to the live namespace to form the staging namespace.
    #[serde(default = "default_staging_suffix")]
    pub staging_suffix: String,
    /// Maximum number of rows submitted in one insert call.
    #[serde(default = "default_insert_chunk_size")]
    pub insert_chunk_size: usize,
    /// Retry configuration for source page fetches.
    #[serde(default = "RetryConfig::default_page_fetch")]
    pub page_retry: RetryConfig,
    /// Retry configuration for chunk inserts.
    #[serde(default = "RetryConfig::default_chunk_insert")]
    pub insert_retry: RetryConfig,
    /// Interval, in milliseconds, between two polls of a copy job.
    #[serde(default = "default_swap_poll_interval_ms")]
    pub swap_poll_interval_ms: u64,
    /// Maximum number of polls of a single copy job before giving up.
    #[serde(default = "default_swap_max_polls")]
    pub swap_max_polls: u32,
}

impl RunConfig {
    /// Default staging namespace suffix.
    pub const DEFAULT_STAGING_SUFFIX: &'static str = "_next";

    /// Default number of rows per insert call.
    pub const DEFAULT_INSERT_CHUNK_SIZE: usize = 100;

    /// Default copy job poll interval in milliseconds.
    pub const DEFAULT_SWAP_POLL_INTERVAL_MS: u64 = 100;

    /// Default maximum number of copy job polls.
    pub const DEFAULT_SWAP_MAX_POLLS: u32 = 3_000;

    /// Creates a run configuration for `target_namespace` with every other setting defaulted.
    pub fn new(target_namespace: impl Into<String>) -> Self {
        Self {
            target_namespace: target_namespace.into(),
            staging_suffix: default_staging_suffix(),
            insert_chunk_size: default_insert_chunk_size(),
            page_retry: RetryConfig::default_page_fetch(),
            insert_retry: RetryConfig::default_chunk_insert(),
            swap_poll_interval_ms: default_swap_poll_interval_ms(),
            swap_max_polls: default_swap_max_polls(),
        }
    }

    /// Returns the name of the staging namespace owned by the run.
    pub fn staging_namespace(&self) -> String {
        format!("{}{}", self.target_namespace, self.staging_suffix)
    }

    /// Validates run configuration settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.target_namespace.is_empty() {
            return Err(ValidationError::invalid(
                "run.target_namespace",
                "must not be empty",
            ));
        }

        if self.staging_suffix.is_empty() {
            return Err(ValidationError::invalid(
                "run.staging_suffix",
                "must not be empty, the staging namespace would be the live namespace",
            ));
        }

        if self.insert_chunk_size == 0 {
            return Err(ValidationError::invalid(
                "run.insert_chunk_size",
                "must be greater than 0",
            ));
        }

        if self.swap_max_polls == 0 {
            return Err(ValidationError::invalid(
                "run.swap_max_polls",
                "must be greater than 0",
            ));
        }

        self.page_retry.validate("run.page_retry")?;
        self.insert_retry.validate("run.insert_retry")?;

        Ok(())
    }
}

fn default_staging_suffix() -> String {
    RunConfig::DEFAULT_STAGING_SUFFIX.to_string()
}

const fn default_insert_chunk_size() -> usize {
    RunConfig::DEFAULT_INSERT_CHUNK_SIZE
}

const fn default_swap_poll_interval_ms() -> u64 {
    RunConfig::DEFAULT_SWAP_POLL_INTERVAL_MS
}

const fn default_swap_max_polls() -> u32 {
    RunConfig::DEFAULT_SWAP_MAX_POLLS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_applied_on_deserialization() {
        let config: RunConfig =
            serde_json::from_str(r#"{"target_namespace": "analytics"}"#).unwrap();

        assert_eq!(config.staging_namespace(), "analytics_next");
        assert_eq!(config.insert_chunk_size, 100);
        assert_eq!(config.insert_retry, RetryConfig::default_chunk_insert());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_suffix_is_rejected() {
        let mut config = RunConfig::new("analytics");
        config.staging_suffix = String::new();

        assert!(config.validate().is_err());
    }
}
