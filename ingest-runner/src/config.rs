use ingest_config::load_config;
use ingest_config::shared::IngestConfig;

use crate::error::{RunnerError, RunnerResult};

/// Loads and validates the run configuration.
///
/// Uses the standard configuration loading mechanism from [`ingest_config`] and validates the
/// resulting [`IngestConfig`] before returning it.
pub fn load_ingest_config() -> RunnerResult<IngestConfig> {
    let config = load_config::<IngestConfig>().map_err(RunnerError::config)?;
    config.validate().map_err(RunnerError::config)?;

    Ok(config)
}
