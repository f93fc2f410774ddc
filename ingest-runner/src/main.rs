//! Ingest runner binary.
//!
//! Loads the run configuration, initializes telemetry and runs one staged load of every
//! configured table into the configured warehouse. Exits with a non-zero status when the run
//! fails, after the staging namespace was cleaned up.

use std::process::ExitCode;

use ingest_config::shared::IngestConfig;
use ingest_telemetry::metrics::init_metrics;
use ingest_telemetry::tracing::init_tracing;
use tracing::error;

use crate::config::load_ingest_config;
use crate::core::start_run_with_config;
use crate::error::{RunnerError, RunnerResult};

mod config;
mod core;
mod error;

/// Installs the default cryptographic provider for rustls.
///
/// Both reqwest and the BigQuery client pull rustls in, so the provider is chosen explicitly.
fn install_crypto_provider() {
    // Fails only when a provider is installed already.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprint!("{}", err.render_report());
            ExitCode::FAILURE
        }
    }
}

/// Loads configuration, initializes tracing, starts the async runtime and runs the load.
fn run() -> RunnerResult<()> {
    install_crypto_provider();

    let config = load_ingest_config()?;

    let _log_flusher = init_tracing(env!("CARGO_BIN_NAME")).map_err(RunnerError::config)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(config))
}

async fn async_main(config: IngestConfig) -> RunnerResult<()> {
    // The Prometheus listener is spawned on the runtime.
    init_metrics(Some(&config.run.target_namespace)).map_err(RunnerError::config)?;

    if let Err(err) = start_run_with_config(config).await {
        let err = RunnerError::from(err);
        error!(category = err.category(), "{err}");

        return Err(err);
    }

    Ok(())
}
