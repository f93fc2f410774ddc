use std::io;
use std::sync::Once;

use ingest_config::Environment;
use thiserror::Error;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_log::log_tracer::{LogTracer, SetLoggerError};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry, fmt};

/// Filter applied when `RUST_LOG` is not set.
const DEFAULT_LOG_FILTER: &str = "info";

/// Errors raised while installing the global tracing subscriber.
#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to determine the environment: {0}")]
    Environment(#[source] io::Error),

    #[error("failed to redirect log records to tracing: {0}")]
    LogTracer(#[from] SetLoggerError),

    #[error("failed to install the global subscriber: {0}")]
    SetGlobalDefault(#[from] SetGlobalDefaultError),
}

/// Flushes buffered log lines when dropped.
///
/// Keep it alive until the process exits, otherwise the last lines may be lost.
#[must_use = "dropping the flusher stops writing logs"]
#[derive(Debug)]
pub struct LogFlusher {
    _guard: WorkerGuard,
}

/// Installs the global tracing subscriber for `app_name`.
///
/// Logs are written to stdout through a non-blocking writer. Production emits JSON lines,
/// development a human readable format. The filter comes from `RUST_LOG` and defaults to
/// `info`.
pub fn init_tracing(app_name: &str) -> Result<LogFlusher, TracingError> {
    let environment = Environment::load().map_err(TracingError::Environment)?;

    LogTracer::init()?;

    let (writer, guard) = tracing_appender::non_blocking(io::stdout());
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    match environment {
        Environment::Prod => {
            let subscriber = Registry::default().with(filter).with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true)
                    .with_writer(writer),
            );
            tracing::subscriber::set_global_default(subscriber)?;
        }
        Environment::Dev => {
            let subscriber = Registry::default()
                .with(filter)
                .with(fmt::layer().pretty().with_writer(writer));
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }

    tracing::info!(app = app_name, environment = %environment, "tracing initialized");

    Ok(LogFlusher { _guard: guard })
}

static INIT_TEST_TRACING: Once = Once::new();

/// Installs a subscriber writing through the test harness, once per process.
///
/// Set `ENABLE_TRACING=1` to see the output of passing tests.
pub fn init_test_tracing() {
    INIT_TEST_TRACING.call_once(|| {
        if std::env::var("ENABLE_TRACING").is_err() {
            return;
        }

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
        let subscriber = Registry::default()
            .with(filter)
            .with(fmt::layer().with_test_writer());

        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}
