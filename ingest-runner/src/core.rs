use anyhow::Context;
use chrono::Utc;
use ingest::concurrency::cancel::{CancellationTx, create_cancellation};
use ingest::pipeline::{RunReport, TableJob, run_tables};
use ingest::warehouse::memory::MemoryWarehouse;
use ingest::warehouse::{Warehouse, WatermarkLookup};
use ingest_config::shared::{DestinationConfig, IngestConfig, RunConfig, TableConfig};
use ingest_destinations::bigquery::BigQueryWarehouse;
use ingest_sources::AnySource;
use secrecy::ExposeSecret;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{debug, info, warn};

/// Runs one load of every configured table with the provided configuration.
///
/// Builds the warehouse and one source per table, then runs kickoff, the table loads and the
/// final swap. SIGINT and SIGTERM cancel the run, which removes the staging namespace.
pub async fn start_run_with_config(config: IngestConfig) -> anyhow::Result<RunReport> {
    info!(namespace = %config.run.target_namespace, "starting ingest run");

    log_config(&config);

    let tables = build_table_jobs(&config.tables)?;

    // Static dispatch per warehouse, the run is generic over it.
    let report = match &config.destination {
        DestinationConfig::Memory => {
            let warehouse = MemoryWarehouse::new();
            start_run(&warehouse, config.run, &tables).await?
        }
        DestinationConfig::BigQuery {
            project_id,
            service_account_key,
            location,
        } => {
            let warehouse = BigQueryWarehouse::new_with_key(
                project_id.clone(),
                service_account_key.expose_secret(),
                location.clone(),
            )
            .await?;
            start_run(&warehouse, config.run, &tables).await?
        }
    };

    for table in &report.tables {
        info!(
            table = %table.table,
            sub_windows = table.sub_windows.len(),
            batches = table.batches,
            rows_extracted = table.rows_extracted,
            rows_inserted = table.rows_inserted,
            "table loaded"
        );
    }
    info!(
        promoted = ?report.swap.promoted,
        removed = ?report.swap.removed,
        "ingest run completed"
    );

    Ok(report)
}

fn build_table_jobs(tables: &[TableConfig]) -> anyhow::Result<Vec<TableJob<AnySource>>> {
    tables
        .iter()
        .map(|table| {
            let source = AnySource::from_config(&table.source)
                .with_context(|| format!("failed to build the source of table `{}`", table.load.name))?;

            let job = TableJob::new(source, table.load.clone());
            job.validate()
                .with_context(|| format!("invalid load settings for table `{}`", table.load.name))?;

            Ok(job)
        })
        .collect()
}

#[tracing::instrument(skip_all, fields(warehouse = W::name()))]
async fn start_run<W>(
    warehouse: &W,
    run: RunConfig,
    tables: &[TableJob<AnySource>],
) -> anyhow::Result<RunReport>
where
    W: Warehouse + WatermarkLookup,
{
    let (cancellation_tx, cancellation_rx) = create_cancellation();
    let signal_handle = tokio::spawn(cancel_on_signal(cancellation_tx));

    let result = run_tables(warehouse, run, tables, cancellation_rx, Utc::now()).await;

    signal_handle.abort();
    let _ = signal_handle.await;

    Ok(result?)
}

async fn cancel_on_signal(cancellation_tx: CancellationTx) {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(err) => {
            warn!(error = %err, "failed to register SIGTERM handler, only ctrl+c cancels the run");
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("sigint (ctrl+c) received, cancelling run");
                cancellation_tx.cancel();
            }
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("sigint (ctrl+c) received, cancelling run");
        }
        _ = sigterm.recv() => {
            info!("sigterm received, cancelling run");
        }
    }

    cancellation_tx.cancel();
}

fn log_config(config: &IngestConfig) {
    log_run_config(&config.run);
    log_destination_config(&config.destination);
    for table in &config.tables {
        debug!(
            table = %table.load.name,
            strategy = ?table.load.strategy,
            chunking_interval_secs = table.load.chunking_interval_secs,
            lookback_secs = table.load.lookback_secs,
            watermark_column = table.load.watermark_column,
            primary_key = ?table.load.primary_key,
            "table config"
        );
    }
}

fn log_run_config(config: &RunConfig) {
    debug!(
        target_namespace = config.target_namespace,
        staging_namespace = config.staging_namespace(),
        insert_chunk_size = config.insert_chunk_size,
        swap_poll_interval_ms = config.swap_poll_interval_ms,
        swap_max_polls = config.swap_max_polls,
        "run config"
    );
}

fn log_destination_config(config: &DestinationConfig) {
    match config {
        DestinationConfig::Memory => {
            debug!("using memory warehouse config");
        }
        DestinationConfig::BigQuery {
            project_id,
            service_account_key: _,
            location,
        } => {
            debug!(project_id, location, "using bigquery warehouse config");
        }
    }
}
