//! Run orchestration.
//!
//! A [`LoadRun`] ties the pieces together for one live namespace: kickoff recreates the staging
//! namespace, every table is resolved, extracted and staged, and the final swap promotes the
//! staging namespace. Any failure removes the staging namespace and leaves the live namespace
//! untouched.

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use ingest_config::shared::{RunConfig, TableLoadConfig};
use metrics::{counter, histogram};
use tokio::pin;
use tokio::time::Instant;
use tracing::{error, info};

use crate::bail;
use crate::concurrency::cancel::CancellationRx;
use crate::error::{ErrorKind, IngestError, IngestResult};
use crate::extract::Extractor;
use crate::load::{LoadSettings, StagedLoader};
use crate::metrics::{
    INGEST_RUNS_TOTAL, INGEST_TABLE_LOAD_DURATION_SECONDS, OUTCOME_LABEL, STRATEGY_LABEL,
    TABLE_NAME_LABEL,
};
use crate::normalize::sanitize_column_name;
use crate::retry::RetryPolicy;
use crate::source::Source;
use crate::swap::{SwapCoordinator, SwapReport};
use crate::types::{PartitionSpec, SchemaContract, SubWindow};
use crate::warehouse::jobs::JobPolling;
use crate::warehouse::{Warehouse, WatermarkLookup};
use crate::window::{WindowOverride, resolve_window};

/// Lifecycle of a [`LoadRun`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Kickoff has not happened yet.
    Created,
    /// The staging namespace exists and accepts table loads.
    Staging,
    /// The staging namespace was promoted into the live namespace.
    Finalized,
    /// The run failed or was aborted, the staging namespace was removed.
    Aborted,
}

/// Summary of one table load.
#[derive(Debug, Clone, PartialEq)]
pub struct TableLoadReport {
    pub table: String,
    pub sub_windows: Vec<SubWindow>,
    pub batches: u64,
    pub rows_extracted: u64,
    pub rows_inserted: u64,
}

/// A table to load together with the source it is extracted from.
#[derive(Debug, Clone)]
pub struct TableJob<S> {
    pub source: S,
    pub config: TableLoadConfig,
    pub window_override: Option<WindowOverride>,
}

impl<S> TableJob<S> {
    pub fn new(source: S, config: TableLoadConfig) -> Self {
        Self {
            source,
            config,
            window_override: None,
        }
    }
}

impl<S> TableJob<S>
where
    S: Source,
{
    /// Checks the table settings against its source before any run starts.
    pub fn validate(&self) -> IngestResult<()> {
        let config = effective_table_config(&self.source, &self.config)?;
        primary_key(&self.source, &config)?;

        Ok(())
    }
}

/// Returns the settings of `table` with the source's defaults filled in, validated.
///
/// The watermark column and lookback fall back to the source's own defaults. Settings the
/// source cannot honor are rejected with [`ErrorKind::ConfigError`].
pub fn effective_table_config<S>(source: &S, table: &TableLoadConfig) -> IngestResult<TableLoadConfig>
where
    S: Source,
{
    source.check_table(table)?;

    let mut config = table.clone();
    if config.watermark_column.is_none() {
        config.watermark_column = source.default_watermark_column();
    }
    if config.lookback_secs.is_none() {
        config.lookback_secs = source.default_lookback().map(|lookback| lookback.as_secs());
    }
    config.validate()?;

    Ok(config)
}

/// Summary of a finalized run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub tables: Vec<TableLoadReport>,
    pub swap: SwapReport,
}

/// One staged load of a set of tables into a live namespace.
#[derive(Debug)]
pub struct LoadRun<'a, W> {
    warehouse: &'a W,
    run: RunConfig,
    swap: SwapCoordinator<'a, W>,
    cancellation: CancellationRx,
    state: RunState,
}

impl<'a, W> LoadRun<'a, W>
where
    W: Warehouse + WatermarkLookup,
{
    pub fn new(warehouse: &'a W, run: RunConfig, cancellation: CancellationRx) -> Self {
        let swap = SwapCoordinator::new(
            warehouse,
            run.target_namespace.clone(),
            run.staging_namespace(),
            job_polling(&run),
        );

        Self {
            warehouse,
            run,
            swap,
            cancellation,
            state: RunState::Created,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Recreates the staging namespace.
    pub async fn kickoff(&mut self) -> IngestResult<()> {
        self.expect_state(RunState::Created, "kickoff")?;

        info!(
            live = %self.run.target_namespace,
            staging = %self.run.staging_namespace(),
            warehouse = W::name(),
            "starting load run"
        );

        if let Err(err) = self.swap.kickoff().await {
            self.fail(&err).await;
            return Err(err);
        }
        self.state = RunState::Staging;

        Ok(())
    }

    /// Extracts one table from `source` and writes it into the staging namespace.
    ///
    /// `now` is the upper bound of windows whose configuration has none.
    pub async fn load_table<S>(
        &mut self,
        source: &S,
        table: &TableLoadConfig,
        window_override: Option<WindowOverride>,
        now: DateTime<Utc>,
    ) -> IngestResult<TableLoadReport>
    where
        S: Source,
    {
        self.expect_state(RunState::Staging, "load a table")?;

        let started = Instant::now();
        match self.stage_table(source, table, window_override, now).await {
            Ok(report) => {
                histogram!(
                    INGEST_TABLE_LOAD_DURATION_SECONDS,
                    TABLE_NAME_LABEL => table.name.clone(),
                    STRATEGY_LABEL => format!("{:?}", table.strategy)
                )
                .record(started.elapsed().as_secs_f64());
                info!(
                    table = %table.name,
                    batches = report.batches,
                    rows = report.rows_inserted,
                    "table staged"
                );
                Ok(report)
            }
            Err(err) => {
                self.fail(&err).await;
                Err(err)
            }
        }
    }

    /// Promotes the staging namespace into the live namespace.
    pub async fn finalize(&mut self) -> IngestResult<SwapReport> {
        self.expect_state(RunState::Staging, "finalize")?;

        if let Err(err) = self.cancellation.check("before the final swap") {
            self.fail(&err).await;
            return Err(err);
        }

        match self.swap.finalize().await {
            Ok(report) => {
                self.state = RunState::Finalized;
                counter!(INGEST_RUNS_TOTAL, OUTCOME_LABEL => "success").increment(1);
                Ok(report)
            }
            Err(err) => {
                self.fail(&err).await;
                Err(err)
            }
        }
    }

    /// Removes the staging namespace, leaving the live namespace untouched.
    pub async fn abort(&mut self) {
        if matches!(self.state, RunState::Finalized | RunState::Aborted) {
            return;
        }

        info!(staging = %self.swap.staging_namespace(), "aborting load run");
        self.swap.abort().await;
        self.state = RunState::Aborted;
        counter!(INGEST_RUNS_TOTAL, OUTCOME_LABEL => "aborted").increment(1);
    }

    async fn fail(&mut self, err: &IngestError) {
        error!(
            live = %self.run.target_namespace,
            error = %err,
            "load run failed, removing staging namespace"
        );
        self.swap.abort().await;
        self.state = RunState::Aborted;
        counter!(INGEST_RUNS_TOTAL, OUTCOME_LABEL => "failure").increment(1);
    }

    fn expect_state(&self, expected: RunState, operation: &str) -> IngestResult<()> {
        if self.state != expected {
            bail!(
                ErrorKind::InvalidState,
                "Load run is not in the expected state",
                format!(
                    "cannot {operation} while the run is {:?}, expected {expected:?}",
                    self.state
                )
            );
        }

        Ok(())
    }

    async fn stage_table<S>(
        &self,
        source: &S,
        table: &TableLoadConfig,
        window_override: Option<WindowOverride>,
        now: DateTime<Utc>,
    ) -> IngestResult<TableLoadReport>
    where
        S: Source,
    {
        let table = effective_table_config(source, table)?;
        let table = &table;

        let window = resolve_window(
            self.warehouse,
            &self.run.target_namespace,
            table,
            source.granularity(),
            window_override,
            now,
        )
        .await?;

        let settings = LoadSettings {
            strategy: table.strategy,
            insert_chunk_size: self.run.insert_chunk_size,
            insert_retry: RetryPolicy::from(self.run.insert_retry.clone()),
            job_polling: job_polling(&self.run),
            primary_key: primary_key(source, table)?,
            partition: match &table.partition {
                Some(partition) => PartitionSpec::from_config(partition)?,
                None => None,
            },
        };

        let mut loader = StagedLoader::new(
            self.warehouse,
            self.run.staging_namespace(),
            self.run.target_namespace.clone(),
            table.name.clone(),
            source.schema().clone(),
            settings,
            self.cancellation.clone(),
        );
        loader.prepare().await?;

        let extractor = Extractor::new(
            source,
            &window,
            RetryPolicy::from(self.run.page_retry.clone()),
            self.cancellation.clone(),
        )
        .with_pre_execution_delay(table.pre_execution_delay_ms.map(Duration::from_millis));
        let sub_windows = extractor.sub_windows().to_vec();

        let batches_stream = extractor.into_stream();
        pin!(batches_stream);

        let mut batches = 0;
        let mut rows_extracted = 0;
        while let Some(batch) = batches_stream.try_next().await? {
            batches += 1;
            rows_extracted += batch.rows.len() as u64;
            loader.write_batch(batch.rows).await?;
        }
        let rows_inserted = loader.commit().await?;

        Ok(TableLoadReport {
            table: table.name.clone(),
            sub_windows,
            batches,
            rows_extracted,
            rows_inserted,
        })
    }
}

/// Runs kickoff, every table load and the final swap in order.
///
/// Tables are loaded one after the other. The first failure aborts the run and is returned.
pub async fn run_tables<W, S>(
    warehouse: &W,
    run: RunConfig,
    tables: &[TableJob<S>],
    cancellation: CancellationRx,
    now: DateTime<Utc>,
) -> IngestResult<RunReport>
where
    W: Warehouse + WatermarkLookup,
    S: Source,
{
    if tables.is_empty() {
        bail!(
            ErrorKind::ConfigError,
            "No tables to load",
            format!("the run into `{}` lists no tables", run.target_namespace)
        );
    }

    let mut load_run = LoadRun::new(warehouse, run, cancellation);
    load_run.kickoff().await?;

    let mut reports = Vec::with_capacity(tables.len());
    for job in tables {
        let report = load_run
            .load_table(&job.source, &job.config, job.window_override, now)
            .await?;
        reports.push(report);
    }

    let swap = load_run.finalize().await?;

    Ok(RunReport {
        tables: reports,
        swap,
    })
}

fn job_polling(run: &RunConfig) -> JobPolling {
    JobPolling::new(
        Duration::from_millis(run.swap_poll_interval_ms),
        run.swap_max_polls,
    )
}

/// Returns the sanitized primary key of `table`, falling back to the source's own key.
fn primary_key<S>(source: &S, table: &TableLoadConfig) -> IngestResult<Vec<String>>
where
    S: Source,
{
    let key = if table.primary_key.is_empty() {
        source.primary_key()
    } else {
        table.primary_key.clone()
    };

    let key: Vec<String> = key.iter().map(|name| sanitize_column_name(name)).collect();
    check_key_columns(source.schema(), &table.name, &key)?;

    Ok(key)
}

fn check_key_columns(contract: &SchemaContract, table: &str, key: &[String]) -> IngestResult<()> {
    if let Some(unknown) = key.iter().find(|name| contract.column(name).is_none()) {
        bail!(
            ErrorKind::ConfigError,
            "Primary key column is not declared",
            format!("table `{table}` uses `{unknown}` as key but the source does not declare it")
        );
    }

    Ok(())
}
