//! Staged loading of normalized rows.
//!
//! A [`StagedLoader`] owns one table of the staging namespace for the duration of a run. It
//! creates (or recreates) the staged table, seeds it with the live content when the run merges,
//! and appends rows in bounded chunks, retrying the exact failed chunk on transient failures.
//! The live namespace is only ever read here, never written.
//!
//! A merging run with a primary key never modifies rows it streamed. Its rows go to a delta
//! table next to the staged one, tagged with their arrival order, and are merged into the staged
//! table by key once on commit.

use std::time::Duration;

use ingest_config::shared::LoadStrategy;
use metrics::counter;
use tracing::{debug, info};

use crate::bail;
use crate::concurrency::cancel::CancellationRx;
use crate::error::{ErrorKind, IngestResult};
#[cfg(feature = "failpoints")]
use crate::failpoints::{LOAD__BEFORE_CHUNK_INSERT, ingest_fail_point};
use crate::metrics::{INGEST_INSERT_RETRIES_TOTAL, INGEST_ROWS_INSERTED_TOTAL, TABLE_NAME_LABEL};
use crate::retry::{RetryPolicy, retry};
use crate::schema::reconcile_schema;
use crate::types::{Cell, ColumnDefinition, DataType, NormalizedRow, PartitionSpec, SchemaContract};
use crate::warehouse::jobs::{JobPolling, wait_for_job};
use crate::warehouse::{TableRef, Warehouse};

/// Suffix of the delta table a keyed merge streams its rows into.
pub const DELTA_TABLE_SUFFIX: &str = "__delta";

/// Column of a delta table holding the arrival order of its rows.
pub const DELTA_SEQUENCE_COLUMN: &str = "_ingest_sequence";

/// Lifecycle of a staged table within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagedTableState {
    /// The staged table has not been created yet.
    NotExists,
    /// A staged table exists from before the first batch and is recreated before writing.
    ExistsEmpty,
    /// The staged table accepts appended chunks.
    Loading,
    /// Every batch was written, no further writes are accepted.
    Committed,
}

/// Settings of one staged table load.
#[derive(Debug, Clone)]
pub struct LoadSettings {
    pub strategy: LoadStrategy,
    /// Maximum number of rows per insert call.
    pub insert_chunk_size: usize,
    pub insert_retry: RetryPolicy,
    pub job_polling: JobPolling,
    /// Columns identifying a row; rows of a merging run replace staged rows with the same key.
    pub primary_key: Vec<String>,
    pub partition: Option<PartitionSpec>,
}

impl LoadSettings {
    pub fn new(strategy: LoadStrategy) -> Self {
        Self {
            strategy,
            insert_chunk_size: 100,
            insert_retry: RetryPolicy::no_retry(),
            job_polling: JobPolling::new(Duration::from_millis(100), 3_000),
            primary_key: Vec::new(),
            partition: None,
        }
    }

    /// Returns `true` when rows are merged into the staged table by primary key.
    pub fn upserts(&self) -> bool {
        self.strategy.is_merge() && !self.primary_key.is_empty()
    }
}

/// Writes rows of one table into the staging namespace.
#[derive(Debug)]
pub struct StagedLoader<'a, W> {
    warehouse: &'a W,
    staging_namespace: String,
    live_namespace: String,
    table: String,
    /// Delta table of a keyed merge, `None` when rows go straight into the staged table.
    delta_table: Option<String>,
    contract: SchemaContract,
    settings: LoadSettings,
    cancellation: CancellationRx,
    state: StagedTableState,
    next_sequence: i64,
    rows_inserted: u64,
}

impl<'a, W> StagedLoader<'a, W>
where
    W: Warehouse,
{
    pub fn new(
        warehouse: &'a W,
        staging_namespace: impl Into<String>,
        live_namespace: impl Into<String>,
        table: impl Into<String>,
        contract: SchemaContract,
        settings: LoadSettings,
        cancellation: CancellationRx,
    ) -> Self {
        let table = table.into();
        let delta_table = settings
            .upserts()
            .then(|| format!("{table}{DELTA_TABLE_SUFFIX}"));

        Self {
            warehouse,
            staging_namespace: staging_namespace.into(),
            live_namespace: live_namespace.into(),
            table,
            delta_table,
            contract,
            settings,
            cancellation,
            state: StagedTableState::NotExists,
            next_sequence: 0,
            rows_inserted: 0,
        }
    }

    pub fn state(&self) -> StagedTableState {
        self.state
    }

    /// Returns the number of rows written so far, or merged once committed.
    pub fn rows_inserted(&self) -> u64 {
        self.rows_inserted
    }

    /// Determines the initial state of the staged table.
    ///
    /// A merging run whose live table exists starts from a copy of it: any staged table is
    /// replaced by the copy, the copy job is awaited, and the copy is reconciled against the
    /// contract before a single row is appended. A keyed merge also gets a fresh delta table.
    pub async fn prepare(&mut self) -> IngestResult<()> {
        let staged_exists = self
            .warehouse
            .table_exists(&self.staging_namespace, &self.table)
            .await?;

        let seed_from_live = self.settings.strategy.is_merge()
            && self
                .warehouse
                .table_exists(&self.live_namespace, &self.table)
                .await?;

        self.state = if seed_from_live {
            if staged_exists {
                self.warehouse
                    .delete_table(&self.staging_namespace, &self.table)
                    .await?;
            }
            self.seed_from_live().await?;
            StagedTableState::Loading
        } else if staged_exists {
            StagedTableState::ExistsEmpty
        } else {
            StagedTableState::NotExists
        };

        if let Some(delta_table) = &self.delta_table {
            self.create_delta_table(delta_table).await?;
        }

        Ok(())
    }

    /// Writes one batch of rows in bounded chunks.
    pub async fn write_batch(&mut self, rows: Vec<NormalizedRow>) -> IngestResult<()> {
        self.ensure_loading().await?;

        if rows.is_empty() {
            return Ok(());
        }

        let (table, rows) = match self.delta_table.clone() {
            Some(delta_table) => (delta_table, self.sequenced(rows)),
            None => (self.table.clone(), rows),
        };

        let chunk_size = self.settings.insert_chunk_size.max(1);
        for (index, chunk) in rows.chunks(chunk_size).enumerate() {
            if index > 0 {
                self.cancellation.check("between chunks")?;
            }
            self.insert_chunk(&table, chunk).await?;
        }

        Ok(())
    }

    /// Marks the staged table as complete, creating it first when no batch was written so the
    /// table is published even when the window held no rows.
    ///
    /// A keyed merge folds its delta table into the staged table here and drops it, the
    /// returned count is then the number of rows the merge wrote.
    pub async fn commit(&mut self) -> IngestResult<u64> {
        self.ensure_loading().await?;

        if let Some(delta_table) = &self.delta_table {
            let merged = self
                .warehouse
                .merge_by_key(
                    &self.staging_namespace,
                    &self.table,
                    delta_table,
                    &self.settings.primary_key,
                    DELTA_SEQUENCE_COLUMN,
                )
                .await?;
            self.warehouse
                .delete_table(&self.staging_namespace, delta_table)
                .await?;

            debug!(
                table = %self.table,
                streamed = self.rows_inserted,
                merged,
                "merged delta table by key"
            );
            self.rows_inserted = merged;
        }

        self.state = StagedTableState::Committed;

        info!(
            table = %self.table,
            namespace = %self.staging_namespace,
            rows = self.rows_inserted,
            "staged table committed"
        );

        Ok(self.rows_inserted)
    }

    async fn seed_from_live(&self) -> IngestResult<()> {
        info!(
            table = %self.table,
            from = %self.live_namespace,
            to = %self.staging_namespace,
            "seeding staged table with live content"
        );
        let job = self
            .warehouse
            .copy_table(
                &TableRef::new(&self.live_namespace, &self.table),
                &TableRef::new(&self.staging_namespace, &self.table),
            )
            .await?;
        wait_for_job(self.warehouse, &job, self.settings.job_polling).await?;

        reconcile_schema(
            self.warehouse,
            &self.staging_namespace,
            &self.table,
            &self.contract,
        )
        .await
        .map(|_| ())
    }

    async fn create_delta_table(&self, delta_table: &str) -> IngestResult<()> {
        if self
            .warehouse
            .table_exists(&self.staging_namespace, delta_table)
            .await?
        {
            self.warehouse
                .delete_table(&self.staging_namespace, delta_table)
                .await?;
        }

        let mut columns = self.contract.columns().to_vec();
        columns.push(ColumnDefinition::new(DELTA_SEQUENCE_COLUMN, DataType::Int64).required());
        let contract = SchemaContract::new(columns)?;

        self.warehouse
            .create_table(&self.staging_namespace, delta_table, &contract, None)
            .await
    }

    /// Tags rows with their arrival order so that the latest row of a key wins the merge.
    fn sequenced(&mut self, rows: Vec<NormalizedRow>) -> Vec<NormalizedRow> {
        rows.into_iter()
            .map(|row| {
                let mut values = row.into_values();
                values.insert(
                    DELTA_SEQUENCE_COLUMN.to_string(),
                    Cell::Int(self.next_sequence),
                );
                self.next_sequence += 1;
                NormalizedRow::new(values)
            })
            .collect()
    }

    async fn ensure_loading(&mut self) -> IngestResult<()> {
        match self.state {
            StagedTableState::Loading => {}
            StagedTableState::NotExists => {
                self.create_table().await?;
            }
            StagedTableState::ExistsEmpty => {
                info!(table = %self.table, "recreating staged table to discard residual rows");
                self.warehouse
                    .delete_table(&self.staging_namespace, &self.table)
                    .await?;
                self.create_table().await?;
            }
            StagedTableState::Committed => {
                bail!(
                    ErrorKind::InvalidState,
                    "Staged table already committed",
                    format!("table `{}` does not accept further writes", self.table)
                );
            }
        }

        self.state = StagedTableState::Loading;

        Ok(())
    }

    async fn create_table(&self) -> IngestResult<()> {
        self.warehouse
            .create_table(
                &self.staging_namespace,
                &self.table,
                &self.contract,
                self.settings.partition.as_ref(),
            )
            .await
    }

    async fn insert_chunk(&mut self, table: &str, chunk: &[NormalizedRow]) -> IngestResult<()> {
        let warehouse = self.warehouse;
        let namespace = self.staging_namespace.as_str();

        retry(&self.settings.insert_retry, "insert_rows", |attempt| async move {
            if attempt > 1 {
                counter!(INGEST_INSERT_RETRIES_TOTAL, TABLE_NAME_LABEL => table.to_string())
                    .increment(1);
            }

            #[cfg(feature = "failpoints")]
            ingest_fail_point(LOAD__BEFORE_CHUNK_INSERT)?;

            warehouse.insert_rows(namespace, table, chunk).await
        })
        .await?;

        self.rows_inserted += chunk.len() as u64;
        counter!(INGEST_ROWS_INSERTED_TOTAL, TABLE_NAME_LABEL => self.table.clone())
            .increment(chunk.len() as u64);
        debug!(table, rows = chunk.len(), "inserted chunk");

        Ok(())
    }
}
