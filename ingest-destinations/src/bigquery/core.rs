use std::collections::BTreeSet;

use ingest::bail;
use ingest::error::{ErrorKind, IngestResult};
use ingest::types::{Cell, ColumnDefinition, DataType, NormalizedRow, PartitionSpec, SchemaContract};
use ingest::warehouse::{JobHandle, JobState, TableRef, Warehouse, WatermarkLookup};
use tracing::info;

use crate::bigquery::client::{BigQueryClient, BigQueryProjectId};
use crate::bigquery::encoding::{
    column_spec, create_columns_spec, merge_statements, parse_watermark, partition_clause,
};
use crate::bigquery::metrics::register_metrics;
use crate::bigquery::validation::{quote_column, validate_dataset_id};

/// A BigQuery project used as the warehouse of a load run.
///
/// Namespaces are datasets. Rows are streamed with `tabledata.insertAll`, every other operation
/// runs as a GoogleSQL statement or through the dataset and job APIs.
///
/// Rows streamed into a table stay in its streaming buffer for a while, and BigQuery rejects DML
/// touching them. Keyed merges therefore only ever run DML against the staged table, which is
/// created by DDL or a copy job, while the streamed delta table is only read.
#[derive(Debug, Clone)]
pub struct BigQueryWarehouse {
    client: BigQueryClient,
}

impl BigQueryWarehouse {
    /// Creates a new [`BigQueryWarehouse`] from a service account key JSON string.
    pub async fn new_with_key(
        project_id: BigQueryProjectId,
        sa_key: &str,
        location: Option<String>,
    ) -> IngestResult<Self> {
        register_metrics();

        let client = BigQueryClient::new_with_key(project_id, sa_key, location).await?;

        Ok(Self { client })
    }

    /// Creates a new [`BigQueryWarehouse`] around an existing client.
    pub fn new(client: BigQueryClient) -> Self {
        register_metrics();

        Self { client }
    }

    fn table_name(&self, namespace: &str, table: &str) -> IngestResult<String> {
        self.client
            .full_table_name(&namespace.to_string(), &table.to_string())
    }
}

impl Warehouse for BigQueryWarehouse {
    fn name() -> &'static str {
        "bigquery"
    }

    async fn table_exists(&self, namespace: &str, table: &str) -> IngestResult<bool> {
        validate_dataset_id(namespace)?;

        self.client
            .table_exists(&namespace.to_string(), &table.to_string())
            .await
    }

    async fn get_columns(&self, namespace: &str, table: &str) -> IngestResult<Vec<ColumnDefinition>> {
        validate_dataset_id(namespace)?;

        self.client
            .get_columns(&namespace.to_string(), &table.to_string())
            .await
    }

    async fn create_table(
        &self,
        namespace: &str,
        table: &str,
        contract: &SchemaContract,
        partition: Option<&PartitionSpec>,
    ) -> IngestResult<()> {
        let full_table_name = self.table_name(namespace, table)?;
        let columns_spec = create_columns_spec(contract)?;
        let partition_clause = match partition {
            Some(partition) => partition_clause(partition, contract)?,
            None => String::new(),
        };

        info!(%full_table_name, partitioned = partition.is_some(), "creating table in bigquery");

        self.client
            .execute(format!("create table {full_table_name} {columns_spec} {partition_clause}"))
            .await
    }

    async fn add_column(&self, namespace: &str, table: &str, column: &ColumnDefinition) -> IngestResult<()> {
        let full_table_name = self.table_name(namespace, table)?;
        // Added columns are nullable so that existing rows stay valid.
        let column = ColumnDefinition {
            nullable: true,
            ..column.clone()
        };
        let column_spec = column_spec(&column)?;

        info!(%full_table_name, column = %column.name, "adding column in bigquery");

        self.client
            .execute(format!("alter table {full_table_name} add column {column_spec}"))
            .await
    }

    async fn insert_rows(&self, namespace: &str, table: &str, rows: &[NormalizedRow]) -> IngestResult<()> {
        if rows.is_empty() {
            return Ok(());
        }

        self.client
            .insert_rows(&TableRef::new(namespace, table), rows)
            .await
    }

    async fn merge_by_key(
        &self,
        namespace: &str,
        target: &str,
        delta: &str,
        key_columns: &[String],
        sequence_column: &str,
    ) -> IngestResult<u64> {
        let target_name = self.table_name(namespace, target)?;
        let delta_name = self.table_name(namespace, delta)?;
        let columns: Vec<String> = self
            .client
            .get_columns(&namespace.to_string(), &delta.to_string())
            .await?
            .into_iter()
            .map(|column| column.name)
            .filter(|name| name != sequence_column)
            .collect();

        let statements =
            merge_statements(&target_name, &delta_name, &columns, key_columns, sequence_column)?;

        let replaced = self.client.execute_dml(statements.delete).await?;
        let merged = self.client.execute_dml(statements.insert).await?;
        info!(%target_name, replaced, merged, "merged delta rows by key");

        Ok(merged)
    }

    async fn delete_table(&self, namespace: &str, table: &str) -> IngestResult<()> {
        let full_table_name = self.table_name(namespace, table)?;

        info!(%full_table_name, "dropping table from bigquery");

        self.client
            .execute(format!("drop table {full_table_name}"))
            .await
    }

    async fn copy_table(&self, source: &TableRef, destination: &TableRef) -> IngestResult<JobHandle> {
        validate_dataset_id(&source.namespace)?;
        validate_dataset_id(&destination.namespace)?;

        self.client.start_copy(source, destination).await
    }

    async fn poll_job(&self, job: &JobHandle) -> IngestResult<JobState> {
        self.client.job_state(job).await
    }

    async fn create_namespace(&self, namespace: &str) -> IngestResult<()> {
        self.client.create_dataset(&namespace.to_string()).await
    }

    async fn delete_namespace(&self, namespace: &str, cascade: bool) -> IngestResult<()> {
        self.client
            .delete_dataset(&namespace.to_string(), cascade)
            .await
    }

    async fn list_tables(&self, namespace: &str) -> IngestResult<BTreeSet<String>> {
        validate_dataset_id(namespace)?;

        self.client.list_tables(&namespace.to_string()).await
    }
}

impl WatermarkLookup for BigQueryWarehouse {
    async fn max_value(&self, namespace: &str, table: &str, column: &str) -> IngestResult<Option<Cell>> {
        validate_dataset_id(namespace)?;

        let Some(data_type) = self
            .client
            .column_type(&namespace.to_string(), &table.to_string(), column)
            .await?
        else {
            bail!(
                ErrorKind::WatermarkColumnMissing,
                "Watermark column not found",
                format!("table `{namespace}.{table}` has no column `{column}`")
            );
        };

        let full_table_name = self.table_name(namespace, table)?;
        let column_name = quote_column(column)?;
        let expression = match data_type {
            DataType::Timestamp => format!("cast(unix_micros(max({column_name})) as string)"),
            DataType::Json => bail!(
                ErrorKind::ConfigError,
                "Unsupported watermark column",
                format!("column `{column}` of `{namespace}.{table}` holds JSON values")
            ),
            _ => format!("cast(max({column_name}) as string)"),
        };

        let value = self
            .client
            .query_single_string(format!("select {expression} as value from {full_table_name}"))
            .await?;

        value
            .map(|value| parse_watermark(data_type, &value))
            .transpose()
    }
}
