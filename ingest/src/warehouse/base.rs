use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;

use crate::error::IngestResult;
use crate::types::{Cell, ColumnDefinition, NormalizedRow, PartitionSpec, SchemaContract};

/// Fully qualified reference to a table in a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableRef {
    pub namespace: String,
    pub table: String,
}

impl TableRef {
    pub fn new(namespace: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.table)
    }
}

/// Handle of an asynchronous warehouse job, such as a table copy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobHandle {
    pub id: String,
}

impl JobHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// State of an asynchronous warehouse job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    /// Accepted but not started yet.
    Pending,
    Running,
    /// Finished successfully.
    Done,
    /// Finished with the given failure reason.
    Failed(String),
    /// A state the connector does not recognize.
    Unknown(String),
}

impl JobState {
    /// Returns `true` for states that will not change anymore.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed(_))
    }
}

/// Trait for column-oriented warehouses rows are loaded into.
///
/// Namespaces group tables (datasets, schemas). The load engine only ever writes rows into the
/// staging namespace of a run and publishes them with [`Warehouse::copy_table`].
///
/// Implementations report missing objects with [`crate::error::ErrorKind::DestinationTableMissing`]
/// and [`crate::error::ErrorKind::DestinationNamespaceMissing`], and transient conditions (a
/// table not visible yet after creation, an unreachable endpoint) with the transient warehouse
/// error kinds so that callers retry them.
pub trait Warehouse {
    /// Returns the name of the warehouse.
    fn name() -> &'static str;

    /// Returns whether `table` exists in `namespace`. A missing namespace holds no tables.
    fn table_exists(
        &self,
        namespace: &str,
        table: &str,
    ) -> impl Future<Output = IngestResult<bool>> + Send;

    /// Returns the columns of an existing table.
    fn get_columns(
        &self,
        namespace: &str,
        table: &str,
    ) -> impl Future<Output = IngestResult<Vec<ColumnDefinition>>> + Send;

    /// Creates a table with every column of `contract`, partitioned when `partition` is set.
    fn create_table(
        &self,
        namespace: &str,
        table: &str,
        contract: &SchemaContract,
        partition: Option<&PartitionSpec>,
    ) -> impl Future<Output = IngestResult<()>> + Send;

    /// Adds a nullable column to an existing table.
    fn add_column(
        &self,
        namespace: &str,
        table: &str,
        column: &ColumnDefinition,
    ) -> impl Future<Output = IngestResult<()>> + Send;

    /// Appends rows to an existing table in one call.
    ///
    /// The call is all-or-nothing from the caller's perspective.
    fn insert_rows(
        &self,
        namespace: &str,
        table: &str,
        rows: &[NormalizedRow],
    ) -> impl Future<Output = IngestResult<()>> + Send;

    /// Merges the rows of `delta` into `target`, both tables of `namespace`, and returns the
    /// number of rows written into `target`.
    ///
    /// Rows of `delta` sharing a key over `key_columns` are collapsed into the one with the
    /// highest `sequence_column` value. Rows of `target` whose key matches a delta row are
    /// replaced by it. Null key values match each other. Every delta column except
    /// `sequence_column` must exist in `target`, target columns missing from `delta` are null.
    /// The delta table is left in place.
    fn merge_by_key(
        &self,
        namespace: &str,
        target: &str,
        delta: &str,
        key_columns: &[String],
        sequence_column: &str,
    ) -> impl Future<Output = IngestResult<u64>> + Send;

    /// Deletes a table.
    fn delete_table(
        &self,
        namespace: &str,
        table: &str,
    ) -> impl Future<Output = IngestResult<()>> + Send;

    /// Starts copying `source` into the not yet existing table `destination`.
    fn copy_table(
        &self,
        source: &TableRef,
        destination: &TableRef,
    ) -> impl Future<Output = IngestResult<JobHandle>> + Send;

    /// Returns the current state of a job.
    fn poll_job(&self, job: &JobHandle) -> impl Future<Output = IngestResult<JobState>> + Send;

    /// Creates an empty namespace.
    fn create_namespace(&self, namespace: &str) -> impl Future<Output = IngestResult<()>> + Send;

    /// Deletes a namespace, together with its tables when `cascade` is set.
    fn delete_namespace(
        &self,
        namespace: &str,
        cascade: bool,
    ) -> impl Future<Output = IngestResult<()>> + Send;

    /// Returns the names of the tables of a namespace.
    fn list_tables(
        &self,
        namespace: &str,
    ) -> impl Future<Output = IngestResult<BTreeSet<String>>> + Send;
}

/// Lookup of the high watermark of a live table.
pub trait WatermarkLookup {
    /// Returns the maximum value of `column`, or `None` when the table holds no non-null value.
    fn max_value(
        &self,
        namespace: &str,
        table: &str,
        column: &str,
    ) -> impl Future<Output = IngestResult<Option<Cell>>> + Send;
}
