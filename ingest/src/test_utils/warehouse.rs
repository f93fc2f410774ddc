use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use crate::error::{ErrorKind, IngestResult};
use crate::ingest_error;
use crate::types::{Cell, ColumnDefinition, NormalizedRow, PartitionSpec, SchemaContract};
use crate::warehouse::{JobHandle, JobState, TableRef, Warehouse, WatermarkLookup};

/// Operations of a warehouse that can be counted and failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WarehouseOperation {
    TableExists,
    GetColumns,
    CreateTable,
    AddColumn,
    InsertRows,
    MergeByKey,
    DeleteTable,
    CopyTable,
    PollJob,
    CreateNamespace,
    DeleteNamespace,
    ListTables,
    MaxValue,
}

#[derive(Debug)]
struct Fault {
    operation: WarehouseOperation,
    /// Calls let through before the fault triggers.
    skip: u32,
    /// Calls failed once triggered.
    times: u32,
    kind: ErrorKind,
}

#[derive(Debug, Default)]
struct Inner {
    calls: HashMap<WarehouseOperation, u32>,
    faults: Vec<Fault>,
    inserted_chunks: Vec<usize>,
}

/// Wraps a warehouse, counting calls per operation and failing chosen calls.
///
/// A failed call never reaches the wrapped warehouse, so an insert that fails is guaranteed not
/// to have written anything.
#[derive(Debug, Clone)]
pub struct FaultyWarehouse<W> {
    wrapped: W,
    inner: Arc<Mutex<Inner>>,
}

impl<W> FaultyWarehouse<W> {
    pub fn wrap(wrapped: W) -> Self {
        Self {
            wrapped,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    pub fn wrapped(&self) -> &W {
        &self.wrapped
    }

    /// Fails the next `times` calls of `operation` with `kind`.
    pub fn fail_next(&self, operation: WarehouseOperation, times: u32, kind: ErrorKind) {
        self.fail_after(operation, 0, times, kind);
    }

    /// Lets `skip` calls of `operation` through, then fails the following `times` with `kind`.
    pub fn fail_after(&self, operation: WarehouseOperation, skip: u32, times: u32, kind: ErrorKind) {
        let mut inner = self.inner.lock().unwrap();
        inner.faults.push(Fault {
            operation,
            skip,
            times,
            kind,
        });
    }

    /// Returns how many times `operation` was called, failed calls included.
    pub fn calls(&self, operation: WarehouseOperation) -> u32 {
        let inner = self.inner.lock().unwrap();
        inner.calls.get(&operation).copied().unwrap_or(0)
    }

    /// Returns the sizes of every chunk the wrapped warehouse accepted, in order.
    pub fn inserted_chunks(&self) -> Vec<usize> {
        self.inner.lock().unwrap().inserted_chunks.clone()
    }

    fn check(&self, operation: WarehouseOperation) -> IngestResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let call = {
            let calls = inner.calls.entry(operation).or_default();
            *calls += 1;
            *calls
        };

        let fault = inner
            .faults
            .iter_mut()
            .find(|fault| fault.operation == operation && fault.times > 0);
        let Some(fault) = fault else {
            return Ok(());
        };

        if fault.skip > 0 {
            fault.skip -= 1;
            return Ok(());
        }

        fault.times -= 1;
        Err(ingest_error!(
            fault.kind,
            "Injected warehouse fault",
            format!("call {call} of {operation:?} failed on purpose")
        ))
    }
}

impl<W> Warehouse for FaultyWarehouse<W>
where
    W: Warehouse + Sync,
{
    fn name() -> &'static str {
        W::name()
    }

    async fn table_exists(&self, namespace: &str, table: &str) -> IngestResult<bool> {
        self.check(WarehouseOperation::TableExists)?;
        self.wrapped.table_exists(namespace, table).await
    }

    async fn get_columns(&self, namespace: &str, table: &str) -> IngestResult<Vec<ColumnDefinition>> {
        self.check(WarehouseOperation::GetColumns)?;
        self.wrapped.get_columns(namespace, table).await
    }

    async fn create_table(
        &self,
        namespace: &str,
        table: &str,
        contract: &SchemaContract,
        partition: Option<&PartitionSpec>,
    ) -> IngestResult<()> {
        self.check(WarehouseOperation::CreateTable)?;
        self.wrapped
            .create_table(namespace, table, contract, partition)
            .await
    }

    async fn add_column(
        &self,
        namespace: &str,
        table: &str,
        column: &ColumnDefinition,
    ) -> IngestResult<()> {
        self.check(WarehouseOperation::AddColumn)?;
        self.wrapped.add_column(namespace, table, column).await
    }

    async fn insert_rows(
        &self,
        namespace: &str,
        table: &str,
        rows: &[NormalizedRow],
    ) -> IngestResult<()> {
        self.check(WarehouseOperation::InsertRows)?;
        self.wrapped.insert_rows(namespace, table, rows).await?;

        let mut inner = self.inner.lock().unwrap();
        inner.inserted_chunks.push(rows.len());

        Ok(())
    }

    async fn merge_by_key(
        &self,
        namespace: &str,
        target: &str,
        delta: &str,
        key_columns: &[String],
        sequence_column: &str,
    ) -> IngestResult<u64> {
        self.check(WarehouseOperation::MergeByKey)?;
        self.wrapped
            .merge_by_key(namespace, target, delta, key_columns, sequence_column)
            .await
    }

    async fn delete_table(&self, namespace: &str, table: &str) -> IngestResult<()> {
        self.check(WarehouseOperation::DeleteTable)?;
        self.wrapped.delete_table(namespace, table).await
    }

    async fn copy_table(&self, source: &TableRef, destination: &TableRef) -> IngestResult<JobHandle> {
        self.check(WarehouseOperation::CopyTable)?;
        self.wrapped.copy_table(source, destination).await
    }

    async fn poll_job(&self, job: &JobHandle) -> IngestResult<JobState> {
        self.check(WarehouseOperation::PollJob)?;
        self.wrapped.poll_job(job).await
    }

    async fn create_namespace(&self, namespace: &str) -> IngestResult<()> {
        self.check(WarehouseOperation::CreateNamespace)?;
        self.wrapped.create_namespace(namespace).await
    }

    async fn delete_namespace(&self, namespace: &str, cascade: bool) -> IngestResult<()> {
        self.check(WarehouseOperation::DeleteNamespace)?;
        self.wrapped.delete_namespace(namespace, cascade).await
    }

    async fn list_tables(&self, namespace: &str) -> IngestResult<BTreeSet<String>> {
        self.check(WarehouseOperation::ListTables)?;
        self.wrapped.list_tables(namespace).await
    }
}

impl<W> WatermarkLookup for FaultyWarehouse<W>
where
    W: WatermarkLookup + Sync,
{
    async fn max_value(&self, namespace: &str, table: &str, column: &str) -> IngestResult<Option<Cell>> {
        self.check(WarehouseOperation::MaxValue)?;
        self.wrapped.max_value(namespace, table, column).await
    }
}
