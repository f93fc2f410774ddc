use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::bail;
use crate::error::{ErrorKind, IngestResult};
use crate::types::{Cell, ColumnDefinition, NormalizedRow, PartitionSpec, SchemaContract};
use crate::warehouse::{JobHandle, JobState, TableRef, Warehouse, WatermarkLookup};

/// A table held in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryTable {
    pub columns: Vec<ColumnDefinition>,
    pub rows: Vec<NormalizedRow>,
    pub partition: Option<PartitionSpec>,
}

#[derive(Debug)]
struct CopyJob {
    /// Number of polls left before the job reports [`JobState::Done`].
    remaining_polls: u32,
}

#[derive(Debug, Default)]
struct Inner {
    namespaces: BTreeMap<String, BTreeMap<String, MemoryTable>>,
    jobs: HashMap<String, CopyJob>,
    next_job_id: u64,
    copy_job_polls: u32,
}

impl Inner {
    fn table(&self, namespace: &str, table: &str) -> IngestResult<&MemoryTable> {
        let Some(tables) = self.namespaces.get(namespace) else {
            bail!(
                ErrorKind::DestinationNamespaceMissing,
                "Namespace not found",
                format!("namespace `{namespace}` does not exist")
            );
        };

        match tables.get(table) {
            Some(memory_table) => Ok(memory_table),
            None => bail!(
                ErrorKind::DestinationTableMissing,
                "Table not found",
                format!("table `{namespace}.{table}` does not exist")
            ),
        }
    }

    fn table_mut(&mut self, namespace: &str, table: &str) -> IngestResult<&mut MemoryTable> {
        let Some(tables) = self.namespaces.get_mut(namespace) else {
            bail!(
                ErrorKind::DestinationNamespaceMissing,
                "Namespace not found",
                format!("namespace `{namespace}` does not exist")
            );
        };

        match tables.get_mut(table) {
            Some(memory_table) => Ok(memory_table),
            None => bail!(
                ErrorKind::DestinationTableMissing,
                "Table not found",
                format!("table `{namespace}.{table}` does not exist")
            ),
        }
    }

    fn tables_mut(&mut self, namespace: &str) -> IngestResult<&mut BTreeMap<String, MemoryTable>> {
        match self.namespaces.get_mut(namespace) {
            Some(tables) => Ok(tables),
            None => bail!(
                ErrorKind::DestinationNamespaceMissing,
                "Namespace not found",
                format!("namespace `{namespace}` does not exist")
            ),
        }
    }
}

/// In-memory warehouse for tests and local runs.
///
/// [`MemoryWarehouse`] keeps namespaces, tables, columns and rows in memory and runs copy jobs
/// synchronously, reporting them as running for a configurable number of polls before they are
/// done. All data is lost when the process terminates.
#[derive(Debug, Clone)]
pub struct MemoryWarehouse {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryWarehouse {
    /// Creates a new empty memory warehouse whose copy jobs are done on their second poll.
    pub fn new() -> Self {
        let inner = Inner {
            copy_job_polls: 1,
            ..Default::default()
        };

        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Sets how many polls a copy job reports [`JobState::Running`] before it is done.
    pub async fn set_copy_job_polls(&self, polls: u32) {
        let mut inner = self.inner.lock().await;
        inner.copy_job_polls = polls;
    }

    /// Returns whether `namespace` exists.
    pub async fn namespace_exists(&self, namespace: &str) -> bool {
        let inner = self.inner.lock().await;
        inner.namespaces.contains_key(namespace)
    }

    /// Returns a copy of a table, if it exists.
    pub async fn table(&self, namespace: &str, table: &str) -> Option<MemoryTable> {
        let inner = self.inner.lock().await;
        inner
            .namespaces
            .get(namespace)
            .and_then(|tables| tables.get(table))
            .cloned()
    }

    /// Returns a copy of the rows of a table, empty if it does not exist.
    pub async fn rows(&self, namespace: &str, table: &str) -> Vec<NormalizedRow> {
        self.table(namespace, table)
            .await
            .map(|memory_table| memory_table.rows)
            .unwrap_or_default()
    }

    /// Creates a namespace holding the given tables, replacing any existing one.
    pub async fn seed_namespace(&self, namespace: &str, tables: BTreeMap<String, MemoryTable>) {
        let mut inner = self.inner.lock().await;
        inner.namespaces.insert(namespace.to_string(), tables);
    }
}

impl Default for MemoryWarehouse {
    fn default() -> Self {
        Self::new()
    }
}

impl Warehouse for MemoryWarehouse {
    fn name() -> &'static str {
        "memory"
    }

    async fn table_exists(&self, namespace: &str, table: &str) -> IngestResult<bool> {
        let inner = self.inner.lock().await;
        Ok(inner
            .namespaces
            .get(namespace)
            .is_some_and(|tables| tables.contains_key(table)))
    }

    async fn get_columns(&self, namespace: &str, table: &str) -> IngestResult<Vec<ColumnDefinition>> {
        let inner = self.inner.lock().await;
        Ok(inner.table(namespace, table)?.columns.clone())
    }

    async fn create_table(
        &self,
        namespace: &str,
        table: &str,
        contract: &SchemaContract,
        partition: Option<&PartitionSpec>,
    ) -> IngestResult<()> {
        let mut inner = self.inner.lock().await;
        let tables = inner.tables_mut(namespace)?;

        if tables.contains_key(table) {
            bail!(
                ErrorKind::DestinationQueryFailed,
                "Table already exists",
                format!("table `{namespace}.{table}` already exists")
            );
        }

        info!(namespace, table, columns = contract.len(), "creating table");
        tables.insert(
            table.to_string(),
            MemoryTable {
                columns: contract.columns().to_vec(),
                rows: Vec::new(),
                partition: partition.cloned(),
            },
        );

        Ok(())
    }

    async fn add_column(
        &self,
        namespace: &str,
        table: &str,
        column: &ColumnDefinition,
    ) -> IngestResult<()> {
        let mut inner = self.inner.lock().await;
        let memory_table = inner.table_mut(namespace, table)?;

        if memory_table.columns.iter().any(|c| c.name == column.name) {
            bail!(
                ErrorKind::DestinationQueryFailed,
                "Column already exists",
                format!("column `{}` already exists in `{namespace}.{table}`", column.name)
            );
        }

        memory_table.columns.push(ColumnDefinition {
            nullable: true,
            ..column.clone()
        });
        for row in memory_table.rows.iter_mut() {
            let mut values = std::mem::take(row).into_values();
            values.insert(column.name.clone(), Cell::Null);
            *row = NormalizedRow::new(values);
        }

        Ok(())
    }

    async fn insert_rows(
        &self,
        namespace: &str,
        table: &str,
        rows: &[NormalizedRow],
    ) -> IngestResult<()> {
        let mut inner = self.inner.lock().await;
        let memory_table = inner.table_mut(namespace, table)?;

        let known: HashSet<&str> = memory_table
            .columns
            .iter()
            .map(|column| column.name.as_str())
            .collect();
        for row in rows {
            if let Some(unknown) = row.columns().find(|name| !known.contains(name)) {
                bail!(
                    ErrorKind::InvalidData,
                    "Row references an unknown column",
                    format!("column `{unknown}` does not exist in `{namespace}.{table}`")
                );
            }
        }

        debug!(namespace, table, rows = rows.len(), "inserting rows");
        let columns = memory_table.columns.clone();
        for row in rows {
            let values = columns
                .iter()
                .map(|column| {
                    let cell = row.get(&column.name).cloned().unwrap_or(Cell::Null);
                    (column.name.clone(), cell)
                })
                .collect();
            memory_table.rows.push(values);
        }

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
        let mut inner = self.inner.lock().await;

        let mut delta_rows = inner.table(namespace, delta)?.rows.clone();
        delta_rows.sort_by(|a, b| {
            let a = a.get(sequence_column).unwrap_or(&Cell::Null);
            let b = b.get(sequence_column).unwrap_or(&Cell::Null);
            a.partial_cmp(b).unwrap_or(Ordering::Equal)
        });

        let mut latest: Vec<(Vec<Cell>, NormalizedRow)> = Vec::new();
        for row in delta_rows {
            let key = row.key_of(key_columns);
            match latest.iter_mut().find(|(existing, _)| *existing == key) {
                Some(entry) => entry.1 = row,
                None => latest.push((key, row)),
            }
        }

        let memory_table = inner.table_mut(namespace, target)?;
        let columns = memory_table.columns.clone();
        for (_, row) in &latest {
            let unknown = row
                .columns()
                .filter(|name| *name != sequence_column)
                .find(|name| !columns.iter().any(|column| column.name == *name));
            if let Some(unknown) = unknown {
                bail!(
                    ErrorKind::InvalidData,
                    "Delta row references an unknown column",
                    format!("column `{unknown}` does not exist in `{namespace}.{target}`")
                );
            }
        }

        memory_table
            .rows
            .retain(|row| !latest.iter().any(|(key, _)| *key == row.key_of(key_columns)));
        for (_, row) in &latest {
            let values = columns
                .iter()
                .map(|column| {
                    let cell = row.get(&column.name).cloned().unwrap_or(Cell::Null);
                    (column.name.clone(), cell)
                })
                .collect();
            memory_table.rows.push(values);
        }

        debug!(namespace, target, delta, rows = latest.len(), "merged delta rows by key");

        Ok(latest.len() as u64)
    }

    async fn delete_table(&self, namespace: &str, table: &str) -> IngestResult<()> {
        let mut inner = self.inner.lock().await;
        let tables = inner.tables_mut(namespace)?;

        if tables.remove(table).is_none() {
            bail!(
                ErrorKind::DestinationTableMissing,
                "Table not found",
                format!("table `{namespace}.{table}` does not exist")
            );
        }

        info!(namespace, table, "deleted table");

        Ok(())
    }

    async fn copy_table(&self, source: &TableRef, destination: &TableRef) -> IngestResult<JobHandle> {
        let mut inner = self.inner.lock().await;
        let copied = inner.table(&source.namespace, &source.table)?.clone();
        let tables = inner.tables_mut(&destination.namespace)?;

        if tables.contains_key(&destination.table) {
            bail!(
                ErrorKind::DestinationQueryFailed,
                "Copy destination already exists",
                format!("table `{destination}` already exists")
            );
        }
        tables.insert(destination.table.clone(), copied);

        inner.next_job_id += 1;
        let id = format!("copy_{}", inner.next_job_id);
        let remaining_polls = inner.copy_job_polls;
        inner.jobs.insert(id.clone(), CopyJob { remaining_polls });

        info!(%source, %destination, job = %id, "started copy job");

        Ok(JobHandle::new(id))
    }

    async fn poll_job(&self, job: &JobHandle) -> IngestResult<JobState> {
        let mut inner = self.inner.lock().await;
        let Some(copy_job) = inner.jobs.get_mut(&job.id) else {
            bail!(
                ErrorKind::DestinationJobFailed,
                "Job not found",
                format!("job `{job}` does not exist")
            );
        };

        if copy_job.remaining_polls > 0 {
            copy_job.remaining_polls -= 1;
            return Ok(JobState::Running);
        }

        inner.jobs.remove(&job.id);

        Ok(JobState::Done)
    }

    async fn create_namespace(&self, namespace: &str) -> IngestResult<()> {
        let mut inner = self.inner.lock().await;

        if inner.namespaces.contains_key(namespace) {
            bail!(
                ErrorKind::DestinationNamespaceAlreadyExists,
                "Namespace already exists",
                format!("namespace `{namespace}` already exists")
            );
        }

        info!(namespace, "created namespace");
        inner
            .namespaces
            .insert(namespace.to_string(), BTreeMap::new());

        Ok(())
    }

    async fn delete_namespace(&self, namespace: &str, cascade: bool) -> IngestResult<()> {
        let mut inner = self.inner.lock().await;

        let Some(tables) = inner.namespaces.get(namespace) else {
            bail!(
                ErrorKind::DestinationNamespaceMissing,
                "Namespace not found",
                format!("namespace `{namespace}` does not exist")
            );
        };

        if !cascade && !tables.is_empty() {
            bail!(
                ErrorKind::DestinationQueryFailed,
                "Namespace is not empty",
                format!("namespace `{namespace}` still holds {} tables", tables.len())
            );
        }

        inner.namespaces.remove(namespace);
        info!(namespace, "deleted namespace");

        Ok(())
    }

    async fn list_tables(&self, namespace: &str) -> IngestResult<BTreeSet<String>> {
        let mut inner = self.inner.lock().await;
        Ok(inner.tables_mut(namespace)?.keys().cloned().collect())
    }
}

impl WatermarkLookup for MemoryWarehouse {
    async fn max_value(&self, namespace: &str, table: &str, column: &str) -> IngestResult<Option<Cell>> {
        let inner = self.inner.lock().await;
        let memory_table = inner.table(namespace, table)?;

        let mut max: Option<&Cell> = None;
        for cell in memory_table.rows.iter().filter_map(|row| row.get(column)) {
            if cell.is_null() {
                continue;
            }
            match max {
                Some(current) if cell.partial_cmp(current) != Some(Ordering::Greater) => {}
                _ => max = Some(cell),
            }
        }

        Ok(max.cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DataType;

    fn contract() -> SchemaContract {
        SchemaContract::new(vec![
            ColumnDefinition::new("id", DataType::Int64),
            ColumnDefinition::new("name", DataType::String),
        ])
        .unwrap()
    }

    fn row(id: i64) -> NormalizedRow {
        [
            ("id".to_string(), Cell::Int(id)),
            ("name".to_string(), Cell::String(format!("n{id}"))),
        ]
        .into_iter()
        .collect()
    }

    #[tokio::test]
    async fn test_missing_namespace_is_reported() {
        let warehouse = MemoryWarehouse::new();

        let err = warehouse.delete_namespace("absent", true).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DestinationNamespaceMissing);
        assert!(!warehouse.table_exists("absent", "t").await.unwrap());
    }

    #[tokio::test]
    async fn test_add_column_backfills_nulls() {
        let warehouse = MemoryWarehouse::new();
        warehouse.create_namespace("ns").await.unwrap();
        warehouse.create_table("ns", "t", &contract(), None).await.unwrap();
        warehouse.insert_rows("ns", "t", &[row(1)]).await.unwrap();

        warehouse
            .add_column("ns", "t", &ColumnDefinition::new("extra", DataType::Bool))
            .await
            .unwrap();

        let rows = warehouse.rows("ns", "t").await;
        assert_eq!(rows[0].get("extra"), Some(&Cell::Null));
    }

    #[tokio::test]
    async fn test_insert_rejects_unknown_columns() {
        let warehouse = MemoryWarehouse::new();
        warehouse.create_namespace("ns").await.unwrap();
        warehouse.create_table("ns", "t", &contract(), None).await.unwrap();

        let bad: NormalizedRow = [("nope".to_string(), Cell::Null)].into_iter().collect();
        let err = warehouse.insert_rows("ns", "t", &[bad]).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidData);
        assert!(warehouse.rows("ns", "t").await.is_empty());
    }

    #[tokio::test]
    async fn test_copy_job_reports_running_then_done() {
        let warehouse = MemoryWarehouse::new();
        warehouse.create_namespace("a").await.unwrap();
        warehouse.create_namespace("b").await.unwrap();
        warehouse.create_table("a", "t", &contract(), None).await.unwrap();
        warehouse.insert_rows("a", "t", &[row(1), row(2)]).await.unwrap();

        let job = warehouse
            .copy_table(&TableRef::new("a", "t"), &TableRef::new("b", "t"))
            .await
            .unwrap();

        assert_eq!(warehouse.poll_job(&job).await.unwrap(), JobState::Running);
        assert_eq!(warehouse.poll_job(&job).await.unwrap(), JobState::Done);
        assert_eq!(warehouse.rows("b", "t").await.len(), 2);
    }

    #[tokio::test]
    async fn test_merge_by_key_keeps_latest_delta_row() {
        let warehouse = MemoryWarehouse::new();
        warehouse.create_namespace("ns").await.unwrap();
        warehouse.create_table("ns", "t", &contract(), None).await.unwrap();
        warehouse
            .insert_rows("ns", "t", &[row(1), row(2), row(3)])
            .await
            .unwrap();

        let delta_contract = SchemaContract::new(vec![
            ColumnDefinition::new("id", DataType::Int64),
            ColumnDefinition::new("name", DataType::String),
            ColumnDefinition::new("seq", DataType::Int64),
        ])
        .unwrap();
        warehouse.create_table("ns", "d", &delta_contract, None).await.unwrap();
        let delta_row = |id: i64, name: &str, seq: i64| -> NormalizedRow {
            [
                ("id".to_string(), Cell::Int(id)),
                ("name".to_string(), Cell::String(name.to_string())),
                ("seq".to_string(), Cell::Int(seq)),
            ]
            .into_iter()
            .collect()
        };
        // Arrival order in the delta table does not decide, the sequence does.
        warehouse
            .insert_rows(
                "ns",
                "d",
                &[delta_row(3, "late", 2), delta_row(3, "early", 1), delta_row(4, "new", 0)],
            )
            .await
            .unwrap();

        let merged = warehouse
            .merge_by_key("ns", "t", "d", &["id".to_string()], "seq")
            .await
            .unwrap();

        assert_eq!(merged, 2);
        let named = |id: i64, name: &str| -> NormalizedRow {
            [
                ("id".to_string(), Cell::Int(id)),
                ("name".to_string(), Cell::String(name.to_string())),
            ]
            .into_iter()
            .collect()
        };
        assert_eq!(
            warehouse.rows("ns", "t").await,
            vec![row(1), row(2), named(4, "new"), named(3, "late")]
        );
        assert_eq!(
            warehouse.max_value("ns", "t", "id").await.unwrap(),
            Some(Cell::Int(4))
        );
    }

    #[tokio::test]
    async fn test_finished_copy_jobs_are_forgotten() {
        let warehouse = MemoryWarehouse::new();
        warehouse.set_copy_job_polls(0).await;
        warehouse.create_namespace("a").await.unwrap();
        warehouse.create_table("a", "t", &contract(), None).await.unwrap();

        let job = warehouse
            .copy_table(&TableRef::new("a", "t"), &TableRef::new("a", "u"))
            .await
            .unwrap();
        assert_eq!(warehouse.inner.lock().await.jobs.len(), 1);

        assert_eq!(warehouse.poll_job(&job).await.unwrap(), JobState::Done);
        assert!(warehouse.inner.lock().await.jobs.is_empty());
        let err = warehouse.poll_job(&job).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DestinationJobFailed);
    }
}
