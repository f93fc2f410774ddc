//! Schema reconciliation of staged tables.
//!
//! Ensures a table's columns are a superset of the schema contract before rows referencing new
//! columns are written. Columns are only ever added: existing columns are never dropped or
//! retyped, and a type mismatch fails the run.

use std::collections::HashMap;

use metrics::counter;
use tracing::info;

use crate::bail;
use crate::error::{ErrorKind, IngestResult};
use crate::metrics::{INGEST_COLUMNS_ADDED_TOTAL, TABLE_NAME_LABEL};
use crate::types::{ColumnDefinition, DataType, SchemaContract};
use crate::warehouse::Warehouse;

/// Returns the contract columns missing from `existing`.
///
/// Fails with [`ErrorKind::SchemaTypeConflict`] when a contract column exists with another type.
/// All conflicts are checked before anything is returned, so a conflicting table is never
/// partially altered.
pub fn missing_columns<'a>(
    contract: &'a SchemaContract,
    existing: &[ColumnDefinition],
) -> IngestResult<Vec<&'a ColumnDefinition>> {
    let existing: HashMap<&str, DataType> = existing
        .iter()
        .map(|column| (column.name.as_str(), column.data_type))
        .collect();

    let mut conflicts = Vec::new();
    let mut missing = Vec::new();
    for column in contract.columns() {
        match existing.get(column.name.as_str()) {
            Some(data_type) if *data_type != column.data_type => conflicts.push(format!(
                "column `{}` is {} but declared as {}",
                column.name, data_type, column.data_type
            )),
            Some(_) => {}
            None => missing.push(column),
        }
    }

    if !conflicts.is_empty() {
        bail!(
            ErrorKind::SchemaTypeConflict,
            "Declared column types conflict with the existing table",
            conflicts.join("; ")
        );
    }

    Ok(missing)
}

/// Adds every contract column missing from `namespace.table`, returning how many were added.
///
/// Running it again against the same table and contract adds nothing.
pub async fn reconcile_schema<W>(
    warehouse: &W,
    namespace: &str,
    table: &str,
    contract: &SchemaContract,
) -> IngestResult<usize>
where
    W: Warehouse,
{
    let existing = warehouse.get_columns(namespace, table).await?;
    let missing = missing_columns(contract, &existing)?;

    for column in &missing {
        info!(
            namespace,
            table,
            column = %column.name,
            data_type = %column.data_type,
            "adding missing column"
        );
        warehouse.add_column(namespace, table, column).await?;
    }

    if !missing.is_empty() {
        counter!(INGEST_COLUMNS_ADDED_TOTAL, TABLE_NAME_LABEL => table.to_string())
            .increment(missing.len() as u64);
    }

    Ok(missing.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::memory::MemoryWarehouse;

    fn contract() -> SchemaContract {
        SchemaContract::new(vec![
            ColumnDefinition::new("id", DataType::Int64),
            ColumnDefinition::new("name", DataType::String),
            ColumnDefinition::new("spend", DataType::Float64),
        ])
        .unwrap()
    }

    #[test]
    fn test_missing_columns() {
        let existing = vec![ColumnDefinition::new("id", DataType::Int64)];
        let contract = contract();

        let missing = missing_columns(&contract, &existing).unwrap();

        assert_eq!(
            missing.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            vec!["name", "spend"]
        );
    }

    #[test]
    fn test_type_conflict_is_reported() {
        let existing = vec![
            ColumnDefinition::new("id", DataType::String),
            ColumnDefinition::new("other", DataType::Bool),
        ];

        let err = missing_columns(&contract(), &existing).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::SchemaTypeConflict);
        assert!(err.detail().unwrap().contains("`id` is STRING but declared as INT64"));
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let warehouse = MemoryWarehouse::new();
        let initial = SchemaContract::new(vec![ColumnDefinition::new("id", DataType::Int64)]).unwrap();
        warehouse.create_namespace("ns").await.unwrap();
        warehouse.create_table("ns", "t", &initial, None).await.unwrap();

        let first = reconcile_schema(&warehouse, "ns", "t", &contract()).await.unwrap();
        let second = reconcile_schema(&warehouse, "ns", "t", &contract()).await.unwrap();

        assert_eq!(first, 2);
        assert_eq!(second, 0);
        assert_eq!(warehouse.get_columns("ns", "t").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_conflicting_table_is_not_altered() {
        let warehouse = MemoryWarehouse::new();
        let initial =
            SchemaContract::new(vec![ColumnDefinition::new("spend", DataType::String)]).unwrap();
        warehouse.create_namespace("ns").await.unwrap();
        warehouse.create_table("ns", "t", &initial, None).await.unwrap();

        let result = reconcile_schema(&warehouse, "ns", "t", &contract()).await;

        assert_eq!(result.map_err(|e| e.kind()), Err(ErrorKind::SchemaTypeConflict));
        assert_eq!(warehouse.get_columns("ns", "t").await.unwrap().len(), 1);
    }
}
