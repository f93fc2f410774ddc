use std::collections::HashSet;

use ingest_config::shared::{PartitionConfig, PartitionGranularity};

use crate::bail;
use crate::error::{ErrorKind, IngestResult};
use crate::normalize::sanitize_column_name;
use crate::types::DataType;

/// A column of a destination table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnDefinition {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

impl ColumnDefinition {
    /// Creates a nullable column.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
        }
    }

    /// Marks the column as not nullable.
    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// The fixed set of columns a run commits to writing for one table.
///
/// Column names are sanitized on construction, so the contract and every row produced against
/// it always agree on the rewritten names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaContract {
    columns: Vec<ColumnDefinition>,
}

impl SchemaContract {
    /// Builds a contract, sanitizing every column name.
    ///
    /// Fails with [`ErrorKind::ConfigError`] when the contract is empty or when two columns end
    /// up with the same name.
    pub fn new(columns: Vec<ColumnDefinition>) -> IngestResult<Self> {
        if columns.is_empty() {
            bail!(
                ErrorKind::ConfigError,
                "Empty schema contract",
                "a table must declare at least one column"
            );
        }

        let mut seen = HashSet::with_capacity(columns.len());
        let mut sanitized = Vec::with_capacity(columns.len());
        for mut column in columns {
            column.name = sanitize_column_name(&column.name);
            if !seen.insert(column.name.clone()) {
                bail!(
                    ErrorKind::ConfigError,
                    "Duplicate column in schema contract",
                    format!("column `{}` is declared more than once", column.name)
                );
            }
            sanitized.push(column);
        }

        Ok(Self { columns: sanitized })
    }

    pub fn columns(&self) -> &[ColumnDefinition] {
        &self.columns
    }

    /// Returns the column with the given (already sanitized) name.
    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|column| column.name == name)
    }

    /// Returns the column names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|column| column.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Partitioning directive applied when a table is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSpec {
    pub field: String,
    pub granularity: PartitionGranularity,
    pub require_partition_filter: bool,
}

impl PartitionSpec {
    /// Builds a partition spec from its configuration.
    ///
    /// Returns `None` when no partition field is configured. A field without a granularity is a
    /// configuration error.
    pub fn from_config(config: &PartitionConfig) -> IngestResult<Option<Self>> {
        match (&config.field, config.granularity) {
            (None, None) if !config.require_partition_filter => Ok(None),
            (Some(field), Some(granularity)) => Ok(Some(Self {
                field: sanitize_column_name(field),
                granularity,
                require_partition_filter: config.require_partition_filter,
            })),
            _ => bail!(
                ErrorKind::ConfigError,
                "Incomplete partition directive",
                "`field` and `granularity` must both be set if either is set or `require_partition_filter` is true"
            ),
        }
    }
}
