use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Strategy used to compute the extraction window and to decide whether the live table is
/// replaced or merged.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LoadStrategy {
    /// Replace the live table with the rows extracted for a fixed window.
    FullRefresh,
    /// Merge rows extracted for a fixed window into the live table.
    Incremental,
    /// Merge rows extracted since the live table's high watermark.
    Subsequent,
}

impl LoadStrategy {
    /// Returns `true` when the staged table starts from the live content instead of empty.
    pub fn is_merge(&self) -> bool {
        !matches!(self, Self::FullRefresh)
    }
}

/// Time unit used to partition a destination table.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PartitionGranularity {
    Hour,
    Day,
    Month,
    Year,
}

impl PartitionGranularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hour => "HOUR",
            Self::Day => "DAY",
            Self::Month => "MONTH",
            Self::Year => "YEAR",
        }
    }
}

/// Partitioning directive applied when a destination table is created.
///
/// `field` and `granularity` are a pair: either both are set or neither is.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PartitionConfig {
    pub field: Option<String>,
    pub granularity: Option<PartitionGranularity>,
    #[serde(default)]
    pub require_partition_filter: bool,
}

/// Per-table load settings, independent of the source that produces the rows.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TableLoadConfig {
    /// Destination table name, shared by the staging and live namespaces.
    pub name: String,
    pub strategy: LoadStrategy,
    /// Lower bound of the extraction window for fixed-window strategies.
    #[serde(default)]
    pub data_from: Option<DateTime<Utc>>,
    /// Upper bound of the extraction window, defaults to the run start.
    #[serde(default)]
    pub data_until: Option<DateTime<Utc>>,
    /// Start boundary of the scheduled job, used by `subsequent` when no live table exists.
    #[serde(default)]
    pub job_start: Option<DateTime<Utc>>,
    /// Size of each extraction sub-window in seconds. The whole window is one sub-window when
    /// unset.
    #[serde(default)]
    pub chunking_interval_secs: Option<u64>,
    /// Amount of time subtracted from the live watermark, in seconds. Falls back to the
    /// source's default, or none.
    #[serde(default)]
    pub lookback_secs: Option<u64>,
    /// Column holding the high watermark of the live table. Falls back to the source's
    /// default.
    #[serde(default)]
    pub watermark_column: Option<String>,
    /// Columns identifying a row, used to upsert when merging.
    #[serde(default)]
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub partition: Option<PartitionConfig>,
    /// Delay applied once before the first page request, in milliseconds. Overrides the
    /// source's own default when set.
    #[serde(default)]
    pub pre_execution_delay_ms: Option<u64>,
}

impl TableLoadConfig {
    /// Creates a table configuration with every optional setting unset.
    pub fn new(name: impl Into<String>, strategy: LoadStrategy) -> Self {
        Self {
            name: name.into(),
            strategy,
            data_from: None,
            data_until: None,
            job_start: None,
            chunking_interval_secs: None,
            lookback_secs: None,
            watermark_column: None,
            primary_key: Vec::new(),
            partition: None,
            pre_execution_delay_ms: None,
        }
    }

    /// Validates the table settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::invalid("table.name", "must not be empty"));
        }

        if self.chunking_interval_secs == Some(0) {
            return Err(ValidationError::invalid(
                format!("tables.{}.chunking_interval_secs", self.name),
                "must be greater than 0",
            ));
        }

        if let (Some(from), Some(until)) = (self.data_from, self.data_until)
            && from > until
        {
            return Err(ValidationError::invalid(
                format!("tables.{}.data_from", self.name),
                "must not be after `data_until`",
            ));
        }

        match self.strategy {
            LoadStrategy::FullRefresh | LoadStrategy::Incremental => {
                if self.data_from.is_none() {
                    return Err(ValidationError::missing(
                        format!("tables.{}.data_from", self.name),
                        "fixed-window strategies need a lower bound",
                    ));
                }
            }
            LoadStrategy::Subsequent => {
                if self.watermark_column.is_none() {
                    return Err(ValidationError::missing(
                        format!("tables.{}.watermark_column", self.name),
                        "the subsequent strategy resumes from the live table's watermark column",
                    ));
                }
            }
        }

        if let Some(partition) = &self.partition {
            let paired = partition.field.is_some() == partition.granularity.is_some();
            let filter_without_field =
                partition.require_partition_filter && partition.field.is_none();
            if !paired || filter_without_field {
                return Err(ValidationError::IncompletePartition(self.name.clone()));
            }
        }

        if self.primary_key.iter().any(String::is_empty) {
            return Err(ValidationError::invalid(
                format!("tables.{}.primary_key", self.name),
                "must not contain empty column names",
            ));
        }

        Ok(())
    }
}
