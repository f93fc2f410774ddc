use std::collections::HashSet;

use serde::Deserialize;

use crate::load::Config;
use crate::shared::{DestinationConfig, RunConfig, SourceConfig, TableLoadConfig, ValidationError};

/// A table to load together with the source its rows come from.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TableConfig {
    #[serde(flatten)]
    pub load: TableLoadConfig,
    pub source: SourceConfig,
}

impl TableConfig {
    /// Returns the load settings with the source's defaults filled in.
    pub fn effective_load(&self) -> TableLoadConfig {
        let mut load = self.load.clone();
        if load.watermark_column.is_none() {
            load.watermark_column = self.source.default_watermark_column().map(str::to_string);
        }
        if load.lookback_secs.is_none() {
            load.lookback_secs = self.source.default_lookback_secs();
        }

        load
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.source.validate(&self.load.name)?;
        self.source.check_load(&self.load)?;
        self.effective_load().validate()
    }
}

/// Top-level configuration of an ingestion run.
///
/// This intentionally does not implement [`serde::Serialize`] because tables and destination
/// carry secrets.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct IngestConfig {
    pub run: RunConfig,
    pub destination: DestinationConfig,
    pub tables: Vec<TableConfig>,
}

impl IngestConfig {
    /// Validates the whole configuration, stopping at the first invalid setting.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.run.validate()?;

        if self.tables.is_empty() {
            return Err(ValidationError::NoTables);
        }

        let mut seen = HashSet::with_capacity(self.tables.len());
        for table in &self.tables {
            if !seen.insert(table.load.name.as_str()) {
                return Err(ValidationError::DuplicateTable(table.load.name.clone()));
            }
            table.validate()?;
        }

        Ok(())
    }
}

impl Config for IngestConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}
