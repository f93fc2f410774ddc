//! Shared configuration types for load runs.

mod base;
mod destination;
mod ingest;
mod retry;
mod run;
mod source;
mod table;

pub use base::ValidationError;
pub use destination::DestinationConfig;
pub use ingest::{IngestConfig, TableConfig};
pub use retry::{BackoffConfig, RetryConfig};
pub use run::RunConfig;
pub use source::{
    FacebookTimeIncrement, GaMetricConfig, GaMetricType, NamedTimeIncrement, SourceConfig,
    check_google_analytics_load, google_analytics_watermark_column,
};
pub use table::{LoadStrategy, PartitionConfig, PartitionGranularity, TableLoadConfig};
