mod client;
mod core;
mod encoding;
mod metrics;
mod validation;

pub use client::{BigQueryClient, BigQueryDatasetId, BigQueryProjectId, BigQueryTableId};
pub use core::BigQueryWarehouse;
