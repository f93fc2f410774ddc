//! Logging and metrics initialization for load runs.

pub mod metrics;
pub mod tracing;
