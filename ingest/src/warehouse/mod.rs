//! Warehouse connector interface and the in-memory implementation.

mod base;
pub mod jobs;
pub mod memory;

pub use base::*;
