//! Warehouse connectors for the load engine.
//!
//! Every connector lives behind its own feature so that binaries only pull the client stack
//! of the warehouse they load into.

#[cfg(feature = "bigquery")]
pub mod bigquery;
