//! Incremental load engine.
//!
//! Walks a paginated source through time-chunked extraction windows and lands the rows into a
//! warehouse through a staged, schema-reconciling write path that is promoted into the live
//! namespace only once every table of a run loaded successfully.
//!
//! The pieces, in the order a run uses them:
//!
//! - [`window`] resolves the extraction window from the load strategy and the live watermark.
//! - [`extract`] splits the window into sub-windows and follows each one's pagination.
//! - [`normalize`] flattens source records into rows holding every declared column.
//! - [`schema`] adds missing columns to staged tables before rows reference them.
//! - [`load`] writes rows into the staging namespace in bounded, retried chunks.
//! - [`swap`] creates the staging namespace at kickoff and promotes it at the end.
//! - [`pipeline`] drives the whole lifecycle for a set of tables.

pub mod concurrency;
pub mod error;
pub mod extract;
#[cfg(feature = "failpoints")]
pub mod failpoints;
pub mod load;
mod macros;
pub mod metrics;
pub mod normalize;
pub mod pipeline;
pub mod policy;
pub mod retry;
pub mod schema;
pub mod source;
pub mod swap;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
pub mod warehouse;
pub mod window;
