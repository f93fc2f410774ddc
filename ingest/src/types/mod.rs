//! Common types used throughout the load engine.
//!
//! Covers the typed values rows are made of, the schema contract a run commits to, extraction
//! windows, and the source-native records the normalizer consumes.

mod cell;
mod record;
mod row;
mod schema;
mod window;

pub use cell::*;
pub use record::*;
pub use row::*;
pub use schema::*;
pub use window::*;
