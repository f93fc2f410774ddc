//! Source connectors for the load engine.
//!
//! Each connector implements [`ingest::source::Source`] over a paginated HTTP reporting API.
//! [`AnySource`] wraps them so that tables extracted from different systems can be loaded in
//! one run.

mod any;
pub mod facebook;
pub mod google_analytics;
mod http;
mod metrics;

pub use any::AnySource;
