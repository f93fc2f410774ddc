use std::future::Future;
use std::time::Duration;

use ingest_config::shared::TableLoadConfig;

use crate::error::IngestResult;
use crate::types::{Granularity, SchemaContract, SourceRecord, SubWindow};

/// One page of records returned by a source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub records: Vec<SourceRecord>,
    /// Token to request the next page with, `None` once the sub-window is exhausted.
    pub next_page_token: Option<String>,
}

impl Page {
    pub fn new(records: Vec<SourceRecord>, next_page_token: Option<String>) -> Self {
        Self {
            records,
            next_page_token,
        }
    }

    /// Creates the final page of a sub-window.
    pub fn last(records: Vec<SourceRecord>) -> Self {
        Self::new(records, None)
    }
}

/// Trait for paginated, time-windowed systems rows are extracted from.
///
/// A source is walked one sub-window at a time. For each sub-window the extractor first calls
/// [`Source::fetch_page`] without a token and then keeps following the returned
/// [`Page::next_page_token`] until it is `None`. Implementations classify failures with the
/// source error kinds so that transient ones are retried.
pub trait Source {
    /// Returns a short name identifying the source in logs and metrics.
    fn name(&self) -> &str;

    /// Returns the schema contract every record of this source is normalized against.
    fn schema(&self) -> &SchemaContract;

    /// Returns the columns identifying a row, used to upsert when a run merges.
    fn primary_key(&self) -> Vec<String> {
        Vec::new()
    }

    /// Returns the watermark column used when a table configures none.
    fn default_watermark_column(&self) -> Option<String> {
        None
    }

    /// Returns the watermark lookback used when a table configures none.
    fn default_lookback(&self) -> Option<Duration> {
        None
    }

    /// Rejects load settings the source cannot honor.
    fn check_table(&self, _table: &TableLoadConfig) -> IngestResult<()> {
        Ok(())
    }

    /// Returns the granularity at which the source attributes records to time.
    fn granularity(&self) -> Granularity {
        Granularity::Timestamp
    }

    /// Returns the delay observed before every follow-up page request.
    fn rate_limit_delay(&self) -> Duration;

    /// Returns the delay observed once before the first request of a run.
    fn pre_execution_delay(&self) -> Duration {
        Duration::ZERO
    }

    /// Fetches one page of records for `sub_window`.
    fn fetch_page(
        &self,
        sub_window: &SubWindow,
        page_token: Option<&str>,
    ) -> impl Future<Output = IngestResult<Page>> + Send;
}
