//! Chunked, paginated extraction.
//!
//! The [`Extractor`] walks the sub-windows of an [`ExtractionWindow`] in ascending order and,
//! within each sub-window, follows the source's page tokens until the source reports the
//! sub-window exhausted. Every page becomes one [`ExtractedBatch`] of normalized rows.
//!
//! Pages are fetched strictly one after the other. The source's rate-limit delay is observed
//! before every follow-up page and the pre-execution delay once before the very first request.

use std::time::Duration;

use futures::Stream;
use metrics::counter;
use tracing::{debug, info};

use crate::concurrency::cancel::CancellationRx;
use crate::error::IngestResult;
use crate::metrics::{
    INGEST_PAGE_RETRIES_TOTAL, INGEST_PAGES_FETCHED_TOTAL, INGEST_ROWS_EXTRACTED_TOTAL,
    SOURCE_LABEL,
};
use crate::normalize::Normalizer;
use crate::retry::{RetryPolicy, retry};
use crate::source::{Page, Source};
use crate::types::{ExtractionWindow, NormalizedRow, SubWindow};

/// Normalized rows of one source page.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedBatch {
    pub sub_window: SubWindow,
    /// 1-based page number within the sub-window.
    pub page: u32,
    pub rows: Vec<NormalizedRow>,
}

/// Pagination progress within the current sub-window.
#[derive(Debug)]
enum PageCursor {
    /// The next request is the first one of the sub-window.
    Start,
    /// The next request follows the given token.
    Next(String),
}

/// Lazily yields the batches of an extraction window.
#[derive(Debug)]
pub struct Extractor<'a, S> {
    source: &'a S,
    normalizer: Normalizer,
    sub_windows: Vec<SubWindow>,
    page_retry: RetryPolicy,
    cancellation: CancellationRx,
    pre_execution_delay: Option<Duration>,
    /// Index of the sub-window being walked.
    position: usize,
    cursor: PageCursor,
    page: u32,
    started: bool,
}

impl<'a, S> Extractor<'a, S>
where
    S: Source,
{
    pub fn new(
        source: &'a S,
        window: &ExtractionWindow,
        page_retry: RetryPolicy,
        cancellation: CancellationRx,
    ) -> Self {
        Self {
            source,
            normalizer: Normalizer::new(source.schema().clone()),
            sub_windows: window.sub_windows(),
            page_retry,
            cancellation,
            pre_execution_delay: None,
            position: 0,
            cursor: PageCursor::Start,
            page: 0,
            started: false,
        }
    }

    /// Overrides the source's pre-execution delay.
    pub fn with_pre_execution_delay(mut self, delay: Option<Duration>) -> Self {
        if delay.is_some() {
            self.pre_execution_delay = delay;
        }
        self
    }

    /// Returns the sub-windows this extractor walks.
    pub fn sub_windows(&self) -> &[SubWindow] {
        &self.sub_windows
    }

    /// Fetches and normalizes the next page, or returns `None` once every sub-window is
    /// exhausted.
    ///
    /// Cancellation is observed before a new sub-window is started, never between the pages of
    /// one sub-window.
    pub async fn next_batch(&mut self) -> IngestResult<Option<ExtractedBatch>> {
        let Some(sub_window) = self.sub_windows.get(self.position).copied() else {
            return Ok(None);
        };

        if !self.started {
            self.started = true;
            let delay = self
                .pre_execution_delay
                .unwrap_or_else(|| self.source.pre_execution_delay());
            if !delay.is_zero() {
                info!(
                    source = self.source.name(),
                    delay_secs = delay.as_secs(),
                    "delaying execution to spread load on the source rate limit"
                );
                tokio::time::sleep(delay).await;
            }
        }

        let token = match &self.cursor {
            PageCursor::Start => {
                self.cancellation.check("between sub-windows")?;
                info!(
                    source = self.source.name(),
                    sub_window = %sub_window,
                    chunk = self.position + 1,
                    chunks = self.sub_windows.len(),
                    "extracting sub-window"
                );
                None
            }
            PageCursor::Next(token) => {
                tokio::time::sleep(self.source.rate_limit_delay()).await;
                Some(token.clone())
            }
        };

        self.page += 1;
        let page = self.fetch_page(&sub_window, token.as_deref()).await?;
        let rows = self.normalizer.normalize_all(page.records)?;

        debug!(
            source = self.source.name(),
            sub_window = %sub_window,
            page = self.page,
            rows = rows.len(),
            "fetched page"
        );
        counter!(INGEST_PAGES_FETCHED_TOTAL, SOURCE_LABEL => self.source.name().to_string())
            .increment(1);
        counter!(INGEST_ROWS_EXTRACTED_TOTAL, SOURCE_LABEL => self.source.name().to_string())
            .increment(rows.len() as u64);

        let batch = ExtractedBatch {
            sub_window,
            page: self.page,
            rows,
        };

        match page.next_page_token {
            Some(token) if !token.is_empty() => self.cursor = PageCursor::Next(token),
            _ => {
                self.cursor = PageCursor::Start;
                self.page = 0;
                self.position += 1;
            }
        }

        Ok(Some(batch))
    }

    /// Converts the extractor into a stream of batches, ending after the first error.
    pub fn into_stream(self) -> impl Stream<Item = IngestResult<ExtractedBatch>> + 'a {
        futures::stream::try_unfold(self, |mut extractor| async move {
            let batch = extractor.next_batch().await?;
            Ok(batch.map(|batch| (batch, extractor)))
        })
    }

    async fn fetch_page(&self, sub_window: &SubWindow, token: Option<&str>) -> IngestResult<Page> {
        let source = self.source;
        retry(&self.page_retry, "fetch_page", |attempt| async move {
            if attempt > 1 {
                counter!(INGEST_PAGE_RETRIES_TOTAL, SOURCE_LABEL => source.name().to_string())
                    .increment(1);
            }
            source.fetch_page(sub_window, token).await
        })
        .await
    }
}
