use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{ErrorKind, IngestResult};
use crate::ingest_error;
use crate::source::{Page, Source};
use crate::test_utils::record;
use crate::types::{Granularity, SchemaContract, SourceRecord, SourceValue, SubWindow};

/// A fetch observed by [`ScriptedSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchCall {
    pub sub_window: SubWindow,
    pub page_token: Option<String>,
}

#[derive(Debug, Default)]
struct Inner {
    calls: Vec<FetchCall>,
    failures: VecDeque<ErrorKind>,
}

/// Source serving `pages_per_sub_window` pages of `rows_per_page` records for every sub-window.
///
/// Records match [`crate::test_utils::test_contract`]: `id` is `<yyyymmdd>-<page>-<row>` of the
/// sub-window start, `date` the sub-window start day, `page` the 1-based page number and
/// `clicks` the row index within the page.
#[derive(Debug, Clone)]
pub struct ScriptedSource {
    name: String,
    schema: SchemaContract,
    primary_key: Vec<String>,
    granularity: Granularity,
    rate_limit_delay: Duration,
    pre_execution_delay: Duration,
    pages_per_sub_window: u32,
    rows_per_page: u32,
    default_watermark: Option<(String, Duration)>,
    inner: Arc<Mutex<Inner>>,
}

impl ScriptedSource {
    pub fn new(name: impl Into<String>, schema: SchemaContract) -> Self {
        Self {
            name: name.into(),
            schema,
            primary_key: Vec::new(),
            granularity: Granularity::Date,
            rate_limit_delay: Duration::from_secs(1),
            pre_execution_delay: Duration::ZERO,
            pages_per_sub_window: 1,
            rows_per_page: 1,
            default_watermark: None,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    pub fn with_pages(mut self, pages_per_sub_window: u32, rows_per_page: u32) -> Self {
        self.pages_per_sub_window = pages_per_sub_window;
        self.rows_per_page = rows_per_page;
        self
    }

    pub fn with_primary_key(mut self, primary_key: &[&str]) -> Self {
        self.primary_key = primary_key.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = granularity;
        self
    }

    /// Resumes subsequent runs from `column` minus `lookback` when the table sets neither.
    pub fn with_default_watermark(mut self, column: &str, lookback: Duration) -> Self {
        self.default_watermark = Some((column.to_string(), lookback));
        self
    }

    pub fn with_pre_execution_delay(mut self, delay: Duration) -> Self {
        self.pre_execution_delay = delay;
        self
    }

    /// Makes the next `times` fetches fail with `kind`.
    pub fn fail_next(&self, times: usize, kind: ErrorKind) {
        let mut inner = self.inner.lock().unwrap();
        inner.failures.extend(std::iter::repeat_n(kind, times));
    }

    /// Returns every fetch observed so far, failed ones included.
    pub fn calls(&self) -> Vec<FetchCall> {
        self.inner.lock().unwrap().calls.clone()
    }

    fn page(&self, sub_window: &SubWindow, page: u32) -> Vec<SourceRecord> {
        let day = sub_window.first_day();
        (0..self.rows_per_page)
            .map(|row| {
                record([
                    (
                        "id",
                        SourceValue::from(format!("{}-{page}-{row}", day.format("%Y%m%d"))),
                    ),
                    ("date", SourceValue::Date(day)),
                    ("page", SourceValue::Int(i64::from(page))),
                    ("clicks", SourceValue::Int(i64::from(row))),
                ])
            })
            .collect()
    }
}

impl Source for ScriptedSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> &SchemaContract {
        &self.schema
    }

    fn primary_key(&self) -> Vec<String> {
        self.primary_key.clone()
    }

    fn granularity(&self) -> Granularity {
        self.granularity
    }

    fn rate_limit_delay(&self) -> Duration {
        self.rate_limit_delay
    }

    fn pre_execution_delay(&self) -> Duration {
        self.pre_execution_delay
    }

    fn default_watermark_column(&self) -> Option<String> {
        self.default_watermark.as_ref().map(|(column, _)| column.clone())
    }

    fn default_lookback(&self) -> Option<Duration> {
        self.default_watermark.as_ref().map(|(_, lookback)| *lookback)
    }

    async fn fetch_page(&self, sub_window: &SubWindow, page_token: Option<&str>) -> IngestResult<Page> {
        let failure = {
            let mut inner = self.inner.lock().unwrap();
            inner.calls.push(FetchCall {
                sub_window: *sub_window,
                page_token: page_token.map(str::to_string),
            });
            inner.failures.pop_front()
        };

        if let Some(kind) = failure {
            return Err(ingest_error!(
                kind,
                "Scripted fetch failure",
                format!("fetch of {sub_window} failed on purpose")
            ));
        }

        let page = match page_token {
            Some(token) => token
                .strip_prefix("page-")
                .and_then(|page| page.parse::<u32>().ok())
                .unwrap_or(1),
            None => 1,
        };
        let next_page_token =
            (page < self.pages_per_sub_window).then(|| format!("page-{}", page + 1));

        Ok(Page::new(self.page(sub_window, page), next_page_token))
    }
}
