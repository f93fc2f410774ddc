//! Facebook Ads Insights connector.
//!
//! Every configured ad account is queried for the days of a sub-window. The accounts are walked
//! one after the other through a single page-token sequence: a token names the account index
//! and, optionally, the Graph API cursor to continue that account from.

use std::time::Duration;

use ingest::bail;
use ingest::error::{ErrorKind, IngestError, IngestResult};
use ingest::source::{Page, Source};
use ingest::types::{
    ColumnDefinition, DataType, Granularity, SchemaContract, SourceRecord, SourceValue, SubWindow,
};
use ingest_config::shared::{FacebookTimeIncrement, SourceConfig};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, info};

use crate::http::{RawResponse, build_client, response_error, send, status_error_kind};

const SOURCE_NAME: &str = "facebook_insights";

/// Default endpoint of the Graph API.
pub const DEFAULT_API_BASE_URL: &str = "https://graph.facebook.com";

/// Graph API version used when none is configured.
pub const DEFAULT_API_VERSION: &str = "v19.0";

/// Delay between two page requests.
const RATE_LIMIT_DELAY: Duration = Duration::from_secs(1);

/// Columns identifying an insights row at the `ad` level, before any breakdown.
const PRIMARY_KEY: [&str; 3] = ["ad_id", "date_start", "date_stop"];

/// Fields the `ad` level always requests.
const AD_LEVEL_FIELDS: [&str; 2] = ["ad_id", "ad_name"];

/// Insights fields reported as whole numbers.
const INTEGER_FIELDS: &[&str] = &[
    "clicks",
    "full_view_impressions",
    "full_view_reach",
    "impressions",
    "inline_link_clicks",
    "inline_post_engagement",
    "reach",
    "unique_clicks",
    "unique_inline_link_clicks",
];

/// Insights fields reported as decimals.
const FLOAT_FIELDS: &[&str] = &[
    "cost_per_inline_link_click",
    "cost_per_inline_post_engagement",
    "cost_per_unique_click",
    "cost_per_unique_inline_link_click",
    "cpc",
    "cpm",
    "cpp",
    "ctr",
    "frequency",
    "inline_link_click_ctr",
    "social_spend",
    "spend",
    "unique_ctr",
    "unique_inline_link_click_ctr",
    "unique_link_clicks_ctr",
];

/// Graph API error codes signalling throttling.
const RATE_LIMIT_ERROR_CODES: &[i64] = &[4, 17, 32, 613, 80000, 80003, 80004, 80014];

/// Graph API error code of an invalid or expired access token.
const INVALID_TOKEN_ERROR_CODE: i64 = 190;

/// Maps an insights field to its column type.
fn field_data_type(field: &str) -> DataType {
    if field == "date_start" || field == "date_stop" {
        DataType::Date
    } else if INTEGER_FIELDS.contains(&field) {
        DataType::Int64
    } else if FLOAT_FIELDS.contains(&field) {
        DataType::Float64
    } else if field.ends_with("actions")
        || field.ends_with("action_type")
        || field.ends_with("_values")
    {
        // Action breakdowns come back as lists of objects.
        DataType::Json
    } else {
        DataType::String
    }
}

/// Position in the page-token sequence of a sub-window.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PageCursor {
    account: usize,
    after: Option<String>,
}

impl PageCursor {
    fn start() -> Self {
        Self {
            account: 0,
            after: None,
        }
    }

    fn parse(token: &str) -> IngestResult<Self> {
        let (account, after) = token.split_once(':').unwrap_or((token, ""));
        let account = account.parse::<usize>().map_err(|err| {
            IngestError::from((
                ErrorKind::InvalidState,
                "Malformed page token",
                format!("`{token}` does not name an account: {err}"),
            ))
        })?;

        Ok(Self {
            account,
            after: (!after.is_empty()).then(|| after.to_string()),
        })
    }

    fn to_token(&self) -> String {
        format!("{}:{}", self.account, self.after.as_deref().unwrap_or_default())
    }
}

#[derive(Debug, Deserialize)]
struct InsightsResponse {
    #[serde(default)]
    data: Vec<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    paging: Option<Paging>,
}

#[derive(Debug, Deserialize)]
struct Paging {
    #[serde(default)]
    cursors: Option<Cursors>,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Cursors {
    #[serde(default)]
    after: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphErrorResponse {
    error: GraphError,
}

#[derive(Debug, Deserialize)]
struct GraphError {
    #[serde(default)]
    code: Option<i64>,
}

/// Extracts ad insights of one or more ad accounts.
#[derive(Debug)]
pub struct FacebookInsightsSource {
    client: Client,
    base_url: String,
    account_ids: Vec<String>,
    fields: Vec<String>,
    level: String,
    time_increment: FacebookTimeIncrement,
    breakdowns: Vec<String>,
    access_token: SecretString,
    execution_wait: Duration,
    schema: SchemaContract,
}

impl FacebookInsightsSource {
    /// Builds the connector from a `facebook_insights` source configuration.
    pub fn from_config(config: &SourceConfig) -> IngestResult<Self> {
        let SourceConfig::FacebookInsights {
            account_ids,
            insight_fields,
            level,
            time_increment,
            breakdowns,
            access_token,
            execution_wait_secs,
            api_version,
            api_base_url,
        } = config
        else {
            bail!(
                ErrorKind::ConfigError,
                "Unexpected source configuration",
                "expected a `facebook_insights` source"
            );
        };

        if level != SourceConfig::DEFAULT_FACEBOOK_LEVEL {
            bail!(
                ErrorKind::ConfigError,
                "Unsupported insights level",
                format!("level `{level}` is not supported, use `ad`")
            );
        }

        let mut fields = insight_fields.clone();
        for field in AD_LEVEL_FIELDS {
            if !fields.iter().any(|existing| existing == field) {
                fields.push(field.to_string());
            }
        }

        let schema = Self::build_schema(&fields, breakdowns)?;
        let base_url = api_base_url.as_deref().unwrap_or(DEFAULT_API_BASE_URL);
        let version = api_version.as_deref().unwrap_or(DEFAULT_API_VERSION);

        Ok(Self {
            client: build_client(),
            base_url: format!("{}/{version}", base_url.trim_end_matches('/')),
            account_ids: account_ids.clone(),
            fields,
            level: level.clone(),
            time_increment: *time_increment,
            breakdowns: breakdowns.clone(),
            access_token: access_token.clone(),
            execution_wait: Duration::from_secs(*execution_wait_secs),
            schema,
        })
    }

    fn build_schema(fields: &[String], breakdowns: &[String]) -> IngestResult<SchemaContract> {
        let mut columns: Vec<ColumnDefinition> = fields
            .iter()
            .chain(breakdowns)
            .map(|field| ColumnDefinition::new(field, field_data_type(field)))
            .collect();
        for column in ["date_start", "date_stop"] {
            if !columns.iter().any(|existing| existing.name == column) {
                columns.push(ColumnDefinition::new(column, DataType::Date));
            }
        }

        SchemaContract::new(columns)
    }

    fn insights_url(&self, account: usize) -> IngestResult<String> {
        let Some(account_id) = self.account_ids.get(account) else {
            bail!(
                ErrorKind::InvalidState,
                "Malformed page token",
                format!(
                    "account index {account} is out of range for {} accounts",
                    self.account_ids.len()
                )
            );
        };

        Ok(format!("{}/act_{account_id}/insights", self.base_url))
    }

    /// Returns the query parameters of one insights request.
    fn query_params(&self, sub_window: &SubWindow, after: Option<&str>) -> Vec<(&'static str, String)> {
        let time_range = serde_json::json!({
            "since": sub_window.first_day().format("%Y-%m-%d").to_string(),
            "until": sub_window.last_day_inclusive().format("%Y-%m-%d").to_string(),
        });

        let mut params = vec![
            ("fields", self.fields.join(",")),
            ("level", self.level.clone()),
            ("time_range", time_range.to_string()),
            ("time_increment", self.time_increment.as_param()),
        ];
        if !self.breakdowns.is_empty() {
            params.push(("breakdowns", self.breakdowns.join(",")));
        }
        if let Some(after) = after {
            params.push(("after", after.to_string()));
        }

        params
    }

    /// Classifies a failed Graph API response.
    ///
    /// Throttling is reported with HTTP 400 or 403 and an error code in the body, so the code
    /// takes precedence over the status.
    fn classify_error(response: &RawResponse) -> ErrorKind {
        let code = serde_json::from_str::<GraphErrorResponse>(&response.body)
            .ok()
            .and_then(|body| body.error.code);

        match code {
            Some(code) if RATE_LIMIT_ERROR_CODES.contains(&code) => ErrorKind::SourceRateLimited,
            Some(INVALID_TOKEN_ERROR_CODE) => ErrorKind::AuthenticationError,
            _ => status_error_kind(response.status),
        }
    }

    /// Turns one insights response into a page, pointing the token at the next cursor of the
    /// same account or at the next account.
    fn parse_response(&self, cursor: &PageCursor, response: InsightsResponse) -> Page {
        let records = response
            .data
            .into_iter()
            .map(|datum| {
                SourceRecord::flat(
                    datum
                        .into_iter()
                        .map(|(name, value)| (name, SourceValue::from(value)))
                        .collect(),
                )
            })
            .collect();

        let after = response.paging.and_then(|paging| match paging.next {
            Some(_) => paging.cursors.and_then(|cursors| cursors.after),
            None => None,
        });

        let next = match after {
            Some(after) => Some(PageCursor {
                account: cursor.account,
                after: Some(after),
            }),
            None if cursor.account + 1 < self.account_ids.len() => Some(PageCursor {
                account: cursor.account + 1,
                after: None,
            }),
            None => None,
        };

        Page::new(records, next.map(|cursor| cursor.to_token()))
    }
}

impl Source for FacebookInsightsSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    fn schema(&self) -> &SchemaContract {
        &self.schema
    }

    /// Breakdowns split one ad and day into several rows, so they are part of the key.
    fn primary_key(&self) -> Vec<String> {
        PRIMARY_KEY
            .iter()
            .map(|column| column.to_string())
            .chain(self.breakdowns.iter().cloned())
            .collect()
    }

    fn granularity(&self) -> Granularity {
        Granularity::Date
    }

    fn rate_limit_delay(&self) -> Duration {
        RATE_LIMIT_DELAY
    }

    fn pre_execution_delay(&self) -> Duration {
        self.execution_wait
    }

    async fn fetch_page(
        &self,
        sub_window: &SubWindow,
        page_token: Option<&str>,
    ) -> IngestResult<Page> {
        let cursor = match page_token {
            Some(token) => PageCursor::parse(token)?,
            None => PageCursor::start(),
        };
        let url = self.insights_url(cursor.account)?;

        if cursor.after.is_none() {
            info!(account = cursor.account, %sub_window, "requesting insights for account");
        } else {
            debug!(account = cursor.account, %sub_window, "requesting another insights page");
        }

        let request = self
            .client
            .get(url)
            .query(&self.query_params(sub_window, cursor.after.as_deref()))
            .query(&[("access_token", self.access_token.expose_secret())]);

        let response = send(SOURCE_NAME, request).await?;
        if !response.status.is_success() {
            return Err(response_error(
                SOURCE_NAME,
                Self::classify_error(&response),
                &response,
            ));
        }

        Ok(self.parse_response(&cursor, response.json()?))
    }
}
