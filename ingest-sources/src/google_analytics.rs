//! Google Analytics Reporting API v4 connector.
//!
//! Every sub-window becomes one `reports:batchGet` request whose date range covers the days of
//! the sub-window. Reports are paginated with `pageToken`. A report row carries one metric
//! entry per requested date range and each entry becomes its own row.

use std::collections::BTreeMap;
use std::time::Duration;

use ingest::bail;
use ingest::error::{ErrorKind, IngestResult};
use ingest::source::{Page, Source};
use ingest::types::{
    ColumnDefinition, DataType, Granularity, SchemaContract, SourceFields, SourceRecord,
    SourceValue, SubWindow,
};
use ingest_config::shared::{
    GaMetricConfig, GaMetricType, SourceConfig, TableLoadConfig, check_google_analytics_load,
    google_analytics_watermark_column,
};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::http::{build_client, response_error, send, status_error_kind};

const SOURCE_NAME: &str = "google_analytics";

/// Default endpoint of the Reporting API.
pub const DEFAULT_API_BASE_URL: &str = "https://analyticsreporting.googleapis.com";

/// Prefix of every dimension and metric name of the Reporting API.
const GA_PREFIX: &str = "ga:";

/// Column holding the view a row was reported for.
pub const VIEW_ID_COLUMN: &str = "view_id";

/// Delay between two page requests.
const RATE_LIMIT_DELAY: Duration = Duration::from_secs(1);

/// Returns `name` with the `ga:` prefix the API expects.
fn with_prefix(name: &str) -> String {
    if name.starts_with(GA_PREFIX) {
        name.to_string()
    } else {
        format!("{GA_PREFIX}{name}")
    }
}

/// Returns `name` without the `ga:` prefix, as it is stored in the warehouse.
fn without_prefix(name: &str) -> &str {
    name.strip_prefix(GA_PREFIX).unwrap_or(name)
}

/// Maps a declared metric type to its column type.
fn metric_data_type(metric_type: GaMetricType) -> DataType {
    match metric_type {
        GaMetricType::Integer => DataType::Int64,
        GaMetricType::Float | GaMetricType::Currency | GaMetricType::Percent => DataType::Float64,
        // Durations are reported in seconds.
        GaMetricType::Time => DataType::Float64,
        GaMetricType::MetricTypeUnspecified => DataType::String,
    }
}

/// Maps a dimension to its column type.
fn dimension_data_type(dimension: &str) -> DataType {
    match dimension {
        "date" => DataType::Date,
        "dateHour" => DataType::Timestamp,
        _ => DataType::String,
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchGetRequest<'a> {
    report_requests: [ReportRequest<'a>; 1],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReportRequest<'a> {
    view_id: &'a str,
    date_ranges: [DateRange; 1],
    dimensions: Vec<NamedDimension>,
    metrics: Vec<MetricExpression>,
    page_size: u32,
    include_empty_rows: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    sampling_level: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_token: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DateRange {
    start_date: String,
    end_date: String,
}

#[derive(Debug, Serialize)]
struct NamedDimension {
    name: String,
}

#[derive(Debug, Serialize)]
struct MetricExpression {
    expression: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchGetResponse {
    #[serde(default)]
    reports: Vec<Report>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Report {
    column_header: ColumnHeader,
    #[serde(default)]
    data: ReportData,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ColumnHeader {
    #[serde(default)]
    dimensions: Vec<String>,
    metric_header: MetricHeader,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetricHeader {
    #[serde(default)]
    metric_header_entries: Vec<MetricHeaderEntry>,
}

#[derive(Debug, Deserialize)]
struct MetricHeaderEntry {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct ReportData {
    #[serde(default)]
    rows: Vec<ReportRow>,
}

#[derive(Debug, Deserialize)]
struct ReportRow {
    #[serde(default)]
    dimensions: Vec<String>,
    #[serde(default)]
    metrics: Vec<DateRangeValues>,
}

#[derive(Debug, Deserialize)]
struct DateRangeValues {
    #[serde(default)]
    values: Vec<String>,
}

/// Extracts report rows of one Google Analytics view.
#[derive(Debug)]
pub struct GoogleAnalyticsSource {
    client: Client,
    endpoint: String,
    view_id: String,
    dimensions: Vec<String>,
    metrics: Vec<GaMetricConfig>,
    page_size: u32,
    include_empty_rows: bool,
    sampling_level: Option<String>,
    access_token: SecretString,
    schema: SchemaContract,
}

impl GoogleAnalyticsSource {
    /// Builds the connector from a `google_analytics` source configuration.
    pub fn from_config(config: &SourceConfig) -> IngestResult<Self> {
        let SourceConfig::GoogleAnalytics {
            view_id,
            dimensions,
            metrics,
            page_size,
            include_empty_rows,
            sampling_level,
            access_token,
            api_base_url,
        } = config
        else {
            bail!(
                ErrorKind::ConfigError,
                "Unexpected source configuration",
                "expected a `google_analytics` source"
            );
        };

        let dimensions: Vec<String> = dimensions
            .iter()
            .map(|dimension| without_prefix(dimension).to_string())
            .collect();
        let schema = Self::build_schema(&dimensions, metrics)?;
        let base_url = api_base_url.as_deref().unwrap_or(DEFAULT_API_BASE_URL);

        Ok(Self {
            client: build_client(),
            endpoint: format!("{}/v4/reports:batchGet", base_url.trim_end_matches('/')),
            view_id: view_id.clone(),
            dimensions,
            metrics: metrics.clone(),
            page_size: *page_size,
            include_empty_rows: *include_empty_rows,
            sampling_level: sampling_level.clone(),
            access_token: access_token.clone(),
            schema,
        })
    }

    fn build_schema(
        dimensions: &[String],
        metrics: &[GaMetricConfig],
    ) -> IngestResult<SchemaContract> {
        let mut columns = Vec::with_capacity(dimensions.len() + metrics.len() + 1);
        columns.extend(
            dimensions
                .iter()
                .map(|dimension| ColumnDefinition::new(dimension, dimension_data_type(dimension))),
        );
        columns.extend(metrics.iter().map(|metric| {
            ColumnDefinition::new(
                without_prefix(&metric.name),
                metric_data_type(metric.metric_type),
            )
        }));
        columns.push(ColumnDefinition::new(VIEW_ID_COLUMN, DataType::String));

        SchemaContract::new(columns)
    }

    fn build_request<'a>(
        &'a self,
        sub_window: &SubWindow,
        page_token: Option<&'a str>,
    ) -> BatchGetRequest<'a> {
        BatchGetRequest {
            report_requests: [ReportRequest {
                view_id: &self.view_id,
                date_ranges: [DateRange {
                    start_date: sub_window.first_day().format("%Y-%m-%d").to_string(),
                    end_date: sub_window.last_day_inclusive().format("%Y-%m-%d").to_string(),
                }],
                dimensions: self
                    .dimensions
                    .iter()
                    .map(|dimension| NamedDimension {
                        name: with_prefix(dimension),
                    })
                    .collect(),
                metrics: self
                    .metrics
                    .iter()
                    .map(|metric| MetricExpression {
                        expression: with_prefix(&metric.name),
                    })
                    .collect(),
                page_size: self.page_size,
                include_empty_rows: self.include_empty_rows,
                sampling_level: self.sampling_level.as_deref(),
                page_token,
            }],
        }
    }

    /// Turns the single report of a response into a page.
    fn parse_response(&self, response: BatchGetResponse) -> IngestResult<Page> {
        let Some(report) = response.reports.into_iter().next() else {
            bail!(
                ErrorKind::InvalidData,
                "Malformed Google Analytics response",
                "the response holds no report"
            );
        };

        let dimension_names: Vec<&str> = report
            .column_header
            .dimensions
            .iter()
            .map(|name| without_prefix(name))
            .collect();
        let metric_names: Vec<&str> = report
            .column_header
            .metric_header
            .metric_header_entries
            .iter()
            .map(|entry| without_prefix(&entry.name))
            .collect();

        let mut records = Vec::with_capacity(report.data.rows.len());
        for row in report.data.rows {
            if row.dimensions.len() != dimension_names.len() {
                bail!(
                    ErrorKind::InvalidData,
                    "Malformed Google Analytics response",
                    format!(
                        "a row holds {} dimension values for {} dimensions",
                        row.dimensions.len(),
                        dimension_names.len()
                    )
                );
            }

            let mut dimensions: SourceFields = dimension_names
                .iter()
                .zip(row.dimensions)
                .map(|(name, value)| (name.to_string(), SourceValue::String(value)))
                .collect();
            dimensions.insert(
                VIEW_ID_COLUMN.to_string(),
                SourceValue::String(self.view_id.clone()),
            );

            let metric_sets = row
                .metrics
                .into_iter()
                .map(|entry| {
                    metric_names
                        .iter()
                        .zip(entry.values)
                        .map(|(name, value)| (name.to_string(), SourceValue::String(value)))
                        .collect::<BTreeMap<_, _>>()
                })
                .collect();

            records.push(SourceRecord::with_metric_sets(dimensions, metric_sets));
        }

        Ok(Page::new(records, report.next_page_token))
    }
}

impl Source for GoogleAnalyticsSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    fn schema(&self) -> &SchemaContract {
        &self.schema
    }

    fn primary_key(&self) -> Vec<String> {
        self.dimensions.clone()
    }

    fn default_watermark_column(&self) -> Option<String> {
        Some(google_analytics_watermark_column(&self.dimensions).to_string())
    }

    fn default_lookback(&self) -> Option<Duration> {
        Some(Duration::from_secs(SourceConfig::DEFAULT_GA_LOOKBACK_SECS))
    }

    fn check_table(&self, table: &TableLoadConfig) -> IngestResult<()> {
        Ok(check_google_analytics_load(table)?)
    }

    fn granularity(&self) -> Granularity {
        if self.dimensions.iter().any(|dimension| dimension == "dateHour") {
            Granularity::Hour
        } else {
            Granularity::Date
        }
    }

    fn rate_limit_delay(&self) -> Duration {
        RATE_LIMIT_DELAY
    }

    async fn fetch_page(
        &self,
        sub_window: &SubWindow,
        page_token: Option<&str>,
    ) -> IngestResult<Page> {
        debug!(view_id = %self.view_id, %sub_window, page_token, "requesting report page");

        let body = self.build_request(sub_window, page_token);
        let request = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.access_token.expose_secret())
            .json(&body);

        let response = send(SOURCE_NAME, request).await?;
        if !response.status.is_success() {
            return Err(response_error(
                SOURCE_NAME,
                status_error_kind(response.status),
                &response,
            ));
        }

        self.parse_response(response.json()?)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use ingest::normalize::Normalizer;
    use ingest::types::Cell;
    use ingest_config::shared::LoadStrategy;
    use serde_json::json;

    use super::*;

    fn config(dimensions: &[&str]) -> SourceConfig {
        SourceConfig::GoogleAnalytics {
            view_id: "12345".to_string(),
            dimensions: dimensions.iter().map(|d| d.to_string()).collect(),
            metrics: vec![
                GaMetricConfig {
                    name: "ga:sessions".to_string(),
                    metric_type: GaMetricType::Integer,
                },
                GaMetricConfig {
                    name: "avgSessionDuration".to_string(),
                    metric_type: GaMetricType::Time,
                },
            ],
            page_size: 1_000,
            include_empty_rows: true,
            sampling_level: Some("LARGE".to_string()),
            access_token: SecretString::new("token".to_string()),
            api_base_url: Some("http://localhost:8080/".to_string()),
        }
    }

    fn sub_window() -> SubWindow {
        SubWindow::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_schema_from_dimensions_and_metric_types() {
        let source = GoogleAnalyticsSource::from_config(&config(&["ga:date", "source"])).unwrap();

        let columns: Vec<(&str, DataType)> = source
            .schema()
            .columns()
            .iter()
            .map(|column| (column.name.as_str(), column.data_type))
            .collect();
        assert_eq!(
            columns,
            vec![
                ("date", DataType::Date),
                ("source", DataType::String),
                ("sessions", DataType::Int64),
                ("avgSessionDuration", DataType::Float64),
                ("view_id", DataType::String),
            ]
        );
        assert_eq!(source.primary_key(), vec!["date", "source"]);
        assert_eq!(source.granularity(), Granularity::Date);
        assert_eq!(source.endpoint, "http://localhost:8080/v4/reports:batchGet");
    }

    #[test]
    fn test_date_hour_dimension_uses_hour_granularity() {
        let source = GoogleAnalyticsSource::from_config(&config(&["dateHour"])).unwrap();

        assert_eq!(source.granularity(), Granularity::Hour);
        assert_eq!(
            source.schema().column("dateHour").map(|c| c.data_type),
            Some(DataType::Timestamp)
        );
    }

    #[test]
    fn test_subsequent_defaults_and_rejected_settings() {
        let source = GoogleAnalyticsSource::from_config(&config(&["date", "source"])).unwrap();
        assert_eq!(source.default_watermark_column().as_deref(), Some("date"));
        assert_eq!(source.default_lookback(), Some(Duration::from_secs(3 * 24 * 3600)));

        let hourly = GoogleAnalyticsSource::from_config(&config(&["ga:dateHour"])).unwrap();
        assert_eq!(hourly.default_watermark_column().as_deref(), Some("dateHour"));

        let mut table = TableLoadConfig::new("ga", LoadStrategy::Subsequent);
        assert!(source.check_table(&table).is_ok());

        table.primary_key = vec!["date".to_string()];
        assert_eq!(
            source.check_table(&table).map_err(|err| err.kind()),
            Err(ErrorKind::ConfigError)
        );

        let table = TableLoadConfig::new("ga", LoadStrategy::FullRefresh);
        assert_eq!(
            source.check_table(&table).map_err(|err| err.kind()),
            Err(ErrorKind::ConfigError)
        );
    }

    #[test]
    fn test_request_prefixes_names_and_covers_sub_window_days() {
        let source = GoogleAnalyticsSource::from_config(&config(&["date", "source"])).unwrap();

        let request = serde_json::to_value(source.build_request(&sub_window(), Some("1000")))
            .unwrap();

        assert_eq!(
            request,
            json!({
                "reportRequests": [{
                    "viewId": "12345",
                    "dateRanges": [{"startDate": "2024-01-01", "endDate": "2024-01-02"}],
                    "dimensions": [{"name": "ga:date"}, {"name": "ga:source"}],
                    "metrics": [
                        {"expression": "ga:sessions"},
                        {"expression": "ga:avgSessionDuration"}
                    ],
                    "pageSize": 1000,
                    "includeEmptyRows": true,
                    "samplingLevel": "LARGE",
                    "pageToken": "1000"
                }]
            })
        );
    }

    #[test]
    fn test_response_rows_fan_out_per_metric_entry() {
        let source = GoogleAnalyticsSource::from_config(&config(&["date", "source"])).unwrap();
        let response: BatchGetResponse = serde_json::from_value(json!({
            "reports": [{
                "columnHeader": {
                    "dimensions": ["ga:date", "ga:source"],
                    "metricHeader": {"metricHeaderEntries": [
                        {"name": "ga:sessions", "type": "INTEGER"},
                        {"name": "ga:avgSessionDuration", "type": "TIME"}
                    ]}
                },
                "data": {"rows": [{
                    "dimensions": ["20240101", "google"],
                    "metrics": [{"values": ["12", "3.5"]}, {"values": ["7", "1.0"]}]
                }]},
                "nextPageToken": "2"
            }]
        }))
        .unwrap();

        let page = source.parse_response(response).unwrap();
        assert_eq!(page.next_page_token.as_deref(), Some("2"));

        let rows = Normalizer::new(source.schema().clone())
            .normalize_all(page.records)
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[0].get("date"),
            Some(&Cell::Date(chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()))
        );
        assert_eq!(rows[0].get("sessions"), Some(&Cell::Int(12)));
        assert_eq!(rows[1].get("sessions"), Some(&Cell::Int(7)));
        assert_eq!(rows[1].get("avgSessionDuration"), Some(&Cell::Float(1.0)));
        assert_eq!(rows[1].get("view_id"), Some(&Cell::String("12345".to_string())));
    }

    #[test]
    fn test_last_page_and_empty_report() {
        let source = GoogleAnalyticsSource::from_config(&config(&["date"])).unwrap();
        let response: BatchGetResponse = serde_json::from_value(json!({
            "reports": [{
                "columnHeader": {
                    "dimensions": ["ga:date"],
                    "metricHeader": {"metricHeaderEntries": []}
                },
                "data": {}
            }]
        }))
        .unwrap();

        let page = source.parse_response(response).unwrap();

        assert_eq!(page, Page::last(Vec::new()));
    }

    #[test]
    fn test_other_source_config_is_rejected() {
        let config = SourceConfig::FacebookInsights {
            account_ids: vec!["1".to_string()],
            insight_fields: vec!["impressions".to_string()],
            level: "ad".to_string(),
            time_increment: ingest_config::shared::FacebookTimeIncrement::Days(1),
            breakdowns: Vec::new(),
            access_token: SecretString::new("token".to_string()),
            execution_wait_secs: 0,
            api_version: None,
            api_base_url: None,
        };

        let err = GoogleAnalyticsSource::from_config(&config).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }
}
