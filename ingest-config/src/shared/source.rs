use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::shared::{LoadStrategy, TableLoadConfig, ValidationError};

/// Maximum number of dimensions accepted by the Reporting API in one request.
const MAX_GA_DIMENSIONS: usize = 7;

/// Maximum number of metrics accepted by the Reporting API in one request.
const MAX_GA_METRICS: usize = 10;

/// Maximum page size accepted by the Reporting API.
const MAX_GA_PAGE_SIZE: u32 = 10_000;

/// Bounds of a numeric Facebook `time_increment`.
const FACEBOOK_TIME_INCREMENT_DAYS: std::ops::RangeInclusive<u32> = 1..=90;

const fn default_ga_page_size() -> u32 {
    MAX_GA_PAGE_SIZE
}

const fn default_true() -> bool {
    true
}

fn default_facebook_level() -> String {
    SourceConfig::DEFAULT_FACEBOOK_LEVEL.to_string()
}

const fn default_facebook_time_increment() -> FacebookTimeIncrement {
    FacebookTimeIncrement::Days(1)
}

const fn default_execution_wait_secs() -> u64 {
    SourceConfig::DEFAULT_FACEBOOK_EXECUTION_WAIT_SECS
}

/// Value type reported for a Google Analytics metric.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GaMetricType {
    #[default]
    MetricTypeUnspecified,
    Integer,
    Float,
    Currency,
    Percent,
    Time,
}

/// A Google Analytics metric together with its declared value type.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GaMetricConfig {
    pub name: String,
    #[serde(default, rename = "type")]
    pub metric_type: GaMetricType,
}

/// Named Facebook time increments.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NamedTimeIncrement {
    Monthly,
    AllDays,
}

/// Facebook insights `time_increment`: a number of days or a named period.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum FacebookTimeIncrement {
    Days(u32),
    Named(NamedTimeIncrement),
}

impl FacebookTimeIncrement {
    /// Returns the value sent as the `time_increment` request parameter.
    pub fn as_param(&self) -> String {
        match self {
            Self::Days(days) => days.to_string(),
            Self::Named(NamedTimeIncrement::Monthly) => "monthly".to_string(),
            Self::Named(NamedTimeIncrement::AllDays) => "all_days".to_string(),
        }
    }
}

/// Configuration of the source a table is extracted from.
///
/// This intentionally does not implement [`Serialize`] to avoid accidentally
/// leaking access tokens into serialized forms.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceConfig {
    /// Google Analytics Reporting API v4.
    GoogleAnalytics {
        view_id: String,
        /// Dimension names, with or without the `ga:` prefix.
        dimensions: Vec<String>,
        metrics: Vec<GaMetricConfig>,
        #[serde(default = "default_ga_page_size")]
        page_size: u32,
        #[serde(default = "default_true")]
        include_empty_rows: bool,
        #[serde(default)]
        sampling_level: Option<String>,
        /// OAuth access token with the `analytics.readonly` scope.
        access_token: SecretString,
        /// Overrides the API endpoint, used to point the connector at a mock server.
        #[serde(default)]
        api_base_url: Option<String>,
    },
    /// Facebook Ads Insights through the Graph API.
    FacebookInsights {
        account_ids: Vec<String>,
        insight_fields: Vec<String>,
        #[serde(default = "default_facebook_level")]
        level: String,
        #[serde(default = "default_facebook_time_increment")]
        time_increment: FacebookTimeIncrement,
        #[serde(default)]
        breakdowns: Vec<String>,
        access_token: SecretString,
        /// Delay applied before the first request to stay under the account rate limit.
        #[serde(default = "default_execution_wait_secs")]
        execution_wait_secs: u64,
        #[serde(default)]
        api_version: Option<String>,
        #[serde(default)]
        api_base_url: Option<String>,
    },
}

/// Returns the Google Analytics dimension a subsequent load resumes from: `dateHour` when it is
/// requested, `date` otherwise.
pub fn google_analytics_watermark_column<S: AsRef<str>>(dimensions: &[S]) -> &'static str {
    let has_date_hour = dimensions.iter().any(|dimension| {
        let dimension = dimension.as_ref();
        dimension.strip_prefix("ga:").unwrap_or(dimension) == "dateHour"
    });

    if has_date_hour { "dateHour" } else { "date" }
}

/// Checks the load settings of a Google Analytics table.
///
/// Reports are always merged and keyed by their dimensions, so `full_refresh` and an explicit
/// primary key are rejected.
pub fn check_google_analytics_load(load: &TableLoadConfig) -> Result<(), ValidationError> {
    if load.strategy == LoadStrategy::FullRefresh {
        return Err(ValidationError::invalid(
            format!("tables.{}.strategy", load.name),
            "google analytics tables are loaded `incremental` or `subsequent`",
        ));
    }

    if !load.primary_key.is_empty() {
        return Err(ValidationError::invalid(
            format!("tables.{}.primary_key", load.name),
            "google analytics tables are keyed by their dimensions, remove the primary key",
        ));
    }

    Ok(())
}

impl SourceConfig {
    /// Insights level supported by the Facebook connector.
    pub const DEFAULT_FACEBOOK_LEVEL: &'static str = "ad";

    /// Default delay applied before the first Facebook request.
    pub const DEFAULT_FACEBOOK_EXECUTION_WAIT_SECS: u64 = 300;

    /// Lookback applied to the Google Analytics watermark when none is configured, three days.
    pub const DEFAULT_GA_LOOKBACK_SECS: u64 = 3 * 24 * 3600;

    /// Returns the watermark column used when the table configures none.
    pub fn default_watermark_column(&self) -> Option<&'static str> {
        match self {
            Self::GoogleAnalytics { dimensions, .. } => {
                Some(google_analytics_watermark_column(dimensions))
            }
            Self::FacebookInsights { .. } => None,
        }
    }

    /// Returns the watermark lookback used when the table configures none.
    pub fn default_lookback_secs(&self) -> Option<u64> {
        match self {
            Self::GoogleAnalytics { .. } => Some(Self::DEFAULT_GA_LOOKBACK_SECS),
            Self::FacebookInsights { .. } => None,
        }
    }

    /// Checks the load settings of a table against what this source supports.
    pub fn check_load(&self, load: &TableLoadConfig) -> Result<(), ValidationError> {
        match self {
            Self::GoogleAnalytics { .. } => check_google_analytics_load(load),
            Self::FacebookInsights { .. } => Ok(()),
        }
    }

    /// Validates the source settings of the table `table`.
    pub fn validate(&self, table: &str) -> Result<(), ValidationError> {
        match self {
            Self::GoogleAnalytics {
                view_id,
                dimensions,
                metrics,
                page_size,
                ..
            } => {
                let field = |name: &str| format!("tables.{table}.source.google_analytics.{name}");

                if view_id.is_empty() {
                    return Err(ValidationError::invalid(field("view_id"), "must not be empty"));
                }
                if dimensions.is_empty() || dimensions.len() > MAX_GA_DIMENSIONS {
                    return Err(ValidationError::invalid(
                        field("dimensions"),
                        format!("must contain between 1 and {MAX_GA_DIMENSIONS} dimensions"),
                    ));
                }
                if metrics.is_empty() || metrics.len() > MAX_GA_METRICS {
                    return Err(ValidationError::invalid(
                        field("metrics"),
                        format!("must contain between 1 and {MAX_GA_METRICS} metrics"),
                    ));
                }
                if *page_size == 0 || *page_size > MAX_GA_PAGE_SIZE {
                    return Err(ValidationError::invalid(
                        field("page_size"),
                        format!("must be between 1 and {MAX_GA_PAGE_SIZE}"),
                    ));
                }
                let has_date = dimensions.iter().any(|dimension| {
                    let name = dimension.strip_prefix("ga:").unwrap_or(dimension);
                    name == "date" || name == "dateHour"
                });
                if !has_date {
                    return Err(ValidationError::missing(
                        field("dimensions"),
                        "a `date` or `dateHour` dimension is required to attribute rows to a window",
                    ));
                }
            }
            Self::FacebookInsights {
                account_ids,
                insight_fields,
                level,
                time_increment,
                ..
            } => {
                let field =
                    |name: &str| format!("tables.{table}.source.facebook_insights.{name}");

                if account_ids.is_empty() {
                    return Err(ValidationError::invalid(
                        field("account_ids"),
                        "must contain at least one account",
                    ));
                }
                if insight_fields.is_empty() {
                    return Err(ValidationError::invalid(
                        field("insight_fields"),
                        "must contain at least one field",
                    ));
                }
                if level != Self::DEFAULT_FACEBOOK_LEVEL {
                    return Err(ValidationError::invalid(
                        field("level"),
                        "only the `ad` level is supported",
                    ));
                }
                if let FacebookTimeIncrement::Days(days) = time_increment
                    && !FACEBOOK_TIME_INCREMENT_DAYS.contains(days)
                {
                    return Err(ValidationError::invalid(
                        field("time_increment"),
                        "must be an integer between 1 and 90, `monthly` or `all_days`",
                    ));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn google_analytics(dimensions: &[&str], page_size: u32) -> SourceConfig {
        SourceConfig::GoogleAnalytics {
            view_id: "123".to_string(),
            dimensions: dimensions.iter().map(|d| d.to_string()).collect(),
            metrics: vec![GaMetricConfig {
                name: "sessions".to_string(),
                metric_type: GaMetricType::Integer,
            }],
            page_size,
            include_empty_rows: true,
            sampling_level: None,
            access_token: SecretString::new("token".to_string()),
            api_base_url: None,
        }
    }

    #[test]
    fn test_google_analytics_requires_date_dimension() {
        assert!(google_analytics(&["ga:date", "source"], 100).validate("t").is_ok());
        assert!(google_analytics(&["dateHour"], 100).validate("t").is_ok());
        assert!(matches!(
            google_analytics(&["source"], 100).validate("t"),
            Err(ValidationError::MissingField { .. })
        ));
    }

    #[test]
    fn test_google_analytics_defaults() {
        let config = google_analytics(&["ga:date", "source"], 100);
        assert_eq!(config.default_watermark_column(), Some("date"));
        assert_eq!(config.default_lookback_secs(), Some(259_200));

        let config = google_analytics(&["source", "ga:dateHour"], 100);
        assert_eq!(config.default_watermark_column(), Some("dateHour"));
    }

    #[test]
    fn test_google_analytics_rejects_full_refresh_and_primary_key() {
        let config = google_analytics(&["date"], 100);

        let load = TableLoadConfig::new("ga", LoadStrategy::FullRefresh);
        assert!(matches!(
            config.check_load(&load),
            Err(ValidationError::InvalidFieldValue { field, .. }) if field == "tables.ga.strategy"
        ));

        let mut load = TableLoadConfig::new("ga", LoadStrategy::Subsequent);
        assert!(config.check_load(&load).is_ok());
        load.primary_key = vec!["date".to_string()];
        assert!(matches!(
            config.check_load(&load),
            Err(ValidationError::InvalidFieldValue { field, .. }) if field == "tables.ga.primary_key"
        ));
    }

    #[test]
    fn test_google_analytics_limits() {
        let many = ["date", "a", "b", "c", "d", "e", "f", "g"];
        assert!(google_analytics(&many, 100).validate("t").is_err());
        assert!(google_analytics(&["date"], 10_001).validate("t").is_err());
    }

    #[test]
    fn test_facebook_time_increment_forms() {
        let increment: FacebookTimeIncrement = serde_json::from_str("7").unwrap();
        assert_eq!(increment, FacebookTimeIncrement::Days(7));

        let increment: FacebookTimeIncrement = serde_json::from_str(r#""all_days""#).unwrap();
        assert_eq!(increment.as_param(), "all_days");
    }

    #[test]
    fn test_facebook_time_increment_bounds() {
        let config = |time_increment| SourceConfig::FacebookInsights {
            account_ids: vec!["1".to_string()],
            insight_fields: vec!["impressions".to_string()],
            level: "ad".to_string(),
            time_increment,
            breakdowns: vec![],
            access_token: SecretString::new("token".to_string()),
            execution_wait_secs: 0,
            api_version: None,
            api_base_url: None,
        };

        assert!(config(FacebookTimeIncrement::Days(90)).validate("t").is_ok());
        assert!(config(FacebookTimeIncrement::Days(0)).validate("t").is_err());
        assert!(config(FacebookTimeIncrement::Days(91)).validate("t").is_err());
        assert!(
            config(FacebookTimeIncrement::Named(NamedTimeIncrement::Monthly))
                .validate("t")
                .is_ok()
        );
    }
}
