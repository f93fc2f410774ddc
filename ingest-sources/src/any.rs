use std::time::Duration;

use ingest::error::IngestResult;
use ingest::source::{Page, Source};
use ingest::types::{Granularity, SchemaContract, SubWindow};
use ingest_config::shared::{SourceConfig, TableLoadConfig};

use crate::facebook::FacebookInsightsSource;
use crate::google_analytics::GoogleAnalyticsSource;

/// Any of the supported sources.
///
/// Used where tables of one run come from different systems, dispatching statically to the
/// wrapped connector.
#[derive(Debug)]
pub enum AnySource {
    GoogleAnalytics(GoogleAnalyticsSource),
    FacebookInsights(FacebookInsightsSource),
}

impl AnySource {
    /// Builds the connector configured by `config`.
    pub fn from_config(config: &SourceConfig) -> IngestResult<Self> {
        match config {
            SourceConfig::GoogleAnalytics { .. } => Ok(AnySource::GoogleAnalytics(
                GoogleAnalyticsSource::from_config(config)?,
            )),
            SourceConfig::FacebookInsights { .. } => Ok(AnySource::FacebookInsights(
                FacebookInsightsSource::from_config(config)?,
            )),
        }
    }
}

impl Source for AnySource {
    fn name(&self) -> &str {
        match self {
            AnySource::GoogleAnalytics(source) => source.name(),
            AnySource::FacebookInsights(source) => source.name(),
        }
    }

    fn schema(&self) -> &SchemaContract {
        match self {
            AnySource::GoogleAnalytics(source) => source.schema(),
            AnySource::FacebookInsights(source) => source.schema(),
        }
    }

    fn primary_key(&self) -> Vec<String> {
        match self {
            AnySource::GoogleAnalytics(source) => source.primary_key(),
            AnySource::FacebookInsights(source) => source.primary_key(),
        }
    }

    fn default_watermark_column(&self) -> Option<String> {
        match self {
            AnySource::GoogleAnalytics(source) => source.default_watermark_column(),
            AnySource::FacebookInsights(source) => source.default_watermark_column(),
        }
    }

    fn default_lookback(&self) -> Option<Duration> {
        match self {
            AnySource::GoogleAnalytics(source) => source.default_lookback(),
            AnySource::FacebookInsights(source) => source.default_lookback(),
        }
    }

    fn check_table(&self, table: &TableLoadConfig) -> IngestResult<()> {
        match self {
            AnySource::GoogleAnalytics(source) => source.check_table(table),
            AnySource::FacebookInsights(source) => source.check_table(table),
        }
    }

    fn granularity(&self) -> Granularity {
        match self {
            AnySource::GoogleAnalytics(source) => source.granularity(),
            AnySource::FacebookInsights(source) => source.granularity(),
        }
    }

    fn rate_limit_delay(&self) -> Duration {
        match self {
            AnySource::GoogleAnalytics(source) => source.rate_limit_delay(),
            AnySource::FacebookInsights(source) => source.rate_limit_delay(),
        }
    }

    fn pre_execution_delay(&self) -> Duration {
        match self {
            AnySource::GoogleAnalytics(source) => source.pre_execution_delay(),
            AnySource::FacebookInsights(source) => source.pre_execution_delay(),
        }
    }

    async fn fetch_page(
        &self,
        sub_window: &SubWindow,
        page_token: Option<&str>,
    ) -> IngestResult<Page> {
        match self {
            AnySource::GoogleAnalytics(source) => source.fetch_page(sub_window, page_token).await,
            AnySource::FacebookInsights(source) => source.fetch_page(sub_window, page_token).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use ingest_config::shared::{FacebookTimeIncrement, GaMetricConfig, GaMetricType};
    use secrecy::SecretString;

    use super::*;

    #[test]
    fn test_dispatches_by_configured_source() {
        let google = SourceConfig::GoogleAnalytics {
            view_id: "1".to_string(),
            dimensions: vec!["date".to_string()],
            metrics: vec![GaMetricConfig {
                name: "sessions".to_string(),
                metric_type: GaMetricType::Integer,
            }],
            page_size: 10_000,
            include_empty_rows: true,
            sampling_level: None,
            access_token: SecretString::new("token".to_string()),
            api_base_url: None,
        };
        let facebook = SourceConfig::FacebookInsights {
            account_ids: vec!["1".to_string()],
            insight_fields: vec!["impressions".to_string()],
            level: "ad".to_string(),
            time_increment: FacebookTimeIncrement::Days(1),
            breakdowns: Vec::new(),
            access_token: SecretString::new("token".to_string()),
            execution_wait_secs: 5,
            api_version: None,
            api_base_url: None,
        };

        let google = AnySource::from_config(&google).unwrap();
        let facebook = AnySource::from_config(&facebook).unwrap();

        assert_eq!(google.name(), "google_analytics");
        assert_eq!(google.pre_execution_delay(), Duration::ZERO);
        assert_eq!(facebook.name(), "facebook_insights");
        assert_eq!(facebook.pre_execution_delay(), Duration::from_secs(5));
        assert_eq!(facebook.granularity(), Granularity::Date);
    }
}
