//! Extraction window resolution.
//!
//! Fixed-window strategies take their bounds from the table configuration. The subsequent
//! strategy resumes from the live table's high watermark minus a lookback, falling back to the
//! job start when the live table does not exist yet.

use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta, Utc};
use ingest_config::shared::{LoadStrategy, TableLoadConfig};
use tracing::info;

use crate::bail;
use crate::error::{ErrorKind, IngestResult};
use crate::types::{Cell, DataType, ExtractionWindow, Granularity};
use crate::warehouse::{Warehouse, WatermarkLookup};

/// Explicit window bounds that take precedence over every strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowOverride {
    pub from: DateTime<Utc>,
    pub until: DateTime<Utc>,
}

/// Resolves the extraction window of `table`.
///
/// `now` is the upper bound used when the configuration has none. The lower bound is truncated
/// to the coarser of the source granularity and the watermark column type, so a date-typed
/// watermark never resumes in the middle of a day.
pub async fn resolve_window<W>(
    warehouse: &W,
    live_namespace: &str,
    table: &TableLoadConfig,
    granularity: Granularity,
    window_override: Option<WindowOverride>,
    now: DateTime<Utc>,
) -> IngestResult<ExtractionWindow>
where
    W: Warehouse + WatermarkLookup,
{
    let chunk_size = chunk_size(table)?;

    if let Some(WindowOverride { from, until }) = window_override {
        info!(table = %table.name, %from, %until, "using explicit extraction window");
        return ExtractionWindow::new(from, until, chunk_size);
    }

    let until = table.data_until.unwrap_or(now);
    let (from, granularity) = match table.strategy {
        LoadStrategy::FullRefresh | LoadStrategy::Incremental => {
            let Some(from) = table.data_from else {
                bail!(
                    ErrorKind::ConfigError,
                    "Missing window start",
                    format!("table `{}` needs `data_from` for its strategy", table.name)
                );
            };
            (from, granularity)
        }
        LoadStrategy::Subsequent => {
            resolve_subsequent_from(warehouse, live_namespace, table, granularity).await?
        }
    };

    let from = granularity.truncate(from);
    info!(
        table = %table.name,
        strategy = ?table.strategy,
        %from,
        %until,
        "resolved extraction window"
    );

    ExtractionWindow::new(from, until, chunk_size)
}

fn chunk_size(table: &TableLoadConfig) -> IngestResult<Option<TimeDelta>> {
    let Some(secs) = table.chunking_interval_secs else {
        return Ok(None);
    };

    match i64::try_from(secs).ok().and_then(TimeDelta::try_seconds) {
        Some(chunk_size) => Ok(Some(chunk_size)),
        None => bail!(
            ErrorKind::ConfigError,
            "Chunking interval out of range",
            format!("table `{}` has a chunking interval of {secs}s", table.name)
        ),
    }
}

async fn resolve_subsequent_from<W>(
    warehouse: &W,
    live_namespace: &str,
    table: &TableLoadConfig,
    granularity: Granularity,
) -> IngestResult<(DateTime<Utc>, Granularity)>
where
    W: Warehouse + WatermarkLookup,
{
    let job_start = || match table.job_start.or(table.data_from) {
        Some(job_start) => Ok((job_start, granularity)),
        None => bail!(
            ErrorKind::ConfigError,
            "Missing job start",
            format!(
                "table `{}` has no live watermark and no `job_start` to fall back to",
                table.name
            )
        ),
    };

    let Some(watermark_column) = table.watermark_column.as_deref() else {
        bail!(
            ErrorKind::ConfigError,
            "Missing watermark column",
            format!(
                "table `{}` uses the subsequent strategy without a watermark column",
                table.name
            )
        );
    };

    if !warehouse.table_exists(live_namespace, &table.name).await? {
        info!(table = %table.name, "live table does not exist, starting from the job start");
        return job_start();
    }

    let columns = warehouse.get_columns(live_namespace, &table.name).await?;
    let Some(column) = columns.iter().find(|c| c.name == watermark_column) else {
        bail!(
            ErrorKind::WatermarkColumnMissing,
            "Watermark column missing from the live table",
            format!(
                "column `{watermark_column}` does not exist in `{live_namespace}.{}`",
                table.name
            )
        );
    };

    let Some(max) = warehouse
        .max_value(live_namespace, &table.name, watermark_column)
        .await?
    else {
        info!(table = %table.name, "live table holds no watermark, starting from the job start");
        return job_start();
    };

    let watermark = watermark_timestamp(&max, watermark_column)?;
    let lookback_secs = table.lookback_secs.unwrap_or(0);
    let lookback = i64::try_from(lookback_secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::MAX);
    let from = watermark
        .checked_sub_signed(lookback)
        .unwrap_or(DateTime::<Utc>::MIN_UTC);

    let granularity = match column.data_type {
        DataType::Date => coarser(granularity, Granularity::Date),
        _ => granularity,
    };

    info!(
        table = %table.name,
        column = watermark_column,
        %watermark,
        lookback_secs,
        "resuming from live watermark"
    );

    Ok((from, granularity))
}

fn coarser(a: Granularity, b: Granularity) -> Granularity {
    let rank = |granularity: Granularity| match granularity {
        Granularity::Timestamp => 0,
        Granularity::Hour => 1,
        Granularity::Date => 2,
    };

    if rank(a) >= rank(b) { a } else { b }
}

fn watermark_timestamp(value: &Cell, column: &str) -> IngestResult<DateTime<Utc>> {
    let timestamp = match value {
        Cell::Timestamp(timestamp) => Some(*timestamp),
        Cell::Date(date) => Some(date.and_time(NaiveTime::MIN).and_utc()),
        Cell::String(text) => DateTime::parse_from_rfc3339(text)
            .map(|timestamp| timestamp.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(text, "%Y-%m-%d")
                    .ok()
                    .map(|date| date.and_time(NaiveTime::MIN).and_utc())
            }),
        Cell::Int(seconds) => DateTime::from_timestamp(*seconds, 0),
        _ => None,
    };

    match timestamp {
        Some(timestamp) => Ok(timestamp),
        None => bail!(
            ErrorKind::ConversionError,
            "Watermark is not a point in time",
            format!("column `{column}` holds {value:?}")
        ),
    }
}
