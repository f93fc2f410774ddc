//! Flattening of source records into rows that match a schema contract.
//!
//! Normalization is a total function of the contract and the record: every contract column is
//! present in every output row, absent fields become [`Cell::Null`] and fields the contract does
//! not declare are dropped.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Utc};
use tracing::trace;

use crate::bail;
use crate::error::{ErrorKind, IngestResult};
use crate::types::{
    Cell, ColumnDefinition, DataType, NormalizedRow, SchemaContract, SourceFields, SourceRecord,
    SourceValue,
};

/// Prefix given to column names the warehouse would reject or misparse.
pub const SANITIZED_COLUMN_PREFIX: &str = "field_";

/// Rewrites a column name that is purely hexadecimal or starts with a digit by prefixing it with
/// [`SANITIZED_COLUMN_PREFIX`].
///
/// The rewrite is idempotent: a prefixed name neither starts with a digit nor is hexadecimal.
pub fn sanitize_column_name(name: &str) -> String {
    let is_hex = !name.is_empty() && name.chars().all(|c| c.is_ascii_hexdigit());
    let starts_with_digit = name.chars().next().is_some_and(|c| c.is_ascii_digit());

    if is_hex || starts_with_digit {
        format!("{SANITIZED_COLUMN_PREFIX}{name}")
    } else {
        name.to_string()
    }
}

/// Converts [`SourceRecord`]s into [`NormalizedRow`]s for one schema contract.
#[derive(Debug, Clone)]
pub struct Normalizer {
    contract: SchemaContract,
}

impl Normalizer {
    pub fn new(contract: SchemaContract) -> Self {
        Self { contract }
    }

    pub fn contract(&self) -> &SchemaContract {
        &self.contract
    }

    /// Normalizes a batch of records, preserving their order.
    pub fn normalize_all(&self, records: Vec<SourceRecord>) -> IngestResult<Vec<NormalizedRow>> {
        let mut rows = Vec::with_capacity(records.len());
        for record in records {
            rows.extend(self.normalize(record)?);
        }

        Ok(rows)
    }

    /// Expands a record into one row per metric set, or a single row when it has none.
    pub fn normalize(&self, record: SourceRecord) -> IngestResult<Vec<NormalizedRow>> {
        let dimensions = sanitize_fields(record.dimensions);

        if record.metric_sets.is_empty() {
            return Ok(vec![self.build_row(&dimensions, &BTreeMap::new())?]);
        }

        record
            .metric_sets
            .into_iter()
            .map(|metrics| self.build_row(&dimensions, &sanitize_fields(metrics)))
            .collect()
    }

    fn build_row(
        &self,
        dimensions: &SourceFields,
        metrics: &SourceFields,
    ) -> IngestResult<NormalizedRow> {
        for name in dimensions.keys().chain(metrics.keys()) {
            if self.contract.column(name).is_none() {
                trace!(column = %name, "dropping field not declared in the schema contract");
            }
        }

        self.contract
            .columns()
            .iter()
            .map(|column| {
                let value = metrics
                    .get(&column.name)
                    .or_else(|| dimensions.get(&column.name));
                let cell = match value {
                    Some(value) => coerce(value, column)?,
                    None => Cell::Null,
                };

                Ok((column.name.clone(), cell))
            })
            .collect()
    }
}

fn sanitize_fields(fields: SourceFields) -> SourceFields {
    fields
        .into_iter()
        .map(|(name, value)| (sanitize_column_name(&name), value))
        .collect()
}

/// Coerces a source value into the declared type of `column`.
fn coerce(value: &SourceValue, column: &ColumnDefinition) -> IngestResult<Cell> {
    let cell = match (column.data_type, value) {
        (_, SourceValue::Null) => Cell::Null,
        (DataType::Json, SourceValue::Json(value)) => Cell::Json(value.clone()),
        (DataType::Json, other) => Cell::Json(to_string_cell(other).to_json()),
        (DataType::String, other) => to_string_cell(other),
        // Empty strings are how sparse APIs spell "no value" for typed fields.
        (_, SourceValue::String(text)) if text.trim().is_empty() => Cell::Null,
        (DataType::Int64, value) => coerce_int(value, column)?,
        (DataType::Float64, value) => coerce_float(value, column)?,
        (DataType::Numeric, value) => coerce_numeric(value, column)?,
        (DataType::Bool, value) => coerce_bool(value, column)?,
        (DataType::Date, value) => coerce_date(value, column)?,
        (DataType::Time, value) => coerce_time(value, column)?,
        (DataType::Timestamp, value) => coerce_timestamp(value, column)?,
    };

    Ok(cell)
}

fn to_string_cell(value: &SourceValue) -> Cell {
    match value {
        SourceValue::Null => Cell::Null,
        SourceValue::Bool(value) => Cell::String(value.to_string()),
        SourceValue::Int(value) => Cell::String(value.to_string()),
        SourceValue::Float(value) => Cell::String(value.to_string()),
        SourceValue::String(value) => Cell::String(value.clone()),
        SourceValue::Date(value) => Cell::String(value.format("%Y-%m-%d").to_string()),
        SourceValue::Timestamp(value) => Cell::String(value.to_rfc3339()),
        SourceValue::Duration(value) => Cell::String(duration_seconds(*value).to_string()),
        SourceValue::Json(value) => Cell::String(value.to_string()),
    }
}

fn duration_seconds(duration: TimeDelta) -> f64 {
    duration.num_milliseconds() as f64 / 1_000.0
}

fn conversion_error<T>(value: &SourceValue, column: &ColumnDefinition) -> IngestResult<T> {
    bail!(
        ErrorKind::ConversionError,
        "Source value does not fit the declared column type",
        format!(
            "value {value:?} cannot be stored in column `{}` of type {}",
            column.name, column.data_type
        )
    );
}

fn coerce_int(value: &SourceValue, column: &ColumnDefinition) -> IngestResult<Cell> {
    match value {
        SourceValue::Int(value) => Ok(Cell::Int(*value)),
        SourceValue::Float(value) if value.fract() == 0.0 && value.is_finite() => {
            Ok(Cell::Int(*value as i64))
        }
        SourceValue::Bool(value) => Ok(Cell::Int(i64::from(*value))),
        SourceValue::Duration(value) => Ok(Cell::Int(value.num_seconds())),
        SourceValue::String(text) => match text.trim().parse::<i64>() {
            Ok(parsed) => Ok(Cell::Int(parsed)),
            Err(_) => conversion_error(value, column),
        },
        _ => conversion_error(value, column),
    }
}

fn coerce_float(value: &SourceValue, column: &ColumnDefinition) -> IngestResult<Cell> {
    match value {
        SourceValue::Int(value) => Ok(Cell::Float(*value as f64)),
        SourceValue::Float(value) => Ok(Cell::Float(*value)),
        SourceValue::Duration(value) => Ok(Cell::Float(duration_seconds(*value))),
        SourceValue::String(text) => match text.trim().parse::<f64>() {
            Ok(parsed) => Ok(Cell::Float(parsed)),
            Err(_) => conversion_error(value, column),
        },
        _ => conversion_error(value, column),
    }
}

fn coerce_numeric(value: &SourceValue, column: &ColumnDefinition) -> IngestResult<Cell> {
    match value {
        SourceValue::Int(value) => Ok(Cell::Numeric(value.to_string())),
        SourceValue::Float(value) if value.is_finite() => Ok(Cell::Numeric(value.to_string())),
        SourceValue::Duration(value) => Ok(Cell::Numeric(duration_seconds(*value).to_string())),
        SourceValue::String(text) if text.trim().parse::<f64>().is_ok() => {
            Ok(Cell::Numeric(text.trim().to_string()))
        }
        _ => conversion_error(value, column),
    }
}

fn coerce_bool(value: &SourceValue, column: &ColumnDefinition) -> IngestResult<Cell> {
    match value {
        SourceValue::Bool(value) => Ok(Cell::Bool(*value)),
        SourceValue::Int(0) => Ok(Cell::Bool(false)),
        SourceValue::Int(1) => Ok(Cell::Bool(true)),
        SourceValue::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "yes" | "1" => Ok(Cell::Bool(true)),
            "false" | "f" | "no" | "0" => Ok(Cell::Bool(false)),
            _ => conversion_error(value, column),
        },
        _ => conversion_error(value, column),
    }
}

fn coerce_date(value: &SourceValue, column: &ColumnDefinition) -> IngestResult<Cell> {
    match value {
        SourceValue::Date(value) => Ok(Cell::Date(*value)),
        SourceValue::Timestamp(value) => Ok(Cell::Date(value.date_naive())),
        SourceValue::String(text) => match parse_date(text.trim()) {
            Some(date) => Ok(Cell::Date(date)),
            None => conversion_error(value, column),
        },
        _ => conversion_error(value, column),
    }
}

fn coerce_time(value: &SourceValue, column: &ColumnDefinition) -> IngestResult<Cell> {
    match value {
        SourceValue::Timestamp(value) => Ok(Cell::Time(value.time())),
        SourceValue::String(text) => match NaiveTime::parse_from_str(text.trim(), "%H:%M:%S%.f") {
            Ok(time) => Ok(Cell::Time(time)),
            Err(_) => conversion_error(value, column),
        },
        _ => conversion_error(value, column),
    }
}

fn coerce_timestamp(value: &SourceValue, column: &ColumnDefinition) -> IngestResult<Cell> {
    match value {
        SourceValue::Timestamp(value) => Ok(Cell::Timestamp(*value)),
        SourceValue::Date(value) => Ok(midnight(*value)),
        SourceValue::Int(seconds) => match DateTime::from_timestamp(*seconds, 0) {
            Some(timestamp) => Ok(Cell::Timestamp(timestamp)),
            None => conversion_error(value, column),
        },
        SourceValue::String(text) => match parse_timestamp(text.trim()) {
            Some(timestamp) => Ok(Cell::Timestamp(timestamp)),
            None => conversion_error(value, column),
        },
        _ => conversion_error(value, column),
    }
}

fn midnight(date: NaiveDate) -> Cell {
    Cell::Timestamp(date.and_time(NaiveTime::MIN).and_utc())
}

/// Parses ISO dates and the compact `YYYYMMDD` form analytics APIs report.
fn parse_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(text, "%Y%m%d"))
        .ok()
        .or_else(|| parse_timestamp(text).map(|timestamp| timestamp.date_naive()))
}

/// Parses RFC 3339 timestamps, naive `YYYY-MM-DD HH:MM:SS` timestamps taken as UTC, and the
/// compact `YYYYMMDDHH` hour form.
fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(text) {
        return Some(timestamp.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc());
        }
    }

    if text.len() == 10 && text.chars().all(|c| c.is_ascii_digit()) {
        let date = NaiveDate::parse_from_str(&text[..8], "%Y%m%d").ok()?;
        let hour = text[8..].parse::<u32>().ok()?;
        return date.and_hms_opt(hour, 0, 0).map(|naive| naive.and_utc());
    }

    if text.len() == 8 || text.len() == 10 {
        return parse_date_only(text).map(|date| date.and_time(NaiveTime::MIN).and_utc());
    }

    None
}

fn parse_date_only(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(text, "%Y%m%d"))
        .ok()
}
