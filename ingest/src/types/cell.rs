use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Column types a schema contract can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataType {
    String,
    Int64,
    Float64,
    Numeric,
    Bool,
    Date,
    Time,
    Timestamp,
    Json,
}

impl DataType {
    /// Returns the canonical upper-case name of the type.
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::String => "STRING",
            DataType::Int64 => "INT64",
            DataType::Float64 => "FLOAT64",
            DataType::Numeric => "NUMERIC",
            DataType::Bool => "BOOL",
            DataType::Date => "DATE",
            DataType::Time => "TIME",
            DataType::Timestamp => "TIMESTAMP",
            DataType::Json => "JSON",
        }
    }

    /// Returns `true` for types whose values are calendar or clock based.
    pub fn is_temporal(&self) -> bool {
        matches!(self, DataType::Date | DataType::Time | DataType::Timestamp)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single typed value of a normalized row.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Arbitrary precision decimal kept in its textual form.
    Numeric(String),
    String(String),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(DateTime<Utc>),
    Json(serde_json::Value),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    /// Renders the cell as a JSON value, temporal values as ISO-8601 strings.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;

        match self {
            Cell::Null => Value::Null,
            Cell::Bool(value) => Value::Bool(*value),
            Cell::Int(value) => Value::from(*value),
            Cell::Float(value) => serde_json::Number::from_f64(*value)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Cell::Numeric(value) | Cell::String(value) => Value::String(value.clone()),
            Cell::Date(value) => Value::String(value.format("%Y-%m-%d").to_string()),
            Cell::Time(value) => Value::String(value.format("%H:%M:%S%.f").to_string()),
            Cell::Timestamp(value) => Value::String(value.to_rfc3339()),
            Cell::Json(value) => value.clone(),
        }
    }
}

/// Orders cells of the same variant, used to compute watermarks in memory.
impl PartialOrd for Cell {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (Cell::Bool(a), Cell::Bool(b)) => a.partial_cmp(b),
            (Cell::Int(a), Cell::Int(b)) => a.partial_cmp(b),
            (Cell::Float(a), Cell::Float(b)) => a.partial_cmp(b),
            (Cell::String(a), Cell::String(b)) => a.partial_cmp(b),
            (Cell::Date(a), Cell::Date(b)) => a.partial_cmp(b),
            (Cell::Time(a), Cell::Time(b)) => a.partial_cmp(b),
            (Cell::Timestamp(a), Cell::Timestamp(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_temporal_cells_render_as_iso_strings() {
        let date = Cell::Date(NaiveDate::from_ymd_opt(2024, 3, 10).unwrap());
        let timestamp = Cell::Timestamp(Utc.with_ymd_and_hms(2024, 3, 10, 5, 0, 0).unwrap());

        assert_eq!(date.to_json(), serde_json::json!("2024-03-10"));
        assert_eq!(timestamp.to_json(), serde_json::json!("2024-03-10T05:00:00+00:00"));
    }

    #[test]
    fn test_non_finite_float_renders_as_null() {
        assert_eq!(Cell::Float(f64::NAN).to_json(), serde_json::Value::Null);
    }

    #[test]
    fn test_cells_of_different_variants_are_unordered() {
        assert_eq!(Cell::Int(1).partial_cmp(&Cell::String("1".to_string())), None);
        assert!(Cell::Int(1) < Cell::Int(2));
    }
}
