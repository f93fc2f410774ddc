use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};

/// A source-native value before it is coerced into a declared column type.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    Duration(TimeDelta),
    Json(serde_json::Value),
}

impl From<&str> for SourceValue {
    fn from(value: &str) -> Self {
        SourceValue::String(value.to_string())
    }
}

impl From<String> for SourceValue {
    fn from(value: String) -> Self {
        SourceValue::String(value)
    }
}

impl From<i64> for SourceValue {
    fn from(value: i64) -> Self {
        SourceValue::Int(value)
    }
}

impl From<f64> for SourceValue {
    fn from(value: f64) -> Self {
        SourceValue::Float(value)
    }
}

impl From<serde_json::Value> for SourceValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Null => SourceValue::Null,
            Value::Bool(value) => SourceValue::Bool(value),
            Value::String(value) => SourceValue::String(value),
            Value::Number(number) => match number.as_i64() {
                Some(value) => SourceValue::Int(value),
                None => number
                    .as_f64()
                    .map(SourceValue::Float)
                    .unwrap_or_else(|| SourceValue::String(number.to_string())),
            },
            value @ (Value::Array(_) | Value::Object(_)) => SourceValue::Json(value),
        }
    }
}

/// Field name to value mapping of a sparse source object. Absent fields are simply missing.
pub type SourceFields = BTreeMap<String, SourceValue>;

/// A record as returned by a source, before normalization.
///
/// `dimensions` are shared by every row the record expands to. Each entry of `metric_sets`
/// produces one row; a record without metric sets produces a single row from its dimensions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceRecord {
    pub dimensions: SourceFields,
    pub metric_sets: Vec<SourceFields>,
}

impl SourceRecord {
    /// Creates a flat record holding all its fields as dimensions.
    pub fn flat(fields: SourceFields) -> Self {
        Self {
            dimensions: fields,
            metric_sets: Vec::new(),
        }
    }

    /// Creates a record whose dimensions fan out over several metric sets.
    pub fn with_metric_sets(dimensions: SourceFields, metric_sets: Vec<SourceFields>) -> Self {
        Self {
            dimensions,
            metric_sets,
        }
    }
}
