//! Testing utilities for load runs.
//!
//! [`source::ScriptedSource`] serves a deterministic number of pages per sub-window and can be
//! told to fail upcoming fetches. [`warehouse::FaultyWarehouse`] wraps any warehouse, counts the
//! calls per operation and injects failures into chosen calls, which is how retry and swap
//! failure scenarios are exercised against [`crate::warehouse::memory::MemoryWarehouse`].

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};

use crate::types::{
    Cell, ColumnDefinition, DataType, NormalizedRow, SchemaContract, SourceRecord, SourceValue,
};

#[cfg(feature = "failpoints")]
pub mod failpoints;
pub mod source;
pub mod warehouse;

pub use source::ScriptedSource;
pub use warehouse::{FaultyWarehouse, WarehouseOperation};

/// Returns the contract of the records served by [`ScriptedSource`].
pub fn test_contract() -> SchemaContract {
    SchemaContract::new(vec![
        ColumnDefinition::new("id", DataType::String).required(),
        ColumnDefinition::new("date", DataType::Date),
        ColumnDefinition::new("page", DataType::Int64),
        ColumnDefinition::new("clicks", DataType::Int64),
    ])
    .unwrap()
}

/// Builds a flat source record from field/value pairs.
pub fn record<I, K, V>(fields: I) -> SourceRecord
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<SourceValue>,
{
    SourceRecord::flat(
        fields
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect::<BTreeMap<_, _>>(),
    )
}

/// Builds a normalized row from column/cell pairs.
pub fn row<I, K>(values: I) -> NormalizedRow
where
    I: IntoIterator<Item = (K, Cell)>,
    K: Into<String>,
{
    values
        .into_iter()
        .map(|(column, cell)| (column.into(), cell))
        .collect()
}

/// Returns midnight UTC of the given day.
pub fn day(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
}
