use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use ingest::bail;
use ingest::error::{ErrorKind, IngestResult};
use ingest::types::{
    Cell, ColumnDefinition, DataType, NormalizedRow, PartitionSpec, SchemaContract,
};
use ingest::warehouse::TableRef;
use ingest_config::shared::PartitionGranularity;
use serde_json::Value;
use uuid::Uuid;

use crate::bigquery::validation::quote_column;

/// Converts a column type into its BigQuery equivalent.
pub fn data_type_to_bigquery(data_type: DataType) -> &'static str {
    match data_type {
        DataType::String => "string",
        DataType::Int64 => "int64",
        DataType::Float64 => "float64",
        DataType::Numeric => "bignumeric",
        DataType::Bool => "bool",
        DataType::Date => "date",
        DataType::Time => "time",
        DataType::Timestamp => "timestamp",
        DataType::Json => "json",
    }
}

/// Converts a type name reported by `INFORMATION_SCHEMA.COLUMNS` into a column type.
///
/// Parameterized types such as `STRING(10)` or `NUMERIC(10, 2)` map to their base type and
/// anything without a counterpart, like arrays or structs, is read as a string.
pub fn bigquery_to_data_type(type_name: &str) -> DataType {
    let base = type_name
        .split(['(', '<'])
        .next()
        .unwrap_or(type_name)
        .trim()
        .to_ascii_uppercase();

    match base.as_str() {
        "INT64" | "INT" | "INTEGER" | "SMALLINT" | "BIGINT" | "TINYINT" | "BYTEINT" => {
            DataType::Int64
        }
        "FLOAT64" | "FLOAT" => DataType::Float64,
        "NUMERIC" | "BIGNUMERIC" | "DECIMAL" | "BIGDECIMAL" => DataType::Numeric,
        "BOOL" | "BOOLEAN" => DataType::Bool,
        "DATE" => DataType::Date,
        "TIME" => DataType::Time,
        "TIMESTAMP" | "DATETIME" => DataType::Timestamp,
        "JSON" => DataType::Json,
        _ => DataType::String,
    }
}

/// Generates the SQL specification of one column.
pub fn column_spec(column: &ColumnDefinition) -> IngestResult<String> {
    let mut spec = format!(
        "{} {}",
        quote_column(&column.name)?,
        data_type_to_bigquery(column.data_type)
    );

    if !column.nullable {
        spec.push_str(" not null");
    }

    Ok(spec)
}

/// Builds the column list of a `create table` statement.
pub fn create_columns_spec(contract: &SchemaContract) -> IngestResult<String> {
    let columns = contract
        .columns()
        .iter()
        .map(column_spec)
        .collect::<IngestResult<Vec<_>>>()?
        .join(", ");

    Ok(format!("({columns})"))
}

/// Builds the `partition by` and `options` clauses of a `create table` statement.
///
/// Date columns partition by day, month or year, timestamp columns additionally by hour.
pub fn partition_clause(partition: &PartitionSpec, contract: &SchemaContract) -> IngestResult<String> {
    let Some(column) = contract.column(&partition.field) else {
        bail!(
            ErrorKind::ConfigError,
            "Partition field is not a column",
            format!("partition field `{}` is not declared", partition.field)
        );
    };

    let field = quote_column(&column.name)?;
    let expression = match (column.data_type, partition.granularity) {
        (DataType::Date, PartitionGranularity::Day) => field,
        (DataType::Date, PartitionGranularity::Month) => format!("date_trunc({field}, month)"),
        (DataType::Date, PartitionGranularity::Year) => format!("date_trunc({field}, year)"),
        (DataType::Timestamp, granularity) => format!(
            "timestamp_trunc({field}, {})",
            granularity.as_str().to_ascii_lowercase()
        ),
        (data_type, granularity) => bail!(
            ErrorKind::ConfigError,
            "Unsupported partition directive",
            format!(
                "column `{}` of type {data_type} cannot be partitioned by {}",
                column.name,
                granularity.as_str()
            )
        ),
    };

    let mut clause = format!("partition by {expression}");
    if partition.require_partition_filter {
        clause.push_str(" options (require_partition_filter = true)");
    }

    Ok(clause)
}

/// Encodes a cell the way `tabledata.insertAll` expects it.
pub fn cell_to_insert_value(cell: &Cell) -> Value {
    match cell {
        Cell::Float(value) if value.is_nan() => Value::String("NaN".to_string()),
        Cell::Float(value) if value.is_infinite() && *value > 0.0 => {
            Value::String("Infinity".to_string())
        }
        Cell::Float(value) if value.is_infinite() => Value::String("-Infinity".to_string()),
        Cell::Timestamp(value) => Value::String(value.format("%Y-%m-%d %H:%M:%S%.6f UTC").to_string()),
        // JSON columns are streamed as their serialized text.
        Cell::Json(value) => Value::String(value.to_string()),
        other => other.to_json(),
    }
}

/// Encodes a row as a JSON object keyed by column name.
pub fn row_to_insert_object(row: &NormalizedRow) -> serde_json::Map<String, Value> {
    row.iter()
        .map(|(column, cell)| (column.to_string(), cell_to_insert_value(cell)))
        .collect()
}

/// Returns the `insertId` of a row.
///
/// The id is derived from the destination and the row content, so that a retried chunk is
/// deduplicated by BigQuery on a best-effort basis.
pub fn insert_id(table: &TableRef, object: &serde_json::Map<String, Value>) -> String {
    let mut name = format!("{}.{}\n", table.namespace, table.table).into_bytes();
    name.extend_from_slice(Value::Object(object.clone()).to_string().as_bytes());

    Uuid::new_v5(&Uuid::NAMESPACE_OID, &name).to_string()
}

/// Statements merging a delta table into a staged table by key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeStatements {
    /// Deletes the target rows whose key appears in the delta table.
    pub delete: String,
    /// Inserts the latest delta row of every key.
    pub insert: String,
}

/// Builds the statements merging `delta` into `target`, both fully qualified table names.
///
/// Keys are compared with `is not distinct from` so that null key values match each other. Of
/// several delta rows sharing a key, the one with the highest `sequence_column` wins. Only
/// `columns` are copied, the sequence column stays behind.
pub fn merge_statements(
    target: &str,
    delta: &str,
    columns: &[String],
    key_columns: &[String],
    sequence_column: &str,
) -> IngestResult<MergeStatements> {
    if key_columns.is_empty() {
        bail!(
            ErrorKind::InvalidData,
            "No key columns given",
            format!("cannot merge `{delta}` into `{target}` without key columns")
        );
    }

    let keys = key_columns
        .iter()
        .map(|column| quote_column(column))
        .collect::<IngestResult<Vec<_>>>()?;
    let columns = columns
        .iter()
        .map(|column| quote_column(column))
        .collect::<IngestResult<Vec<_>>>()?
        .join(", ");
    let sequence_column = quote_column(sequence_column)?;

    let matches = keys
        .iter()
        .map(|key| format!("t.{key} is not distinct from d.{key}"))
        .collect::<Vec<_>>()
        .join(" and ");

    Ok(MergeStatements {
        delete: format!(
            "delete from {target} t where exists (select 1 from {delta} d where {matches})"
        ),
        insert: format!(
            "insert into {target} ({columns}) select {columns} from {delta} where true \
             qualify row_number() over (partition by {} order by {sequence_column} desc) = 1",
            keys.join(", ")
        ),
    })
}

/// Parses a watermark read back as text into a cell of `data_type`.
pub fn parse_watermark(data_type: DataType, text: &str) -> IngestResult<Cell> {
    let cell = match data_type {
        DataType::Int64 => Cell::Int(text.parse()?),
        DataType::Float64 => Cell::Float(text.parse()?),
        DataType::Numeric => Cell::Numeric(text.to_string()),
        DataType::Bool => Cell::Bool(text.eq_ignore_ascii_case("true")),
        DataType::Date => Cell::Date(NaiveDate::parse_from_str(text, "%Y-%m-%d")?),
        DataType::Time => Cell::Time(NaiveTime::parse_from_str(text, "%H:%M:%S%.f")?),
        DataType::Timestamp => {
            let micros: i64 = text.parse()?;
            match DateTime::<Utc>::from_timestamp_micros(micros) {
                Some(timestamp) => Cell::Timestamp(timestamp),
                None => bail!(
                    ErrorKind::ConversionError,
                    "Watermark out of range",
                    format!("{micros} microseconds since epoch is not a valid timestamp")
                ),
            }
        }
        DataType::String | DataType::Json => Cell::String(text.to_string()),
    };

    Ok(cell)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn contract() -> SchemaContract {
        SchemaContract::new(vec![
            ColumnDefinition::new("id", DataType::String).required(),
            ColumnDefinition::new("day", DataType::Date),
            ColumnDefinition::new("seen_at", DataType::Timestamp),
            ColumnDefinition::new("clicks", DataType::Int64),
        ])
        .unwrap()
    }

    fn partition(field: &str, granularity: PartitionGranularity) -> PartitionSpec {
        PartitionSpec {
            field: field.to_string(),
            granularity,
            require_partition_filter: false,
        }
    }

    #[test]
    fn test_columns_spec() {
        assert_eq!(
            create_columns_spec(&contract()).unwrap(),
            "(`id` string not null, `day` date, `seen_at` timestamp, `clicks` int64)"
        );
    }

    #[test]
    fn test_information_schema_types() {
        assert_eq!(bigquery_to_data_type("INT64"), DataType::Int64);
        assert_eq!(bigquery_to_data_type("NUMERIC(10, 2)"), DataType::Numeric);
        assert_eq!(bigquery_to_data_type("STRING(20)"), DataType::String);
        assert_eq!(bigquery_to_data_type("DATETIME"), DataType::Timestamp);
        assert_eq!(bigquery_to_data_type("ARRAY<INT64>"), DataType::String);
        for data_type in [DataType::Date, DataType::Json, DataType::Bool, DataType::Float64] {
            assert_eq!(
                bigquery_to_data_type(data_type_to_bigquery(data_type)),
                data_type
            );
        }
    }

    #[test]
    fn test_partition_clauses() {
        let contract = contract();

        assert_eq!(
            partition_clause(&partition("day", PartitionGranularity::Day), &contract).unwrap(),
            "partition by `day`"
        );
        assert_eq!(
            partition_clause(&partition("day", PartitionGranularity::Month), &contract).unwrap(),
            "partition by date_trunc(`day`, month)"
        );

        let mut hourly = partition("seen_at", PartitionGranularity::Hour);
        hourly.require_partition_filter = true;
        assert_eq!(
            partition_clause(&hourly, &contract).unwrap(),
            "partition by timestamp_trunc(`seen_at`, hour) options (require_partition_filter = true)"
        );
    }

    #[test]
    fn test_invalid_partition_directives() {
        let contract = contract();

        let err = partition_clause(&partition("day", PartitionGranularity::Hour), &contract)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigError);

        let err = partition_clause(&partition("clicks", PartitionGranularity::Day), &contract)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigError);

        let err = partition_clause(&partition("missing", PartitionGranularity::Day), &contract)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }

    #[test]
    fn test_insert_values() {
        let timestamp = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();

        assert_eq!(
            cell_to_insert_value(&Cell::Timestamp(timestamp)),
            Value::String("2024-01-02 03:04:05.000000 UTC".to_string())
        );
        assert_eq!(
            cell_to_insert_value(&Cell::Float(f64::NAN)),
            Value::String("NaN".to_string())
        );
        assert_eq!(
            cell_to_insert_value(&Cell::Json(serde_json::json!({"a": 1}))),
            Value::String(r#"{"a":1}"#.to_string())
        );
    }

    #[test]
    fn test_insert_ids_are_deterministic() {
        let table = TableRef::new("live_next", "events");
        let row = NormalizedRow::from_iter([
            ("id".to_string(), Cell::String("a".to_string())),
            ("clicks".to_string(), Cell::Int(1)),
        ]);
        let other = NormalizedRow::from_iter([
            ("id".to_string(), Cell::String("a".to_string())),
            ("clicks".to_string(), Cell::Int(2)),
        ]);

        let first = insert_id(&table, &row_to_insert_object(&row));

        assert_eq!(first, insert_id(&table, &row_to_insert_object(&row)));
        assert_ne!(first, insert_id(&table, &row_to_insert_object(&other)));
        assert_ne!(
            first,
            insert_id(&TableRef::new("live_next", "other"), &row_to_insert_object(&row))
        );
    }

    #[test]
    fn test_merge_statements() {
        let statements = merge_statements(
            "`p.live_next.ads`",
            "`p.live_next.ads__delta`",
            &["ad_id".to_string(), "day".to_string(), "clicks".to_string()],
            &["ad_id".to_string(), "day".to_string()],
            "_ingest_sequence",
        )
        .unwrap();

        assert_eq!(
            statements.delete,
            "delete from `p.live_next.ads` t where exists (select 1 from `p.live_next.ads__delta` d \
             where t.`ad_id` is not distinct from d.`ad_id` and t.`day` is not distinct from d.`day`)"
        );
        assert_eq!(
            statements.insert,
            "insert into `p.live_next.ads` (`ad_id`, `day`, `clicks`) select `ad_id`, `day`, `clicks` \
             from `p.live_next.ads__delta` where true qualify row_number() over \
             (partition by `ad_id`, `day` order by `_ingest_sequence` desc) = 1"
        );
    }

    #[test]
    fn test_merge_statements_need_key_columns() {
        let err = merge_statements("`p.d.t`", "`p.d.t__delta`", &["id".to_string()], &[], "seq")
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn test_parse_watermark() {
        assert_eq!(
            parse_watermark(DataType::Date, "2024-01-07").unwrap(),
            Cell::Date(NaiveDate::from_ymd_opt(2024, 1, 7).unwrap())
        );
        assert_eq!(
            parse_watermark(DataType::Timestamp, "1704067200000000").unwrap(),
            Cell::Timestamp(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_watermark(DataType::Int64, "42").unwrap(), Cell::Int(42));
        assert_eq!(
            parse_watermark(DataType::Int64, "x").map_err(|err| err.kind()),
            Err(ErrorKind::ConversionError)
        );
    }
}
