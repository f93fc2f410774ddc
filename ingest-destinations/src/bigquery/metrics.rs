use metrics::{Unit, describe_counter, describe_histogram};
use std::sync::Once;

static REGISTER: Once = Once::new();

/// BigQuery-specific: duration of a `tabledata.insertAll` request.
pub const BQ_INSERT_ALL_DURATION_SECONDS: &str = "bq_insert_all_duration_seconds";

/// BigQuery-specific: rows rejected by `tabledata.insertAll`.
pub const BQ_INSERT_ALL_ROW_ERRORS_TOTAL: &str = "bq_insert_all_row_errors_total";

/// BigQuery-specific: statements sent through the jobs API.
pub const BQ_QUERIES_TOTAL: &str = "bq_queries_total";

/// Register BigQuery-specific metrics. Safe to call multiple times.
pub fn register_metrics() {
    REGISTER.call_once(|| {
        describe_histogram!(
            BQ_INSERT_ALL_DURATION_SECONDS,
            Unit::Seconds,
            "Time taken in seconds by a BigQuery streaming insert"
        );
        describe_counter!(
            BQ_INSERT_ALL_ROW_ERRORS_TOTAL,
            Unit::Count,
            "Rows rejected by BigQuery streaming inserts"
        );
        describe_counter!(
            BQ_QUERIES_TOTAL,
            Unit::Count,
            "Statements executed through the BigQuery jobs API"
        );
    });
}
