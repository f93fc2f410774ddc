//! Metrics definitions for load run monitoring.

/// Label for the destination table name in metrics.
pub const TABLE_NAME_LABEL: &str = "table_name";

/// Label for the source name in metrics.
pub const SOURCE_LABEL: &str = "source";

/// Label for the load strategy in metrics.
pub const STRATEGY_LABEL: &str = "strategy";

/// Label for the run outcome in metrics.
pub const OUTCOME_LABEL: &str = "outcome";

// Extraction metrics

/// Counter for source pages fetched successfully.
pub const INGEST_PAGES_FETCHED_TOTAL: &str = "ingest_pages_fetched_total";

/// Counter for failed page fetch attempts that were retried.
pub const INGEST_PAGE_RETRIES_TOTAL: &str = "ingest_page_retries_total";

/// Counter for rows produced by the normalizer.
pub const INGEST_ROWS_EXTRACTED_TOTAL: &str = "ingest_rows_extracted_total";

// Load metrics

/// Counter for rows accepted by the warehouse.
pub const INGEST_ROWS_INSERTED_TOTAL: &str = "ingest_rows_inserted_total";

/// Counter for failed chunk insert attempts that were retried.
pub const INGEST_INSERT_RETRIES_TOTAL: &str = "ingest_insert_retries_total";

/// Counter for columns added to staged tables.
pub const INGEST_COLUMNS_ADDED_TOTAL: &str = "ingest_columns_added_total";

/// Histogram for the duration of a whole table load in seconds.
pub const INGEST_TABLE_LOAD_DURATION_SECONDS: &str = "ingest_table_load_duration_seconds";

// Swap metrics

/// Counter for tables promoted into the live namespace.
pub const INGEST_TABLES_SWAPPED_TOTAL: &str = "ingest_tables_swapped_total";

/// Counter for finished runs, labelled by outcome.
pub const INGEST_RUNS_TOTAL: &str = "ingest_runs_total";
