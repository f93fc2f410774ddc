//! Metrics emitted by the HTTP source connectors.

/// Label for the HTTP status class of a response (`2xx`, `4xx`, `5xx`) or `transport`.
pub const STATUS_LABEL: &str = "status";

/// Counter for HTTP requests sent to a source, labelled by source and status class.
pub const INGEST_SOURCE_REQUESTS_TOTAL: &str = "ingest_source_requests_total";

/// Histogram for the latency of source requests in seconds.
pub const INGEST_SOURCE_REQUEST_DURATION_SECONDS: &str = "ingest_source_request_duration_seconds";
