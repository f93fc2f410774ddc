use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A field holds a value outside of its accepted range.
    #[error("invalid value for `{field}`: {constraint}")]
    InvalidFieldValue { field: String, constraint: String },
    /// A field required by the chosen combination of settings is missing.
    #[error("missing `{field}`: {reason}")]
    MissingField { field: String, reason: String },
    /// The partitioning directive sets only one of its paired fields.
    #[error("invalid partition config for table `{0}`: `field` and `granularity` must both be set if either is set or `require_partition_filter` is true")]
    IncompletePartition(String),
    /// Two tables share the same destination name.
    #[error("table `{0}` is configured more than once")]
    DuplicateTable(String),
    /// No tables are configured.
    #[error("at least one table must be configured")]
    NoTables,
}

impl ValidationError {
    pub(crate) fn invalid(field: impl Into<String>, constraint: impl Into<String>) -> Self {
        Self::InvalidFieldValue {
            field: field.into(),
            constraint: constraint.into(),
        }
    }

    pub(crate) fn missing(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
