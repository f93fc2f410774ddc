use crate::error::{ErrorKind, IngestError};

/// Retry behavior for a classified error.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RetryDirective {
    /// The operation can be retried with bounded backoff.
    Retry,
    /// The operation should not be retried.
    NoRetry,
}

/// Policy describing how an [`IngestError`] should be handled by retry loops.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ErrorHandlingPolicy {
    retry_directive: RetryDirective,
    solution: Option<&'static str>,
}

impl ErrorHandlingPolicy {
    const fn new(retry_directive: RetryDirective, solution: Option<&'static str>) -> Self {
        Self {
            retry_directive,
            solution,
        }
    }

    /// Returns the retry directive for this policy.
    pub fn retry_directive(&self) -> RetryDirective {
        self.retry_directive
    }

    /// Returns an optional operator-facing solution message.
    pub fn solution(&self) -> Option<&'static str> {
        self.solution
    }
}

/// Builds an [`ErrorHandlingPolicy`] from an [`IngestError`] to decide in a unified way whether
/// an operation is retried.
pub fn build_error_handling_policy(error: &IngestError) -> ErrorHandlingPolicy {
    match error.kind() {
        // Transient source and warehouse conditions. Keep this list narrow, everything else fails
        // the run immediately.
        ErrorKind::SourceConnectionFailed
        | ErrorKind::SourceRateLimited
        | ErrorKind::SourceRequestFailed
        | ErrorKind::DestinationConnectionFailed
        | ErrorKind::DestinationTableNotReady
        | ErrorKind::DestinationJobPending => ErrorHandlingPolicy::new(RetryDirective::Retry, None),

        ErrorKind::ConfigError | ErrorKind::InvalidWindow => ErrorHandlingPolicy::new(
            RetryDirective::NoRetry,
            Some("Fix the table configuration and start a new run."),
        ),
        ErrorKind::SchemaTypeConflict => ErrorHandlingPolicy::new(
            RetryDirective::NoRetry,
            Some(
                "Align the declared column type with the live table, or drop the live column before the next run.",
            ),
        ),
        ErrorKind::WatermarkColumnMissing => ErrorHandlingPolicy::new(
            RetryDirective::NoRetry,
            Some("Declare a watermark column that exists in the live table."),
        ),
        ErrorKind::SwapPartialFailure => ErrorHandlingPolicy::new(
            RetryDirective::NoRetry,
            Some(
                "The live namespace may be partially updated. Rerun the whole load, staging recreation and per-table promotion are idempotent.",
            ),
        ),
        ErrorKind::AuthenticationError => ErrorHandlingPolicy::new(
            RetryDirective::NoRetry,
            Some("Verify the access token or service account key."),
        ),
        ErrorKind::Cancelled => ErrorHandlingPolicy::new(RetryDirective::NoRetry, None),

        // Special handling for fault injection tests.
        #[cfg(feature = "failpoints")]
        ErrorKind::WithNoRetry => {
            ErrorHandlingPolicy::new(RetryDirective::NoRetry, Some("Cannot retry this error."))
        }
        #[cfg(feature = "failpoints")]
        ErrorKind::WithRetry => ErrorHandlingPolicy::new(
            RetryDirective::Retry,
            Some("Will automatically retry after the configured delay."),
        ),

        _ => ErrorHandlingPolicy::new(
            RetryDirective::NoRetry,
            Some(
                "There is no single prescribed solution for this error. Inspect the error detail and rerun the load once the cause is fixed.",
            ),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn err(kind: ErrorKind) -> IngestError {
        IngestError::from((kind, "test error"))
    }

    #[test]
    fn classifies_table_not_ready_as_retry() {
        let policy = build_error_handling_policy(&err(ErrorKind::DestinationTableNotReady));
        assert_eq!(policy.retry_directive(), RetryDirective::Retry);
        assert_eq!(policy.solution(), None);
    }

    #[test]
    fn classifies_rate_limit_as_retry() {
        let policy = build_error_handling_policy(&err(ErrorKind::SourceRateLimited));
        assert_eq!(policy.retry_directive(), RetryDirective::Retry);
    }

    #[test]
    fn classifies_type_conflict_as_no_retry() {
        let policy = build_error_handling_policy(&err(ErrorKind::SchemaTypeConflict));
        assert_eq!(policy.retry_directive(), RetryDirective::NoRetry);
        assert!(policy.solution().is_some());
    }

    #[test]
    fn classifies_rejected_request_as_no_retry() {
        let policy = build_error_handling_policy(&err(ErrorKind::SourceRequestRejected));
        assert_eq!(policy.retry_directive(), RetryDirective::NoRetry);
        assert!(policy.solution().is_some());
    }
}
