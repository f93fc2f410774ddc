use fail::fail_point;

use crate::bail;
use crate::error::{ErrorKind, IngestResult};

pub const SWAP__AFTER_TABLE_PROMOTED: &str = "swap.after_table_promoted";
pub const LOAD__BEFORE_CHUNK_INSERT: &str = "load.before_chunk_insert";

pub fn ingest_fail_point(name: &str) -> IngestResult<()> {
    fail_point!(name, |parameter| {
        let mut error_kind = ErrorKind::WithNoRetry;
        if let Some(parameter) = parameter {
            error_kind = match parameter.as_str() {
                "no_retry" => ErrorKind::WithNoRetry,
                "retry" => ErrorKind::WithRetry,
                _ => ErrorKind::WithNoRetry,
            }
        }

        bail!(
            error_kind,
            "An error occurred in a fail point",
            format!("The failpoint '{name}' returned an error")
        );
    });

    Ok(())
}
