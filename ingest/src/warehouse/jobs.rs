use std::time::Duration;

use tracing::{debug, warn};

use crate::bail;
use crate::error::{ErrorKind, IngestResult};
use crate::policy::{RetryDirective, build_error_handling_policy};
use crate::warehouse::{JobHandle, JobState, Warehouse};

/// Bounds of a job polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobPolling {
    pub interval: Duration,
    pub max_polls: u32,
}

impl JobPolling {
    pub fn new(interval: Duration, max_polls: u32) -> Self {
        Self {
            interval,
            max_polls: max_polls.max(1),
        }
    }
}

/// Sleeps and polls `job` until it is done.
///
/// Pending and running jobs are polled again. A failed job fails with
/// [`ErrorKind::DestinationJobFailed`], an unrecognized state likewise, and a job still in
/// progress after `max_polls` polls fails with [`ErrorKind::DestinationJobPending`]. Transient
/// polling errors use up a poll and are otherwise ignored.
pub async fn wait_for_job<W>(warehouse: &W, job: &JobHandle, polling: JobPolling) -> IngestResult<()>
where
    W: Warehouse,
{
    for poll in 1..=polling.max_polls {
        tokio::time::sleep(polling.interval).await;

        let state = match warehouse.poll_job(job).await {
            Ok(state) => state,
            Err(err)
                if build_error_handling_policy(&err).retry_directive() == RetryDirective::Retry =>
            {
                warn!(job = %job, poll, error = %err, "transient failure while polling job");
                continue;
            }
            Err(err) => return Err(err),
        };

        match state {
            JobState::Done => {
                debug!(job = %job, polls = poll, "job done");
                return Ok(());
            }
            JobState::Pending | JobState::Running => continue,
            JobState::Failed(reason) => {
                bail!(
                    ErrorKind::DestinationJobFailed,
                    "Warehouse job failed",
                    format!("job `{job}` failed: {reason}")
                );
            }
            JobState::Unknown(state) => {
                bail!(
                    ErrorKind::DestinationJobFailed,
                    "Warehouse job in unexpected state",
                    format!("job `{job}` reported state `{state}`")
                );
            }
        }
    }

    bail!(
        ErrorKind::DestinationJobPending,
        "Warehouse job did not finish in time",
        format!("job `{job}` was still in progress after {} polls", polling.max_polls)
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ColumnDefinition, DataType, SchemaContract};
    use crate::warehouse::TableRef;
    use crate::warehouse::memory::MemoryWarehouse;

    async fn start_copy(warehouse: &MemoryWarehouse) -> JobHandle {
        let contract =
            SchemaContract::new(vec![ColumnDefinition::new("id", DataType::Int64)]).unwrap();
        warehouse.create_namespace("a").await.unwrap();
        warehouse.create_table("a", "t", &contract, None).await.unwrap();

        warehouse
            .copy_table(&TableRef::new("a", "t"), &TableRef::new("a", "u"))
            .await
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_done() {
        let warehouse = MemoryWarehouse::new();
        warehouse.set_copy_job_polls(3).await;
        let job = start_copy(&warehouse).await;

        let result = wait_for_job(
            &warehouse,
            &job,
            JobPolling::new(Duration::from_millis(100), 10),
        )
        .await;

        assert!(result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_gives_up_after_max_polls() {
        let warehouse = MemoryWarehouse::new();
        warehouse.set_copy_job_polls(5).await;
        let job = start_copy(&warehouse).await;

        let result = wait_for_job(
            &warehouse,
            &job,
            JobPolling::new(Duration::from_millis(100), 3),
        )
        .await;

        assert_eq!(
            result.map_err(|err| err.kind()),
            Err(ErrorKind::DestinationJobPending)
        );
    }
}
