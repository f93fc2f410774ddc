//! Promotion of a staged load into the live namespace.
//!
//! The staging namespace is recreated at kickoff and destroyed once the run finishes, whether it
//! succeeded or not. The final swap is the only place that mutates the live namespace: every
//! staged table replaces its live counterpart through a delete followed by a copy job, and live
//! tables without a staged counterpart are removed.

use metrics::counter;
use tracing::{error, info, warn};

use crate::error::{ErrorKind, IngestError, IngestResult};
#[cfg(feature = "failpoints")]
use crate::failpoints::{SWAP__AFTER_TABLE_PROMOTED, ingest_fail_point};
use crate::ingest_error;
use crate::metrics::{INGEST_TABLES_SWAPPED_TOTAL, TABLE_NAME_LABEL};
use crate::warehouse::jobs::{JobPolling, wait_for_job};
use crate::warehouse::{TableRef, Warehouse};

/// Outcome of a completed final swap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwapReport {
    /// Tables copied from staging into the live namespace, in promotion order.
    pub promoted: Vec<String>,
    /// Live tables removed because staging did not hold them.
    pub removed: Vec<String>,
}

/// Coordinates the staging namespace of a run with its live namespace.
#[derive(Debug)]
pub struct SwapCoordinator<'a, W> {
    warehouse: &'a W,
    live_namespace: String,
    staging_namespace: String,
    job_polling: JobPolling,
}

impl<'a, W> SwapCoordinator<'a, W>
where
    W: Warehouse,
{
    pub fn new(
        warehouse: &'a W,
        live_namespace: impl Into<String>,
        staging_namespace: impl Into<String>,
        job_polling: JobPolling,
    ) -> Self {
        Self {
            warehouse,
            live_namespace: live_namespace.into(),
            staging_namespace: staging_namespace.into(),
            job_polling,
        }
    }

    pub fn live_namespace(&self) -> &str {
        &self.live_namespace
    }

    pub fn staging_namespace(&self) -> &str {
        &self.staging_namespace
    }

    /// Deletes any staging namespace left behind by an earlier run and creates it fresh.
    pub async fn kickoff(&self) -> IngestResult<()> {
        self.delete_staging().await?;
        self.warehouse
            .create_namespace(&self.staging_namespace)
            .await?;

        info!(namespace = %self.staging_namespace, "staging namespace ready");

        Ok(())
    }

    /// Promotes every staged table into the live namespace and deletes the staging namespace.
    ///
    /// A failure after the live namespace was first modified is reported as
    /// [`ErrorKind::SwapPartialFailure`] aggregating the cause. Rerunning the whole load is safe
    /// since staging is recreated and each table swap is a delete followed by a copy.
    pub async fn finalize(&self) -> IngestResult<SwapReport> {
        let mut report = SwapReport::default();
        let mut live_touched = false;

        match self.promote_all(&mut report, &mut live_touched).await {
            Ok(()) => {
                info!(
                    live = %self.live_namespace,
                    promoted = report.promoted.len(),
                    removed = report.removed.len(),
                    "swap completed"
                );
                Ok(report)
            }
            Err(err) if !live_touched => Err(err),
            Err(err) => {
                error!(
                    live = %self.live_namespace,
                    promoted = ?report.promoted,
                    removed = ?report.removed,
                    error = %err,
                    "swap failed after the live namespace was partially updated"
                );
                let partial = ingest_error!(
                    ErrorKind::SwapPartialFailure,
                    "Live namespace partially updated",
                    format!(
                        "promoted [{}] and removed [{}] in `{}` before failing",
                        report.promoted.join(", "),
                        report.removed.join(", "),
                        self.live_namespace
                    )
                );
                Err(IngestError::from(vec![partial, err]))
            }
        }
    }

    /// Deletes the staging namespace without touching the live namespace.
    ///
    /// Failures are logged and otherwise ignored since the next kickoff deletes staging again.
    pub async fn abort(&self) {
        if let Err(err) = self.delete_staging().await {
            warn!(
                namespace = %self.staging_namespace,
                error = %err,
                "failed to delete staging namespace after an aborted run"
            );
        }
    }

    async fn promote_all(
        &self,
        report: &mut SwapReport,
        live_touched: &mut bool,
    ) -> IngestResult<()> {
        let staged = self.warehouse.list_tables(&self.staging_namespace).await?;

        match self.warehouse.create_namespace(&self.live_namespace).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::DestinationNamespaceAlreadyExists => {}
            Err(err) => return Err(err),
        }
        let live = self.warehouse.list_tables(&self.live_namespace).await?;

        for table in &staged {
            if live.contains(table) {
                self.warehouse
                    .delete_table(&self.live_namespace, table)
                    .await?;
                *live_touched = true;
            }

            let job = self
                .warehouse
                .copy_table(
                    &TableRef::new(&self.staging_namespace, table),
                    &TableRef::new(&self.live_namespace, table),
                )
                .await?;
            *live_touched = true;
            wait_for_job(self.warehouse, &job, self.job_polling).await?;

            info!(table = %table, live = %self.live_namespace, "promoted staged table");
            counter!(INGEST_TABLES_SWAPPED_TOTAL, TABLE_NAME_LABEL => table.clone()).increment(1);
            report.promoted.push(table.clone());

            #[cfg(feature = "failpoints")]
            ingest_fail_point(SWAP__AFTER_TABLE_PROMOTED)?;
        }

        for table in live.difference(&staged) {
            self.warehouse
                .delete_table(&self.live_namespace, table)
                .await?;
            *live_touched = true;
            info!(table = %table, live = %self.live_namespace, "removed table absent from staging");
            report.removed.push(table.clone());
        }

        self.warehouse
            .delete_namespace(&self.staging_namespace, true)
            .await
    }

    async fn delete_staging(&self) -> IngestResult<()> {
        match self
            .warehouse
            .delete_namespace(&self.staging_namespace, true)
            .await
        {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::DestinationNamespaceMissing => Ok(()),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use super::*;
    use crate::test_utils::warehouse::{FaultyWarehouse, WarehouseOperation};
    use crate::types::{Cell, ColumnDefinition, DataType, NormalizedRow};
    use crate::warehouse::memory::{MemoryTable, MemoryWarehouse};

    fn table(marker: &str) -> MemoryTable {
        MemoryTable {
            columns: vec![ColumnDefinition::new("marker", DataType::String)],
            rows: vec![NormalizedRow::from_iter([(
                "marker".to_string(),
                Cell::String(marker.to_string()),
            )])],
            partition: None,
        }
    }

    fn namespace(tables: &[(&str, &str)]) -> BTreeMap<String, MemoryTable> {
        tables
            .iter()
            .map(|(name, marker)| (name.to_string(), table(marker)))
            .collect()
    }

    fn coordinator(warehouse: &MemoryWarehouse) -> SwapCoordinator<'_, MemoryWarehouse> {
        SwapCoordinator::new(
            warehouse,
            "live",
            "live_next",
            JobPolling::new(Duration::from_millis(100), 10),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_kickoff_replaces_leftover_staging() {
        let warehouse = MemoryWarehouse::new();
        warehouse
            .seed_namespace("live_next", namespace(&[("stale", "old")]))
            .await;

        coordinator(&warehouse).kickoff().await.unwrap();

        assert!(warehouse.namespace_exists("live_next").await);
        assert!(warehouse.list_tables("live_next").await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_finalize_makes_staging_authoritative() {
        let warehouse = MemoryWarehouse::new();
        warehouse
            .seed_namespace("live", namespace(&[("a", "live a"), ("c", "live c")]))
            .await;
        warehouse
            .seed_namespace("live_next", namespace(&[("a", "staged a"), ("b", "staged b")]))
            .await;

        let report = coordinator(&warehouse).finalize().await.unwrap();

        assert_eq!(report.promoted, vec!["a", "b"]);
        assert_eq!(report.removed, vec!["c"]);
        assert_eq!(
            warehouse.list_tables("live").await.unwrap(),
            ["a".to_string(), "b".to_string()].into_iter().collect()
        );
        assert_eq!(warehouse.rows("live", "a").await, table("staged a").rows);
        assert!(!warehouse.namespace_exists("live_next").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finalize_creates_missing_live_namespace() {
        let warehouse = MemoryWarehouse::new();
        warehouse
            .seed_namespace("live_next", namespace(&[("a", "staged a")]))
            .await;

        coordinator(&warehouse).finalize().await.unwrap();

        assert!(warehouse.table_exists("live", "a").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_copy_job_fails_the_swap() {
        let warehouse = MemoryWarehouse::new();
        warehouse.set_copy_job_polls(100).await;
        warehouse
            .seed_namespace("live_next", namespace(&[("a", "staged a")]))
            .await;

        let err = coordinator(&warehouse).finalize().await.unwrap_err();

        assert_eq!(
            err.kinds(),
            vec![ErrorKind::SwapPartialFailure, ErrorKind::DestinationJobPending]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_first_live_delete_is_not_a_partial_failure() {
        let warehouse = FaultyWarehouse::wrap(MemoryWarehouse::new());
        warehouse
            .wrapped()
            .seed_namespace("live", namespace(&[("a", "live a")]))
            .await;
        warehouse
            .wrapped()
            .seed_namespace("live_next", namespace(&[("a", "staged a")]))
            .await;
        warehouse.fail_next(
            WarehouseOperation::DeleteTable,
            1,
            ErrorKind::DestinationQueryFailed,
        );

        let err = SwapCoordinator::new(
            &warehouse,
            "live",
            "live_next",
            JobPolling::new(Duration::from_millis(100), 10),
        )
        .finalize()
        .await
        .unwrap_err();

        assert_eq!(err.kinds(), vec![ErrorKind::DestinationQueryFailed]);
        assert_eq!(warehouse.wrapped().rows("live", "a").await, table("live a").rows);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_ignores_missing_staging() {
        let warehouse = MemoryWarehouse::new();

        coordinator(&warehouse).abort().await;

        assert!(!warehouse.namespace_exists("live_next").await);
    }
}
