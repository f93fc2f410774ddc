use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use ingest::concurrency::cancel::{CancellationRx, create_cancellation};
use ingest::error::ErrorKind;
use ingest::pipeline::{LoadRun, RunState, TableJob, run_tables};
use ingest::test_utils::{FaultyWarehouse, ScriptedSource, WarehouseOperation, day, test_contract};
use ingest::types::{Cell, ColumnDefinition, DataType, NormalizedRow};
use ingest::warehouse::Warehouse;
use ingest::warehouse::memory::{MemoryTable, MemoryWarehouse};
use ingest_config::shared::{LoadStrategy, RunConfig, TableLoadConfig};
use ingest_telemetry::tracing::init_test_tracing;

fn now() -> DateTime<Utc> {
    day(2024, 2, 1)
}

fn full_refresh(name: &str) -> TableLoadConfig {
    let mut table = TableLoadConfig::new(name, LoadStrategy::FullRefresh);
    table.data_from = Some(day(2024, 1, 1));
    table.data_until = Some(day(2024, 1, 8));
    table.chunking_interval_secs = Some(3 * 24 * 3600);
    table
}

fn source() -> ScriptedSource {
    ScriptedSource::new("scripted", test_contract()).with_pages(2, 2)
}

fn live_table(marker: &str) -> MemoryTable {
    MemoryTable {
        columns: vec![ColumnDefinition::new("marker", DataType::String)],
        rows: vec![NormalizedRow::from_iter([(
            "marker".to_string(),
            Cell::String(marker.to_string()),
        )])],
        partition: None,
    }
}

fn ids(rows: &[NormalizedRow]) -> BTreeSet<String> {
    rows.iter()
        .filter_map(|row| match row.get("id") {
            Some(Cell::String(id)) => Some(id.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn full_refresh_run_publishes_staged_tables_test() {
    init_test_tracing();
    let warehouse = MemoryWarehouse::new();
    let jobs = vec![TableJob::new(source(), full_refresh("events"))];

    let report = run_tables(
        &warehouse,
        RunConfig::new("live"),
        &jobs,
        CancellationRx::never(),
        now(),
    )
    .await
    .unwrap();

    assert_eq!(report.tables[0].sub_windows.len(), 3);
    assert_eq!(report.tables[0].batches, 6);
    assert_eq!(report.tables[0].rows_inserted, 12);
    assert_eq!(report.swap.promoted, vec!["events"]);

    let rows = warehouse.rows("live", "events").await;
    assert_eq!(rows.len(), 12);
    assert_eq!(ids(&rows).len(), 12);
    assert!(!warehouse.namespace_exists("live_next").await);
}

#[tokio::test(start_paused = true)]
async fn staging_is_authoritative_for_live_membership_test() {
    init_test_tracing();
    let warehouse = MemoryWarehouse::new();
    warehouse
        .seed_namespace(
            "live",
            BTreeMap::from([
                ("a".to_string(), live_table("old a")),
                ("c".to_string(), live_table("old c")),
            ]),
        )
        .await;
    let jobs = vec![
        TableJob::new(source(), full_refresh("a")),
        TableJob::new(source(), full_refresh("b")),
    ];

    run_tables(
        &warehouse,
        RunConfig::new("live"),
        &jobs,
        CancellationRx::never(),
        now(),
    )
    .await
    .unwrap();

    assert_eq!(
        warehouse.list_tables("live").await.unwrap(),
        BTreeSet::from(["a".to_string(), "b".to_string()])
    );
    assert_eq!(warehouse.rows("live", "a").await.len(), 12);
    assert!(!warehouse.namespace_exists("live_next").await);
}

#[tokio::test(start_paused = true)]
async fn subsequent_run_merges_new_rows_into_live_content_test() {
    init_test_tracing();
    let warehouse = MemoryWarehouse::new();
    let first = vec![TableJob::new(source(), full_refresh("events"))];
    run_tables(
        &warehouse,
        RunConfig::new("live"),
        &first,
        CancellationRx::never(),
        now(),
    )
    .await
    .unwrap();
    let before = ids(&warehouse.rows("live", "events").await);

    // The live watermark is 2024-01-07, so the run re-extracts that day and one more.
    let mut table = TableLoadConfig::new("events", LoadStrategy::Subsequent);
    table.watermark_column = Some("date".to_string());
    table.job_start = Some(day(2024, 1, 1));
    table.data_until = Some(day(2024, 1, 9));
    table.primary_key = vec!["id".to_string()];
    let second = vec![TableJob::new(source(), table)];

    let report = run_tables(
        &warehouse,
        RunConfig::new("live"),
        &second,
        CancellationRx::never(),
        now(),
    )
    .await
    .unwrap();

    assert_eq!(
        report.tables[0].sub_windows.first().map(|w| w.from),
        Some(day(2024, 1, 7))
    );
    let rows = warehouse.rows("live", "events").await;
    assert_eq!(rows.len(), 12);
    assert_eq!(ids(&rows), before);
}

#[tokio::test(start_paused = true)]
async fn failed_table_leaves_live_untouched_test() {
    init_test_tracing();
    let warehouse = FaultyWarehouse::wrap(MemoryWarehouse::new());
    warehouse
        .wrapped()
        .seed_namespace("live", BTreeMap::from([("a".to_string(), live_table("old a"))]))
        .await;
    warehouse.fail_next(
        WarehouseOperation::InsertRows,
        1,
        ErrorKind::DestinationQueryFailed,
    );
    let jobs = vec![TableJob::new(source(), full_refresh("a"))];

    let err = run_tables(
        &warehouse,
        RunConfig::new("live"),
        &jobs,
        CancellationRx::never(),
        now(),
    )
    .await
    .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DestinationQueryFailed);
    assert_eq!(warehouse.wrapped().rows("live", "a").await, live_table("old a").rows);
    assert!(!warehouse.wrapped().namespace_exists("live_next").await);
}

#[tokio::test(start_paused = true)]
async fn cancelled_run_removes_staging_test() {
    init_test_tracing();
    let warehouse = MemoryWarehouse::new();
    let (cancel_tx, cancel_rx) = create_cancellation();
    let source = source();

    let mut run = LoadRun::new(&warehouse, RunConfig::new("live"), cancel_rx);
    run.kickoff().await.unwrap();
    run.load_table(&source, &full_refresh("a"), None, now())
        .await
        .unwrap();

    cancel_tx.cancel();
    let err = run
        .load_table(&source, &full_refresh("b"), None, now())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(run.state(), RunState::Aborted);
    assert!(!warehouse.namespace_exists("live_next").await);
    assert!(!warehouse.namespace_exists("live").await);
}

#[tokio::test(start_paused = true)]
async fn partial_swap_failure_is_reported_and_rerun_recovers_test() {
    init_test_tracing();
    let warehouse = FaultyWarehouse::wrap(MemoryWarehouse::new());
    warehouse.fail_after(
        WarehouseOperation::CopyTable,
        1,
        1,
        ErrorKind::DestinationQueryFailed,
    );
    let jobs = vec![
        TableJob::new(source(), full_refresh("a")),
        TableJob::new(source(), full_refresh("b")),
    ];

    let err = run_tables(
        &warehouse,
        RunConfig::new("live"),
        &jobs,
        CancellationRx::never(),
        now(),
    )
    .await
    .unwrap_err();

    assert_eq!(
        err.kinds(),
        vec![ErrorKind::SwapPartialFailure, ErrorKind::DestinationQueryFailed]
    );
    assert!(warehouse.wrapped().table_exists("live", "a").await.unwrap());
    assert!(!warehouse.wrapped().table_exists("live", "b").await.unwrap());
    assert!(!warehouse.wrapped().namespace_exists("live_next").await);

    run_tables(
        &warehouse,
        RunConfig::new("live"),
        &jobs,
        CancellationRx::never(),
        now(),
    )
    .await
    .unwrap();

    assert_eq!(
        warehouse.list_tables("live").await.unwrap(),
        BTreeSet::from(["a".to_string(), "b".to_string()])
    );
}
