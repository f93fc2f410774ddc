use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use ingest::concurrency::cancel::CancellationRx;
use ingest::error::ErrorKind;
use ingest::failpoints::{LOAD__BEFORE_CHUNK_INSERT, SWAP__AFTER_TABLE_PROMOTED};
use ingest::pipeline::{TableJob, run_tables};
use ingest::test_utils::failpoints::IngestFailScenario;
use ingest::test_utils::{ScriptedSource, day, test_contract};
use ingest::warehouse::Warehouse;
use ingest::warehouse::memory::MemoryWarehouse;
use ingest_config::shared::{LoadStrategy, RunConfig, TableLoadConfig};
use ingest_telemetry::tracing::init_test_tracing;

fn now() -> DateTime<Utc> {
    day(2024, 2, 1)
}

fn jobs(tables: &[&str]) -> Vec<TableJob<ScriptedSource>> {
    tables
        .iter()
        .map(|name| {
            let mut table = TableLoadConfig::new(*name, LoadStrategy::FullRefresh);
            table.data_from = Some(day(2024, 1, 1));
            table.data_until = Some(day(2024, 1, 3));
            let source = ScriptedSource::new("scripted", test_contract()).with_pages(1, 3);
            TableJob::new(source, table)
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn retryable_chunk_failure_is_retried_test() {
    init_test_tracing();
    let _scenario = IngestFailScenario::setup(&[(LOAD__BEFORE_CHUNK_INSERT, "1*return(retry)")]);
    let warehouse = MemoryWarehouse::new();

    run_tables(
        &warehouse,
        RunConfig::new("live"),
        &jobs(&["events"]),
        CancellationRx::never(),
        now(),
    )
    .await
    .unwrap();

    assert_eq!(warehouse.rows("live", "events").await.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn non_retryable_chunk_failure_aborts_the_run_test() {
    init_test_tracing();
    let _scenario = IngestFailScenario::setup(&[(LOAD__BEFORE_CHUNK_INSERT, "return(no_retry)")]);
    let warehouse = MemoryWarehouse::new();

    let err = run_tables(
        &warehouse,
        RunConfig::new("live"),
        &jobs(&["events"]),
        CancellationRx::never(),
        now(),
    )
    .await
    .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::WithNoRetry);
    assert!(!warehouse.namespace_exists("live_next").await);
    assert!(!warehouse.namespace_exists("live").await);
}

#[tokio::test(start_paused = true)]
async fn failure_after_first_promotion_is_a_partial_swap_test() {
    init_test_tracing();
    let scenario =
        IngestFailScenario::setup(&[(SWAP__AFTER_TABLE_PROMOTED, "1*return(no_retry)")]);
    let warehouse = MemoryWarehouse::new();
    let jobs = jobs(&["a", "b"]);

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
        vec![ErrorKind::SwapPartialFailure, ErrorKind::WithNoRetry]
    );
    assert_eq!(
        warehouse.list_tables("live").await.unwrap(),
        BTreeSet::from(["a".to_string()])
    );
    assert!(!warehouse.namespace_exists("live_next").await);

    scenario.teardown();

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
