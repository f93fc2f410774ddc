use std::time::Duration;

use ingest::concurrency::cancel::{CancellationRx, create_cancellation};
use ingest::error::ErrorKind;
use ingest::load::{LoadSettings, StagedLoader, StagedTableState};
use ingest::retry::{Backoff, RetryPolicy};
use ingest::test_utils::{FaultyWarehouse, WarehouseOperation, row, test_contract};
use ingest::types::{Cell, NormalizedRow};
use ingest::warehouse::Warehouse;
use ingest::warehouse::memory::MemoryWarehouse;
use ingest_config::shared::LoadStrategy;
use ingest_telemetry::tracing::init_test_tracing;

fn rows(count: i64) -> Vec<NormalizedRow> {
    (0..count)
        .map(|i| {
            row([
                ("id", Cell::String(format!("row-{i}"))),
                ("clicks", Cell::Int(i)),
                ("page", Cell::Int(1)),
                ("date", Cell::Null),
            ])
        })
        .collect()
}

fn settings(chunk_size: usize) -> LoadSettings {
    let mut settings = LoadSettings::new(LoadStrategy::FullRefresh);
    settings.insert_chunk_size = chunk_size;
    settings.insert_retry = RetryPolicy::new(6, Backoff::Linear(Duration::from_secs(10)));
    settings
}

async fn staging() -> FaultyWarehouse<MemoryWarehouse> {
    let warehouse = FaultyWarehouse::wrap(MemoryWarehouse::new());
    warehouse.create_namespace("live_next").await.unwrap();
    warehouse
}

fn loader(
    warehouse: &FaultyWarehouse<MemoryWarehouse>,
    settings: LoadSettings,
    cancellation: CancellationRx,
) -> StagedLoader<'_, FaultyWarehouse<MemoryWarehouse>> {
    StagedLoader::new(
        warehouse,
        "live_next",
        "live",
        "events",
        test_contract(),
        settings,
        cancellation,
    )
}

#[tokio::test(start_paused = true)]
async fn rows_are_inserted_in_bounded_chunks_test() {
    init_test_tracing();
    let warehouse = staging().await;

    let mut loader = loader(&warehouse, settings(2), CancellationRx::never());
    loader.prepare().await.unwrap();
    assert_eq!(loader.state(), StagedTableState::NotExists);
    loader.write_batch(rows(5)).await.unwrap();
    loader.commit().await.unwrap();

    assert_eq!(warehouse.inserted_chunks(), vec![2, 2, 1]);
    assert_eq!(warehouse.wrapped().rows("live_next", "events").await, rows(5));
}

#[tokio::test(start_paused = true)]
async fn transient_insert_failures_retry_the_same_chunk_once_test() {
    init_test_tracing();
    let warehouse = staging().await;
    warehouse.fail_next(
        WarehouseOperation::InsertRows,
        2,
        ErrorKind::DestinationTableNotReady,
    );

    let mut loader = loader(&warehouse, settings(100), CancellationRx::never());
    loader.prepare().await.unwrap();
    loader.write_batch(rows(3)).await.unwrap();
    let inserted = loader.commit().await.unwrap();

    assert_eq!(warehouse.calls(WarehouseOperation::InsertRows), 3);
    assert_eq!(warehouse.inserted_chunks(), vec![3]);
    assert_eq!(inserted, 3);
    assert_eq!(warehouse.wrapped().rows("live_next", "events").await, rows(3));
}

#[tokio::test(start_paused = true)]
async fn exhausted_insert_retries_fail_the_load_test() {
    init_test_tracing();
    let warehouse = staging().await;
    warehouse.fail_next(
        WarehouseOperation::InsertRows,
        10,
        ErrorKind::DestinationTableNotReady,
    );

    let mut loader = loader(&warehouse, settings(100), CancellationRx::never());
    loader.prepare().await.unwrap();
    let err = loader.write_batch(rows(3)).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DestinationTableNotReady);
    assert_eq!(warehouse.calls(WarehouseOperation::InsertRows), 6);
    assert!(warehouse.wrapped().rows("live_next", "events").await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn permanent_insert_failure_is_not_retried_test() {
    init_test_tracing();
    let warehouse = staging().await;
    warehouse.fail_next(WarehouseOperation::InsertRows, 1, ErrorKind::DestinationQueryFailed);

    let mut loader = loader(&warehouse, settings(100), CancellationRx::never());
    loader.prepare().await.unwrap();
    let err = loader.write_batch(rows(3)).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DestinationQueryFailed);
    assert_eq!(warehouse.calls(WarehouseOperation::InsertRows), 1);
}

#[tokio::test(start_paused = true)]
async fn cancellation_is_observed_between_chunks_test() {
    init_test_tracing();
    let warehouse = staging().await;
    let (cancel_tx, cancel_rx) = create_cancellation();
    cancel_tx.cancel();

    let mut loader = loader(&warehouse, settings(2), cancel_rx);
    loader.prepare().await.unwrap();
    let err = loader.write_batch(rows(5)).await.unwrap_err();

    // The first chunk is never interrupted, the second one is never started.
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(warehouse.inserted_chunks(), vec![2]);
}

#[tokio::test(start_paused = true)]
async fn merge_without_live_table_starts_empty_test() {
    init_test_tracing();
    let warehouse = staging().await;
    let mut settings = settings(100);
    settings.strategy = LoadStrategy::Subsequent;
    settings.primary_key = vec!["id".to_string()];

    let mut loader = loader(&warehouse, settings, CancellationRx::never());
    loader.prepare().await.unwrap();
    loader.write_batch(rows(2)).await.unwrap();
    loader.write_batch(rows(3)).await.unwrap();
    loader.commit().await.unwrap();

    assert_eq!(warehouse.calls(WarehouseOperation::CopyTable), 0);
    assert_eq!(warehouse.wrapped().rows("live_next", "events").await.len(), 3);
}
