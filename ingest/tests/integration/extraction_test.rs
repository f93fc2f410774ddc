use chrono::TimeDelta;
use ingest::concurrency::cancel::{CancellationRx, create_cancellation};
use ingest::error::ErrorKind;
use ingest::extract::Extractor;
use ingest::retry::{Backoff, RetryPolicy};
use ingest::test_utils::{ScriptedSource, day, test_contract};
use ingest::types::{Cell, ExtractionWindow, SubWindow};
use ingest_telemetry::tracing::init_test_tracing;
use std::time::Duration;

fn page_retry() -> RetryPolicy {
    RetryPolicy::new(3, Backoff::Fixed(Duration::from_secs(1)))
}

#[tokio::test(start_paused = true)]
async fn chunked_window_yields_every_page_in_order_test() {
    init_test_tracing();
    let source = ScriptedSource::new("scripted", test_contract()).with_pages(2, 3);
    let window =
        ExtractionWindow::new(day(2024, 1, 1), day(2024, 1, 8), Some(TimeDelta::days(3))).unwrap();

    let mut extractor = Extractor::new(&source, &window, page_retry(), CancellationRx::never());
    let mut batches = Vec::new();
    while let Some(batch) = extractor.next_batch().await.unwrap() {
        batches.push(batch);
    }

    let expected_sub_windows = [
        SubWindow::new(day(2024, 1, 1), day(2024, 1, 4)),
        SubWindow::new(day(2024, 1, 4), day(2024, 1, 7)),
        SubWindow::new(day(2024, 1, 7), day(2024, 1, 8)),
    ];
    let observed: Vec<_> = batches.iter().map(|b| (b.sub_window, b.page)).collect();
    assert_eq!(
        observed,
        vec![
            (expected_sub_windows[0], 1),
            (expected_sub_windows[0], 2),
            (expected_sub_windows[1], 1),
            (expected_sub_windows[1], 2),
            (expected_sub_windows[2], 1),
            (expected_sub_windows[2], 2),
        ]
    );

    for batch in &batches {
        assert_eq!(batch.rows.len(), 3);
        for row in &batch.rows {
            assert_eq!(
                row.columns().collect::<Vec<_>>(),
                vec!["clicks", "date", "id", "page"]
            );
            assert_eq!(row.get("page"), Some(&Cell::Int(i64::from(batch.page))));
        }
    }

    let tokens: Vec<_> = source
        .calls()
        .into_iter()
        .map(|call| call.page_token)
        .collect();
    assert_eq!(
        tokens,
        vec![
            None,
            Some("page-2".to_string()),
            None,
            Some("page-2".to_string()),
            None,
            Some("page-2".to_string()),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn transient_page_failures_are_retried_test() {
    init_test_tracing();
    let source = ScriptedSource::new("scripted", test_contract());
    source.fail_next(2, ErrorKind::SourceRateLimited);
    let window = ExtractionWindow::new(day(2024, 1, 1), day(2024, 1, 2), None).unwrap();

    let mut extractor = Extractor::new(&source, &window, page_retry(), CancellationRx::never());
    let batch = extractor.next_batch().await.unwrap().unwrap();

    assert_eq!(batch.rows.len(), 1);
    assert_eq!(source.calls().len(), 3);
    assert!(extractor.next_batch().await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn exhausted_page_retries_fail_the_sub_window_test() {
    init_test_tracing();
    let source = ScriptedSource::new("scripted", test_contract());
    source.fail_next(3, ErrorKind::SourceConnectionFailed);
    let window = ExtractionWindow::new(day(2024, 1, 1), day(2024, 1, 2), None).unwrap();

    let mut extractor = Extractor::new(&source, &window, page_retry(), CancellationRx::never());
    let err = extractor.next_batch().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SourceConnectionFailed);
    assert_eq!(source.calls().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn rejected_page_is_not_retried_test() {
    init_test_tracing();
    let source = ScriptedSource::new("scripted", test_contract());
    source.fail_next(1, ErrorKind::SourceRequestRejected);
    let window = ExtractionWindow::new(day(2024, 1, 1), day(2024, 1, 2), None).unwrap();

    let mut extractor = Extractor::new(&source, &window, page_retry(), CancellationRx::never());
    let err = extractor.next_batch().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SourceRequestRejected);
    assert_eq!(source.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_before_the_next_sub_window_test() {
    init_test_tracing();
    let source = ScriptedSource::new("scripted", test_contract()).with_pages(2, 1);
    let window =
        ExtractionWindow::new(day(2024, 1, 1), day(2024, 1, 3), Some(TimeDelta::days(1))).unwrap();
    let (cancel_tx, cancel_rx) = create_cancellation();

    let mut extractor = Extractor::new(&source, &window, page_retry(), cancel_rx);
    assert_eq!(extractor.next_batch().await.unwrap().unwrap().page, 1);

    cancel_tx.cancel();

    // The sub-window in progress is finished, the next one is never started.
    assert_eq!(extractor.next_batch().await.unwrap().unwrap().page, 2);
    let err = extractor.next_batch().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(source.calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn empty_window_yields_nothing_test() {
    init_test_tracing();
    let source = ScriptedSource::new("scripted", test_contract());
    let window = ExtractionWindow::new(day(2024, 1, 1), day(2024, 1, 1), None).unwrap();

    let mut extractor = Extractor::new(&source, &window, page_retry(), CancellationRx::never());

    assert!(extractor.next_batch().await.unwrap().is_none());
    assert!(source.calls().is_empty());
}
