use cdc::error::ErrorKind;
use cdc::failpoints::{POSITION_FLUSH__BEFORE_HEARTBEAT, POSITION_FLUSH__BEFORE_STORE};
use cdc::store::MemoryPositionStore;
use cdc::test_utils::event::{EventBuilder, decimal, int, text};
use cdc::test_utils::failpoints::ScopedFailpoints;
use cdc::test_utils::notify::eventually;
use cdc::test_utils::pipeline::{TEST_BINLOG_FILE, create_pipeline, test_config};
use cdc::test_utils::sink::ManualAckSink;
use cdc::test_utils::source::ScriptedEventSource;
use cdc::types::{BinlogPosition, Position};
use config::shared::PositionStoreConfig;
use telemetry::tracing::init_test_tracing;

#[tokio::test(flavor = "multi_thread")]
async fn injected_store_failures_are_retried_by_the_flush_worker() {
    init_test_tracing();

    let _failpoints = ScopedFailpoints::setup(&[
        (POSITION_FLUSH__BEFORE_STORE, "3*return"),
        (POSITION_FLUSH__BEFORE_HEARTBEAT, "return"),
    ]);

    let source = ScriptedEventSource::new();
    let store = MemoryPositionStore::new();
    let mut pipeline = create_pipeline(
        test_config(),
        source.clone(),
        ManualAckSink::auto_acknowledging(),
        store.clone(),
    );

    pipeline.start().await.unwrap();

    let mut events = EventBuilder::new(TEST_BINLOG_FILE);
    let transaction = events.insert_transaction(
        1,
        "shop",
        "orders",
        vec![vec![int(1), text("new"), decimal("1.00")]],
    );
    let commit = Position::new(
        BinlogPosition::new(TEST_BINLOG_FILE, transaction[3].header.next_position.offset()),
        0,
    );
    source.send_all(transaction).await;

    eventually(|| {
        let (store, commit) = (store.clone(), commit.clone());
        async move { store.positions().await.last() == Some(&commit) }
    })
    .await;

    // Heartbeats keep failing without stopping the pipeline.
    assert!(store.heartbeats().await.is_empty());

    pipeline.shutdown_and_wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn failing_final_store_is_reported_on_shutdown() {
    init_test_tracing();

    // Only the final store happens after the failure is injected.
    let mut config = test_config();
    config.position_store = PositionStoreConfig {
        flush_interval_ms: 60_000,
    };
    let source = ScriptedEventSource::new();
    let sink = ManualAckSink::auto_acknowledging();
    let store = MemoryPositionStore::new();
    let mut pipeline = create_pipeline(config, source.clone(), sink.clone(), store.clone());

    pipeline.start().await.unwrap();

    let mut events = EventBuilder::new(TEST_BINLOG_FILE);
    let received = sink.wait_for_records(1).await;
    source
        .send_all(events.insert_transaction(
            1,
            "shop",
            "orders",
            vec![vec![int(1), text("new"), decimal("1.00")]],
        ))
        .await;
    received.notified().await;

    let _failpoints = ScopedFailpoints::setup(&[(POSITION_FLUSH__BEFORE_STORE, "return")]);
    let err = pipeline.shutdown_and_wait().await.unwrap_err();

    assert!(err.kinds().contains(&ErrorKind::InjectedFailure));
}
