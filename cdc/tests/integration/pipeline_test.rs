use cdc::error::ErrorKind;
use cdc::store::MemoryPositionStore;
use cdc::test_utils::event::{EventBuilder, decimal, int, text};
use cdc::test_utils::notify::eventually;
use cdc::test_utils::pipeline::{TEST_BINLOG_FILE, create_pipeline, test_config};
use cdc::test_utils::sink::ManualAckSink;
use cdc::test_utils::source::ScriptedEventSource;
use cdc::types::{BinlogPosition, Position};
use config::shared::PositionStoreConfig;
use telemetry::tracing::init_test_tracing;

const ORDERS_TABLE_ID: u64 = 1;

fn order(id: i64, status: &str) -> Vec<cdc::types::Value> {
    vec![int(id), text(status), decimal("9.99")]
}

fn position(offset: u64) -> Position {
    Position::new(BinlogPosition::new(TEST_BINLOG_FILE, offset), 0)
}

#[tokio::test(flavor = "multi_thread")]
async fn out_of_order_acknowledgments_only_advance_past_acknowledged_prefix() {
    init_test_tracing();

    let source = ScriptedEventSource::new();
    let sink = ManualAckSink::new();
    let store = MemoryPositionStore::new();
    let mut pipeline = create_pipeline(test_config(), source.clone(), sink.clone(), store.clone());

    pipeline.start().await.unwrap();

    let mut events = EventBuilder::new(TEST_BINLOG_FILE);
    let first = events.insert_transaction(ORDERS_TABLE_ID, "shop", "orders", vec![order(1, "new")]);
    let second =
        events.insert_transaction(ORDERS_TABLE_ID, "shop", "orders", vec![order(2, "new")]);
    let first_commit = first[3].header.next_position.offset();
    let second_commit = second[3].header.next_position.offset();

    let received = sink.wait_for_records(2).await;
    source.send_all(first).await;
    source.send_all(second).await;
    received.notified().await;

    assert_eq!(pipeline.inflight_messages(), 2);
    assert_eq!(sink.acknowledge(&position(second_commit)).await, 1);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(pipeline.position(), Some(position(4)));

    assert_eq!(sink.acknowledge(&position(first_commit)).await, 1);
    assert_eq!(pipeline.position(), Some(position(second_commit)));

    eventually(|| {
        let store = store.clone();
        async move { store.positions().await.last() == Some(&position(second_commit)) }
    })
    .await;

    pipeline.shutdown_and_wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn pipeline_resumes_from_stored_position() {
    init_test_tracing();

    let stored = Position::new(BinlogPosition::new("mysql-bin.000003", 1_234), 7);
    let source = ScriptedEventSource::new();
    let store = MemoryPositionStore::with_position(stored.clone());
    let mut pipeline = create_pipeline(
        test_config(),
        source.clone(),
        ManualAckSink::auto_acknowledging(),
        store,
    );

    pipeline.start().await.unwrap();

    assert_eq!(source.started_at(), vec![stored.clone()]);
    assert_eq!(pipeline.position(), Some(stored));
    assert_eq!(pipeline.heartbeat_notifier().last(), 7);

    pipeline.shutdown_and_wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn pipeline_without_any_position_fails_to_start() {
    init_test_tracing();

    let mut config = test_config();
    config.init_position = None;
    let mut pipeline = create_pipeline(
        config,
        ScriptedEventSource::new(),
        ManualAckSink::new(),
        MemoryPositionStore::new(),
    );

    let err = pipeline.start().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ConfigError);
}

#[tokio::test(flavor = "multi_thread")]
async fn pipeline_cannot_be_started_twice() {
    init_test_tracing();

    let mut pipeline = create_pipeline(
        test_config(),
        ScriptedEventSource::new(),
        ManualAckSink::new(),
        MemoryPositionStore::new(),
    );

    pipeline.start().await.unwrap();
    let err = pipeline.start().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    pipeline.shutdown_and_wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn sink_push_failure_stops_the_pipeline() {
    init_test_tracing();

    let source = ScriptedEventSource::new();
    let sink = ManualAckSink::new();
    let store = MemoryPositionStore::new();
    let mut pipeline = create_pipeline(test_config(), source.clone(), sink.clone(), store.clone());

    pipeline.start().await.unwrap();
    sink.fail_pushes().await;

    let mut events = EventBuilder::new(TEST_BINLOG_FILE);
    source
        .send_all(events.insert_transaction(
            ORDERS_TABLE_ID,
            "shop",
            "orders",
            vec![order(1, "new")],
        ))
        .await;

    let err = pipeline.wait().await.unwrap_err();

    assert!(err.kinds().contains(&ErrorKind::SinkPushFailed));
    assert!(
        store
            .positions()
            .await
            .iter()
            .all(|stored| stored == &position(4))
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn position_store_failures_are_retried() {
    init_test_tracing();

    let source = ScriptedEventSource::new();
    let store = MemoryPositionStore::new();
    store.fail_next_writes(3).await;
    let mut pipeline = create_pipeline(
        test_config(),
        source.clone(),
        ManualAckSink::auto_acknowledging(),
        store.clone(),
    );

    pipeline.start().await.unwrap();

    let mut events = EventBuilder::new(TEST_BINLOG_FILE);
    let transaction =
        events.insert_transaction(ORDERS_TABLE_ID, "shop", "orders", vec![order(1, "new")]);
    let commit = transaction[3].header.next_position.offset();
    source.send_all(transaction).await;

    eventually(|| {
        let store = store.clone();
        async move { store.positions().await.last() == Some(&position(commit)) }
    })
    .await;

    pipeline.shutdown_and_wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn final_position_is_stored_on_shutdown() {
    init_test_tracing();

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
    let transaction =
        events.insert_transaction(ORDERS_TABLE_ID, "shop", "orders", vec![order(1, "new")]);
    let commit = transaction[3].header.next_position.offset();
    let received = sink.wait_for_records(1).await;
    source.send_all(transaction).await;
    received.notified().await;

    let acknowledged = pipeline.position();
    assert_eq!(acknowledged, Some(position(commit)));
    pipeline.shutdown_and_wait().await.unwrap();

    assert_eq!(store.positions().await.last(), Some(&position(commit)));
}

#[tokio::test(flavor = "multi_thread")]
async fn unacknowledged_records_do_not_block_shutdown() {
    init_test_tracing();

    let source = ScriptedEventSource::new();
    let sink = ManualAckSink::new();
    let store = MemoryPositionStore::new();
    let mut pipeline = create_pipeline(test_config(), source.clone(), sink.clone(), store.clone());

    pipeline.start().await.unwrap();

    let mut events = EventBuilder::new(TEST_BINLOG_FILE);
    let received = sink.wait_for_records(1).await;
    source
        .send_all(events.insert_transaction(
            ORDERS_TABLE_ID,
            "shop",
            "orders",
            vec![order(1, "new")],
        ))
        .await;
    received.notified().await;

    pipeline.shutdown_and_wait().await.unwrap();

    assert_eq!(sink.pending_count().await, 1);
    assert_eq!(store.positions().await.last(), Some(&position(4)));
}
