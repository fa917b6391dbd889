use cdc::replication::EventSource;
use cdc::store::MemoryPositionStore;
use cdc::test_utils::event::{EventBuilder, decimal, int, text};
use cdc::test_utils::notify::eventually;
use cdc::test_utils::pipeline::{TEST_BINLOG_FILE, create_pipeline, test_config};
use cdc::test_utils::sink::ManualAckSink;
use cdc::test_utils::source::ScriptedEventSource;
use cdc::types::{RecordKind, Value};
use telemetry::tracing::init_test_tracing;

const ORDERS_TABLE_ID: u64 = 1;
const CUSTOMERS_TABLE_ID: u64 = 2;
const AUDIT_TABLE_ID: u64 = 3;
const HEARTBEATS_TABLE_ID: u64 = 4;

#[tokio::test(flavor = "multi_thread")]
async fn include_and_exclude_rules_select_rows() {
    init_test_tracing();

    let mut config = test_config();
    config.filter = vec!["exclude: shop.*".to_string(), "include: shop.orders".to_string()];
    let source = ScriptedEventSource::new();
    let sink = ManualAckSink::auto_acknowledging();
    let mut pipeline =
        create_pipeline(config, source.clone(), sink.clone(), MemoryPositionStore::new());

    pipeline.start().await.unwrap();

    let mut events = EventBuilder::new(TEST_BINLOG_FILE);
    let transaction = vec![
        events.begin("shop"),
        events.table_map(CUSTOMERS_TABLE_ID, "shop", "customers"),
        events.insert(CUSTOMERS_TABLE_ID, vec![vec![int(1), text("Ada")]]),
        events.table_map(ORDERS_TABLE_ID, "shop", "orders"),
        events.insert(ORDERS_TABLE_ID, vec![vec![int(10), text("new"), decimal("5.00")]]),
        events.xid_with(5),
    ];
    let commit = transaction[5].header.next_position.clone();
    let received = sink.wait_for_records(1).await;
    source.send_all(transaction).await;
    received.notified().await;

    let records = sink.records().await;
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.kind, RecordKind::Insert);
    assert_eq!(record.table_name(), "orders");
    assert_eq!(record.xid, Some(5));
    assert!(record.tx_commit);
    assert_eq!(record.data.get("id"), Some(&int(10)));

    let (observed, commit) = (&pipeline, &commit);
    eventually(|| async move {
        observed
            .position()
            .is_some_and(|position| position.binlog() == commit)
    })
    .await;
    assert_eq!(pipeline.inflight_messages(), 0);

    pipeline.shutdown_and_wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn fully_filtered_transaction_still_advances_the_position() {
    init_test_tracing();

    let mut config = test_config();
    config.filter = vec!["exclude: audit.*".to_string()];
    let source = ScriptedEventSource::new();
    let sink = ManualAckSink::new();
    let mut pipeline =
        create_pipeline(config, source.clone(), sink.clone(), MemoryPositionStore::new());

    pipeline.start().await.unwrap();

    let mut events = EventBuilder::new(TEST_BINLOG_FILE);
    let transaction = events.insert_transaction(
        AUDIT_TABLE_ID,
        "audit",
        "log",
        vec![vec![int(1), text("login")]],
    );
    let commit = transaction[3].header.next_position.clone();
    source.send_all(transaction).await;

    let (observed, commit) = (&pipeline, &commit);
    eventually(|| async move {
        observed
            .position()
            .is_some_and(|position| position.binlog() == commit)
    })
    .await;

    assert!(sink.records().await.is_empty());
    assert_eq!(pipeline.inflight_messages(), 0);

    pipeline.shutdown_and_wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn updates_carry_the_previous_values_of_changed_columns() {
    init_test_tracing();

    let source = ScriptedEventSource::new();
    let sink = ManualAckSink::auto_acknowledging();
    let mut pipeline =
        create_pipeline(test_config(), source.clone(), sink.clone(), MemoryPositionStore::new());

    pipeline.start().await.unwrap();

    let mut events = EventBuilder::new(TEST_BINLOG_FILE);
    let before = vec![int(1), text("new"), decimal("5.00")];
    let after = vec![int(1), text("paid"), decimal("5.00")];
    let transaction = vec![
        events.begin("shop"),
        events.table_map(ORDERS_TABLE_ID, "shop", "orders"),
        events.rows_query("UPDATE orders SET status = 'paid' WHERE id = 1"),
        events.update(ORDERS_TABLE_ID, vec![(before, after)]),
        events.xid(),
    ];
    let received = sink.wait_for_records(1).await;
    source.send_all(transaction).await;
    received.notified().await;

    let records = sink.records().await;
    let record = &records[0];
    assert_eq!(record.kind, RecordKind::Update);
    assert_eq!(record.data.get("status"), Some(&text("paid")));
    let old_data = record.old_data.as_ref().unwrap();
    assert_eq!(old_data.len(), 1);
    assert_eq!(old_data.get("status"), Some(&text("new")));
    assert_eq!(
        record.row_query.as_deref(),
        Some("UPDATE orders SET status = 'paid' WHERE id = 1")
    );

    pipeline.shutdown_and_wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn create_table_is_applied_and_emitted() {
    init_test_tracing();

    let mut config = test_config();
    config.output.ddl = true;
    let source = ScriptedEventSource::new();
    let sink = ManualAckSink::auto_acknowledging();
    let mut pipeline =
        create_pipeline(config, source.clone(), sink.clone(), MemoryPositionStore::new());

    pipeline.start().await.unwrap();

    let mut events = EventBuilder::new(TEST_BINLOG_FILE);
    let ddl = events.query(
        "shop",
        "CREATE TABLE refunds (id BIGINT NOT NULL, amount DECIMAL(10,2))",
    );
    let ddl_received = sink.wait_for_records(1).await;
    source.send(ddl).await;
    ddl_received.notified().await;

    let records = sink.records().await;
    assert_eq!(records[0].kind, RecordKind::Ddl);
    assert_eq!(records[0].table_name(), "refunds");
    assert!(records[0].tx_commit);
    assert!(pipeline.schema().find_table("shop", "refunds").is_some());

    let row_received = sink.wait_for_records(2).await;
    let refund = vec![vec![int(1), decimal("2.50")]];
    source
        .send_all(events.insert_transaction(9, "shop", "refunds", refund))
        .await;
    row_received.notified().await;

    let records = sink.records().await;
    assert_eq!(records[1].table_name(), "refunds");
    assert_eq!(records[1].data.get("amount"), Some(&decimal("2.50")));

    pipeline.shutdown_and_wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn rows_of_unknown_tables_are_skipped() {
    init_test_tracing();

    let source = ScriptedEventSource::new();
    let sink = ManualAckSink::auto_acknowledging();
    let mut pipeline =
        create_pipeline(test_config(), source.clone(), sink.clone(), MemoryPositionStore::new());

    pipeline.start().await.unwrap();

    let mut events = EventBuilder::new(TEST_BINLOG_FILE);
    let unknown = vec![
        events.begin("shop"),
        events.insert(99, vec![vec![int(1)]]),
        events.xid(),
    ];
    let known = events.insert_transaction(
        ORDERS_TABLE_ID,
        "shop",
        "orders",
        vec![vec![int(2), text("new"), decimal("1.00")]],
    );
    let received = sink.wait_for_records(1).await;
    source.send_all(unknown).await;
    source.send_all(known).await;
    received.notified().await;

    let records = sink.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].data.get("id"), Some(&int(2)));

    pipeline.shutdown_and_wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn stream_starting_inside_a_transaction_is_replicated() {
    init_test_tracing();

    let source = ScriptedEventSource::new();
    let sink = ManualAckSink::auto_acknowledging();
    let mut pipeline =
        create_pipeline(test_config(), source.clone(), sink.clone(), MemoryPositionStore::new());

    pipeline.start().await.unwrap();

    let mut events = EventBuilder::new(TEST_BINLOG_FILE);
    let tail = vec![
        events.table_map(ORDERS_TABLE_ID, "shop", "orders"),
        events.insert(ORDERS_TABLE_ID, vec![vec![int(3), text("new"), decimal("1.00")]]),
        events.xid(),
    ];
    let received = sink.wait_for_records(1).await;
    source.send_all(tail).await;
    received.notified().await;

    let records = sink.records().await;
    assert_eq!(records.len(), 1);
    assert!(records[0].tx_commit);
    assert_eq!(records[0].xid, Some(1));

    pipeline.shutdown_and_wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn heartbeat_stops_the_replicator_when_requested() {
    init_test_tracing();

    let config = test_config();
    let client_id = config.client_id.clone();
    let control_database = config.control_database.clone();
    let source = ScriptedEventSource::new();
    let sink = ManualAckSink::auto_acknowledging();
    let store = MemoryPositionStore::new();
    let mut pipeline = create_pipeline(config, source.clone(), sink.clone(), store.clone());

    pipeline.stop_at_heartbeat(42);
    pipeline.start().await.unwrap();
    let heartbeats = pipeline.heartbeat_notifier().clone();

    let mut events = EventBuilder::new(TEST_BINLOG_FILE);
    source
        .send_all(events.heartbeat_transaction(
            HEARTBEATS_TABLE_ID,
            &control_database,
            &client_id,
            41,
            42,
        ))
        .await;

    pipeline.wait().await.unwrap();

    assert_eq!(heartbeats.last(), 42);
    assert!(sink.records().await.is_empty());
    let stored = store.positions().await;
    assert_eq!(stored.last().map(|p| p.last_heartbeat_read()), Some(42));
}

#[tokio::test(flavor = "multi_thread")]
async fn bounded_replay_stops_at_log_rotation() {
    init_test_tracing();

    let mut config = test_config();
    config.stop_on_eof = true;
    let source = ScriptedEventSource::new();
    let sink = ManualAckSink::auto_acknowledging();
    let mut pipeline =
        create_pipeline(config, source.clone(), sink.clone(), MemoryPositionStore::new());

    pipeline.start().await.unwrap();

    let mut events = EventBuilder::new(TEST_BINLOG_FILE);
    source
        .send_all(events.insert_transaction(
            ORDERS_TABLE_ID,
            "shop",
            "orders",
            vec![vec![int(1), text("new"), decimal("1.00")]],
        ))
        .await;
    source.send(events.rotate("mysql-bin.000002")).await;

    pipeline.wait().await.unwrap();

    assert_eq!(sink.records().await.len(), 1);
    assert!(!source.is_connected());
}

#[tokio::test(flavor = "multi_thread")]
async fn lost_connection_is_reestablished() {
    init_test_tracing();

    let source = ScriptedEventSource::new();
    let sink = ManualAckSink::auto_acknowledging();
    let mut pipeline =
        create_pipeline(test_config(), source.clone(), sink.clone(), MemoryPositionStore::new());

    pipeline.start().await.unwrap();

    source.fail_next_reconnects(2);
    source.drop_connection();
    eventually(|| {
        let source = source.clone();
        async move { source.reconnect_count() == 1 }
    })
    .await;

    let mut events = EventBuilder::new(TEST_BINLOG_FILE);
    let received = sink.wait_for_records(1).await;
    source
        .send_all(events.insert_transaction(
            ORDERS_TABLE_ID,
            "shop",
            "orders",
            vec![vec![int(1), text("new"), Value::Null]],
        ))
        .await;
    received.notified().await;

    assert_eq!(sink.records().await[0].data.get("amount"), Some(&Value::Null));

    pipeline.shutdown_and_wait().await.unwrap();
}
