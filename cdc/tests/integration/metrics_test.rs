use cdc::metrics::{CDC_MESSAGES_SUCCEEDED_TOTAL, CDC_TRANSACTION_ROWS};
use cdc::store::MemoryPositionStore;
use cdc::test_utils::event::{EventBuilder, decimal, int, text};
use cdc::test_utils::pipeline::{TEST_BINLOG_FILE, create_pipeline, test_config};
use cdc::test_utils::sink::ManualAckSink;
use cdc::test_utils::source::ScriptedEventSource;
use telemetry::metrics::init_metrics_handle;
use telemetry::tracing::init_test_tracing;

#[tokio::test(flavor = "multi_thread")]
async fn replication_metrics_are_exported() {
    init_test_tracing();
    let handle = init_metrics_handle().unwrap();

    let source = ScriptedEventSource::new();
    let sink = ManualAckSink::auto_acknowledging();
    let mut pipeline =
        create_pipeline(test_config(), source.clone(), sink.clone(), MemoryPositionStore::new());

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

    pipeline.shutdown_and_wait().await.unwrap();

    let rendered = handle.render();
    assert!(rendered.contains(CDC_MESSAGES_SUCCEEDED_TOTAL));
    assert!(rendered.contains("sink=\"manual_ack\""));
    assert!(rendered.contains(CDC_TRANSACTION_ROWS));
}
