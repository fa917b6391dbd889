//! Metric names and labels emitted by the replicator.

/// Label for the reason a row was skipped.
pub const REASON_LABEL: &str = "reason";

/// Label for the sink a message was pushed to.
pub const SINK_LABEL: &str = "sink";

// Transaction assembly

/// Histogram of rows per assembled transaction.
pub const CDC_TRANSACTION_ROWS: &str = "cdc_transaction_rows";

/// Histogram of the time between the first and the last event of a transaction.
pub const CDC_TRANSACTION_DURATION_SECONDS: &str = "cdc_transaction_duration_seconds";

/// Counter of rows dropped while assembling transactions.
pub const CDC_ROWS_SKIPPED_TOTAL: &str = "cdc_rows_skipped_total";

// Acknowledgment

/// Gauge of transactions pushed to the sink and not yet acknowledged.
pub const CDC_INFLIGHT_MESSAGES: &str = "cdc_inflight_messages";

/// Counter of messages acknowledged by the sink.
pub const CDC_MESSAGES_SUCCEEDED_TOTAL: &str = "cdc_messages_succeeded_total";

/// Counter of messages the sink failed to deliver.
pub const CDC_MESSAGES_FAILED_TOTAL: &str = "cdc_messages_failed_total";

/// Histogram of the time between pushing a message and its acknowledgment.
pub const CDC_MESSAGE_PUBLISH_TIME_SECONDS: &str = "cdc_message_publish_time_seconds";

/// Histogram of the time between the source event and its acknowledgment.
pub const CDC_MESSAGE_LATENCY_SECONDS: &str = "cdc_message_latency_seconds";

// Heartbeats and positions

/// Counter of heartbeats written to the position store.
pub const CDC_HEARTBEATS_SENT_TOTAL: &str = "cdc_heartbeats_sent_total";

/// Counter of failed heartbeat writes.
pub const CDC_HEARTBEAT_FAILURES_TOTAL: &str = "cdc_heartbeat_failures_total";

/// Gauge of the last heartbeat value read back from the stream.
pub const CDC_LAST_HEARTBEAT_READ: &str = "cdc_last_heartbeat_read";

/// Counter of failed position writes.
pub const CDC_POSITION_STORE_FAILURES_TOTAL: &str = "cdc_position_store_failures_total";

// Connection

/// Counter of reconnection attempts to the event source.
pub const CDC_REPLICATION_RECONNECTS_TOTAL: &str = "cdc_replication_reconnects_total";
