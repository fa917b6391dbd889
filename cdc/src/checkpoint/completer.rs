use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use tokio::time::Instant;
use tracing::error;

use crate::checkpoint::{InflightTracker, PositionTracker};
use crate::error::CdcError;
use crate::metrics::{
    CDC_MESSAGE_LATENCY_SECONDS, CDC_MESSAGE_PUBLISH_TIME_SECONDS, CDC_MESSAGES_FAILED_TOTAL,
    CDC_MESSAGES_SUCCEEDED_TOTAL, SINK_LABEL,
};
use crate::types::{Position, RowChangeRecord};

/// Binlog timestamps have second resolution, so latency is under-reported by half a second on
/// average.
const TIMESTAMP_RESOLUTION_COMPENSATION_MS: i64 = 500;

/// Acknowledgment handle for one record pushed to a sink.
///
/// The sink calls [`CallbackCompleter::mark_completed`] once the record is durably delivered,
/// from any task and in any order relative to other records.
#[derive(Debug)]
pub struct CallbackCompleter {
    position: Position,
    event_timestamp: DateTime<Utc>,
    tx_commit: bool,
    pushed_at: Instant,
    sink: &'static str,
    inflight: InflightTracker,
    tracker: PositionTracker,
}

impl CallbackCompleter {
    pub fn new(
        record: &RowChangeRecord,
        sink: &'static str,
        inflight: InflightTracker,
        tracker: PositionTracker,
    ) -> Self {
        Self {
            position: record.next_position.clone(),
            event_timestamp: record.timestamp,
            tx_commit: record.tx_commit,
            pushed_at: Instant::now(),
            sink,
            inflight,
            tracker,
        }
    }

    /// Position replication may resume from once this record and its predecessors are
    /// acknowledged.
    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn mark_completed(self) {
        if self.tx_commit {
            if let Some(released) = self.inflight.complete_message(&self.position) {
                self.tracker.set(released.position);
            }
        }

        counter!(CDC_MESSAGES_SUCCEEDED_TOTAL, SINK_LABEL => self.sink).increment(1);
        histogram!(CDC_MESSAGE_PUBLISH_TIME_SECONDS, SINK_LABEL => self.sink)
            .record(self.pushed_at.elapsed().as_secs_f64());

        let latency_ms = (Utc::now() - self.event_timestamp).num_milliseconds()
            - TIMESTAMP_RESOLUTION_COMPENSATION_MS;
        histogram!(CDC_MESSAGE_LATENCY_SECONDS, SINK_LABEL => self.sink)
            .record(latency_ms.max(0) as f64 / 1000.0);
    }

    /// Reports a delivery failure. The position stays at the last acknowledged transaction.
    pub fn mark_failed(self, err: &CdcError) {
        error!(
            error = %err,
            position = %self.position,
            sink = self.sink,
            "failed to deliver record"
        );
        counter!(CDC_MESSAGES_FAILED_TOTAL, SINK_LABEL => self.sink).increment(1);
    }
}
