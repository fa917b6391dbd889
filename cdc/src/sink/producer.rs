use config::shared::OutputConfig;
use tracing::trace;

use crate::checkpoint::{CallbackCompleter, InflightTracker, PositionTracker};
use crate::error::CdcResult;
use crate::sink::Sink;
use crate::types::RowChangeRecord;

/// Gate between the replicator and a [`Sink`].
///
/// Records that are not meant to be delivered are acknowledged in place, so that transactions
/// carrying nothing to deliver still advance the checkpoint. Transaction-committing records are
/// registered as in flight before reaching the sink.
#[derive(Debug, Clone)]
pub struct Producer<S> {
    sink: S,
    output: OutputConfig,
    inflight: InflightTracker,
    tracker: PositionTracker,
}

impl<S> Producer<S>
where
    S: Sink,
{
    pub fn new(
        sink: S,
        output: OutputConfig,
        inflight: InflightTracker,
        tracker: PositionTracker,
    ) -> Self {
        Self {
            sink,
            output,
            inflight,
            tracker,
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn inflight(&self) -> &InflightTracker {
        &self.inflight
    }

    pub fn tracker(&self) -> &PositionTracker {
        &self.tracker
    }

    /// Hands `record` to the sink or acknowledges it in place.
    ///
    /// An error from the sink is returned as is and stops replication.
    pub async fn push(&self, record: RowChangeRecord) -> CdcResult<()> {
        if !record.should_output(&self.output) {
            trace!(
                kind = %record.kind,
                position = %record.next_position,
                "acknowledging record in place"
            );

            self.inflight
                .add_message(record.next_position.clone(), record.timestamp);
            if let Some(released) = self.inflight.complete_message(&record.next_position) {
                self.tracker.set(released.position);
            }

            return Ok(());
        }

        if record.tx_commit {
            self.inflight
                .add_message(record.next_position.clone(), record.timestamp);
        }

        let completer = CallbackCompleter::new(
            &record,
            S::name(),
            self.inflight.clone(),
            self.tracker.clone(),
        );

        self.sink.push(record, completer).await
    }
}
