use tokio::sync::watch;
use tracing::{Instrument, debug, info};

use crate::bootstrap::Bootstrapper;
use crate::concurrency::run_loop::{RunLoop, RunLoopHandle, run_loop};
use crate::error::{CdcResult, ErrorKind};
use crate::replication::{EventSource, StreamConsumer};
use crate::sink::{Producer, Sink};
use crate::types::{RecordKind, RowChangeRecord};
use crate::workers::{HeartbeatNotifier, WorkerHandle};

/// Worker consuming the event stream and handing records to the sink.
///
/// Heartbeat records are always pushed. Rows of the control database go to the bootstrapper,
/// as do records the bootstrapper asks to skip. Everything else goes to the producer.
#[derive(Debug)]
pub struct ReplicatorWorker<E, S, B> {
    client_id: String,
    consumer: StreamConsumer<E>,
    producer: Producer<S>,
    bootstrapper: B,
    heartbeats: HeartbeatNotifier,
    stop_at_heartbeat: watch::Receiver<Option<u64>>,
    run_loop: RunLoopHandle,
}

impl<E, S, B> ReplicatorWorker<E, S, B>
where
    E: EventSource + Send + Sync + 'static,
    S: Sink + Send + Sync + 'static,
    B: Bootstrapper + Send + Sync + 'static,
{
    pub fn new(
        client_id: impl Into<String>,
        consumer: StreamConsumer<E>,
        producer: Producer<S>,
        bootstrapper: B,
        heartbeats: HeartbeatNotifier,
        stop_at_heartbeat: watch::Receiver<Option<u64>>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            consumer,
            producer,
            bootstrapper,
            heartbeats,
            stop_at_heartbeat,
            run_loop: RunLoopHandle::new(),
        }
    }

    pub fn spawn(mut self) -> WorkerHandle {
        info!("starting replicator worker");

        let run_loop_handle = self.run_loop.clone();
        let span = tracing::info_span!("replicator_worker", client_id = %self.client_id);
        let worker = async move {
            let handle = self.run_loop.clone();
            run_loop(&mut self, &handle).await?;

            info!("replicator worker completed successfully");

            Ok(())
        }
        .instrument(span.or_current());

        WorkerHandle::new(
            "replicator",
            tokio::spawn(worker),
            run_loop_handle,
            ErrorKind::ReplicatorWorkerPanic,
            ErrorKind::ReplicatorWorkerCancelled,
        )
    }

    async fn process_record(&mut self, record: RowChangeRecord) -> CdcResult<()> {
        if record.kind == RecordKind::Heartbeat {
            let heartbeat = record
                .heartbeat
                .unwrap_or_else(|| record.next_position.last_heartbeat_read());
            self.heartbeats.heartbeat(heartbeat);
            self.producer.push(record).await?;

            let stop_at = *self.stop_at_heartbeat.borrow();
            if let Some(stop_at) = stop_at
                && heartbeat >= stop_at
            {
                info!(heartbeat, stop_at, "received final heartbeat, stopping replicator");
                self.run_loop.request_stop();
            }

            return Ok(());
        }

        let ctx = self.consumer.context();
        let is_control_row = record.kind != RecordKind::TransactionPlaceholder
            && ctx.filter().is_control_database(&record.database);

        if is_control_row || self.bootstrapper.should_skip(&record) {
            debug!(
                database = %record.database,
                table = record.table_name(),
                "routing record to bootstrapper"
            );
            return self
                .bootstrapper
                .work(&record, &self.producer, ctx.schema())
                .await;
        }

        self.producer.push(record).await
    }
}

impl<E, S, B> RunLoop for ReplicatorWorker<E, S, B>
where
    E: EventSource + Send + Sync + 'static,
    S: Sink + Send + Sync + 'static,
    B: Bootstrapper + Send + Sync + 'static,
{
    async fn before_start(&mut self) -> CdcResult<()> {
        self.bootstrapper
            .resume(&self.producer, self.consumer.context().schema())
            .await
    }

    async fn work(&mut self) -> CdcResult<()> {
        let Some(record) = self.consumer.next_record().await? else {
            if self.consumer.is_exhausted() {
                info!("end of log reached, stopping replicator");
                self.run_loop.request_stop();
            }

            return Ok(());
        };

        self.process_record(record).await
    }

    async fn before_stop(&mut self) -> CdcResult<()> {
        info!(
            last_heartbeat_read = self.consumer.last_heartbeat_read(),
            "replicator stopping"
        );

        Ok(())
    }
}
