use std::sync::Arc;
use std::time::Duration;

use config::shared::ReplicatorConfig;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::bail;
use crate::bootstrap::Bootstrapper;
use crate::checkpoint::{InflightTracker, PositionTracker};
use crate::error::{CdcError, CdcResult, ErrorKind};
use crate::filter::Filter;
use crate::replication::{EventSource, StreamConsumer, StreamContext, event_queue};
use crate::schema::SchemaStore;
use crate::sink::{Producer, Sink};
use crate::store::PositionStore;
use crate::types::Position;
use crate::workers::{HeartbeatNotifier, PositionFlushWorker, ReplicatorWorker, WorkerHandle};

/// Interval at which shutdown checks whether in-flight messages were acknowledged.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug)]
enum PipelineState {
    NotStarted,
    Started {
        replicator: WorkerHandle,
        position_flush: WorkerHandle,
    },
}

/// A replication pipeline from an event source to a sink.
///
/// The pipeline owns the replicator worker, which consumes the stream and pushes records, and
/// the position flush worker, which persists acknowledged positions. Stopping is orderly: the
/// replicator stops first, outstanding acknowledgments are given time to arrive, and only then
/// is the final position stored.
#[derive(Debug)]
pub struct Pipeline<E, S, P, B> {
    config: Arc<ReplicatorConfig>,
    source: E,
    sink: S,
    store: P,
    bootstrapper: B,
    schema: SchemaStore,
    inflight: InflightTracker,
    tracker: PositionTracker,
    heartbeats: HeartbeatNotifier,
    stop_at_heartbeat_tx: watch::Sender<Option<u64>>,
    state: PipelineState,
    errors: Vec<CdcError>,
}

impl<E, S, P, B> Pipeline<E, S, P, B>
where
    E: EventSource + Clone + Send + Sync + 'static,
    S: Sink + Clone + Send + Sync + 'static,
    P: PositionStore + Clone + Send + Sync + 'static,
    B: Bootstrapper + Clone + Send + Sync + 'static,
{
    pub fn new(
        config: ReplicatorConfig,
        source: E,
        sink: S,
        store: P,
        bootstrapper: B,
        schema: SchemaStore,
    ) -> Self {
        let (stop_at_heartbeat_tx, _) = watch::channel(None);

        Self {
            config: Arc::new(config),
            source,
            sink,
            store,
            bootstrapper,
            schema,
            inflight: InflightTracker::new(),
            tracker: PositionTracker::new(None),
            heartbeats: HeartbeatNotifier::new(0),
            stop_at_heartbeat_tx,
            state: PipelineState::NotStarted,
            errors: Vec::new(),
        }
    }

    pub fn schema(&self) -> &SchemaStore {
        &self.schema
    }

    /// The position acknowledged so far, which the flush worker persists.
    pub fn position(&self) -> Option<Position> {
        self.tracker.get()
    }

    pub fn heartbeat_notifier(&self) -> &HeartbeatNotifier {
        &self.heartbeats
    }

    /// Number of transactions pushed to the sink and not acknowledged yet.
    pub fn inflight_messages(&self) -> usize {
        self.inflight.len()
    }

    /// Stops the replicator once a heartbeat at or above `heartbeat` was read and pushed.
    ///
    /// Can be called before or after the pipeline started.
    pub fn stop_at_heartbeat(&self, heartbeat: u64) {
        info!(heartbeat, "replicator will stop at heartbeat");
        self.stop_at_heartbeat_tx.send_replace(Some(heartbeat));
    }

    pub async fn start(&mut self) -> CdcResult<()> {
        if matches!(self.state, PipelineState::Started { .. }) {
            bail!(ErrorKind::InvalidState, "The pipeline was already started");
        }

        info!(client_id = %self.config.client_id, "starting pipeline");

        let filter = Arc::new(Filter::from_config(&self.config)?);

        let stored = self.store.get().await?;
        let initial = match (&stored, &self.config.init_position) {
            (Some(stored), _) => stored.clone(),
            (None, Some(init_position)) => init_position.parse()?,
            (None, None) => bail!(
                ErrorKind::ConfigError,
                "No position to start replicating from",
                "The position store is empty and no init_position is configured"
            ),
        };
        info!(position = %initial, resumed = stored.is_some(), "starting replication");

        self.tracker.set(initial.clone());
        self.heartbeats.heartbeat(initial.last_heartbeat_read());

        let (sender, queue) = event_queue(self.config.queue_capacity);
        self.source.connect(&initial, sender).await?;

        let ctx = StreamContext::new(
            &self.config,
            queue,
            self.source.clone(),
            self.schema.clone(),
            filter,
        );
        let consumer = StreamConsumer::new(&self.config, ctx, initial.last_heartbeat_read());
        let producer = Producer::new(
            self.sink.clone(),
            self.config.output.clone(),
            self.inflight.clone(),
            self.tracker.clone(),
        );

        let replicator = ReplicatorWorker::new(
            self.config.client_id.clone(),
            consumer,
            producer,
            self.bootstrapper.clone(),
            self.heartbeats.clone(),
            self.stop_at_heartbeat_tx.subscribe(),
        )
        .spawn();

        let position_flush = PositionFlushWorker::new(
            self.store.clone(),
            self.tracker.clone(),
            &self.config.position_store,
            self.config.heartbeat.clone(),
            stored,
        )
        .spawn();

        self.state = PipelineState::Started {
            replicator,
            position_flush,
        };

        Ok(())
    }

    /// Asks the replicator to stop and waits for it, aborting it if it does not stop in time.
    ///
    /// The rest of the shutdown happens in [`Pipeline::wait`].
    pub async fn shutdown(&mut self) {
        let PipelineState::Started { replicator, .. } = &self.state else {
            info!("pipeline was not started, nothing to shut down");

            return;
        };

        info!("shutting down the pipeline");
        replicator.request_stop();

        let timeout = Duration::from_millis(self.config.shutdown.stop_timeout_ms);
        if let Err(err) = replicator.run_loop().await_stop(timeout).await {
            error!(error = %err, "replicator did not stop in time, aborting it");
            replicator.abort();
            self.errors.push(err);
        }
    }

    /// Waits for the replicator to end, then drains acknowledgments, stores the final position
    /// and releases the sink and the source.
    ///
    /// Errors of every step are collected into one error.
    pub async fn wait(mut self) -> CdcResult<()> {
        let state = std::mem::replace(&mut self.state, PipelineState::NotStarted);
        let PipelineState::Started {
            mut replicator,
            mut position_flush,
        } = state
        else {
            info!("pipeline was not started, nothing to wait for");

            return Ok(());
        };

        let mut errors = std::mem::take(&mut self.errors);

        info!("waiting for replicator worker to complete");
        if let Err(err) = replicator.wait().await {
            info!("replicator worker completed with an error");
            errors.push(err);
        }

        self.drain_inflight().await;

        position_flush.request_stop();
        let timeout = Duration::from_millis(self.config.shutdown.stop_timeout_ms);
        if let Err(err) = position_flush.run_loop().await_stop(timeout).await {
            error!(error = %err, "position flush worker did not stop in time, aborting it");
            position_flush.abort();
            errors.push(err);
        }
        if let Err(err) = position_flush.wait().await {
            errors.push(err);
        }

        if let Err(err) = self.sink.shutdown().await {
            error!(error = %err, "failed to shut down sink");
            errors.push(err);
        }

        if let Err(err) = self.source.disconnect().await {
            warn!(error = %err, "failed to disconnect event source");
            errors.push(err);
        }

        info!(position = ?self.tracker.get(), "pipeline stopped");

        if !errors.is_empty() {
            return Err(errors.into());
        }

        Ok(())
    }

    pub async fn shutdown_and_wait(mut self) -> CdcResult<()> {
        self.shutdown().await;
        self.wait().await
    }

    async fn drain_inflight(&self) {
        let deadline =
            Instant::now() + Duration::from_millis(self.config.shutdown.drain_timeout_ms);

        while !self.inflight.is_empty() {
            if Instant::now() >= deadline {
                warn!(
                    remaining = self.inflight.len(),
                    "in-flight messages were not acknowledged before the drain timeout"
                );
                return;
            }

            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    }
}
