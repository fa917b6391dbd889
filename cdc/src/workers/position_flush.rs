use std::time::Duration;

use config::shared::{HeartbeatConfig, PositionStoreConfig};
use metrics::counter;
use tokio::time::Instant;
use tracing::{Instrument, debug, error, info, warn};

use crate::checkpoint::PositionTracker;
use crate::concurrency::run_loop::{RunLoop, RunLoopHandle, run_loop};
use crate::error::{CdcResult, ErrorKind};
#[cfg(feature = "failpoints")]
use crate::failpoints::{
    POSITION_FLUSH__BEFORE_HEARTBEAT, POSITION_FLUSH__BEFORE_STORE, cdc_fail_point,
};
use crate::metrics::{
    CDC_HEARTBEAT_FAILURES_TOTAL, CDC_HEARTBEATS_SENT_TOTAL, CDC_POSITION_STORE_FAILURES_TOTAL,
};
use crate::store::PositionStore;
use crate::types::{BinlogPosition, Position};
use crate::workers::WorkerHandle;

/// Worker persisting the acknowledged position and emitting heartbeats.
///
/// Each tick stores the tracked position if it moved past the stored one, then writes a
/// heartbeat when the position moved to another file, advanced far enough, or the heartbeat
/// interval elapsed. Failed writes are logged and retried on the next tick.
#[derive(Debug)]
pub struct PositionFlushWorker<P> {
    store: P,
    tracker: PositionTracker,
    flush_interval: Duration,
    heartbeat: HeartbeatConfig,
    stored: Option<Position>,
    last_heartbeat_from: Option<BinlogPosition>,
    last_heartbeat_at: Option<Instant>,
    run_loop: RunLoopHandle,
}

impl<P> PositionFlushWorker<P>
where
    P: PositionStore + Send + Sync + 'static,
{
    /// `stored` is the position the store held when the pipeline started.
    pub fn new(
        store: P,
        tracker: PositionTracker,
        position_store: &PositionStoreConfig,
        heartbeat: HeartbeatConfig,
        stored: Option<Position>,
    ) -> Self {
        Self {
            store,
            tracker,
            flush_interval: Duration::from_millis(position_store.flush_interval_ms),
            heartbeat,
            stored,
            last_heartbeat_from: None,
            last_heartbeat_at: None,
            run_loop: RunLoopHandle::new(),
        }
    }

    pub fn spawn(mut self) -> WorkerHandle {
        info!("starting position flush worker");

        let run_loop_handle = self.run_loop.clone();
        let span = tracing::info_span!("position_flush_worker");
        let worker = async move {
            let handle = self.run_loop.clone();
            run_loop(&mut self, &handle).await?;

            info!("position flush worker completed successfully");

            Ok(())
        }
        .instrument(span.or_current());

        WorkerHandle::new(
            "position_flush",
            tokio::spawn(worker),
            run_loop_handle,
            ErrorKind::PositionFlushWorkerPanic,
            ErrorKind::PositionFlushWorkerCancelled,
        )
    }

    fn should_heartbeat(&self, current: Option<&Position>) -> bool {
        let (Some(current), Some(last_from), Some(last_at)) = (
            current,
            self.last_heartbeat_from.as_ref(),
            self.last_heartbeat_at,
        ) else {
            return true;
        };

        let current = current.binlog();
        if current.file() != last_from.file() {
            return true;
        }

        if current.offset().saturating_sub(last_from.offset()) > self.heartbeat.offset_threshold {
            return true;
        }

        last_at.elapsed() >= Duration::from_millis(self.heartbeat.interval_ms)
    }

    async fn store_position(&self, position: Position) -> CdcResult<()> {
        #[cfg(feature = "failpoints")]
        cdc_fail_point(POSITION_FLUSH__BEFORE_STORE)?;

        self.store.set(position).await
    }

    async fn send_heartbeat(&self) -> CdcResult<u64> {
        #[cfg(feature = "failpoints")]
        cdc_fail_point(POSITION_FLUSH__BEFORE_HEARTBEAT)?;

        self.store.heartbeat().await
    }

    async fn flush(&mut self) -> Option<Position> {
        let current = self.tracker.get();

        if let Some(position) = &current
            && self
                .stored
                .as_ref()
                .is_none_or(|stored| position.newer_than(stored))
        {
            match self.store_position(position.clone()).await {
                Ok(()) => {
                    debug!(%position, "stored position");
                    self.stored = Some(position.clone());
                }
                Err(err) => {
                    warn!(
                        error = %err,
                        %position,
                        "failed to store position, retrying on next tick"
                    );
                    counter!(CDC_POSITION_STORE_FAILURES_TOTAL).increment(1);
                }
            }
        }

        current
    }
}

impl<P> RunLoop for PositionFlushWorker<P>
where
    P: PositionStore + Send + Sync + 'static,
{
    async fn work(&mut self) -> CdcResult<()> {
        let current = self.flush().await;

        tokio::select! {
            biased;

            _ = self.run_loop.stop_requested() => return Ok(()),
            _ = tokio::time::sleep(self.flush_interval) => {}
        }

        if !self.should_heartbeat(current.as_ref()) {
            return Ok(());
        }

        match self.send_heartbeat().await {
            Ok(heartbeat) => {
                debug!(heartbeat, "sent heartbeat");
                counter!(CDC_HEARTBEATS_SENT_TOTAL).increment(1);
                self.last_heartbeat_at = Some(Instant::now());
                if let Some(position) = current {
                    self.last_heartbeat_from = Some(position.binlog().clone());
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to send heartbeat, retrying on next tick");
                counter!(CDC_HEARTBEAT_FAILURES_TOTAL).increment(1);
            }
        }

        Ok(())
    }

    /// Stores the final position if it differs from the stored one.
    async fn before_stop(&mut self) -> CdcResult<()> {
        let Some(position) = self.tracker.get() else {
            return Ok(());
        };

        if self.stored.as_ref() == Some(&position) {
            return Ok(());
        }

        info!(%position, "storing final position");
        if let Err(err) = self.store_position(position.clone()).await {
            error!(error = %err, %position, "failed to store final position");
            counter!(CDC_POSITION_STORE_FAILURES_TOTAL).increment(1);

            return Err(err);
        }
        self.stored = Some(position);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryPositionStore;

    fn position(file: &str, offset: u64) -> Position {
        Position::new(BinlogPosition::new(file, offset), 0)
    }

    fn worker(
        store: MemoryPositionStore,
        tracker: PositionTracker,
    ) -> PositionFlushWorker<MemoryPositionStore> {
        PositionFlushWorker::new(
            store,
            tracker,
            &PositionStoreConfig {
                flush_interval_ms: 10,
            },
            HeartbeatConfig::default(),
            None,
        )
    }

    #[tokio::test]
    async fn stores_only_newer_positions() {
        let store = MemoryPositionStore::new();
        let tracker = PositionTracker::new(None);
        let mut worker = worker(store.clone(), tracker.clone());

        tracker.set(position("mysql-bin.000001", 100));
        worker.flush().await;
        worker.flush().await;

        assert_eq!(
            store.positions().await,
            vec![position("mysql-bin.000001", 100)]
        );
    }

    #[tokio::test]
    async fn heartbeats_follow_movement_and_time() {
        let tracker = PositionTracker::new(None);
        let mut worker = worker(MemoryPositionStore::new(), tracker);
        let start = position("mysql-bin.000001", 100);

        assert!(worker.should_heartbeat(Some(&start)));

        worker.last_heartbeat_from = Some(start.binlog().clone());
        worker.last_heartbeat_at = Some(Instant::now());

        assert!(!worker.should_heartbeat(Some(&position("mysql-bin.000001", 1_000))));
        assert!(worker.should_heartbeat(Some(&position("mysql-bin.000001", 1_101))));
        assert!(worker.should_heartbeat(Some(&position("mysql-bin.000002", 4))));
        assert!(worker.should_heartbeat(None));
    }

    #[tokio::test]
    async fn final_position_is_stored_once() {
        let store = MemoryPositionStore::new();
        let tracker = PositionTracker::new(None);
        let mut worker = worker(store.clone(), tracker.clone());

        tracker.set(position("mysql-bin.000001", 100));
        worker.before_stop().await.unwrap();
        worker.before_stop().await.unwrap();

        assert_eq!(store.positions().await.len(), 1);
    }

    #[tokio::test]
    async fn failed_writes_are_retried_on_the_next_tick() {
        let store = MemoryPositionStore::new();
        let tracker = PositionTracker::new(None);
        let mut worker = worker(store.clone(), tracker.clone());
        store.fail_next_writes(1).await;

        tracker.set(position("mysql-bin.000001", 100));
        worker.flush().await;
        assert!(store.positions().await.is_empty());

        worker.flush().await;
        assert_eq!(store.positions().await.len(), 1);
    }
}
