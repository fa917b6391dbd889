use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::bail;
use crate::error::{CdcResult, ErrorKind};
use crate::store::PositionStore;
use crate::types::Position;

#[derive(Debug, Default)]
struct Inner {
    /// Every position stored, oldest first. The last entry is the current position.
    positions: Vec<Position>,
    heartbeats: Vec<u64>,
    /// Number of upcoming writes that fail.
    failing_writes: usize,
}

/// In-memory position store for tests and development.
///
/// Keeps the history of stored positions and heartbeats so tests can inspect what the flush
/// worker persisted, and can be told to fail upcoming writes.
#[derive(Debug, Clone, Default)]
pub struct MemoryPositionStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryPositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that already holds `position`.
    pub fn with_position(position: Position) -> Self {
        let inner = Inner {
            positions: vec![position],
            ..Default::default()
        };

        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    pub async fn positions(&self) -> Vec<Position> {
        self.inner.lock().await.positions.clone()
    }

    pub async fn heartbeats(&self) -> Vec<u64> {
        self.inner.lock().await.heartbeats.clone()
    }

    /// Makes the next `count` writes, positions and heartbeats alike, fail.
    pub async fn fail_next_writes(&self, count: usize) {
        self.inner.lock().await.failing_writes = count;
    }
}

impl Inner {
    fn check_write(&mut self) -> CdcResult<()> {
        if self.failing_writes > 0 {
            self.failing_writes -= 1;
            bail!(
                ErrorKind::PositionStoreFailed,
                "The position store rejected the write"
            );
        }

        Ok(())
    }
}

impl PositionStore for MemoryPositionStore {
    async fn get(&self) -> CdcResult<Option<Position>> {
        Ok(self.inner.lock().await.positions.last().cloned())
    }

    async fn set(&self, position: Position) -> CdcResult<()> {
        let mut inner = self.inner.lock().await;
        inner.check_write()?;
        inner.positions.push(position);

        Ok(())
    }

    async fn heartbeat(&self) -> CdcResult<u64> {
        let mut inner = self.inner.lock().await;
        inner.check_write()?;

        let now = Utc::now().timestamp_millis().max(0) as u64;
        let heartbeat = match inner.heartbeats.last() {
            Some(last) if *last >= now => last + 1,
            _ => now,
        };
        inner.heartbeats.push(heartbeat);

        Ok(heartbeat)
    }
}
