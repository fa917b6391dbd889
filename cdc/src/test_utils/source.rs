use std::sync::{Arc, Mutex, PoisonError};

use crate::bail;
use crate::error::{CdcResult, ErrorKind};
use crate::replication::{EventSender, EventSource};
use crate::types::{BinlogEvent, Position};

#[derive(Debug, Default)]
struct Inner {
    sender: Option<EventSender>,
    connected: bool,
    started_at: Vec<Position>,
    reconnects: usize,
    failing_reconnects: usize,
}

/// Event source whose events are pushed by the test.
///
/// Dropping the connection makes the consumer reconnect, which can be told to fail a number of
/// times first.
#[derive(Debug, Clone, Default)]
pub struct ScriptedEventSource {
    inner: Arc<Mutex<Inner>>,
}

impl ScriptedEventSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Delivers `event` to the consumer, waiting while the queue is full.
    ///
    /// # Panics
    ///
    /// Panics if the source was never connected or the consumer is gone.
    pub async fn send(&self, event: BinlogEvent) {
        let sender = self.lock().sender.clone();
        let Some(sender) = sender else {
            panic!("the scripted event source was never connected");
        };

        if let Err(err) = sender.send(event).await {
            panic!("failed to deliver scripted event: {err}");
        }
    }

    pub async fn send_all(&self, events: impl IntoIterator<Item = BinlogEvent>) {
        for event in events {
            self.send(event).await;
        }
    }

    /// Marks the connection as lost, as a network failure would.
    pub fn drop_connection(&self) {
        self.lock().connected = false;
    }

    /// Makes the next `count` reconnection attempts fail.
    pub fn fail_next_reconnects(&self, count: usize) {
        self.lock().failing_reconnects = count;
    }

    /// Number of successful reconnections.
    pub fn reconnect_count(&self) -> usize {
        self.lock().reconnects
    }

    /// Positions the source was asked to start streaming from.
    pub fn started_at(&self) -> Vec<Position> {
        self.lock().started_at.clone()
    }
}

impl EventSource for ScriptedEventSource {
    async fn connect(&self, start: &Position, sender: EventSender) -> CdcResult<()> {
        let mut inner = self.lock();
        inner.sender = Some(sender);
        inner.connected = true;
        inner.started_at.push(start.clone());

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    async fn reconnect(&self) -> CdcResult<()> {
        let mut inner = self.lock();
        if inner.failing_reconnects > 0 {
            inner.failing_reconnects -= 1;
            bail!(
                ErrorKind::SourceConnectionFailed,
                "Injected reconnection failure"
            );
        }

        inner.connected = true;
        inner.reconnects += 1;

        Ok(())
    }

    async fn disconnect(&self) -> CdcResult<()> {
        self.lock().connected = false;

        Ok(())
    }
}
