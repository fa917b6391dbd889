use std::sync::Arc;

use tokio::sync::watch;

/// Publishes the heartbeat values the replicator reads back from the stream.
///
/// Receivers always observe the latest value. The value starts at the heartbeat stored with the
/// initial position.
#[derive(Debug, Clone)]
pub struct HeartbeatNotifier {
    tx: Arc<watch::Sender<u64>>,
}

impl HeartbeatNotifier {
    pub fn new(initial: u64) -> Self {
        let (tx, _) = watch::channel(initial);

        Self { tx: Arc::new(tx) }
    }

    pub fn heartbeat(&self, value: u64) {
        self.tx.send_replace(value);
    }

    pub fn last(&self) -> u64 {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.tx.subscribe()
    }
}
