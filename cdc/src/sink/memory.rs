use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::checkpoint::CallbackCompleter;
use crate::error::CdcResult;
use crate::sink::Sink;
use crate::types::RowChangeRecord;

/// In-memory sink that acknowledges every record as soon as it is pushed.
///
/// Useful for tests and for inspecting what the replicator emits. All records are lost when the
/// process terminates.
#[derive(Debug, Clone)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<RowChangeRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            records: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Returns a copy of all records pushed since creation or the last [`MemorySink::clear`].
    pub async fn records(&self) -> Vec<RowChangeRecord> {
        self.records.lock().await.clone()
    }

    pub async fn clear(&self) {
        self.records.lock().await.clear();
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl Sink for MemorySink {
    fn name() -> &'static str {
        "memory"
    }

    async fn push(&self, record: RowChangeRecord, completer: CallbackCompleter) -> CdcResult<()> {
        debug!(kind = %record.kind, position = %record.position, "storing record");

        self.records.lock().await.push(record);
        completer.mark_completed();

        Ok(())
    }
}
