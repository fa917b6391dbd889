use std::sync::Arc;

use tokio::sync::{Mutex, Notify};

use crate::bail;
use crate::checkpoint::CallbackCompleter;
use crate::error::{CdcResult, ErrorKind};
use crate::sink::Sink;
use crate::test_utils::notify::TimedNotify;
use crate::types::{Position, RowChangeRecord};

type RecordCondition = Box<dyn Fn(&[RowChangeRecord]) -> bool + Send + Sync>;

struct Inner {
    records: Vec<RowChangeRecord>,
    pending: Vec<CallbackCompleter>,
    auto_acknowledge: bool,
    fail_pushes: bool,
    record_conditions: Vec<(RecordCondition, Arc<Notify>)>,
}

impl Inner {
    fn check_conditions(&mut self) {
        let records = &self.records;
        self.record_conditions.retain(|(condition, notify)| {
            let met = condition(records);
            if met {
                notify.notify_one();
            }
            !met
        });
    }
}

/// Sink that keeps every record and lets the test decide when, and in which order, records are
/// acknowledged.
#[derive(Clone)]
pub struct ManualAckSink {
    inner: Arc<Mutex<Inner>>,
}

impl ManualAckSink {
    pub fn new() -> Self {
        Self::with_auto_acknowledge(false)
    }

    /// Creates a sink acknowledging every record as soon as it is pushed.
    pub fn auto_acknowledging() -> Self {
        Self::with_auto_acknowledge(true)
    }

    fn with_auto_acknowledge(auto_acknowledge: bool) -> Self {
        let inner = Inner {
            records: Vec::new(),
            pending: Vec::new(),
            auto_acknowledge,
            fail_pushes: false,
            record_conditions: Vec::new(),
        };

        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    pub async fn records(&self) -> Vec<RowChangeRecord> {
        self.inner.lock().await.records.clone()
    }

    /// Number of pushed records not acknowledged yet.
    pub async fn pending_count(&self) -> usize {
        self.inner.lock().await.pending.len()
    }

    /// Acknowledges every pending record whose resume position is `position`, returning how
    /// many were acknowledged.
    pub async fn acknowledge(&self, position: &Position) -> usize {
        let mut inner = self.inner.lock().await;
        let (matching, rest): (Vec<_>, Vec<_>) = inner
            .pending
            .drain(..)
            .partition(|completer| completer.position() == position);
        inner.pending = rest;

        let count = matching.len();
        matching
            .into_iter()
            .for_each(CallbackCompleter::mark_completed);

        count
    }

    /// Acknowledges every pending record in push order.
    pub async fn acknowledge_all(&self) {
        let pending = std::mem::take(&mut self.inner.lock().await.pending);
        pending
            .into_iter()
            .for_each(CallbackCompleter::mark_completed);
    }

    /// Makes every following push fail.
    pub async fn fail_pushes(&self) {
        self.inner.lock().await.fail_pushes = true;
    }

    /// Returns a notification fired once `condition` holds for the records received so far.
    pub async fn notify_on_records<F>(&self, condition: F) -> TimedNotify
    where
        F: Fn(&[RowChangeRecord]) -> bool + Send + Sync + 'static,
    {
        let notify = Arc::new(Notify::new());
        let mut inner = self.inner.lock().await;
        inner
            .record_conditions
            .push((Box::new(condition), notify.clone()));
        inner.check_conditions();

        TimedNotify::new(notify)
    }

    /// Returns a notification fired once at least `count` records were received.
    pub async fn wait_for_records(&self, count: usize) -> TimedNotify {
        self.notify_on_records(move |records| records.len() >= count)
            .await
    }
}

impl Default for ManualAckSink {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ManualAckSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualAckSink").finish_non_exhaustive()
    }
}

impl Sink for ManualAckSink {
    fn name() -> &'static str {
        "manual_ack"
    }

    async fn push(&self, record: RowChangeRecord, completer: CallbackCompleter) -> CdcResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.fail_pushes {
            bail!(ErrorKind::SinkPushFailed, "Injected push failure");
        }

        inner.records.push(record);
        if inner.auto_acknowledge {
            completer.mark_completed();
        } else {
            inner.pending.push(completer);
        }
        inner.check_conditions();

        Ok(())
    }
}
