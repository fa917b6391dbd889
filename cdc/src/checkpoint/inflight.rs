use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::gauge;
use tokio::time::Instant;
use tracing::warn;

use crate::metrics::CDC_INFLIGHT_MESSAGES;
use crate::types::Position;

/// A transaction pushed to the sink and not yet acknowledged.
#[derive(Debug, Clone, PartialEq)]
pub struct InflightMessage {
    /// Position replication resumes from once this transaction is acknowledged.
    pub position: Position,
    /// Source time of the event the transaction was committed at.
    pub event_timestamp: DateTime<Utc>,
    pub added_at: Instant,
    pub acknowledged: bool,
}

#[derive(Debug, Default)]
struct Inner {
    messages: BTreeMap<u64, InflightMessage>,
    sequences: HashMap<Position, u64>,
    next_sequence: u64,
}

/// Ordered set of unacknowledged transactions.
///
/// Acknowledgments may arrive in any order, but a position is only released once every
/// transaction added before it has been acknowledged too. Clones share the same set.
#[derive(Debug, Clone, Default)]
pub struct InflightTracker {
    inner: Arc<Mutex<Inner>>,
}

impl InflightTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a transaction at the tail. Adding a position that is already tracked is a no-op.
    pub fn add_message(&self, position: Position, event_timestamp: DateTime<Utc>) {
        let mut inner = self.lock();
        if inner.sequences.contains_key(&position) {
            return;
        }

        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        inner.sequences.insert(position.clone(), sequence);
        inner.messages.insert(
            sequence,
            InflightMessage {
                position,
                event_timestamp,
                added_at: Instant::now(),
                acknowledged: false,
            },
        );

        gauge!(CDC_INFLIGHT_MESSAGES).set(inner.messages.len() as f64);
    }

    /// Acknowledges the transaction at `position` and releases the acknowledged prefix.
    ///
    /// Returns the newest released message, whose position is safe to persist, or `None` when
    /// an older transaction is still outstanding.
    pub fn complete_message(&self, position: &Position) -> Option<InflightMessage> {
        let mut inner = self.lock();

        let Some(sequence) = inner.sequences.get(position).copied() else {
            warn!(%position, "completed a message that is not in flight");
            return None;
        };
        if let Some(message) = inner.messages.get_mut(&sequence) {
            message.acknowledged = true;
        }

        let mut released = None;
        while let Some(entry) = inner.messages.first_entry() {
            if !entry.get().acknowledged {
                break;
            }
            let message = entry.remove();
            inner.sequences.remove(&message.position);
            released = Some(message);
        }

        gauge!(CDC_INFLIGHT_MESSAGES).set(inner.messages.len() as f64);

        released
    }

    pub fn len(&self) -> usize {
        self.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How long the oldest outstanding transaction has been waiting.
    pub fn oldest_age(&self) -> Option<Duration> {
        self.lock()
            .messages
            .first_key_value()
            .map(|(_, message)| message.added_at.elapsed())
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
