use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::types::Position;

/// The newest position whose every preceding transaction was acknowledged.
///
/// Written by acknowledgment callbacks and read by the flush worker. Updates only move the
/// position forward, so reordered callbacks can never make it regress.
#[derive(Debug, Clone, Default)]
pub struct PositionTracker {
    inner: Arc<Mutex<Option<Position>>>,
}

impl PositionTracker {
    pub fn new(initial: Option<Position>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(initial)),
        }
    }

    /// Moves the position to `position` if it is newer, returning whether it moved.
    pub fn set(&self, position: Position) -> bool {
        let mut current = self.lock();
        let newer = current
            .as_ref()
            .is_none_or(|current| position.newer_than(current));
        if newer {
            *current = Some(position);
        }
        newer
    }

    pub fn get(&self) -> Option<Position> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Position>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
