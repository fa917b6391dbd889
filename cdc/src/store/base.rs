use std::future::Future;

use crate::error::CdcResult;
use crate::types::Position;

/// Durable storage for the replication position.
///
/// [`PositionStore::get`] must return the position last persisted by [`PositionStore::set`], so
/// that a restarted replicator resumes exactly where the previous one was acknowledged.
///
/// Implementations should ensure thread-safety, the flush worker and the pipeline may call
/// them from different tasks.
pub trait PositionStore {
    /// Returns the stored position, or `None` when nothing was stored yet.
    fn get(&self) -> impl Future<Output = CdcResult<Option<Position>>> + Send;

    /// Persists `position`, replacing the previous one.
    fn set(&self, position: Position) -> impl Future<Output = CdcResult<()>> + Send;

    /// Writes a liveness marker and returns its value.
    ///
    /// Values must increase between calls. Backends writing to the source database produce a
    /// heartbeat row that the replicator later reads back from the stream.
    fn heartbeat(&self) -> impl Future<Output = CdcResult<u64>> + Send;
}
