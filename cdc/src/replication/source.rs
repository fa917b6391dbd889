use std::future::Future;

use crate::error::CdcResult;
use crate::replication::EventSender;
use crate::types::Position;

/// A reconnectable stream of decoded binlog events.
///
/// Implementations push events, including connection lifecycle notifications, into the
/// [`EventSender`] they were connected with, in log order. Clones share the same connection.
pub trait EventSource {
    /// Starts streaming from `start` into `sender`.
    fn connect(
        &self,
        start: &Position,
        sender: EventSender,
    ) -> impl Future<Output = CdcResult<()>> + Send;

    fn is_connected(&self) -> bool;

    /// Re-establishes the stream from the last position the source delivered.
    fn reconnect(&self) -> impl Future<Output = CdcResult<()>> + Send;

    fn disconnect(&self) -> impl Future<Output = CdcResult<()>> + Send;
}
