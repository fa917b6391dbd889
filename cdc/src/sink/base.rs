use std::future::Future;

use crate::checkpoint::CallbackCompleter;
use crate::error::CdcResult;
use crate::types::RowChangeRecord;

/// Trait for systems that receive the records produced by the replicator.
///
/// A [`Sink`] may deliver records asynchronously and acknowledge them in any order through the
/// [`CallbackCompleter`] handed over with each record. The replicator only advances its
/// persisted position once every transaction up to that position has been acknowledged, so a
/// sink never needs to acknowledge in commit order.
///
/// An error returned from [`Sink::push`] stops replication. Failures that happen after the
/// record was accepted are reported through [`CallbackCompleter::mark_failed`] instead, which
/// leaves the position at the last acknowledged transaction.
///
/// The trait also provides an optional [`Sink::shutdown`] method with a default no-op
/// implementation. Override it if the sink must flush buffered records when the pipeline stops.
pub trait Sink {
    /// Returns the name of the sink.
    fn name() -> &'static str;

    /// Propagates the shutdown signal to the sink.
    ///
    /// The default implementation is a no-op.
    fn shutdown(&self) -> impl Future<Output = CdcResult<()>> + Send {
        async { Ok(()) }
    }

    /// Accepts one record for delivery.
    ///
    /// Records arrive in commit order. `completer` must eventually be completed or failed.
    fn push(
        &self,
        record: RowChangeRecord,
        completer: CallbackCompleter,
    ) -> impl Future<Output = CdcResult<()>> + Send;
}
