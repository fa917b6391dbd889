//! Long-lived tasks spawned by the pipeline.

mod base;
mod heartbeat;
mod position_flush;
mod replicator;

pub use base::WorkerHandle;
pub use heartbeat::HeartbeatNotifier;
pub use position_flush::PositionFlushWorker;
pub use replicator::ReplicatorWorker;
