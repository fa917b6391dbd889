//! Shared configuration types for the replicator.

mod base;
mod batch;
mod filter;
mod heartbeat;
mod reconnection;
mod replicator;

pub use base::ValidationError;
pub use batch::BatchConfig;
pub use filter::{FilterAction, FilterRuleSpec, ParseFilterRuleError, PatternSpec, ValueSpec};
pub use heartbeat::HeartbeatConfig;
pub use reconnection::ReconnectionConfig;
pub use replicator::{OutputConfig, PositionStoreConfig, ReplicatorConfig, ShutdownConfig};
