//! Conversion of out-of-order sink acknowledgments into a safe resume position.

mod completer;
mod inflight;
mod position;

pub use completer::CallbackCompleter;
pub use inflight::{InflightMessage, InflightTracker};
pub use position::PositionTracker;
