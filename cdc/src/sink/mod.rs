//! Delivery of records to downstream systems.

mod base;
mod batching;
mod memory;
mod producer;

pub use base::Sink;
pub use batching::{BatchWriter, BatchingSink};
pub use memory::MemorySink;
pub use producer::Producer;
