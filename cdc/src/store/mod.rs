//! Durable storage of the replication position.

mod base;
mod file;
mod memory;

pub use base::PositionStore;
pub use file::FilePositionStore;
pub use memory::MemoryPositionStore;
