//! Configuration types and loading for the change-data-capture replicator.

pub mod environment;
pub mod load;
pub mod shared;
