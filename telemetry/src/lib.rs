//! Tracing and metrics setup shared by replicator binaries and tests.

pub mod metrics;
pub mod tracing;
