//! Coordination primitives shared by the replicator workers.

pub mod run_loop;
