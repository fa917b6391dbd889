//! Replication core of a change-data-capture daemon for MySQL binary logs.
//!
//! Decoded binlog events flow from an [`replication::EventSource`] through a bounded queue into
//! the [`replication::StreamConsumer`], which reassembles transactions against the live
//! [`schema::SchemaStore`], applies the [`filter::Filter`] and yields ordered records. The
//! [`sink::Producer`] hands them to a [`sink::Sink`], and acknowledgments flow back through the
//! [`checkpoint`] module into a position that only ever covers fully acknowledged
//! transactions. The [`pipeline::Pipeline`] wires these together with the workers persisting
//! that position.

pub mod bootstrap;
pub mod checkpoint;
pub mod concurrency;
pub mod error;
#[cfg(feature = "failpoints")]
pub mod failpoints;
pub mod filter;
mod macros;
pub mod metrics;
pub mod pipeline;
pub mod replication;
pub mod schema;
pub mod sink;
pub mod store;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
pub mod workers;
