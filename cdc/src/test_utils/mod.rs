//! Utilities for driving the replication core in tests without a MySQL server.
//!
//! A test scripts binlog events with an [`event::EventBuilder`], feeds them through a
//! [`source::ScriptedEventSource`], and observes what reaches a [`sink::ManualAckSink`], which
//! only acknowledges records when the test says so. The [`schema`] module provides the catalog
//! the scripted events refer to and [`pipeline`] wires everything into a pipeline.

pub mod event;
#[cfg(feature = "failpoints")]
pub mod failpoints;
pub mod notify;
pub mod pipeline;
pub mod schema;
pub mod sink;
pub mod source;
