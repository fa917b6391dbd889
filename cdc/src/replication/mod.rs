//! Consumption of the binlog event stream and reassembly of transactions.

mod assembler;
mod buffer;
mod consumer;
mod context;
mod queue;
mod reconnect;
mod source;

pub use assembler::{AssembledTransaction, TransactionAssembler};
pub use buffer::RecordBuffer;
pub use consumer::{HEARTBEATS_TABLE, StreamConsumer};
pub use context::StreamContext;
pub use queue::{EventQueue, EventSender, event_queue};
pub use reconnect::ReconnectionManager;
pub use source::EventSource;
