//! Core data types flowing through the replicator.

mod event;
mod gtid;
mod position;
mod record;
mod value;

pub use event::{BinlogEvent, EventBody, EventHeader, EventKind, TableId, UpdatedRow};
pub use gtid::GtidSet;
pub use position::{BinlogPosition, Position};
pub use record::{RecordKind, RowChangeRecord, SchemaChangePayload};
pub use value::{RowData, Value};
