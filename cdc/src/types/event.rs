use std::fmt;

use chrono::{DateTime, Utc};

use crate::types::{BinlogPosition, Value};

/// Identifier assigned by the source to a table for the duration of a binlog file.
pub type TableId = u64;

/// Metadata shared by every binlog event.
#[derive(Debug, Clone, PartialEq)]
pub struct EventHeader {
    /// Coordinate at which the event starts.
    pub position: BinlogPosition,
    /// Coordinate of the event that follows, where replication resumes after this one.
    pub next_position: BinlogPosition,
    /// Event time as written by the source, second resolution.
    pub timestamp: DateTime<Utc>,
    pub server_id: u64,
}

/// A before/after image pair of an updated row.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdatedRow {
    pub before: Vec<Value>,
    pub after: Vec<Value>,
}

/// Body of a decoded binlog event.
///
/// Connection lifecycle notifications travel over the same channel as data events so that
/// their ordering relative to data is explicit.
#[derive(Debug, Clone, PartialEq)]
pub enum EventBody {
    TransactionBegin {
        database: String,
        thread_id: u64,
    },
    Xid {
        xid: u64,
    },
    TableMap {
        table_id: TableId,
        database: String,
        table: String,
    },
    WriteRows {
        table_id: TableId,
        rows: Vec<Vec<Value>>,
    },
    UpdateRows {
        table_id: TableId,
        rows: Vec<UpdatedRow>,
    },
    DeleteRows {
        table_id: TableId,
        rows: Vec<Vec<Value>>,
    },
    /// A statement logged in statement form: DDL, `BEGIN`, `COMMIT` or maintenance statements.
    Query {
        database: String,
        sql: String,
        thread_id: u64,
    },
    /// Original statement text of the row events that follow, when the source logs it.
    RowsQuery {
        sql: String,
    },
    Rotate {
        file: String,
        offset: u64,
    },
    Connected,
    Disconnected,
    CommunicationFailure {
        reason: String,
    },
    DeserializationFailure {
        reason: String,
    },
}

impl EventBody {
    /// Returns `true` for row events, which may only appear inside a transaction.
    pub fn is_dml(&self) -> bool {
        matches!(
            self,
            EventBody::WriteRows { .. }
                | EventBody::UpdateRows { .. }
                | EventBody::DeleteRows { .. }
        )
    }

    pub fn kind(&self) -> EventKind {
        match self {
            EventBody::TransactionBegin { .. } => EventKind::TransactionBegin,
            EventBody::Xid { .. } => EventKind::Xid,
            EventBody::TableMap { .. } => EventKind::TableMap,
            EventBody::WriteRows { .. } => EventKind::WriteRows,
            EventBody::UpdateRows { .. } => EventKind::UpdateRows,
            EventBody::DeleteRows { .. } => EventKind::DeleteRows,
            EventBody::Query { .. } => EventKind::Query,
            EventBody::RowsQuery { .. } => EventKind::RowsQuery,
            EventBody::Rotate { .. } => EventKind::Rotate,
            EventBody::Connected => EventKind::Connected,
            EventBody::Disconnected => EventKind::Disconnected,
            EventBody::CommunicationFailure { .. } => EventKind::CommunicationFailure,
            EventBody::DeserializationFailure { .. } => EventKind::DeserializationFailure,
        }
    }
}

/// Discriminant of [`EventBody`], used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    TransactionBegin,
    Xid,
    TableMap,
    WriteRows,
    UpdateRows,
    DeleteRows,
    Query,
    RowsQuery,
    Rotate,
    Connected,
    Disconnected,
    CommunicationFailure,
    DeserializationFailure,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// A decoded binlog event as delivered by an event source.
#[derive(Debug, Clone, PartialEq)]
pub struct BinlogEvent {
    pub header: EventHeader,
    pub body: EventBody,
}

impl BinlogEvent {
    pub fn new(header: EventHeader, body: EventBody) -> Self {
        Self { header, body }
    }

    /// Returns `true` for `BEGIN`, either as a dedicated event or as a logged statement.
    pub fn is_transaction_begin(&self) -> bool {
        match &self.body {
            EventBody::TransactionBegin { .. } => true,
            EventBody::Query { sql, .. } => sql.trim().eq_ignore_ascii_case("BEGIN"),
            _ => false,
        }
    }

    /// Returns `true` for the markers that close a transaction: an XID event or a logged
    /// `COMMIT` statement.
    pub fn is_transaction_commit(&self) -> bool {
        match &self.body {
            EventBody::Xid { .. } => true,
            EventBody::Query { sql, .. } => sql.trim().eq_ignore_ascii_case("COMMIT"),
            _ => false,
        }
    }
}
