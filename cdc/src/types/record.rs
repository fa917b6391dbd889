use std::fmt;

use chrono::{DateTime, Utc};
use config::shared::OutputConfig;
use serde::{Deserialize, Serialize};

use crate::schema::ResolvedSchemaChange;
use crate::types::{Position, RowData};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Insert,
    Update,
    Delete,
    Ddl,
    Heartbeat,
    /// Stands in for a committed transaction whose rows were all filtered out, so that its
    /// position still becomes eligible for checkpointing.
    TransactionPlaceholder,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecordKind::Insert => "insert",
            RecordKind::Update => "update",
            RecordKind::Delete => "delete",
            RecordKind::Ddl => "ddl",
            RecordKind::Heartbeat => "heartbeat",
            RecordKind::TransactionPlaceholder => "transaction_placeholder",
        };
        f.write_str(name)
    }
}

/// The statement and resolved mutation behind a [`RecordKind::Ddl`] record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaChangePayload {
    pub sql: String,
    pub change: ResolvedSchemaChange,
}

/// A schema-aware change produced by the replication core and handed to a sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowChangeRecord {
    pub kind: RecordKind,
    pub database: String,
    pub table: Option<String>,
    pub data: RowData,
    /// Previous values of the columns an update touched.
    pub old_data: Option<RowData>,
    pub timestamp: DateTime<Utc>,
    /// Position of the event the record was decoded from.
    pub position: Position,
    /// Position replication resumes from once this record is acknowledged.
    pub next_position: Position,
    pub xid: Option<u64>,
    /// Set on the last record of a transaction, the only record that advances the checkpoint.
    pub tx_commit: bool,
    /// Version of the schema the record was decoded against.
    pub schema_id: Option<u64>,
    pub server_id: Option<u64>,
    pub thread_id: Option<u64>,
    pub schema_change: Option<SchemaChangePayload>,
    pub heartbeat: Option<u64>,
    /// Statement that produced the row, when the source logs it.
    pub row_query: Option<String>,
}

impl RowChangeRecord {
    pub fn new(
        kind: RecordKind,
        database: impl Into<String>,
        table: Option<String>,
        timestamp: DateTime<Utc>,
        position: Position,
        next_position: Position,
    ) -> Self {
        Self {
            kind,
            database: database.into(),
            table,
            data: RowData::new(),
            old_data: None,
            timestamp,
            position,
            next_position,
            xid: None,
            tx_commit: false,
            schema_id: None,
            server_id: None,
            thread_id: None,
            schema_change: None,
            heartbeat: None,
            row_query: None,
        }
    }

    /// Returns `true` when the record should reach the sink rather than be acknowledged in
    /// place.
    pub fn should_output(&self, output: &OutputConfig) -> bool {
        match self.kind {
            RecordKind::Insert | RecordKind::Update | RecordKind::Delete => true,
            RecordKind::Ddl => output.ddl,
            RecordKind::Heartbeat => output.heartbeats,
            RecordKind::TransactionPlaceholder => false,
        }
    }

    pub fn is_dml(&self) -> bool {
        matches!(
            self.kind,
            RecordKind::Insert | RecordKind::Update | RecordKind::Delete
        )
    }

    pub fn table_name(&self) -> &str {
        self.table.as_deref().unwrap_or_default()
    }
}
