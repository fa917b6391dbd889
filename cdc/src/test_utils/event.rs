use chrono::{DateTime, TimeZone, Utc};

use crate::types::{BinlogEvent, BinlogPosition, EventBody, EventHeader, TableId, UpdatedRow, Value};

/// Offset of the first event in a binlog file, right after the magic header.
pub const FIRST_EVENT_OFFSET: u64 = 4;

/// Size every scripted event is pretended to occupy in the log.
pub const EVENT_SIZE: u64 = 100;

const SERVER_ID: u64 = 1;

const THREAD_ID: u64 = 7;

/// Builds binlog events with consecutive positions, as a source would deliver them.
#[derive(Debug, Clone)]
pub struct EventBuilder {
    file: String,
    offset: u64,
    timestamp: DateTime<Utc>,
    next_xid: u64,
}

impl EventBuilder {
    /// Starts at the first event of `file`.
    pub fn new(file: impl Into<String>) -> Self {
        Self::at(BinlogPosition::new(file, FIRST_EVENT_OFFSET))
    }

    /// Continues the log from `position`.
    pub fn at(position: BinlogPosition) -> Self {
        Self {
            file: position.file().to_string(),
            offset: position.offset(),
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).single().unwrap_or_default(),
            next_xid: 1,
        }
    }

    /// Position the next event is written at.
    pub fn position(&self) -> BinlogPosition {
        BinlogPosition::new(self.file.clone(), self.offset)
    }

    pub fn event(&mut self, body: EventBody) -> BinlogEvent {
        let position = self.position();
        self.offset += EVENT_SIZE;
        self.timestamp += chrono::Duration::seconds(1);

        let header = EventHeader {
            position,
            next_position: self.position(),
            timestamp: self.timestamp,
            server_id: SERVER_ID,
        };

        BinlogEvent::new(header, body)
    }

    pub fn begin(&mut self, database: &str) -> BinlogEvent {
        self.event(EventBody::TransactionBegin {
            database: database.to_string(),
            thread_id: THREAD_ID,
        })
    }

    /// Commits with the next transaction id.
    pub fn xid(&mut self) -> BinlogEvent {
        let xid = self.next_xid;
        self.next_xid += 1;

        self.event(EventBody::Xid { xid })
    }

    /// Commits with an explicit transaction id.
    pub fn xid_with(&mut self, xid: u64) -> BinlogEvent {
        self.event(EventBody::Xid { xid })
    }

    /// Commits as a logged `COMMIT` statement, the way non-transactional engines do.
    pub fn commit_query(&mut self, database: &str) -> BinlogEvent {
        self.query(database, "COMMIT")
    }

    pub fn query(&mut self, database: &str, sql: &str) -> BinlogEvent {
        self.event(EventBody::Query {
            database: database.to_string(),
            sql: sql.to_string(),
            thread_id: THREAD_ID,
        })
    }

    pub fn rows_query(&mut self, sql: &str) -> BinlogEvent {
        self.event(EventBody::RowsQuery {
            sql: sql.to_string(),
        })
    }

    pub fn table_map(&mut self, table_id: TableId, database: &str, table: &str) -> BinlogEvent {
        self.event(EventBody::TableMap {
            table_id,
            database: database.to_string(),
            table: table.to_string(),
        })
    }

    pub fn insert(&mut self, table_id: TableId, rows: Vec<Vec<Value>>) -> BinlogEvent {
        self.event(EventBody::WriteRows { table_id, rows })
    }

    pub fn update(
        &mut self,
        table_id: TableId,
        rows: Vec<(Vec<Value>, Vec<Value>)>,
    ) -> BinlogEvent {
        let rows = rows
            .into_iter()
            .map(|(before, after)| UpdatedRow { before, after })
            .collect();

        self.event(EventBody::UpdateRows { table_id, rows })
    }

    pub fn delete(&mut self, table_id: TableId, rows: Vec<Vec<Value>>) -> BinlogEvent {
        self.event(EventBody::DeleteRows { table_id, rows })
    }

    /// Rotates to `file`. The rotate event is written at the end of the current file.
    pub fn rotate(&mut self, file: &str) -> BinlogEvent {
        let event = self.event(EventBody::Rotate {
            file: file.to_string(),
            offset: FIRST_EVENT_OFFSET,
        });
        self.file = file.to_string();
        self.offset = FIRST_EVENT_OFFSET;

        event
    }

    /// A complete transaction inserting `rows` into `database.table`.
    pub fn insert_transaction(
        &mut self,
        table_id: TableId,
        database: &str,
        table: &str,
        rows: Vec<Vec<Value>>,
    ) -> Vec<BinlogEvent> {
        vec![
            self.begin(database),
            self.table_map(table_id, database, table),
            self.insert(table_id, rows),
            self.xid(),
        ]
    }

    /// A transaction moving the heartbeat row of `client_id` from `previous` to `heartbeat`.
    pub fn heartbeat_transaction(
        &mut self,
        table_id: TableId,
        control_database: &str,
        client_id: &str,
        previous: u64,
        heartbeat: u64,
    ) -> Vec<BinlogEvent> {
        let row = |value: u64| vec![Value::UInt(SERVER_ID), text(client_id), Value::UInt(value)];

        vec![
            self.begin(control_database),
            self.table_map(table_id, control_database, "heartbeats"),
            self.update(table_id, vec![(row(previous), row(heartbeat))]),
            self.xid(),
        ]
    }
}

pub fn int(value: i64) -> Value {
    Value::Int(value)
}

pub fn text(value: &str) -> Value {
    Value::String(value.to_string())
}

pub fn decimal(value: &str) -> Value {
    Value::Decimal(value.to_string())
}
