use std::collections::VecDeque;

use config::shared::ReplicatorConfig;
use metrics::gauge;
use tracing::{debug, info, warn};

use crate::error::CdcResult;
use crate::metrics::CDC_LAST_HEARTBEAT_READ;
use crate::replication::{EventSource, RecordBuffer, StreamContext, TransactionAssembler};
use crate::types::{BinlogEvent, EventBody, RecordKind, RowChangeRecord, Value};

/// Name of the control table heartbeat rows are written to.
pub const HEARTBEATS_TABLE: &str = "heartbeats";

/// Turns the raw event stream into an ordered stream of records.
///
/// Records of a transaction are only released once its commit has been read, and the records
/// of one transaction are released before any event of the next one is looked at.
#[derive(Debug)]
pub struct StreamConsumer<E> {
    ctx: StreamContext<E>,
    assembler: TransactionAssembler,
    client_id: String,
    pending: VecDeque<RowChangeRecord>,
    buffer: Option<RecordBuffer>,
    last_heartbeat_read: u64,
    exhausted: bool,
}

impl<E> StreamConsumer<E>
where
    E: EventSource,
{
    pub fn new(config: &ReplicatorConfig, ctx: StreamContext<E>, last_heartbeat_read: u64) -> Self {
        Self {
            ctx,
            assembler: TransactionAssembler::new(config),
            client_id: config.client_id.clone(),
            pending: VecDeque::new(),
            buffer: None,
            last_heartbeat_read,
            exhausted: false,
        }
    }

    pub fn context(&self) -> &StreamContext<E> {
        &self.ctx
    }

    pub fn last_heartbeat_read(&self) -> u64 {
        self.last_heartbeat_read
    }

    /// Returns `true` once bounded replay reached the end of the log.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Returns the next record, or `None` when no record is available right now.
    ///
    /// `None` is also returned for good once the stream is exhausted in bounded replay mode.
    pub async fn next_record(&mut self) -> CdcResult<Option<RowChangeRecord>> {
        if self.exhausted {
            return Ok(None);
        }

        loop {
            if let Some(record) = self.pending.pop_front() {
                return Ok(Some(record));
            }

            if let Some(buffer) = self.buffer.as_mut() {
                if let Some(record) = buffer.remove_first()? {
                    return Ok(Some(self.convert_heartbeat(record)));
                }
                self.buffer = None;
            }

            let Some(event) = self.ctx.poll_event().await else {
                if self.ctx.stop_on_eof() {
                    if !self.ctx.source().is_connected() {
                        info!("event source disconnected, end of log reached");
                        self.exhausted = true;
                    }
                } else {
                    self.ctx.ensure_connected().await?;
                }

                return Ok(None);
            };

            match &event.body {
                EventBody::WriteRows { .. }
                | EventBody::UpdateRows { .. }
                | EventBody::DeleteRows { .. } => {
                    warn!(
                        position = %event.header.position,
                        "stream started inside a transaction, \
                         assuming a new transaction at this event"
                    );
                    self.ctx.queue.push_front(event.clone());
                    self.begin_transaction(&event, None).await?;
                }
                EventBody::TransactionBegin { thread_id, .. } => {
                    self.begin_transaction(&event, Some(*thread_id)).await?;
                }
                EventBody::Query { thread_id, .. } if event.is_transaction_begin() => {
                    self.begin_transaction(&event, Some(*thread_id)).await?;
                }
                EventBody::Query { .. } if event.is_transaction_commit() => {
                    debug!(
                        position = %event.header.position,
                        "ignoring commit outside of a transaction"
                    );
                }
                EventBody::Query {
                    database,
                    sql,
                    thread_id,
                } => {
                    let records = self.ctx.process_schema_statement(
                        &event,
                        database,
                        sql,
                        *thread_id,
                        self.last_heartbeat_read,
                    )?;
                    self.pending.extend(records);
                }
                EventBody::TableMap {
                    table_id,
                    database,
                    table,
                } => {
                    self.ctx.process_table_map(*table_id, database, table);
                }
                EventBody::Rotate { file, offset } => {
                    debug!(file, offset, "log rotated");
                    self.ctx.table_cache.clear();

                    if self.ctx.stop_on_eof() && event.header.position.offset() > 0 {
                        info!(
                            position = %event.header.position,
                            "end of log reached, stopping replay"
                        );
                        self.exhausted = true;
                        self.ctx.source.disconnect().await?;

                        return Ok(None);
                    }
                }
                EventBody::Connected => info!("event source connected"),
                EventBody::Disconnected => warn!("event source disconnected"),
                EventBody::CommunicationFailure { reason } => {
                    warn!(reason, "event source communication failure");
                }
                EventBody::DeserializationFailure { reason } => {
                    warn!(reason, "event source failed to decode an event");
                }
                EventBody::Xid { .. } | EventBody::RowsQuery { .. } => {
                    debug!(
                        event = %event.body.kind(),
                        position = %event.header.position,
                        "ignoring event outside of a transaction"
                    );
                }
            }
        }
    }

    async fn begin_transaction(
        &mut self,
        begin: &BinlogEvent,
        thread_id: Option<u64>,
    ) -> CdcResult<()> {
        let assembled = self
            .assembler
            .assemble(begin, &mut self.ctx, self.last_heartbeat_read)
            .await?;

        let mut rows = assembled.rows;
        rows.set_server_id(begin.header.server_id);
        if let Some(thread_id) = thread_id {
            rows.set_thread_id(thread_id);
        }
        rows.set_schema_id(self.ctx.schema.schema_id());

        self.pending.extend(assembled.schema_changes);
        self.buffer = Some(rows);

        Ok(())
    }

    /// Replaces a write of this client's heartbeat row with a heartbeat record.
    ///
    /// The first heartbeat of a client inserts its row, later ones update it.
    fn convert_heartbeat(&mut self, record: RowChangeRecord) -> RowChangeRecord {
        if !matches!(record.kind, RecordKind::Insert | RecordKind::Update)
            || !self.ctx.filter.is_control_database(&record.database)
            || record.table_name() != HEARTBEATS_TABLE
        {
            return record;
        }

        let client_id = record.data.get("client_id").and_then(Value::as_filter_text);
        if client_id.as_deref() != Some(self.client_id.as_str()) {
            return record;
        }

        let heartbeat = match record.data.get("heartbeat") {
            Some(Value::Int(value)) if *value >= 0 => *value as u64,
            Some(Value::UInt(value)) => *value,
            _ => return record,
        };

        debug!(heartbeat, position = %record.next_position, "read heartbeat");
        self.last_heartbeat_read = heartbeat;
        gauge!(CDC_LAST_HEARTBEAT_READ).set(heartbeat as f64);

        let mut converted = RowChangeRecord::new(
            RecordKind::Heartbeat,
            record.database,
            record.table,
            record.timestamp,
            record.position.with_heartbeat(heartbeat),
            record.next_position.with_heartbeat(heartbeat),
        );
        converted.heartbeat = Some(heartbeat);
        converted.tx_commit = true;
        converted.xid = record.xid;
        converted.server_id = record.server_id;
        converted.thread_id = record.thread_id;
        converted.schema_id = record.schema_id;
        converted
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::filter::Filter;
    use crate::replication::event_queue;
    use crate::schema::SchemaStore;
    use crate::test_utils::event::{EventBuilder, decimal, int, text};
    use crate::test_utils::pipeline::{TEST_BINLOG_FILE, test_config};
    use crate::test_utils::schema::{CONTROL_DATABASE, SHOP_DATABASE, shop_schema};
    use crate::test_utils::source::ScriptedEventSource;
    use crate::types::{BinlogPosition, Position};

    const HEARTBEATS_TABLE_ID: u64 = 40;
    const ORDERS_TABLE_ID: u64 = 10;

    async fn consumer(
        config: &ReplicatorConfig,
    ) -> (StreamConsumer<ScriptedEventSource>, ScriptedEventSource) {
        let source = ScriptedEventSource::new();
        let (sender, queue) = event_queue(config.queue_capacity);
        let start = Position::new(BinlogPosition::new(TEST_BINLOG_FILE, 4), 0);
        source.connect(&start, sender).await.unwrap();

        let filter = Arc::new(Filter::from_config(config).unwrap());
        let ctx = StreamContext::new(
            config,
            queue,
            source.clone(),
            SchemaStore::new(shop_schema()),
            filter,
        );

        (StreamConsumer::new(config, ctx, 0), source)
    }

    async fn next(consumer: &mut StreamConsumer<ScriptedEventSource>) -> RowChangeRecord {
        for _ in 0..100 {
            if let Some(record) = consumer.next_record().await.unwrap() {
                return record;
            }
        }
        panic!("no record was produced");
    }

    fn heartbeat_row(client_id: &str, heartbeat: u64) -> Vec<Value> {
        vec![Value::UInt(1), text(client_id), Value::UInt(heartbeat)]
    }

    #[tokio::test]
    async fn first_heartbeat_of_a_client_is_converted() {
        let config = test_config();
        let (mut consumer, source) = consumer(&config).await;
        let mut events = EventBuilder::new(TEST_BINLOG_FILE);

        let begin = events.begin(CONTROL_DATABASE);
        let table_map = events.table_map(HEARTBEATS_TABLE_ID, CONTROL_DATABASE, HEARTBEATS_TABLE);
        let insert = events.insert(
            HEARTBEATS_TABLE_ID,
            vec![heartbeat_row(&config.client_id, 42)],
        );
        let commit = events.xid();
        source
            .send_all([begin, table_map, insert.clone(), commit.clone()])
            .await;

        let record = next(&mut consumer).await;
        assert_eq!(record.kind, RecordKind::Heartbeat);
        assert_eq!(record.heartbeat, Some(42));
        assert_eq!(record.position, Position::new(insert.header.position.clone(), 42));
        assert_eq!(
            record.next_position,
            Position::new(commit.header.next_position.clone(), 42)
        );
        assert!(record.tx_commit);
        assert_eq!(consumer.last_heartbeat_read(), 42);
    }

    #[tokio::test]
    async fn heartbeats_of_other_clients_stay_row_changes() {
        let config = test_config();
        let (mut consumer, source) = consumer(&config).await;
        let mut events = EventBuilder::new(TEST_BINLOG_FILE);

        let before = heartbeat_row("other-client", 6);
        let after = heartbeat_row("other-client", 7);
        source
            .send_all([
                events.begin(CONTROL_DATABASE),
                events.table_map(HEARTBEATS_TABLE_ID, CONTROL_DATABASE, HEARTBEATS_TABLE),
                events.update(HEARTBEATS_TABLE_ID, vec![(before, after)]),
                events.xid(),
            ])
            .await;

        let record = next(&mut consumer).await;
        assert_eq!(record.kind, RecordKind::Update);
        assert_eq!(record.heartbeat, None);
        assert_eq!(consumer.last_heartbeat_read(), 0);
    }

    #[tokio::test]
    async fn commit_outside_a_transaction_is_skipped() {
        let config = test_config();
        let (mut consumer, source) = consumer(&config).await;
        let mut events = EventBuilder::new(TEST_BINLOG_FILE);

        source
            .send_all([
                events.commit_query(SHOP_DATABASE),
                events.begin(SHOP_DATABASE),
                events.table_map(ORDERS_TABLE_ID, SHOP_DATABASE, "orders"),
                events.insert(
                    ORDERS_TABLE_ID,
                    vec![vec![int(1), text("new"), decimal("5.00")]],
                ),
                events.xid(),
            ])
            .await;

        let record = next(&mut consumer).await;
        assert_eq!(record.kind, RecordKind::Insert);
        assert_eq!(record.table_name(), "orders");
        assert!(record.tx_commit);
    }
}
