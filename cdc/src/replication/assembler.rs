use std::sync::Arc;

use chrono::{DateTime, Utc};
use config::shared::ReplicatorConfig;
use metrics::{counter, histogram};
use tracing::{debug, warn};

use crate::error::CdcResult;
use crate::filter::FilterDecision;
use crate::metrics::{
    CDC_ROWS_SKIPPED_TOTAL, CDC_TRANSACTION_DURATION_SECONDS, CDC_TRANSACTION_ROWS, REASON_LABEL,
};
use crate::replication::{EventSource, RecordBuffer, StreamContext};
use crate::schema::{Table, ddl};
use crate::types::{
    BinlogEvent, EventBody, EventHeader, Position, RecordKind, RowChangeRecord, RowData,
    TableId, UpdatedRow, Value,
};

/// Statements that may appear inside a transaction and carry nothing to replicate.
const IGNORED_STATEMENT_PREFIXES: &[&str] = &[
    "SAVEPOINT",
    "INSERT INTO MYSQL.RDS_",
    "DELETE FROM MYSQL.RDS_",
    "DROP TEMPORARY TABLE",
];

/// Records produced from one transaction.
#[derive(Debug)]
pub struct AssembledTransaction {
    /// Records of DDL statements embedded in the transaction, emitted before its rows.
    pub schema_changes: Vec<RowChangeRecord>,
    /// Row records, the last one marked as committing the transaction.
    pub rows: RecordBuffer,
}

/// Collects the events between a transaction start and its commit into records.
///
/// The transaction id is only known at the commit event, so every row of the transaction is
/// buffered until then.
#[derive(Debug, Clone)]
pub struct TransactionAssembler {
    max_in_memory: usize,
    update_old_data: bool,
    count_filtered_rows: bool,
}

impl TransactionAssembler {
    pub fn new(config: &ReplicatorConfig) -> Self {
        Self {
            max_in_memory: config.max_in_memory_tx_elements,
            update_old_data: config.output.update_old_data,
            count_filtered_rows: config.count_filtered_rows_in_tx_metrics,
        }
    }

    /// Consumes events up to and including the commit of the transaction started by `begin`.
    ///
    /// `begin` is either the start marker or, when the stream starts mid-transaction, the first
    /// row event, which the caller put back on the queue.
    pub async fn assemble<E>(
        &self,
        begin: &BinlogEvent,
        ctx: &mut StreamContext<E>,
        last_heartbeat_read: u64,
    ) -> CdcResult<AssembledTransaction>
    where
        E: EventSource,
    {
        let mut rows = RecordBuffer::new(self.max_in_memory);
        let mut schema_changes = Vec::new();
        let mut current_query: Option<String> = None;
        let mut filtered_rows = 0usize;

        loop {
            let Some(event) = ctx.poll_event().await else {
                ctx.ensure_connected().await?;
                continue;
            };

            if event.is_transaction_commit() {
                let row_count = rows.len();
                let metric_rows = if self.count_filtered_rows {
                    row_count + filtered_rows
                } else {
                    row_count
                };

                if let Some(last) = rows.last_mut() {
                    last.tx_commit = true;
                    last.next_position =
                        Position::new(event.header.next_position.clone(), last_heartbeat_read);
                    let spent = (last.timestamp - begin.header.timestamp)
                        .to_std()
                        .unwrap_or_default();
                    histogram!(CDC_TRANSACTION_DURATION_SECONDS).record(spent.as_secs_f64());
                } else {
                    rows.add(placeholder(begin, &event, last_heartbeat_read))?;
                }

                if row_count > 0 || self.count_filtered_rows {
                    histogram!(CDC_TRANSACTION_ROWS).record(metric_rows as f64);
                }

                if let EventBody::Xid { xid } = event.body {
                    rows.set_xid(xid);
                }

                return Ok(AssembledTransaction {
                    schema_changes,
                    rows,
                });
            }

            match &event.body {
                EventBody::WriteRows { table_id, .. }
                | EventBody::UpdateRows { table_id, .. }
                | EventBody::DeleteRows { table_id, .. } => {
                    filtered_rows += self.decode_rows(
                        ctx,
                        *table_id,
                        &event,
                        current_query.take(),
                        last_heartbeat_read,
                        &mut rows,
                    )?;
                }
                EventBody::TableMap {
                    table_id,
                    database,
                    table,
                } => {
                    ctx.process_table_map(*table_id, database, table);
                }
                EventBody::RowsQuery { sql } => {
                    current_query = Some(sql.clone());
                }
                EventBody::Query {
                    database,
                    sql,
                    thread_id,
                } => {
                    let upper = sql.trim_start().to_uppercase();
                    if IGNORED_STATEMENT_PREFIXES
                        .iter()
                        .any(|prefix| upper.starts_with(prefix))
                    {
                        debug!(
                            position = %event.header.position,
                            sql,
                            "ignoring statement inside transaction"
                        );
                    } else if ddl::is_create_table(sql) {
                        // `CREATE TABLE ... SELECT` is logged inside the transaction that fills it.
                        let records = ctx.process_schema_statement(
                            &event,
                            database,
                            sql,
                            *thread_id,
                            last_heartbeat_read,
                        )?;
                        schema_changes.extend(records);
                    } else {
                        warn!(
                            position = %event.header.position,
                            sql,
                            "unhandled statement inside transaction"
                        );
                    }
                }
                EventBody::Connected => debug!("event source connected inside transaction"),
                EventBody::Disconnected
                | EventBody::CommunicationFailure { .. }
                | EventBody::DeserializationFailure { .. } => {
                    warn!(
                        event = %event.body.kind(),
                        "event source reported a problem inside transaction"
                    );
                }
                EventBody::TransactionBegin { .. } | EventBody::Rotate { .. } => {
                    debug!(event = %event.body.kind(), "ignoring event inside transaction");
                }
                EventBody::Xid { .. } => {}
            }
        }
    }

    /// Decodes one row event into `rows`, returning the number of rows filtered out.
    fn decode_rows<E>(
        &self,
        ctx: &StreamContext<E>,
        table_id: TableId,
        event: &BinlogEvent,
        row_query: Option<String>,
        last_heartbeat_read: u64,
        rows: &mut RecordBuffer,
    ) -> CdcResult<usize>
    where
        E: EventSource,
    {
        let Some(table) = ctx.table_cache.get(table_id) else {
            if !ctx.table_cache.is_blacklisted(table_id) {
                debug!(
                    table_id,
                    position = %event.header.position,
                    "dropping row event for unknown table id"
                );
                counter!(CDC_ROWS_SKIPPED_TOTAL, REASON_LABEL => "unknown_table").increment(1);
            }
            return Ok(0);
        };

        let column_names = table.column_names();
        let decision = ctx
            .filter
            .decide(&table.database, &table.name, &column_names, None);
        if decision == FilterDecision::Exclude {
            return Ok(row_count(&event.body));
        }

        let decoded = match decode_event(&table, event, self.update_old_data) {
            Ok(decoded) => decoded,
            Err(reason) => {
                warn!(
                    table_id,
                    database = %table.database,
                    table = %table.name,
                    position = %event.header.position,
                    reason,
                    "skipping row event that does not match the table schema"
                );
                counter!(CDC_ROWS_SKIPPED_TOTAL, REASON_LABEL => "column_mismatch").increment(1);
                return Ok(0);
            }
        };

        let mut filtered = 0;
        for (kind, data, old_data) in decoded {
            if decision == FilterDecision::Maybe
                && !ctx.filter.includes_row(&table.database, &table.name, &data)
            {
                filtered += 1;
                continue;
            }

            let mut record = new_row_record(kind, &table, &event.header, last_heartbeat_read);
            record.data = data;
            record.old_data = old_data;
            record.row_query = row_query.clone();
            rows.add(record)?;
        }

        Ok(filtered)
    }
}

type DecodedRow = (RecordKind, RowData, Option<RowData>);

fn decode_event(
    table: &Arc<Table>,
    event: &BinlogEvent,
    update_old_data: bool,
) -> Result<Vec<DecodedRow>, &'static str> {
    match &event.body {
        EventBody::WriteRows { rows, .. } => rows
            .iter()
            .map(|values| Ok((RecordKind::Insert, zip_row(table, values)?, None)))
            .collect(),
        EventBody::DeleteRows { rows, .. } => rows
            .iter()
            .map(|values| Ok((RecordKind::Delete, zip_row(table, values)?, None)))
            .collect(),
        EventBody::UpdateRows { rows, .. } => rows
            .iter()
            .map(|UpdatedRow { before, after }| {
                let data = zip_row(table, after)?;
                let before = zip_row(table, before)?;
                let old_data = update_old_data.then(|| changed_columns(&before, &data));
                Ok((RecordKind::Update, data, old_data))
            })
            .collect(),
        _ => Ok(Vec::new()),
    }
}

fn zip_row(table: &Table, values: &[Value]) -> Result<RowData, &'static str> {
    if values.len() != table.columns.len() {
        return Err("row has a different number of values than the table has columns");
    }

    Ok(table
        .columns
        .iter()
        .zip(values.iter().cloned())
        .map(|(column, value)| (column.name.clone(), value))
        .collect())
}

/// Previous values of the columns whose value changed.
fn changed_columns(before: &RowData, after: &RowData) -> RowData {
    before
        .iter()
        .filter(|(column, value)| after.get(column) != Some(*value))
        .map(|(column, value)| (column.to_string(), value.clone()))
        .collect()
}

fn row_count(body: &EventBody) -> usize {
    match body {
        EventBody::WriteRows { rows, .. } | EventBody::DeleteRows { rows, .. } => rows.len(),
        EventBody::UpdateRows { rows, .. } => rows.len(),
        _ => 0,
    }
}

fn new_row_record(
    kind: RecordKind,
    table: &Table,
    header: &EventHeader,
    last_heartbeat_read: u64,
) -> RowChangeRecord {
    RowChangeRecord::new(
        kind,
        table.database.clone(),
        Some(table.name.clone()),
        header.timestamp,
        Position::new(header.position.clone(), last_heartbeat_read),
        Position::new(header.next_position.clone(), last_heartbeat_read),
    )
}

/// Record standing in for a committed transaction whose rows were all filtered out.
fn placeholder(
    begin: &BinlogEvent,
    commit: &BinlogEvent,
    last_heartbeat_read: u64,
) -> RowChangeRecord {
    let database = match &begin.body {
        EventBody::TransactionBegin { database, .. } | EventBody::Query { database, .. } => {
            database.clone()
        }
        _ => String::new(),
    };
    let timestamp: DateTime<Utc> = commit.header.timestamp;

    let mut record = RowChangeRecord::new(
        RecordKind::TransactionPlaceholder,
        database,
        None,
        timestamp,
        Position::new(commit.header.position.clone(), last_heartbeat_read),
        Position::new(commit.header.next_position.clone(), last_heartbeat_read),
    );
    record.tx_commit = true;
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Filter;
    use crate::replication::event_queue;
    use crate::schema::SchemaStore;
    use crate::test_utils::event::{EventBuilder, decimal, int, text};
    use crate::test_utils::pipeline::{TEST_BINLOG_FILE, test_config};
    use crate::test_utils::schema::{SHOP_DATABASE, shop_schema};
    use crate::test_utils::source::ScriptedEventSource;
    use crate::types::BinlogPosition;

    const ORDERS_TABLE_ID: TableId = 10;

    async fn context(
        config: &ReplicatorConfig,
    ) -> (StreamContext<ScriptedEventSource>, ScriptedEventSource) {
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

        (ctx, source)
    }

    fn order(id: i64) -> Vec<Value> {
        vec![int(id), text("new"), decimal("5.00")]
    }

    fn drain(rows: &mut RecordBuffer) -> Vec<RowChangeRecord> {
        let mut records = Vec::new();
        while let Some(record) = rows.remove_first().unwrap() {
            records.push(record);
        }
        records
    }

    #[tokio::test]
    async fn create_table_inside_transaction_is_applied_before_commit() {
        let config = test_config();
        let (mut ctx, source) = context(&config).await;
        let mut events = EventBuilder::new(TEST_BINLOG_FILE);

        let begin = events.begin(SHOP_DATABASE);
        source
            .send_all([
                events.query(
                    SHOP_DATABASE,
                    concat!(
                        "CREATE TABLE refund_totals (id bigint NOT NULL, total decimal(10,2)) ",
                        "AS SELECT id, amount AS total FROM orders",
                    ),
                ),
                events.table_map(30, SHOP_DATABASE, "refund_totals"),
                events.insert(30, vec![vec![int(1), decimal("9.50")]]),
                events.xid(),
            ])
            .await;

        let assembler = TransactionAssembler::new(&config);
        let mut assembled = assembler.assemble(&begin, &mut ctx, 0).await.unwrap();

        assert!(ctx.schema().find_table(SHOP_DATABASE, "refund_totals").is_some());
        assert_eq!(assembled.schema_changes.len(), 1);
        assert_eq!(assembled.schema_changes[0].kind, RecordKind::Ddl);
        assert!(assembled.schema_changes[0].tx_commit);

        let rows = drain(&mut assembled.rows);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].table_name(), "refund_totals");
        assert_eq!(rows[0].data.get("total"), Some(&decimal("9.50")));
        assert!(rows[0].tx_commit);
    }

    #[tokio::test]
    async fn benign_statements_inside_transaction_are_ignored() {
        let config = test_config();
        let (mut ctx, source) = context(&config).await;
        let mut events = EventBuilder::new(TEST_BINLOG_FILE);

        let begin = events.begin(SHOP_DATABASE);
        source
            .send_all([
                events.query(SHOP_DATABASE, "SAVEPOINT before_orders"),
                events.query(
                    "mysql",
                    "INSERT INTO mysql.rds_heartbeat2(id, value) VALUES (1, 1700000000)",
                ),
                events.query(SHOP_DATABASE, "DROP TEMPORARY TABLE IF EXISTS tmp_orders"),
                events.table_map(ORDERS_TABLE_ID, SHOP_DATABASE, "orders"),
                events.insert(ORDERS_TABLE_ID, vec![order(1)]),
                events.xid(),
            ])
            .await;

        let assembler = TransactionAssembler::new(&config);
        let mut assembled = assembler.assemble(&begin, &mut ctx, 0).await.unwrap();

        assert!(assembled.schema_changes.is_empty());
        assert!(ctx.schema().history().is_empty());
        assert_eq!(ctx.schema().schema_id(), 1);

        let rows = drain(&mut assembled.rows);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].table_name(), "orders");
    }

    #[tokio::test]
    async fn commit_statement_closes_transaction_without_xid() {
        let config = test_config();
        let (mut ctx, source) = context(&config).await;
        let mut events = EventBuilder::new(TEST_BINLOG_FILE);

        let begin = events.begin(SHOP_DATABASE);
        let table_map = events.table_map(ORDERS_TABLE_ID, SHOP_DATABASE, "orders");
        let insert = events.insert(ORDERS_TABLE_ID, vec![order(1), order(2)]);
        let commit = events.commit_query(SHOP_DATABASE);
        source.send_all([table_map, insert, commit.clone()]).await;

        let assembler = TransactionAssembler::new(&config);
        let mut assembled = assembler.assemble(&begin, &mut ctx, 3).await.unwrap();

        let rows = drain(&mut assembled.rows);
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|row| row.xid.is_none()));
        assert!(!rows[0].tx_commit);
        assert!(rows[1].tx_commit);
        assert_eq!(
            rows[1].next_position,
            Position::new(commit.header.next_position.clone(), 3)
        );
    }

    #[tokio::test]
    async fn large_transactions_spill_to_disk() {
        let mut config = test_config();
        config.max_in_memory_tx_elements = 2;
        let (mut ctx, source) = context(&config).await;
        let mut events = EventBuilder::new(TEST_BINLOG_FILE);

        let begin = events.begin(SHOP_DATABASE);
        source
            .send_all([
                events.table_map(ORDERS_TABLE_ID, SHOP_DATABASE, "orders"),
                events.insert(ORDERS_TABLE_ID, (1..=5).map(order).collect()),
                events.xid_with(9),
            ])
            .await;

        let assembler = TransactionAssembler::new(&config);
        let mut assembled = assembler.assemble(&begin, &mut ctx, 0).await.unwrap();
        assert!(assembled.rows.is_spilled());
        assert_eq!(assembled.rows.len(), 5);

        let rows = drain(&mut assembled.rows);
        let ids: Vec<_> = rows.iter().map(|row| row.data.get("id").cloned()).collect();
        assert_eq!(ids, (1..=5).map(|id| Some(int(id))).collect::<Vec<_>>());
        assert!(rows.iter().all(|row| row.xid == Some(9)));
        assert_eq!(rows.iter().filter(|row| row.tx_commit).count(), 1);
        assert!(rows[4].tx_commit);
    }

    #[tokio::test]
    async fn fully_filtered_transaction_yields_a_placeholder() {
        let mut config = test_config();
        config.filter = vec!["exclude: shop.*".to_string()];
        let (mut ctx, source) = context(&config).await;
        let mut events = EventBuilder::new(TEST_BINLOG_FILE);

        let begin = events.begin(SHOP_DATABASE);
        source
            .send_all([
                events.table_map(ORDERS_TABLE_ID, SHOP_DATABASE, "orders"),
                events.insert(ORDERS_TABLE_ID, vec![order(1)]),
                events.xid(),
            ])
            .await;

        let assembler = TransactionAssembler::new(&config);
        let mut assembled = assembler.assemble(&begin, &mut ctx, 0).await.unwrap();

        let rows = drain(&mut assembled.rows);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].kind, RecordKind::TransactionPlaceholder);
        assert_eq!(rows[0].database, SHOP_DATABASE);
        assert!(rows[0].tx_commit);
    }
}
