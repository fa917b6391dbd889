use std::sync::Arc;
use std::time::Duration;

use config::shared::ReplicatorConfig;
use metrics::counter;
use tracing::{info, warn};

use crate::bail;
use crate::cdc_error;
use crate::error::{CdcResult, ErrorKind};
use crate::filter::Filter;
use crate::metrics::CDC_REPLICATION_RECONNECTS_TOTAL;
use crate::replication::{EventQueue, EventSource, ReconnectionManager};
use crate::schema::{SchemaStore, TableCache};
use crate::types::{
    BinlogEvent, Position, RecordKind, RowChangeRecord, SchemaChangePayload, TableId,
};

/// State shared by the stream consumer and the transaction assembler.
///
/// Both run on the same task, so the table cache and the schema are never read while a schema
/// change is applied.
#[derive(Debug)]
pub struct StreamContext<E> {
    pub(crate) queue: EventQueue,
    pub(crate) source: E,
    pub(crate) table_cache: TableCache,
    pub(crate) schema: SchemaStore,
    pub(crate) filter: Arc<Filter>,
    poll_timeout: Duration,
    stop_on_eof: bool,
    reconnection: ReconnectionManager,
}

impl<E> StreamContext<E>
where
    E: EventSource,
{
    pub fn new(
        config: &ReplicatorConfig,
        queue: EventQueue,
        source: E,
        schema: SchemaStore,
        filter: Arc<Filter>,
    ) -> Self {
        Self {
            queue,
            source,
            table_cache: TableCache::new(),
            schema,
            filter,
            poll_timeout: Duration::from_millis(config.poll_timeout_ms),
            stop_on_eof: config.stop_on_eof,
            reconnection: ReconnectionManager::new(config.reconnection.clone()),
        }
    }

    pub async fn poll_event(&mut self) -> Option<BinlogEvent> {
        self.queue.poll(self.poll_timeout).await
    }

    pub fn source(&self) -> &E {
        &self.source
    }

    pub fn schema(&self) -> &SchemaStore {
        &self.schema
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    pub fn table_cache(&self) -> &TableCache {
        &self.table_cache
    }

    pub fn stop_on_eof(&self) -> bool {
        self.stop_on_eof
    }

    pub fn process_table_map(&mut self, table_id: TableId, database: &str, table: &str) {
        self.table_cache
            .process_table_map(table_id, database, table, &self.schema, &self.filter);
    }

    /// Reconnects the event source if it dropped, backing off between attempts.
    ///
    /// In bounded replay mode a lost connection means the end of the log was reached, so
    /// nothing is done.
    pub async fn ensure_connected(&mut self) -> CdcResult<()> {
        if self.stop_on_eof || self.source.is_connected() {
            return Ok(());
        }

        if !self.reconnection.is_enabled() {
            bail!(
                ErrorKind::SourceConnectionFailed,
                "The event source disconnected and reconnection is disabled"
            );
        }

        loop {
            info!(
                attempt = self.reconnection.attempt_count() + 1,
                "event source disconnected, reconnecting"
            );
            counter!(CDC_REPLICATION_RECONNECTS_TOTAL).increment(1);

            match self.source.reconnect().await {
                Ok(()) => {
                    self.reconnection.record_success();
                    info!("event source reconnected");

                    return Ok(());
                }
                Err(err) => {
                    self.reconnection.record_failure();

                    if self.reconnection.is_exhausted() {
                        return Err(cdc_error!(
                            ErrorKind::SourceConnectionFailed,
                            "Could not reconnect to the event source",
                            format!(
                                "Gave up after {} attempts",
                                self.reconnection.attempt_count()
                            ),
                            source: err
                        ));
                    }

                    let backoff = self.reconnection.calculate_backoff();
                    warn!(error = %err, ?backoff, "reconnection attempt failed, retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// Applies a DDL statement to the schema and builds the records announcing it.
    ///
    /// The table cache is cleared whatever the outcome, since table ids may be reassigned.
    pub fn process_schema_statement(
        &mut self,
        event: &BinlogEvent,
        database: &str,
        sql: &str,
        thread_id: u64,
        last_heartbeat_read: u64,
    ) -> CdcResult<Vec<RowChangeRecord>> {
        let position = Position::new(event.header.position.clone(), last_heartbeat_read);
        let next_position = Position::new(event.header.next_position.clone(), last_heartbeat_read);

        let changes = self.schema.process_sql(sql, database, &position);
        self.table_cache.clear();
        let changes = changes?;

        let schema_id = self.schema.schema_id();
        let mut records: Vec<RowChangeRecord> = changes
            .into_iter()
            .filter(|change| {
                self.filter
                    .includes_schema_change(change.database(), change.table())
            })
            .map(|change| {
                let mut record = RowChangeRecord::new(
                    RecordKind::Ddl,
                    change.database(),
                    change.table().map(str::to_string),
                    event.header.timestamp,
                    position.clone(),
                    next_position.clone(),
                );
                record.schema_id = Some(schema_id);
                record.server_id = Some(event.header.server_id);
                record.thread_id = Some(thread_id);
                record.schema_change = Some(SchemaChangePayload {
                    sql: sql.to_string(),
                    change,
                });
                record
            })
            .collect();

        // One statement is one unit of acknowledgment.
        if let Some(last) = records.last_mut() {
            last.tx_commit = true;
        }

        Ok(records)
    }
}
