//! Routing of backfill requests found in the control database.

use std::future::Future;

use tracing::{debug, info};

use crate::error::CdcResult;
use crate::schema::SchemaStore;
use crate::sink::{Producer, Sink};
use crate::types::{RowChangeRecord, Value};

/// Name of the control table backfill requests are written to.
pub const BOOTSTRAP_TABLE: &str = "bootstrap";

/// Capability handling backfills of existing table contents.
///
/// The replicator hands every row of the control database to [`Bootstrapper::work`] instead of
/// the sink, asks [`Bootstrapper::should_skip`] about every other record, and calls
/// [`Bootstrapper::resume`] once when it starts.
pub trait Bootstrapper {
    /// Returns `true` when `record` must not reach the sink, typically because its table is
    /// being backfilled and the backfill emits the row itself.
    fn should_skip(&self, record: &RowChangeRecord) -> bool;

    /// Handles a row written to the control database.
    fn work<S>(
        &self,
        record: &RowChangeRecord,
        producer: &Producer<S>,
        schema: &SchemaStore,
    ) -> impl Future<Output = CdcResult<()>> + Send
    where
        S: Sink + Sync;

    /// Picks up backfills interrupted by a previous run.
    fn resume<S>(
        &self,
        producer: &Producer<S>,
        schema: &SchemaStore,
    ) -> impl Future<Output = CdcResult<()>> + Send
    where
        S: Sink + Sync;
}

/// Bootstrapper that recognizes backfill requests but never runs them.
#[derive(Debug, Clone)]
pub struct NoopBootstrapper {
    client_id: String,
}

impl NoopBootstrapper {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
        }
    }

    fn is_own_request(&self, record: &RowChangeRecord) -> bool {
        record.table_name() == BOOTSTRAP_TABLE
            && record
                .data
                .get("client_id")
                .and_then(Value::as_filter_text)
                .is_some_and(|client_id| client_id == self.client_id)
    }
}

impl Bootstrapper for NoopBootstrapper {
    fn should_skip(&self, _record: &RowChangeRecord) -> bool {
        false
    }

    async fn work<S>(
        &self,
        record: &RowChangeRecord,
        _producer: &Producer<S>,
        _schema: &SchemaStore,
    ) -> CdcResult<()>
    where
        S: Sink + Sync,
    {
        if !self.is_own_request(record) {
            debug!(
                table = record.table_name(),
                kind = %record.kind,
                "ignoring control database row"
            );
            return Ok(());
        }

        let database = record.data.get("database_name").and_then(Value::as_filter_text);
        let table = record.data.get("table_name").and_then(Value::as_filter_text);
        let is_set = |column: &str| record.data.get(column).is_some_and(|value| !value.is_null());
        let is_complete = matches!(
            record.data.get("is_complete"),
            Some(Value::Bool(true) | Value::Int(1) | Value::UInt(1))
        );

        if is_complete || is_set("completed_at") {
            info!(?database, ?table, "backfill completed, nothing to do");
        } else if is_set("started_at") {
            info!(?database, ?table, "backfill started, nothing to do");
        } else {
            info!(?database, ?table, "backfill requested but backfills are disabled");
        }

        Ok(())
    }

    async fn resume<S>(&self, _producer: &Producer<S>, _schema: &SchemaStore) -> CdcResult<()>
    where
        S: Sink + Sync,
    {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use config::shared::OutputConfig;

    use super::*;
    use crate::checkpoint::{InflightTracker, PositionTracker};
    use crate::schema::Schema;
    use crate::sink::MemorySink;
    use crate::types::{BinlogPosition, Position, RecordKind};

    fn request(client_id: &str) -> RowChangeRecord {
        let position = Position::new(BinlogPosition::new("mysql-bin.000001", 4), 0);
        let mut record = RowChangeRecord::new(
            RecordKind::Insert,
            "maxwell",
            Some(BOOTSTRAP_TABLE.to_string()),
            Utc::now(),
            position.clone(),
            position,
        );
        record.data.push("database_name", Value::String("shop".to_string()));
        record.data.push("table_name", Value::String("orders".to_string()));
        record.data.push("client_id", Value::String(client_id.to_string()));
        record
    }

    #[tokio::test]
    async fn requests_never_reach_the_sink() {
        let sink = MemorySink::new();
        let producer = Producer::new(
            sink.clone(),
            OutputConfig::default(),
            InflightTracker::default(),
            PositionTracker::new(None),
        );
        let schema = SchemaStore::new(Schema::default());
        let bootstrapper = NoopBootstrapper::new("maxwell");

        assert!(bootstrapper.is_own_request(&request("maxwell")));
        assert!(!bootstrapper.is_own_request(&request("other")));
        assert!(!bootstrapper.should_skip(&request("maxwell")));

        bootstrapper
            .work(&request("maxwell"), &producer, &schema)
            .await
            .unwrap();

        assert!(sink.records().await.is_empty());
    }
}
