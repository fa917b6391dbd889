use config::shared::{
    PositionStoreConfig, ReconnectionConfig, ReplicatorConfig, ShutdownConfig,
};

use crate::bootstrap::NoopBootstrapper;
use crate::pipeline::Pipeline;
use crate::schema::SchemaStore;
use crate::sink::Sink;
use crate::store::PositionStore;
use crate::test_utils::schema::shop_schema;
use crate::test_utils::source::ScriptedEventSource;

/// Log file scripted tests start in.
pub const TEST_BINLOG_FILE: &str = "mysql-bin.000001";

pub type TestPipeline<S, P> = Pipeline<ScriptedEventSource, S, P, NoopBootstrapper>;

/// A configuration with short intervals so that tests observe flushes and reconnects quickly.
pub fn test_config() -> ReplicatorConfig {
    ReplicatorConfig {
        init_position: Some(format!("{TEST_BINLOG_FILE}:4")),
        poll_timeout_ms: 10,
        position_store: PositionStoreConfig {
            flush_interval_ms: 10,
        },
        shutdown: ShutdownConfig {
            stop_timeout_ms: 2_000,
            drain_timeout_ms: 200,
        },
        reconnection: ReconnectionConfig {
            initial_retry_delay_ms: 5,
            max_retry_delay_ms: 20,
            max_retry_duration_ms: 2_000,
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Creates a pipeline over [`shop_schema`] that never runs backfills.
pub fn create_pipeline<S, P>(
    config: ReplicatorConfig,
    source: ScriptedEventSource,
    sink: S,
    store: P,
) -> TestPipeline<S, P>
where
    S: Sink + Clone + Send + Sync + 'static,
    P: PositionStore + Clone + Send + Sync + 'static,
{
    let bootstrapper = NoopBootstrapper::new(config.client_id.clone());

    Pipeline::new(
        config,
        source,
        sink,
        store,
        bootstrapper,
        SchemaStore::new(shop_schema()),
    )
}
