use serde::{Deserialize, Serialize};

use crate::load::Config;
use crate::shared::{FilterRuleSpec, HeartbeatConfig, ReconnectionConfig, ValidationError};

/// Controls which non-data records reach the sink.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct OutputConfig {
    /// Deliver schema-change records to the sink instead of auto-acknowledging them.
    #[serde(default)]
    pub ddl: bool,
    /// Deliver heartbeat records to the sink instead of auto-acknowledging them.
    #[serde(default)]
    pub heartbeats: bool,
    /// Attach the previous column values to update records.
    #[serde(default = "default_true")]
    pub update_old_data: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            ddl: false,
            heartbeats: false,
            update_old_data: true,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct PositionStoreConfig {
    /// Interval in milliseconds between two flushes of the acknowledged position.
    ///
    /// Default: 1000 (1 second)
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

impl PositionStoreConfig {
    pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 1_000;
}

impl Default for PositionStoreConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: Self::DEFAULT_FLUSH_INTERVAL_MS,
        }
    }
}

/// Bounds for the orderly shutdown sequence.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ShutdownConfig {
    /// How long to wait for a run loop to observe a stop request before treating it as hung.
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
    /// How long to wait for outstanding sink acknowledgments before flushing the final position.
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

impl ShutdownConfig {
    pub const DEFAULT_STOP_TIMEOUT_MS: u64 = 5_000;

    pub const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 10_000;
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            stop_timeout_ms: Self::DEFAULT_STOP_TIMEOUT_MS,
            drain_timeout_ms: Self::DEFAULT_DRAIN_TIMEOUT_MS,
        }
    }
}

/// Configuration of a replicator instance.
///
/// Every field has a default so that an empty configuration file yields a working replicator
/// that includes everything.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ReplicatorConfig {
    /// Identity of this replicator, stamped on heartbeat rows and backfill requests.
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Database holding the replicator's own bookkeeping tables.
    #[serde(default = "default_control_database")]
    pub control_database: String,
    /// Server id used when registering as a replica.
    #[serde(default = "default_server_id")]
    pub server_id: u64,
    /// Ordered filter rules, the last matching rule wins.
    #[serde(default)]
    pub filter: Vec<String>,
    /// Capacity of the bounded queue between the event source and the consumer.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// How long the consumer waits on an empty queue before checking the connection.
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    /// Number of records a transaction keeps in memory before spilling to disk.
    #[serde(default = "default_max_in_memory_tx_elements")]
    pub max_in_memory_tx_elements: usize,
    /// Position to start from when the position store holds none, as `FILE:OFFSET[:HEARTBEAT]`.
    #[serde(default)]
    pub init_position: Option<String>,
    /// Stop at the end of the available log instead of waiting for new events.
    #[serde(default)]
    pub stop_on_eof: bool,
    /// Count rows dropped by filters in per-transaction row metrics.
    #[serde(default)]
    pub count_filtered_rows_in_tx_metrics: bool,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub position_store: PositionStoreConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
    #[serde(default)]
    pub reconnection: ReconnectionConfig,
}

impl ReplicatorConfig {
    pub const DEFAULT_CLIENT_ID: &'static str = "maxwell";

    pub const DEFAULT_CONTROL_DATABASE: &'static str = "maxwell";

    pub const DEFAULT_SERVER_ID: u64 = 6379;

    pub const DEFAULT_QUEUE_CAPACITY: usize = 20;

    pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 100;

    pub const DEFAULT_MAX_IN_MEMORY_TX_ELEMENTS: usize = 10_000;

    /// Validates the configuration, including the syntax of every filter rule.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.client_id.trim().is_empty() {
            return Err(invalid("client_id", "must not be empty"));
        }

        if self.control_database.trim().is_empty() {
            return Err(invalid("control_database", "must not be empty"));
        }

        if self.queue_capacity == 0 {
            return Err(invalid("queue_capacity", "must be greater than 0"));
        }

        if self.poll_timeout_ms == 0 {
            return Err(invalid("poll_timeout_ms", "must be greater than 0"));
        }

        if self.max_in_memory_tx_elements == 0 {
            return Err(invalid("max_in_memory_tx_elements", "must be greater than 0"));
        }

        if self.position_store.flush_interval_ms == 0 {
            return Err(invalid(
                "position_store.flush_interval_ms",
                "must be greater than 0",
            ));
        }

        if let Some(init_position) = &self.init_position {
            let mut parts = init_position.split(':');
            let file = parts.next().unwrap_or_default();
            let offset_ok = parts.next().is_some_and(|offset| offset.parse::<u64>().is_ok());
            let heartbeat_ok = parts.next().is_none_or(|hb| hb.parse::<u64>().is_ok());
            if file.is_empty() || !offset_ok || !heartbeat_ok || parts.next().is_some() {
                return Err(invalid("init_position", "must be FILE:OFFSET[:HEARTBEAT]"));
            }
        }

        self.heartbeat.validate()?;
        self.reconnection.validate()?;
        self.filter_rules()?;

        Ok(())
    }

    /// Parses the textual filter rules in order.
    pub fn filter_rules(&self) -> Result<Vec<FilterRuleSpec>, ValidationError> {
        self.filter
            .iter()
            .map(|rule| {
                rule.parse()
                    .map_err(|source| ValidationError::InvalidFilterRule {
                        rule: rule.clone(),
                        source,
                    })
            })
            .collect()
    }
}

impl Default for ReplicatorConfig {
    fn default() -> Self {
        Self {
            client_id: default_client_id(),
            control_database: default_control_database(),
            server_id: default_server_id(),
            filter: Vec::new(),
            queue_capacity: default_queue_capacity(),
            poll_timeout_ms: default_poll_timeout_ms(),
            max_in_memory_tx_elements: default_max_in_memory_tx_elements(),
            init_position: None,
            stop_on_eof: false,
            count_filtered_rows_in_tx_metrics: false,
            output: OutputConfig::default(),
            position_store: PositionStoreConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            shutdown: ShutdownConfig::default(),
            reconnection: ReconnectionConfig::default(),
        }
    }
}

impl Config for ReplicatorConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &["filter"];
}

fn invalid(field: &str, constraint: &str) -> ValidationError {
    ValidationError::InvalidFieldValue {
        field: field.to_string(),
        constraint: constraint.to_string(),
    }
}

fn default_true() -> bool {
    true
}

fn default_client_id() -> String {
    ReplicatorConfig::DEFAULT_CLIENT_ID.to_string()
}

fn default_control_database() -> String {
    ReplicatorConfig::DEFAULT_CONTROL_DATABASE.to_string()
}

fn default_server_id() -> u64 {
    ReplicatorConfig::DEFAULT_SERVER_ID
}

fn default_queue_capacity() -> usize {
    ReplicatorConfig::DEFAULT_QUEUE_CAPACITY
}

fn default_poll_timeout_ms() -> u64 {
    ReplicatorConfig::DEFAULT_POLL_TIMEOUT_MS
}

fn default_max_in_memory_tx_elements() -> usize {
    ReplicatorConfig::DEFAULT_MAX_IN_MEMORY_TX_ELEMENTS
}

fn default_flush_interval_ms() -> u64 {
    PositionStoreConfig::DEFAULT_FLUSH_INTERVAL_MS
}

fn default_stop_timeout_ms() -> u64 {
    ShutdownConfig::DEFAULT_STOP_TIMEOUT_MS
}

fn default_drain_timeout_ms() -> u64 {
    ShutdownConfig::DEFAULT_DRAIN_TIMEOUT_MS
}
