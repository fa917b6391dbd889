use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Controls how often the flush worker writes heartbeat rows to the position store.
///
/// A heartbeat is written whenever the binlog file changes, the offset moves by more than
/// [`HeartbeatConfig::offset_threshold`] or [`HeartbeatConfig::interval_ms`] elapsed since the
/// last one.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Maximum time in milliseconds between two heartbeats.
    ///
    /// Default: 10000 (10 seconds)
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Binlog offset movement, within one file, that triggers an early heartbeat.
    ///
    /// Default: 1000
    #[serde(default = "default_offset_threshold")]
    pub offset_threshold: u64,
}

impl HeartbeatConfig {
    pub const DEFAULT_INTERVAL_MS: u64 = 10_000;

    pub const DEFAULT_OFFSET_THRESHOLD: u64 = 1_000;

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.interval_ms == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "heartbeat.interval_ms".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: Self::DEFAULT_INTERVAL_MS,
            offset_threshold: Self::DEFAULT_OFFSET_THRESHOLD,
        }
    }
}

fn default_interval_ms() -> u64 {
    HeartbeatConfig::DEFAULT_INTERVAL_MS
}

fn default_offset_threshold() -> u64 {
    HeartbeatConfig::DEFAULT_OFFSET_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HeartbeatConfig::default();
        assert_eq!(config.interval_ms, 10_000);
        assert_eq!(config.offset_threshold, 1_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_interval() {
        let config = HeartbeatConfig {
            interval_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
