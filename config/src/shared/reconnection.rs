use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::shared::ValidationError;

/// Retry policy applied when the event source stops delivering events.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ReconnectionConfig {
    /// When disabled, a lost connection fails the replicator immediately.
    ///
    /// Default: true
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Delay before the first reconnection attempt.
    ///
    /// Default: 1000ms
    #[serde(default = "default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,

    /// Upper bound of the delay between two attempts.
    ///
    /// Default: 60000ms
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,

    /// Factor applied to the delay after each failed attempt. Must be >= 1.0.
    ///
    /// Default: 2.0
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Total time spent reconnecting before giving up.
    ///
    /// Default: 300000ms (5 minutes)
    #[serde(default = "default_max_retry_duration_ms")]
    pub max_retry_duration_ms: u64,
}

impl ReconnectionConfig {
    pub fn initial_retry_delay(&self) -> Duration {
        Duration::from_millis(self.initial_retry_delay_ms)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }

    pub fn max_retry_duration(&self) -> Duration {
        Duration::from_millis(self.max_retry_duration_ms)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.backoff_multiplier < 1.0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "reconnection.backoff_multiplier".to_string(),
                constraint: "must be at least 1.0".to_string(),
            });
        }

        if self.max_retry_delay_ms < self.initial_retry_delay_ms {
            return Err(ValidationError::InvalidFieldValue {
                field: "reconnection.max_retry_delay_ms".to_string(),
                constraint: "must not be lower than initial_retry_delay_ms".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            initial_retry_delay_ms: default_initial_retry_delay_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_retry_duration_ms: default_max_retry_duration_ms(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_initial_retry_delay_ms() -> u64 {
    1000
}

fn default_max_retry_delay_ms() -> u64 {
    60000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_retry_duration_ms() -> u64 {
    300000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ReconnectionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_retry_duration(), Duration::from_secs(300));
    }

    #[test]
    fn shrinking_backoff_is_rejected() {
        let config = ReconnectionConfig {
            backoff_multiplier: 0.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
