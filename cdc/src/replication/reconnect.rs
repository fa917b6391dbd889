//! Backoff bookkeeping for re-establishing a lost event source connection.

use std::time::{Duration, Instant};

use config::shared::ReconnectionConfig;
use rand::Rng;

/// Tracks consecutive reconnection attempts and computes the delay before the next one.
#[derive(Debug)]
pub struct ReconnectionManager {
    config: ReconnectionConfig,
    attempt_count: u32,
    first_failure_time: Option<Instant>,
}

impl ReconnectionManager {
    pub fn new(config: ReconnectionConfig) -> Self {
        Self {
            config,
            attempt_count: 0,
            first_failure_time: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Checks if the maximum retry duration has been exceeded.
    pub fn is_exhausted(&self) -> bool {
        self.first_failure_time
            .is_some_and(|first| first.elapsed() >= self.config.max_retry_duration())
    }

    pub fn record_failure(&mut self) {
        if self.first_failure_time.is_none() {
            self.first_failure_time = Some(Instant::now());
        }
        self.attempt_count += 1;
    }

    pub fn record_success(&mut self) {
        self.attempt_count = 0;
        self.first_failure_time = None;
    }

    /// Exponential backoff capped at the configured maximum, with up to 30% jitter.
    pub fn calculate_backoff(&self) -> Duration {
        let attempt = self.attempt_count.saturating_sub(1);
        let multiplier = self.config.backoff_multiplier.powi(attempt as i32);
        let base_delay_ms = self.config.initial_retry_delay_ms as f64 * multiplier;

        let capped_delay_ms = base_delay_ms.min(self.config.max_retry_delay_ms as f64);

        let jitter_factor = rand::rng().random::<f64>() * 0.3;
        let jittered_delay_ms = capped_delay_ms * (1.0 + jitter_factor);

        Duration::from_millis(jittered_delay_ms as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_is_capped() {
        let mut manager = ReconnectionManager::new(ReconnectionConfig {
            initial_retry_delay_ms: 100,
            max_retry_delay_ms: 400,
            ..Default::default()
        });

        manager.record_failure();
        let first = manager.calculate_backoff();
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(130));

        for _ in 0..5 {
            manager.record_failure();
        }
        let capped = manager.calculate_backoff();
        assert!(capped >= Duration::from_millis(400) && capped <= Duration::from_millis(520));
    }

    #[test]
    fn success_resets_attempts() {
        let mut manager = ReconnectionManager::new(ReconnectionConfig::default());
        manager.record_failure();
        manager.record_failure();
        assert_eq!(manager.attempt_count(), 2);

        manager.record_success();

        assert_eq!(manager.attempt_count(), 0);
        assert!(!manager.is_exhausted());
    }
}
