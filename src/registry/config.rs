//! Registry configuration

use std::time::Duration;

use crate::session::MIN_REAP_INTERVAL;

/// Configuration for the broadcast registry
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Frames buffered per subscriber before new frames are dropped
    pub subscriber_queue_capacity: usize,

    /// How often the supervisor sweeps for dead sessions
    pub reap_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            subscriber_queue_capacity: 256,
            reap_interval: Duration::from_secs(5),
        }
    }
}

impl RegistryConfig {
    /// Set the per-subscriber queue capacity (minimum 1)
    pub fn subscriber_queue_capacity(mut self, capacity: usize) -> Self {
        self.subscriber_queue_capacity = capacity.max(1);
        self
    }

    /// Set the reaper sweep interval (minimum 1ms)
    pub fn reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval.max(MIN_REAP_INTERVAL);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RegistryConfig::default();

        assert_eq!(config.subscriber_queue_capacity, 256);
        assert_eq!(config.reap_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_queue_capacity_never_zero() {
        // mpsc::channel panics on a zero capacity
        let config = RegistryConfig::default().subscriber_queue_capacity(0);

        assert_eq!(config.subscriber_queue_capacity, 1);
    }

    #[test]
    fn test_reap_interval_never_zero() {
        let config = RegistryConfig::default().reap_interval(Duration::ZERO);

        assert_eq!(config.reap_interval, MIN_REAP_INTERVAL);
    }
}
