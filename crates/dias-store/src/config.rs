//! Store configuration

use std::time::Duration;

/// Delta log retention
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreConfig {
    /// Deltas kept behind the latest sequence
    pub max_delta_retention: u64,
    /// Quiet period after a write before trimming the log
    pub delta_trim_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_delta_retention: 1000,
            delta_trim_timeout: Duration::from_millis(1000),
        }
    }
}

impl StoreConfig {
    pub fn with_max_delta_retention(mut self, retention: u64) -> Self {
        self.max_delta_retention = retention;
        self
    }

    pub fn with_delta_trim_timeout(mut self, timeout: Duration) -> Self {
        self.delta_trim_timeout = timeout;
        self
    }
}
