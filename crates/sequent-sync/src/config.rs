//! Transfer configuration.

use std::time::Duration;

/// Tunables for the state-transfer manager.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SyncConfig {
    /// Interval between request rounds while a transfer is running.
    pub retry_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(1),
        }
    }
}
