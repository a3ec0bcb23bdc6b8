//! Consensus configuration.

use std::time::Duration;

/// Tunables for the ordering state machine.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BftConfig {
    /// Number of block slots per epoch.
    pub epoch_length: u64,

    /// Initial per-slot progress timeout before a view change is voted.
    pub view_change_timeout: Duration,

    /// Cap on the timeout doubling: the effective timeout is
    /// `view_change_timeout * 2^min(changes, max_backoff_exponent)`.
    pub max_backoff_exponent: u32,

    /// Catch up when at least a weak quorum of peers is this many epochs
    /// ahead. Must be at least 2: one epoch ahead is normal operation.
    pub catchup_epoch_threshold: u64,
}

impl Default for BftConfig {
    fn default() -> Self {
        Self {
            epoch_length: 8,
            view_change_timeout: Duration::from_secs(2),
            max_backoff_exponent: 6,
            catchup_epoch_threshold: 2,
        }
    }
}

impl BftConfig {
    /// Effective view-change timeout after `changes` consecutive changes on
    /// the same slot.
    pub fn timeout_after(&self, changes: u32) -> Duration {
        self.view_change_timeout * 2u32.pow(changes.min(self.max_backoff_exponent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_doubles_and_caps() {
        let config = BftConfig {
            view_change_timeout: Duration::from_secs(1),
            max_backoff_exponent: 3,
            ..BftConfig::default()
        };
        assert_eq!(config.timeout_after(0), Duration::from_secs(1));
        assert_eq!(config.timeout_after(1), Duration::from_secs(2));
        assert_eq!(config.timeout_after(3), Duration::from_secs(8));
        assert_eq!(config.timeout_after(10), Duration::from_secs(8));
    }
}
