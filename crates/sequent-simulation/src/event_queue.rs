//! Deterministic event ordering.

use crate::NodeIndex;
use sequent_core::EventPriority;
use std::time::Duration;

/// Global ordering key for queued events.
///
/// Events pop in (time, priority, sequence) order; the sequence counter is
/// globally monotonic, so two events can never tie and a given seed always
/// replays identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EventKey {
    /// Delivery time.
    pub time: Duration,
    /// Priority within the same instant.
    pub priority: EventPriority,
    /// Tie-breaker, unique per scheduled event.
    pub sequence: u64,
    /// Destination node.
    pub node: NodeIndex,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_by_time_then_priority_then_sequence() {
        let early = EventKey {
            time: Duration::from_millis(1),
            priority: EventPriority::Network,
            sequence: 9,
            node: 0,
        };
        let later_internal = EventKey {
            time: Duration::from_millis(2),
            priority: EventPriority::Internal,
            sequence: 1,
            node: 0,
        };
        let later_network = EventKey {
            time: Duration::from_millis(2),
            priority: EventPriority::Network,
            sequence: 0,
            node: 0,
        };
        assert!(early < later_internal);
        assert!(later_internal < later_network);
    }
}
