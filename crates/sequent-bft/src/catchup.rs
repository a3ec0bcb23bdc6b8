//! Catch-up detection.
//!
//! Tracks the newest epoch each peer has been observed in. When a weak
//! quorum of peers is far enough ahead, live consensus cannot help this node
//! any more and bulk state transfer takes over.

use sequent_types::{EpochNumber, PeerId};
use std::collections::BTreeMap;
use tracing::debug;

/// Observes peer epochs from future-epoch messages and decides when the gap
/// warrants abandoning live consensus.
#[derive(Debug, Default)]
pub struct CatchupDetector {
    latest_known_peer_epoch: BTreeMap<PeerId, EpochNumber>,
}

impl CatchupDetector {
    /// Record that `peer` sent a message for `epoch`. Only ever advances.
    pub fn observe(&mut self, peer: &PeerId, epoch: EpochNumber) {
        let entry = self
            .latest_known_peer_epoch
            .entry(peer.clone())
            .or_insert(epoch);
        if epoch > *entry {
            *entry = epoch;
        }
    }

    /// The newest epoch observed for `peer`.
    pub fn peer_epoch(&self, peer: &PeerId) -> Option<EpochNumber> {
        self.latest_known_peer_epoch.get(peer).copied()
    }

    /// Decide whether to catch up.
    ///
    /// Triggers when at least `weak_quorum` distinct peers have been seen in
    /// epochs at or beyond `current + threshold`. Returns the epoch the
    /// `weak_quorum`-th most advanced peer is in: at least that many peers
    /// are provably there, so transfer can safely aim for it.
    pub fn should_catch_up(
        &self,
        current: EpochNumber,
        weak_quorum: usize,
        threshold: u64,
    ) -> Option<EpochNumber> {
        if weak_quorum == 0 {
            return None;
        }
        let mut ahead: Vec<EpochNumber> = self
            .latest_known_peer_epoch
            .values()
            .copied()
            .filter(|e| e.0 >= current.0 + threshold)
            .collect();
        if ahead.len() < weak_quorum {
            return None;
        }
        ahead.sort_unstable_by(|a, b| b.cmp(a));
        let target = ahead[weak_quorum - 1];
        debug!(%current, %target, peers_ahead = ahead.len(), "catch-up threshold met");
        Some(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sequent_types::test_utils::test_peer;

    #[test]
    fn triggers_on_weak_quorum_of_peers_ahead() {
        let mut detector = CatchupDetector::default();
        let current = EpochNumber(2);

        detector.observe(&test_peer(0), EpochNumber(6));
        assert_eq!(detector.should_catch_up(current, 2, 2), None);

        detector.observe(&test_peer(1), EpochNumber(5));
        assert_eq!(
            detector.should_catch_up(current, 2, 2),
            Some(EpochNumber(5))
        );
    }

    #[test]
    fn one_epoch_ahead_is_normal_operation() {
        let mut detector = CatchupDetector::default();
        detector.observe(&test_peer(0), EpochNumber(3));
        detector.observe(&test_peer(1), EpochNumber(3));
        assert_eq!(detector.should_catch_up(EpochNumber(2), 2, 2), None);
    }

    #[test]
    fn observations_only_advance() {
        let mut detector = CatchupDetector::default();
        detector.observe(&test_peer(0), EpochNumber(7));
        detector.observe(&test_peer(0), EpochNumber(3));
        assert_eq!(detector.peer_epoch(&test_peer(0)), Some(EpochNumber(7)));
    }
}
