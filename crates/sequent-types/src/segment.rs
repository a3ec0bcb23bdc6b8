//! Segment assignment.
//!
//! Each epoch's slot range is partitioned into segments, one per topology
//! peer, interleaved round-robin in identity order. The assignment is a pure
//! function of (epoch info, topology), so every peer derives the same map.

use crate::{BlockNumber, EpochInfo, OrderingTopology, PeerId};

/// The block slots of one epoch assigned to a single original leader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Leader of this segment at view 0.
    pub original_leader: PeerId,
    /// Slot numbers owned by the leader, ascending.
    pub slots: Vec<BlockNumber>,
}

impl Segment {
    /// Whether `block` belongs to this segment.
    pub fn contains(&self, block: BlockNumber) -> bool {
        self.slots.binary_search(&block).is_ok()
    }
}

/// Partition an epoch's slots across the topology peers.
///
/// Peer `i` (identity order) owns slots `start + i`, `start + i + n`, ….
/// Peers whose stride never lands inside the epoch get an empty segment,
/// which is dropped.
pub fn assign_segments(info: &EpochInfo, topology: &OrderingTopology) -> Vec<Segment> {
    let n = topology.len() as u64;
    if n == 0 {
        return Vec::new();
    }
    topology
        .peers()
        .enumerate()
        .filter_map(|(i, peer)| {
            let slots: Vec<BlockNumber> = (info.start_block.0 + i as u64
                ..info.start_block.0 + info.length)
                .step_by(n as usize)
                .map(BlockNumber)
                .collect();
            if slots.is_empty() {
                None
            } else {
                Some(Segment {
                    original_leader: peer.clone(),
                    slots,
                })
            }
        })
        .collect()
}

/// The original leader of `block` within its epoch.
pub fn leader_of_slot(
    info: &EpochInfo,
    topology: &OrderingTopology,
    block: BlockNumber,
) -> Option<PeerId> {
    if !info.contains(block) || topology.is_empty() {
        return None;
    }
    let index = (info.relative_index(block) % topology.len() as u64) as usize;
    topology.peer_at(index).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EpochNumber, KeyPair};
    use std::collections::BTreeSet;
    use std::time::Duration;

    fn topology_of(n: usize) -> OrderingTopology {
        let peers = (0..n)
            .map(|i| {
                let key = KeyPair::from_seed(&[i as u8; 32]);
                (PeerId::new(format!("p{i}")), key.public_key())
            })
            .collect();
        OrderingTopology::new(peers, Duration::ZERO)
    }

    fn info(start: u64, length: u64) -> EpochInfo {
        EpochInfo {
            number: EpochNumber(1),
            start_block: BlockNumber(start),
            length,
            topology_activation_time: Duration::ZERO,
        }
    }

    #[test]
    fn segments_partition_the_epoch() {
        let topology = topology_of(4);
        let info = info(8, 10);
        let segments = assign_segments(&info, &topology);

        let mut seen = BTreeSet::new();
        for segment in &segments {
            for slot in &segment.slots {
                assert!(info.contains(*slot));
                assert!(seen.insert(*slot), "slot {slot} assigned twice");
            }
        }
        assert_eq!(seen.len(), 10);
    }

    #[test]
    fn leader_matches_segment_assignment() {
        let topology = topology_of(4);
        let info = info(0, 8);
        let segments = assign_segments(&info, &topology);

        for segment in &segments {
            for slot in &segment.slots {
                assert_eq!(
                    leader_of_slot(&info, &topology, *slot).as_ref(),
                    Some(&segment.original_leader)
                );
            }
        }
        assert_eq!(leader_of_slot(&info, &topology, BlockNumber(8)), None);
    }

    #[test]
    fn short_epoch_drops_empty_segments() {
        let topology = topology_of(4);
        let segments = assign_segments(&info(0, 2), &topology);
        assert_eq!(segments.len(), 2);
    }
}
