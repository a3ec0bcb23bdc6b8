//! Epoch descriptors.
//!
//! An epoch is a contiguous range of block slots ordered under a fixed
//! topology. Epochs tile the block space without gaps:
//! `epoch(k + 1).start = epoch(k).start + epoch(k).length`.

use crate::{BlockNumber, EpochNumber};
use std::time::Duration;

/// Descriptor of one epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct EpochInfo {
    /// Epoch number, genesis is 0.
    pub number: EpochNumber,
    /// First block slot of the epoch.
    pub start_block: BlockNumber,
    /// Number of block slots. Zero only for genesis.
    pub length: u64,
    /// Activation time of the topology that orders this epoch.
    pub topology_activation_time: Duration,
}

impl EpochInfo {
    /// The genesis epoch: no blocks, empty topology.
    pub fn genesis() -> Self {
        Self {
            number: EpochNumber::GENESIS,
            start_block: BlockNumber(0),
            length: 0,
            topology_activation_time: Duration::ZERO,
        }
    }

    /// Descriptor of the epoch following this one.
    pub fn next(&self, length: u64, topology_activation_time: Duration) -> Self {
        Self {
            number: self.number.next(),
            start_block: BlockNumber(self.start_block.0 + self.length),
            length,
            topology_activation_time,
        }
    }

    /// Whether `block` falls inside this epoch's slot range.
    pub fn contains(&self, block: BlockNumber) -> bool {
        block.0 >= self.start_block.0 && block.0 < self.start_block.0 + self.length
    }

    /// The last slot of the epoch. `None` for genesis.
    pub fn last_block(&self) -> Option<BlockNumber> {
        self.length
            .checked_sub(1)
            .map(|off| BlockNumber(self.start_block.0 + off))
    }

    /// Offset of `block` from the epoch start. Caller must check `contains`.
    pub fn relative_index(&self, block: BlockNumber) -> u64 {
        block.0 - self.start_block.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epochs_tile_the_block_space() {
        let genesis = EpochInfo::genesis();
        let first = genesis.next(8, Duration::from_secs(1));
        let second = first.next(8, Duration::from_secs(2));

        assert_eq!(first.number, EpochNumber(1));
        assert_eq!(first.start_block, BlockNumber(0));
        assert_eq!(second.start_block, BlockNumber(8));
        assert!(first.contains(BlockNumber(7)));
        assert!(!first.contains(BlockNumber(8)));
        assert!(second.contains(BlockNumber(8)));
        assert_eq!(first.last_block(), Some(BlockNumber(7)));
        assert_eq!(genesis.last_block(), None);
    }
}
