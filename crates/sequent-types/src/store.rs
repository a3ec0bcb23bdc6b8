//! Records exchanged with the persistent epoch store.
//!
//! The store itself lives behind the runner; these are the immutable
//! snapshots it accepts and returns.

use crate::{
    Commit, CommitCertificate, EpochInfo, EpochNumber, OrderedBlock, PbftMessage,
};

/// Durable record that an epoch finished: its descriptor plus the commit
/// messages of its final block, which anchor the next epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedEpoch {
    /// The completed epoch.
    pub info: EpochInfo,
    /// Commits deciding the epoch's last block.
    pub last_block_commits: Vec<Commit>,
}

impl CompletedEpoch {
    /// The genesis record: epoch 0, no blocks, no commits.
    pub fn genesis() -> Self {
        Self {
            info: EpochInfo::genesis(),
            last_block_commits: Vec::new(),
        }
    }
}

/// A fully stored epoch as served to state-transfer clients: every ordered
/// block plus the certificate of the final block, which authenticates the
/// whole range under the epoch's topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEpoch {
    /// The epoch's descriptor.
    pub info: EpochInfo,
    /// All ordered blocks of the epoch, ascending by block number.
    pub blocks: Vec<OrderedBlock>,
    /// Commit certificate of the epoch's last block.
    pub certificate: CommitCertificate,
}

impl StoredEpoch {
    /// Epoch number shorthand.
    pub fn number(&self) -> EpochNumber {
        self.info.number
    }
}

/// Crash-recovery snapshot of an unfinished epoch.
#[derive(Debug, Clone, Default)]
pub struct EpochInProgress {
    /// Blocks already decided, with their certificates.
    pub completed_blocks: Vec<(OrderedBlock, CommitCertificate)>,
    /// Retained PBFT messages for the blocks still in flight.
    pub pbft_messages: Vec<PbftMessage>,
}

/// Snapshot handed to a node joining an existing network, recording the
/// epoch from which it must fetch history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OnboardingSnapshot {
    /// First epoch this peer needs.
    pub start_epoch: EpochNumber,
}
