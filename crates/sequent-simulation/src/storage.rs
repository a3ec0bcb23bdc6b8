//! In-memory epoch store.
//!
//! Stands in for the persistent epoch store during simulation. Writes are
//! applied synchronously by the runner; the durability callbacks are then
//! scheduled as internal events, which preserves the ordering contract
//! (`NewEpochStored` after `startEpoch`, `CompleteEpochStored` after
//! `completeEpoch`).

use sequent_bft::RecoveredState;
use sequent_types::{
    BlockNumber, Commit, CommitCertificate, CompletedEpoch, EpochInfo, EpochInProgress,
    EpochNumber, OrderedBlock, PbftMessage, StoredEpoch,
};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
struct EpochRecord {
    info: EpochInfo,
    blocks: BTreeMap<BlockNumber, (OrderedBlock, CommitCertificate)>,
    completed: bool,
    last_block_commits: Vec<Commit>,
}

/// One node's epoch store.
#[derive(Debug, Default)]
pub struct SimEpochStore {
    epochs: BTreeMap<EpochNumber, EpochRecord>,
    /// Own and relevant peer PBFT messages retained for crash recovery,
    /// pruned when their epoch completes.
    pbft_messages: Vec<PbftMessage>,
    /// `startEpoch` calls per epoch, for duplicate-detection assertions.
    start_calls: BTreeMap<EpochNumber, u32>,
}

impl SimEpochStore {
    /// Record that an epoch began.
    pub fn start_epoch(&mut self, info: EpochInfo) {
        *self.start_calls.entry(info.number).or_insert(0) += 1;
        self.epochs.entry(info.number).or_insert(EpochRecord {
            info,
            blocks: BTreeMap::new(),
            completed: false,
            last_block_commits: Vec::new(),
        });
    }

    /// Record a decided block with its certificate.
    pub fn add_block(&mut self, block: OrderedBlock, certificate: CommitCertificate) {
        if let Some(record) = self.epochs.get_mut(&block.metadata.epoch) {
            record
                .blocks
                .insert(block.metadata.block_number, (block, certificate));
        }
    }

    /// Retain a PBFT message for crash recovery.
    pub fn add_pbft_message(&mut self, message: PbftMessage) {
        self.pbft_messages.push(message);
    }

    /// Record epoch completion with its last-block commits.
    pub fn complete_epoch(&mut self, epoch: EpochNumber, last_block_commits: Vec<Commit>) {
        if let Some(record) = self.epochs.get_mut(&epoch) {
            record.completed = true;
            record.last_block_commits = last_block_commits;
        }
        self.pbft_messages
            .retain(|m| m.metadata().epoch != epoch);
    }

    /// Store a whole epoch obtained via state transfer.
    pub fn store_transferred(&mut self, epoch: StoredEpoch) {
        let record = EpochRecord {
            info: epoch.info,
            blocks: epoch
                .blocks
                .into_iter()
                .map(|b| (b.metadata.block_number, (b, epoch.certificate.clone())))
                .collect(),
            completed: true,
            last_block_commits: epoch.certificate.commits,
        };
        self.epochs.insert(record.info.number, record);
    }

    /// Every completed epoch at or after `from`, in order, as served to
    /// state-transfer clients.
    pub fn completed_from(&self, from: EpochNumber) -> Vec<StoredEpoch> {
        self.epochs
            .range(from..)
            .filter(|(_, r)| r.completed && r.info.length > 0)
            .map(|(_, r)| StoredEpoch {
                info: r.info,
                blocks: r.blocks.values().map(|(b, _)| b.clone()).collect(),
                certificate: CommitCertificate::new(r.last_block_commits.clone()),
            })
            .collect()
    }

    /// The newest completed epoch.
    pub fn latest_completed(&self) -> Option<CompletedEpoch> {
        self.epochs
            .values()
            .rev()
            .find(|r| r.completed)
            .map(|r| CompletedEpoch {
                info: r.info,
                last_block_commits: r.last_block_commits.clone(),
            })
    }

    /// Snapshot for restarting a node from this store.
    pub fn recovered_state(&self) -> RecoveredState {
        let latest_completed = self.latest_completed();
        let current = self
            .epochs
            .values()
            .rev()
            .find(|r| !r.completed)
            .map(|r| r.info);
        let in_progress = current
            .map(|info| EpochInProgress {
                completed_blocks: self
                    .epochs
                    .get(&info.number)
                    .map(|r| r.blocks.values().cloned().collect())
                    .unwrap_or_default(),
                pbft_messages: self
                    .pbft_messages
                    .iter()
                    .filter(|m| m.metadata().epoch == info.number)
                    .cloned()
                    .collect(),
            })
            .unwrap_or_default();
        RecoveredState {
            latest_completed,
            current_epoch: current,
            in_progress,
            onboarding: None,
        }
    }

    /// Whether `epoch` is recorded complete.
    pub fn is_epoch_complete(&self, epoch: EpochNumber) -> bool {
        self.epochs.get(&epoch).is_some_and(|r| r.completed)
    }

    /// The stored (block, certificate) pair for `block`, if decided.
    pub fn block(&self, block: BlockNumber) -> Option<&(OrderedBlock, CommitCertificate)> {
        self.epochs.values().find_map(|r| r.blocks.get(&block))
    }

    /// Number of decided blocks in the store.
    pub fn block_count(&self) -> usize {
        self.epochs.values().map(|r| r.blocks.len()).sum()
    }

    /// How often `startEpoch` was called for `epoch`.
    pub fn start_calls(&self, epoch: EpochNumber) -> u32 {
        self.start_calls.get(&epoch).copied().unwrap_or(0)
    }
}
