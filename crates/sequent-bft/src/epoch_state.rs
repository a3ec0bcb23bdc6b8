//! Per-epoch aggregation of segment instances.

use crate::config::BftConfig;
use crate::segment::SegmentState;
use sequent_core::Action;
use sequent_types::{
    assign_segments, BlockNumber, Commit, CommitCertificate, EpochInfo, EpochInProgress, KeyPair,
    Membership, OrderedBlock, OrderingPayload, PbftMessage,
};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::warn;

/// State of the currently active epoch: its segments, the set of decided
/// slots, and the final block's commits, which anchor the next epoch.
pub struct EpochState {
    info: EpochInfo,
    membership: Membership,
    segments: Vec<SegmentState>,
    completed: BTreeSet<BlockNumber>,
    last_block_commits: Option<Vec<Commit>>,
}

impl EpochState {
    /// Build the epoch's segments from its topology.
    pub fn new(info: EpochInfo, membership: Membership, key: KeyPair, config: BftConfig) -> Self {
        let segments = assign_segments(&info, &membership.topology)
            .into_iter()
            .map(|segment| {
                SegmentState::new(
                    membership.clone(),
                    key.clone(),
                    config.clone(),
                    info,
                    segment,
                )
            })
            .collect();
        Self {
            info,
            membership,
            segments,
            completed: BTreeSet::new(),
            last_block_commits: None,
        }
    }

    /// The epoch's descriptor.
    pub fn info(&self) -> &EpochInfo {
        &self.info
    }

    /// The epoch's membership view.
    pub fn membership(&self) -> &Membership {
        &self.membership
    }

    /// Inject the current time into every segment.
    pub fn set_time(&mut self, now: Duration) {
        for segment in &mut self.segments {
            segment.set_time(now);
        }
    }

    /// Start every segment: arm timers, request proposals where this node
    /// leads.
    pub fn start(&mut self) -> Vec<Action> {
        self.segments
            .iter_mut()
            .flat_map(SegmentState::start)
            .collect()
    }

    /// Rebuild from a crash-recovery snapshot, then resume each slot at the
    /// highest state the retained messages justify.
    pub fn restore(&mut self, snapshot: &EpochInProgress) -> Vec<Action> {
        for (block, certificate) in &snapshot.completed_blocks {
            self.completed.insert(block.metadata.block_number);
            if Some(block.metadata.block_number) == self.info.last_block() {
                self.last_block_commits = Some(certificate.commits.clone());
            }
        }
        let mut actions = Vec::new();
        for segment in &mut self.segments {
            actions.extend(segment.restore(&snapshot.completed_blocks, &snapshot.pbft_messages));
        }
        actions
    }

    /// Route a verified PBFT message to the segment owning its slot.
    pub fn on_message(&mut self, message: PbftMessage) -> Vec<Action> {
        let block = message.metadata().block_number;
        match self.segment_for(block) {
            Some(segment) => segment.on_message(message),
            None => Vec::new(),
        }
    }

    /// Route an availability payload to the segment owning the slot.
    pub fn on_proposal(&mut self, block: BlockNumber, payload: OrderingPayload) -> Vec<Action> {
        match self.segment_for(block) {
            Some(segment) => segment.on_proposal(block, payload),
            None => {
                warn!(%block, "proposal for a slot outside the epoch");
                Vec::new()
            }
        }
    }

    /// Route a slot timeout.
    pub fn on_timeout(&mut self, block: BlockNumber) -> Vec<Action> {
        match self.segment_for(block) {
            Some(segment) => segment.on_timeout(block),
            None => Vec::new(),
        }
    }

    /// Record a decided block. Returns `true` the first time the slot is
    /// recorded, `false` for duplicates.
    pub fn record_ordered(&mut self, block: &OrderedBlock, certificate: &CommitCertificate) -> bool {
        let number = block.metadata.block_number;
        if !self.info.contains(number) {
            warn!(block = %number, "ordered block outside the epoch");
            return false;
        }
        if !self.completed.insert(number) {
            return false;
        }
        if Some(number) == self.info.last_block() {
            self.last_block_commits = Some(certificate.commits.clone());
        }
        true
    }

    /// Whether every slot of the epoch has been decided.
    pub fn is_complete(&self) -> bool {
        self.completed.len() as u64 == self.info.length
    }

    /// Whether `block` has already been decided in this epoch.
    pub fn is_block_completed(&self, block: BlockNumber) -> bool {
        self.completed.contains(&block)
    }

    /// Commits of the final block, available once it is decided.
    pub fn last_block_commits(&self) -> Option<&Vec<Commit>> {
        self.last_block_commits.as_ref()
    }

    fn segment_for(&mut self, block: BlockNumber) -> Option<&mut SegmentState> {
        self.segments.iter_mut().find(|s| s.owns(block))
    }
}

impl std::fmt::Debug for EpochState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EpochState")
            .field("epoch", &self.info.number)
            .field("segments", &self.segments.len())
            .field("completed", &self.completed.len())
            .field("length", &self.info.length)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sequent_types::test_utils::{test_key, test_peer, test_topology};
    use sequent_types::{BlockMetadata, EpochNumber, PeerId};

    fn epoch_state(me: usize) -> EpochState {
        let topology = test_topology(4, Duration::ZERO);
        let membership = Membership::new(test_peer(me), topology);
        let info = EpochInfo {
            number: EpochNumber(1),
            start_block: BlockNumber(0),
            length: 4,
            topology_activation_time: Duration::ZERO,
        };
        EpochState::new(info, membership, test_key(me), BftConfig::default())
    }

    fn ordered(number: u64, last: bool) -> OrderedBlock {
        OrderedBlock {
            metadata: BlockMetadata::new(EpochNumber(1), BlockNumber(number)),
            payload: OrderingPayload::empty(),
            original_leader: PeerId::new("peer-0"),
            is_last_in_epoch: last,
        }
    }

    #[test]
    fn completion_requires_every_slot() {
        let mut epoch = epoch_state(0);
        let certificate = CommitCertificate::new(vec![]);
        for n in 0..3 {
            assert!(epoch.record_ordered(&ordered(n, false), &certificate));
            assert!(!epoch.is_complete());
        }
        assert!(epoch.record_ordered(&ordered(3, true), &certificate));
        assert!(epoch.is_complete());
        assert!(epoch.last_block_commits().is_some());
    }

    #[test]
    fn duplicate_and_out_of_range_blocks_are_rejected() {
        let mut epoch = epoch_state(0);
        let certificate = CommitCertificate::new(vec![]);
        assert!(epoch.record_ordered(&ordered(0, false), &certificate));
        assert!(!epoch.record_ordered(&ordered(0, false), &certificate));
        assert!(!epoch.record_ordered(&ordered(9, false), &certificate));
    }

    #[test]
    fn leader_requests_proposals_only_for_its_segment() {
        let mut epoch = epoch_state(1);
        let actions = epoch.start();
        let requested: Vec<BlockNumber> = actions
            .iter()
            .filter_map(|a| match a {
                Action::RequestProposal { block, .. } => Some(*block),
                _ => None,
            })
            .collect();
        // Peer 1 owns the interleaved slot 1 of [0, 4).
        assert_eq!(requested, vec![BlockNumber(1)]);
    }
}
