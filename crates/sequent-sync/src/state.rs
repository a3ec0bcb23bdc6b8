//! State-transfer state machine.
//!
//! Client role: fetch completed epochs from a weak quorum of peers, verify
//! each response's commit certificate, apply responses in strict epoch
//! order, and persist every epoch before touching the next. A single honest
//! responder suffices for correctness because responses are
//! self-authenticating; the weak quorum provides liveness.
//!
//! Server role: answer `BlockTransferRequest`s with one response per
//! completed epoch at or after the requested one.

use crate::config::SyncConfig;
use sequent_core::{
    Action, Event, NonComplianceKind, NonComplianceReport, OutboundMessage, TimerId,
};
use sequent_messages::{BlockTransferRequest, BlockTransferResponse};
use sequent_types::{
    BlockProvenance, CompletedEpoch, EpochNumber, Membership, OrderedBlockForOutput, PeerId,
    StoredEpoch,
};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// How many consecutive empty retry rounds before concluding the network
/// has nothing (more) for us.
const MAX_EMPTY_ROUNDS: u32 = 2;

/// Progress of the client role.
#[derive(Debug)]
enum ClientPhase {
    /// Not transferring.
    Idle,
    /// Requesting epochs starting at `next_epoch`.
    Fetching {
        /// Next epoch to apply; everything below is durable.
        next_epoch: EpochNumber,
        /// Epoch the network was observed in, when known. Transfer can stop
        /// once every epoch below it is held.
        target: Option<EpochNumber>,
        /// The newest completed epoch before transfer began; returned
        /// verbatim when there turns out to be nothing to fetch.
        baseline: CompletedEpoch,
        /// Whether any epoch has been applied this run.
        applied_any: bool,
        /// Whether any epoch was applied since the last retry tick.
        progressed: bool,
        /// Consecutive retry ticks without progress.
        empty_rounds: u32,
        /// Retry counter, rotates the queried weak quorum.
        round: u64,
    },
}

/// The state-transfer manager.
pub struct StateTransferState {
    membership: Membership,
    config: SyncConfig,
    phase: ClientPhase,
    /// Responses received but not yet applied, keyed by epoch.
    pending: BTreeMap<EpochNumber, (StoredEpoch, PeerId)>,
    /// Epoch whose certificate verification is in flight.
    verifying: Option<EpochNumber>,
    /// Epoch whose persistence is in flight.
    storing: Option<StoredEpoch>,
    /// Newest epoch applied by this run.
    latest_applied: Option<CompletedEpoch>,
    /// When the running transfer began.
    started_at: Duration,
    now: Duration,
}

impl StateTransferState {
    /// Create the manager for the current membership.
    pub fn new(membership: Membership, config: SyncConfig) -> Self {
        Self {
            membership,
            config,
            phase: ClientPhase::Idle,
            pending: BTreeMap::new(),
            verifying: None,
            storing: None,
            latest_applied: None,
            started_at: Duration::ZERO,
            now: Duration::ZERO,
        }
    }

    /// Inject the current time.
    pub fn set_time(&mut self, now: Duration) {
        self.now = now;
    }

    /// Adopt a new membership when the topology changes.
    pub fn set_membership(&mut self, membership: Membership) {
        self.membership = membership;
    }

    /// Whether a transfer is in progress.
    pub fn is_transferring(&self) -> bool {
        !matches!(self.phase, ClientPhase::Idle)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Client role
    // ═══════════════════════════════════════════════════════════════════════

    /// Start fetching from `from_epoch`. `baseline` is the newest epoch
    /// already durable locally.
    pub fn on_transfer_needed(
        &mut self,
        from_epoch: EpochNumber,
        target: Option<EpochNumber>,
        baseline: CompletedEpoch,
    ) -> Vec<Action> {
        if self.is_transferring() {
            trace!("transfer already running");
            return Vec::new();
        }
        info!(from = %from_epoch, ?target, "starting state transfer");
        self.phase = ClientPhase::Fetching {
            next_epoch: from_epoch,
            target,
            baseline,
            applied_any: false,
            progressed: false,
            empty_rounds: 0,
            round: 0,
        };
        self.latest_applied = None;
        self.started_at = self.now;
        let mut actions = self.send_requests(from_epoch, 0);
        actions.push(Action::SetTimer {
            id: TimerId::TransferRetry,
            duration: self.config.retry_interval,
        });
        actions
    }

    /// A response arrived. Queue it; verification and application run in
    /// strict epoch order.
    pub fn on_response(&mut self, response: BlockTransferResponse) -> Vec<Action> {
        let ClientPhase::Fetching { next_epoch, .. } = &self.phase else {
            trace!("response while not transferring");
            return Vec::new();
        };
        let number = response.epoch.number();
        if number < *next_epoch || self.pending.contains_key(&number) {
            return Vec::new();
        }
        if self.storing.as_ref().is_some_and(|e| e.number() == number)
            || self.verifying == Some(number)
        {
            return Vec::new();
        }
        if let Some(report) = self.malformed(&response) {
            warn!(epoch = %number, sender = %response.sender, "malformed transfer response");
            return vec![report];
        }
        debug!(epoch = %number, sender = %response.sender, blocks = response.epoch.blocks.len(), "queued transfer response");
        self.pending
            .insert(number, (response.epoch, response.sender));
        self.try_verify_next()
    }

    /// Certificate verification finished for the epoch at the head of the
    /// queue.
    pub fn on_epoch_verified(&mut self, epoch: StoredEpoch, valid: bool) -> Vec<Action> {
        let number = epoch.number();
        if self.verifying.take() != Some(number) {
            return Vec::new();
        }
        let Some((_, sender)) = self.pending.remove(&number) else {
            return Vec::new();
        };
        if !valid {
            warn!(epoch = %number, %sender, "transfer response failed certificate verification");
            // Another responder may still supply a valid copy on retry.
            return vec![Action::ReportNonCompliance {
                report: NonComplianceReport {
                    sender: Some(sender),
                    epoch: Some(number),
                    view: None,
                    block: None,
                    kind: NonComplianceKind::InvalidSignature,
                },
            }];
        }
        debug!(epoch = %number, "transfer response verified, persisting");
        self.storing = Some(epoch.clone());
        vec![Action::PersistTransferredEpoch {
            epoch: Box::new(epoch),
        }]
    }

    /// A transferred epoch became durable: emit its blocks to the output
    /// sink and advance to the next epoch.
    pub fn on_transferred_stored(&mut self, number: EpochNumber) -> Vec<Action> {
        let Some(stored) = self.storing.take() else {
            return Vec::new();
        };
        if stored.number() != number {
            warn!(expected = %stored.number(), got = %number, "stored epoch out of order");
            return Vec::new();
        }
        let completed = CompletedEpoch {
            info: stored.info,
            last_block_commits: stored.certificate.commits.clone(),
        };
        self.latest_applied = Some(completed);

        let mut actions: Vec<Action> = stored
            .blocks
            .iter()
            .map(|block| Action::EmitOrderedBlock {
                block: OrderedBlockForOutput {
                    block: block.clone(),
                    provenance: BlockProvenance::FromStateTransfer,
                },
            })
            .collect();

        let finished = {
            let ClientPhase::Fetching {
                next_epoch,
                target,
                applied_any,
                progressed,
                empty_rounds,
                ..
            } = &mut self.phase
            else {
                return actions;
            };
            *next_epoch = number.next();
            *applied_any = true;
            *progressed = true;
            *empty_rounds = 0;
            info!(epoch = %number, "transferred epoch applied");
            target.is_some_and(|t| *next_epoch >= t)
        };

        if finished {
            actions.extend(self.finish());
        } else {
            actions.extend(self.try_verify_next());
        }
        actions
    }

    /// Retry tick: re-request from a rotated weak quorum, or conclude the
    /// transfer when nothing new has arrived for a while.
    pub fn on_retry(&mut self) -> Vec<Action> {
        let ClientPhase::Fetching {
            next_epoch,
            target,
            applied_any,
            progressed,
            empty_rounds,
            round,
            ..
        } = &mut self.phase
        else {
            return Vec::new();
        };

        let busy = self.verifying.is_some() || self.storing.is_some() || !self.pending.is_empty();
        if !*progressed && !busy {
            *empty_rounds += 1;
            let give_up = *empty_rounds >= MAX_EMPTY_ROUNDS;
            // With a known target we keep asking until it is reached;
            // otherwise an idle network means there is nothing to fetch.
            if give_up && (target.is_none() || *applied_any) {
                return self.finish();
            }
        } else {
            *empty_rounds = 0;
        }
        *progressed = false;
        *round += 1;

        let (next_epoch, round) = (*next_epoch, *round);
        let mut actions = self.send_requests(next_epoch, round);
        actions.push(Action::SetTimer {
            id: TimerId::TransferRetry,
            duration: self.config.retry_interval,
        });
        actions
    }

    fn finish(&mut self) -> Vec<Action> {
        let ClientPhase::Fetching { baseline, .. } =
            std::mem::replace(&mut self.phase, ClientPhase::Idle)
        else {
            return Vec::new();
        };
        self.pending.clear();
        self.verifying = None;
        self.storing = None;
        let last_completed = self.latest_applied.take().unwrap_or(baseline);
        info!(
            epoch = %last_completed.info.number,
            elapsed = ?self.now.saturating_sub(self.started_at),
            "state transfer finished"
        );
        vec![
            Action::CancelTimer {
                id: TimerId::TransferRetry,
            },
            Action::EnqueueInternal {
                event: Event::StateTransferCompleted {
                    last_completed: Box::new(last_completed),
                },
            },
        ]
    }

    /// Send a request to a weak quorum of peers, rotated by `round` so a
    /// crashed or withholding responder cannot stall the client forever.
    fn send_requests(&self, from_epoch: EpochNumber, round: u64) -> Vec<Action> {
        let others = self.membership.others();
        if others.is_empty() {
            return Vec::new();
        }
        let count = self.membership.weak_quorum().min(others.len());
        let offset = (round % others.len() as u64) as usize;
        (0..count)
            .map(|i| {
                let peer = others[(offset + i) % others.len()].clone();
                Action::Send {
                    to: peer,
                    message: OutboundMessage::BlockTransferRequest(BlockTransferRequest {
                        from_epoch,
                        sender: self.membership.me.clone(),
                    }),
                }
            })
            .collect()
    }

    /// Kick off verification for the next epoch in order, if it is queued
    /// and nothing else is in flight.
    fn try_verify_next(&mut self) -> Vec<Action> {
        if self.verifying.is_some() || self.storing.is_some() {
            return Vec::new();
        }
        let ClientPhase::Fetching { next_epoch, .. } = &self.phase else {
            return Vec::new();
        };
        let Some((epoch, _)) = self.pending.get(next_epoch) else {
            return Vec::new();
        };
        self.verifying = Some(*next_epoch);
        vec![Action::VerifyStoredEpoch {
            epoch: Box::new(epoch.clone()),
            topology: self.membership.topology.clone(),
        }]
    }

    /// Structural checks: the blocks must exactly tile the epoch's slot
    /// range and the certificate must decide the final block, so it covers
    /// the whole response.
    fn malformed(&self, response: &BlockTransferResponse) -> Option<Action> {
        let epoch = &response.epoch;
        let info = &epoch.info;
        let well_formed = epoch.blocks.len() as u64 == info.length
            && epoch
                .blocks
                .iter()
                .enumerate()
                .all(|(i, b)| b.metadata.block_number.0 == info.start_block.0 + i as u64)
            && epoch
                .certificate
                .metadata()
                .is_some_and(|m| Some(m.block_number) == info.last_block());
        if well_formed {
            return None;
        }
        Some(Action::ReportNonCompliance {
            report: NonComplianceReport {
                sender: Some(response.sender.clone()),
                epoch: Some(info.number),
                view: None,
                block: None,
                kind: NonComplianceKind::Malformed,
            },
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Server role
    // ═══════════════════════════════════════════════════════════════════════

    /// A peer asked for completed epochs: read them from the store.
    pub fn on_request(&self, request: BlockTransferRequest) -> Vec<Action> {
        debug!(from = %request.from_epoch, requester = %request.sender, "serving block transfer request");
        vec![Action::FetchStoredEpochs {
            from: request.from_epoch,
            requester: request.sender,
        }]
    }

    /// The store returned completed epochs: answer with one response each.
    pub fn on_stored_epochs_loaded(
        &self,
        requester: PeerId,
        epochs: Vec<StoredEpoch>,
    ) -> Vec<Action> {
        epochs
            .into_iter()
            .map(|epoch| Action::Send {
                to: requester.clone(),
                message: OutboundMessage::BlockTransferResponse(Box::new(BlockTransferResponse {
                    epoch,
                    sender: self.membership.me.clone(),
                })),
            })
            .collect()
    }
}

impl std::fmt::Debug for StateTransferState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateTransferState")
            .field("me", &self.membership.me)
            .field("transferring", &self.is_transferring())
            .field("pending", &self.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sequent_types::test_utils::{test_key, test_peer, test_topology};
    use sequent_types::{
        BlockMetadata, BlockNumber, Commit, CommitCertificate, EpochInfo, Hash, OrderedBlock,
        OrderingPayload, ViewNumber,
    };

    fn manager(me: usize) -> StateTransferState {
        StateTransferState::new(
            Membership::new(test_peer(me), test_topology(4, Duration::ZERO)),
            SyncConfig::default(),
        )
    }

    fn stored_epoch(number: u64, start: u64, length: u64) -> StoredEpoch {
        let info = EpochInfo {
            number: EpochNumber(number),
            start_block: BlockNumber(start),
            length,
            topology_activation_time: Duration::ZERO,
        };
        let last = BlockNumber(start + length - 1);
        let blocks = (start..start + length)
            .map(|b| OrderedBlock {
                metadata: BlockMetadata::new(EpochNumber(number), BlockNumber(b)),
                payload: OrderingPayload::empty(),
                original_leader: test_peer(0),
                is_last_in_epoch: b == last.0,
            })
            .collect();
        let commits = (0..3)
            .map(|i| {
                Commit::new(
                    BlockMetadata::new(EpochNumber(number), last),
                    ViewNumber(0),
                    Hash::digest(b""),
                    test_peer(i),
                    0,
                    &test_key(i),
                )
            })
            .collect();
        StoredEpoch {
            info,
            blocks,
            certificate: CommitCertificate::new(commits),
        }
    }

    fn response(number: u64, start: u64, length: u64, from: usize) -> BlockTransferResponse {
        BlockTransferResponse {
            epoch: stored_epoch(number, start, length),
            sender: test_peer(from),
        }
    }

    #[test]
    fn transfer_requests_go_to_a_weak_quorum() {
        let mut manager = manager(3);
        let actions =
            manager.on_transfer_needed(EpochNumber(1), None, CompletedEpoch::genesis());
        let sends = actions
            .iter()
            .filter(|a| matches!(a, Action::Send { .. }))
            .count();
        assert_eq!(sends, 2); // f + 1 with n = 4
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::SetTimer { id: TimerId::TransferRetry, .. })));
    }

    #[test]
    fn responses_apply_in_strict_epoch_order() {
        let mut manager = manager(3);
        manager.on_transfer_needed(EpochNumber(1), Some(EpochNumber(3)), CompletedEpoch::genesis());

        // Epoch 2 arrives first: queued, nothing verified yet.
        let actions = manager.on_response(response(2, 2, 2, 0));
        assert!(actions.is_empty());

        // Epoch 1 arrives: verification starts with it.
        let actions = manager.on_response(response(1, 0, 2, 1));
        let verifying = actions
            .iter()
            .find_map(|a| match a {
                Action::VerifyStoredEpoch { epoch, .. } => Some(epoch.number()),
                _ => None,
            })
            .expect("verification starts");
        assert_eq!(verifying, EpochNumber(1));

        // Verified → persisted → blocks emitted, then epoch 2 is verified.
        let actions = manager.on_epoch_verified(stored_epoch(1, 0, 2), true);
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::PersistTransferredEpoch { .. })));
        let actions = manager.on_transferred_stored(EpochNumber(1));
        let emitted = actions
            .iter()
            .filter(|a| matches!(a, Action::EmitOrderedBlock { .. }))
            .count();
        assert_eq!(emitted, 2);
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::VerifyStoredEpoch { epoch, .. } if epoch.number() == EpochNumber(2))));

        // Applying epoch 2 reaches the target and finishes the transfer.
        manager.on_epoch_verified(stored_epoch(2, 2, 2), true);
        let actions = manager.on_transferred_stored(EpochNumber(2));
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::EnqueueInternal {
                event: Event::StateTransferCompleted { last_completed }
            } if last_completed.info.number == EpochNumber(2)
        )));
        assert!(!manager.is_transferring());
    }

    #[test]
    fn invalid_certificate_is_flagged_and_not_applied() {
        let mut manager = manager(3);
        manager.on_transfer_needed(EpochNumber(1), None, CompletedEpoch::genesis());
        manager.on_response(response(1, 0, 2, 0));
        let actions = manager.on_epoch_verified(stored_epoch(1, 0, 2), false);
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::ReportNonCompliance { report }
                if report.kind == NonComplianceKind::InvalidSignature
        )));
        assert!(manager.is_transferring());
        assert!(manager.latest_applied.is_none());
    }

    #[test]
    fn malformed_response_is_flagged() {
        let mut manager = manager(3);
        manager.on_transfer_needed(EpochNumber(1), None, CompletedEpoch::genesis());
        // Certificate decides block 1 but the epoch claims length 3.
        let mut bad = response(1, 0, 2, 0);
        bad.epoch.info.length = 3;
        let actions = manager.on_response(bad);
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::ReportNonCompliance { report }
                if report.kind == NonComplianceKind::Malformed
        )));
    }

    #[test]
    fn idle_network_concludes_nothing_to_transfer() {
        let mut manager = manager(3);
        let baseline = CompletedEpoch::genesis();
        manager.on_transfer_needed(EpochNumber(1), None, baseline.clone());
        assert!(manager.on_retry().iter().all(|a| !matches!(
            a,
            Action::EnqueueInternal {
                event: Event::StateTransferCompleted { .. }
            }
        )));
        let actions = manager.on_retry();
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::EnqueueInternal {
                event: Event::StateTransferCompleted { last_completed }
            } if last_completed.info.number == baseline.info.number
        )));
    }

    #[test]
    fn server_answers_with_one_response_per_epoch() {
        let manager = manager(0);
        let actions = manager.on_request(BlockTransferRequest {
            from_epoch: EpochNumber(1),
            sender: test_peer(3),
        });
        assert!(matches!(actions[0], Action::FetchStoredEpochs { .. }));

        let actions = manager.on_stored_epochs_loaded(
            test_peer(3),
            vec![stored_epoch(1, 0, 2), stored_epoch(2, 2, 2)],
        );
        assert_eq!(actions.len(), 2);
        assert!(actions.iter().all(|a| matches!(
            a,
            Action::Send {
                to,
                message: OutboundMessage::BlockTransferResponse(_)
            } if *to == test_peer(3)
        )));
    }
}
