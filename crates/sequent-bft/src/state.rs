//! Top-level ordering state machine.
//!
//! Owns the epoch lifecycle: bootstrap or recovery at startup, installing
//! new epochs as topologies arrive from the output module, routing verified
//! PBFT messages into the active epoch's segments, and deciding when live
//! consensus must yield to bulk state transfer.

use crate::catchup::CatchupDetector;
use crate::config::BftConfig;
use crate::epoch_state::EpochState;
use crate::validation::{signature_checks, UnknownSigner};
use sequent_core::{
    Action, Event, NonComplianceKind, NonComplianceReport, TimerId,
};
use sequent_types::{
    BlockMetadata, BlockNumber, BlockProvenance, CommitCertificate, CompletedEpoch, EpochInfo,
    EpochInProgress, EpochNumber, KeyPair, Membership, OnboardingSnapshot, OrderedBlock,
    OrderedBlockForOutput, OrderingPayload, OrderingTopology, PbftMessage, PeerId, RequestId,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// State recovered from the epoch store on startup.
///
/// Use `RecoveredState::default()` for a fresh start at genesis.
#[derive(Debug, Clone, Default)]
pub struct RecoveredState {
    /// The newest epoch recorded as complete. Genesis when none is.
    pub latest_completed: Option<CompletedEpoch>,
    /// An epoch whose start was persisted but whose completion was not.
    pub current_epoch: Option<EpochInfo>,
    /// Decided blocks and retained messages of that unfinished epoch.
    pub in_progress: EpochInProgress,
    /// Present when this node joins an existing network and must fetch
    /// history before participating.
    pub onboarding: Option<OnboardingSnapshot>,
}

/// Whether the module is running live PBFT or transferring blocks in bulk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsensusMode {
    /// Ordering via segments.
    Live,
    /// Live PBFT paused; the state-transfer client is fetching epochs. The
    /// future queue keeps accumulating.
    CatchingUp,
}

/// The consensus module. One instance per node; strictly single-threaded.
pub struct ConsensusState {
    key: KeyPair,
    config: BftConfig,
    /// Membership under the current topology.
    membership: Membership,
    latest_completed: CompletedEpoch,
    /// Descriptor of the epoch in progress; equals the latest completed
    /// epoch's descriptor while waiting for the next topology.
    current_info: EpochInfo,
    epoch: Option<EpochState>,
    mode: ConsensusMode,
    /// Verified-later messages for epochs beyond the current one.
    future_queue: BTreeMap<EpochNumber, Vec<PbftMessage>>,
    /// Topology that arrived early, applied once its predecessor completes.
    pending_topology: Option<(EpochNumber, Arc<OrderingTopology>)>,
    /// Epoch whose `startEpoch` write is in flight.
    pending_install: Option<(EpochInfo, Arc<OrderingTopology>)>,
    catchup: CatchupDetector,
    in_progress: EpochInProgress,
    onboarding: Option<OnboardingSnapshot>,
    now: Duration,
}

impl ConsensusState {
    /// Create the module from the recovered store snapshot and the topology
    /// currently known to this node.
    pub fn new(
        me: PeerId,
        key: KeyPair,
        topology: Arc<OrderingTopology>,
        config: BftConfig,
        recovered: RecoveredState,
    ) -> Self {
        let latest_completed = recovered
            .latest_completed
            .unwrap_or_else(CompletedEpoch::genesis);
        let current_info = recovered.current_epoch.unwrap_or(latest_completed.info);
        Self {
            key,
            config,
            membership: Membership::new(me, topology),
            latest_completed,
            current_info,
            epoch: None,
            mode: ConsensusMode::Live,
            future_queue: BTreeMap::new(),
            pending_topology: None,
            pending_install: None,
            catchup: CatchupDetector::default(),
            in_progress: recovered.in_progress,
            onboarding: recovered.onboarding,
            now: Duration::ZERO,
        }
    }

    /// Inject the current time.
    pub fn set_time(&mut self, now: Duration) {
        self.now = now;
        if let Some(epoch) = &mut self.epoch {
            epoch.set_time(now);
        }
    }

    /// Current operating mode.
    pub fn mode(&self) -> ConsensusMode {
        self.mode
    }

    /// Number of the epoch currently in progress (or just completed).
    pub fn current_epoch(&self) -> EpochNumber {
        self.current_info.number
    }

    /// The newest completed epoch.
    pub fn latest_completed(&self) -> &CompletedEpoch {
        &self.latest_completed
    }

    /// Membership under the current topology.
    pub fn membership(&self) -> &Membership {
        &self.membership
    }

    /// Whether this node already reported `metadata` to the output sink
    /// from live consensus. Guards against a state-transferred copy of the
    /// same slot reaching the sink a second time.
    pub fn already_ordered(&self, metadata: &BlockMetadata) -> bool {
        metadata.epoch == self.current_info.number
            && self
                .epoch
                .as_ref()
                .is_some_and(|e| e.is_block_completed(metadata.block_number))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Lifecycle
    // ═══════════════════════════════════════════════════════════════════════

    /// Begin operating, per the recovered snapshot.
    pub fn on_start(&mut self) -> Vec<Action> {
        // A snapshot plus a non-trivial topology at genesis means this node
        // is onboarding into an existing network: fetch history first.
        if let Some(snapshot) = self.onboarding.take() {
            if self.latest_completed.info.number == EpochNumber::GENESIS
                && !self.membership.others().is_empty()
            {
                info!(from = %snapshot.start_epoch, "onboarding, starting state transfer");
                self.mode = ConsensusMode::CatchingUp;
                return vec![Action::EnqueueInternal {
                    event: Event::StateTransferNeeded {
                        from_epoch: snapshot.start_epoch,
                        target_epoch: None,
                    },
                }];
            }
        }

        if self.current_info.number == EpochNumber::GENESIS {
            info!("fresh start, bootstrapping the first epoch");
            return vec![Action::EnqueueInternal {
                event: Event::NewEpochTopology {
                    epoch: EpochNumber::GENESIS.next(),
                    topology: self.membership.topology.clone(),
                },
            }];
        }

        if self.current_info.number > self.latest_completed.info.number {
            info!(epoch = %self.current_info.number, "resuming an epoch in progress");
            let mut epoch = EpochState::new(
                self.current_info,
                self.membership.clone(),
                self.key.clone(),
                self.config.clone(),
            );
            epoch.set_time(self.now);
            let snapshot = std::mem::take(&mut self.in_progress);
            // Restore first so already-decided slots neither re-arm timers
            // nor request fresh proposals.
            let mut actions = epoch.restore(&snapshot);
            actions.extend(epoch.start());
            self.epoch = Some(epoch);
            // The restart may already hold the full epoch.
            actions.extend(self.check_epoch_completion());
            return actions;
        }

        info!(epoch = %self.latest_completed.info.number, "epoch complete, awaiting next topology");
        Vec::new()
    }

    /// The output module announced the topology for epoch `epoch`.
    pub fn on_new_epoch_topology(
        &mut self,
        epoch: EpochNumber,
        topology: Arc<OrderingTopology>,
    ) -> Vec<Action> {
        let latest = self.latest_completed.info.number;
        let current = self.current_info.number;

        // Never start a live epoch while transferring; the announcement is
        // replayed once the transfer settles.
        if self.mode == ConsensusMode::CatchingUp {
            if epoch > latest {
                debug!(%epoch, "remembering topology announced during catch-up");
                self.pending_topology = Some((epoch, topology));
            }
            return Vec::new();
        }

        if latest.next() == epoch && current == latest {
            let info = self
                .latest_completed
                .info
                .next(self.config.epoch_length, topology.activation_time());
            info!(%epoch, start = %info.start_block, length = info.length, "starting new epoch");
            self.pending_install = Some((info, topology));
            return vec![Action::PersistEpochStart { info }];
        }
        if latest.next() == epoch && current == epoch {
            // Duplicate announcement, e.g. the output module replaying after
            // a restart.
            debug!(%epoch, "ignoring duplicate topology");
            return Vec::new();
        }
        if epoch > latest.next() {
            debug!(%epoch, %latest, "remembering topology for a later epoch");
            self.pending_topology = Some((epoch, topology));
            return Vec::new();
        }
        if epoch <= latest {
            debug!(%epoch, %latest, "ignoring stale topology");
            return Vec::new();
        }

        error!(%epoch, %latest, %current, "topology does not fit any reachable state");
        vec![Action::Halt {
            reason: format!(
                "unrecoverable epoch state: topology for {epoch}, latest completed {latest}, current {current}"
            ),
        }]
    }

    /// `startEpoch` became durable; install the epoch and start ordering.
    pub fn on_new_epoch_stored(&mut self, info: EpochInfo) -> Vec<Action> {
        let Some((expected, topology)) = self.pending_install.take() else {
            warn!(epoch = %info.number, "NewEpochStored without a pending install");
            return Vec::new();
        };
        if expected != info {
            error!(expected = %expected.number, got = %info.number, "stored epoch differs from the pending one");
            return vec![Action::Halt {
                reason: "epoch store acknowledged an epoch that was never requested".into(),
            }];
        }

        self.membership = Membership::new(self.membership.me.clone(), topology);
        self.current_info = info;
        let mut epoch = EpochState::new(
            info,
            self.membership.clone(),
            self.key.clone(),
            self.config.clone(),
        );
        epoch.set_time(self.now);
        let mut actions = epoch.start();
        self.epoch = Some(epoch);
        actions.extend(self.drain_future_queue());
        actions
    }

    /// A segment decided a block.
    pub fn on_block_ordered(
        &mut self,
        block: OrderedBlock,
        certificate: CommitCertificate,
    ) -> Vec<Action> {
        let Some(epoch) = &mut self.epoch else {
            trace!(block = %block.metadata.block_number, "ordered block with no active epoch");
            return Vec::new();
        };
        if !epoch.record_ordered(&block, &certificate) {
            return Vec::new();
        }
        let mut actions = vec![Action::EmitOrderedBlock {
            block: OrderedBlockForOutput {
                block,
                provenance: BlockProvenance::FromConsensus,
            },
        }];
        actions.extend(self.check_epoch_completion());
        actions
    }

    fn check_epoch_completion(&mut self) -> Vec<Action> {
        let Some(epoch) = &self.epoch else {
            return Vec::new();
        };
        if !epoch.is_complete() {
            return Vec::new();
        }
        let commits = epoch.last_block_commits().cloned().unwrap_or_default();
        info!(epoch = %self.current_info.number, "all blocks ordered, persisting completion");
        vec![Action::PersistEpochCompletion {
            epoch: self.current_info.number,
            last_block_commits: commits,
        }]
    }

    /// `completeEpoch` became durable; retire the epoch state and apply a
    /// pending topology if one is now due.
    pub fn on_complete_epoch_stored(&mut self, epoch: EpochNumber) -> Vec<Action> {
        if epoch != self.current_info.number {
            warn!(%epoch, current = %self.current_info.number, "completion for an unexpected epoch");
            return Vec::new();
        }
        let commits = self
            .epoch
            .as_ref()
            .and_then(|e| e.last_block_commits().cloned())
            .unwrap_or_default();
        self.latest_completed = CompletedEpoch {
            info: self.current_info,
            last_block_commits: commits,
        };
        self.epoch = None;
        info!(%epoch, "epoch durable");

        if let Some((next, _)) = &self.pending_topology {
            if *next == epoch.next() {
                let (next, topology) = self.pending_topology.take().expect("just checked");
                debug!(epoch = %next, "applying remembered topology");
                return vec![Action::EnqueueInternal {
                    event: Event::NewEpochTopology {
                        epoch: next,
                        topology,
                    },
                }];
            }
        }
        Vec::new()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // PBFT message path
    // ═══════════════════════════════════════════════════════════════════════

    /// An unverified PBFT message arrived from the network. Resolve its
    /// signature checks and delegate them; the result returns through
    /// [`Self::on_pbft_verified`].
    pub fn on_pbft_received(&mut self, message: PbftMessage) -> Vec<Action> {
        let epoch = message.metadata().epoch;
        if epoch < self.current_info.number {
            trace!(%epoch, kind = message.type_name(), "stale message, skipping verification");
            return Vec::new();
        }
        if self.mode == ConsensusMode::CatchingUp && epoch <= self.current_info.number {
            return Vec::new();
        }
        // Future-epoch messages are checked under the current topology's
        // keys; the dispatch table revalidates them after the epoch turns.
        match signature_checks(&message, &self.membership.topology) {
            Ok(checks) => vec![Action::VerifyPbftMessage { message, checks }],
            Err(UnknownSigner(peer)) => {
                warn!(sender = %peer, %epoch, "message from outside the topology");
                vec![self.non_compliance(&message, NonComplianceKind::SenderNotInTopology)]
            }
        }
    }

    /// Verification of a PBFT message finished.
    pub fn on_pbft_verified(&mut self, message: PbftMessage, valid: bool) -> Vec<Action> {
        if !valid {
            warn!(
                sender = %message.sender(),
                epoch = %message.metadata().epoch,
                kind = message.type_name(),
                "dropping message with an invalid signature"
            );
            return vec![self.non_compliance(&message, NonComplianceKind::InvalidSignature)];
        }
        self.dispatch_verified(message)
    }

    fn dispatch_verified(&mut self, message: PbftMessage) -> Vec<Action> {
        let metadata = *message.metadata();
        let current = self.current_info.number;

        if metadata.epoch < current {
            trace!(epoch = %metadata.epoch, "stale verified message");
            return Vec::new();
        }

        if metadata.epoch > current {
            self.catchup.observe(message.sender(), metadata.epoch);
            self.future_queue
                .entry(metadata.epoch)
                .or_default()
                .push(message);
            if self.mode == ConsensusMode::Live {
                if let Some(target) = self.catchup.should_catch_up(
                    current,
                    self.membership.weak_quorum(),
                    self.config.catchup_epoch_threshold,
                ) {
                    info!(%current, %target, "too far behind, switching to catch-up");
                    self.mode = ConsensusMode::CatchingUp;
                    return vec![Action::EnqueueInternal {
                        event: Event::StateTransferNeeded {
                            from_epoch: self.latest_completed.info.number.next(),
                            target_epoch: Some(target),
                        },
                    }];
                }
            }
            return Vec::new();
        }

        if self.mode == ConsensusMode::CatchingUp {
            return Vec::new();
        }

        if !self.current_info.contains(metadata.block_number) {
            warn!(block = %metadata.block_number, epoch = %metadata.epoch, "block outside the epoch");
            return vec![self.non_compliance(&message, NonComplianceKind::BlockOutOfBounds)];
        }
        if !self.membership.topology.contains(message.sender()) {
            warn!(sender = %message.sender(), "sender not in the current topology");
            return vec![self.non_compliance(&message, NonComplianceKind::SenderNotInTopology)];
        }
        match &mut self.epoch {
            Some(epoch) => epoch.on_message(message),
            None => {
                trace!("no active epoch for a current-epoch message");
                Vec::new()
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Local collaborators
    // ═══════════════════════════════════════════════════════════════════════

    /// The availability layer produced a payload.
    pub fn on_proposal_created(
        &mut self,
        epoch: EpochNumber,
        block: BlockNumber,
        payload: OrderingPayload,
    ) -> Vec<Action> {
        if self.mode != ConsensusMode::Live || epoch != self.current_info.number {
            trace!(%epoch, %block, "dropping proposal outside the active epoch");
            return Vec::new();
        }
        match &mut self.epoch {
            Some(state) => state.on_proposal(block, payload),
            None => Vec::new(),
        }
    }

    /// A per-slot progress timer fired.
    pub fn on_timer(&mut self, id: TimerId) -> Vec<Action> {
        match id {
            TimerId::ViewChange(block) => {
                if self.mode != ConsensusMode::Live {
                    return Vec::new();
                }
                match &mut self.epoch {
                    Some(epoch) => epoch.on_timeout(block),
                    None => Vec::new(),
                }
            }
            TimerId::TransferRetry => Vec::new(),
        }
    }

    /// State transfer finished; adopt its result and go live again.
    pub fn on_state_transfer_completed(&mut self, last_completed: CompletedEpoch) -> Vec<Action> {
        self.mode = ConsensusMode::Live;
        if last_completed.info.number > self.latest_completed.info.number {
            info!(epoch = %last_completed.info.number, "caught up via state transfer");
            self.latest_completed = last_completed;
            self.current_info = self.latest_completed.info;
            self.epoch = None;
        }
        let next = self.latest_completed.info.number.next();
        self.future_queue.retain(|epoch, _| *epoch >= next);

        // Nothing to transfer at genesis: bootstrap as a fresh network.
        if self.latest_completed.info.number == EpochNumber::GENESIS {
            return vec![Action::EnqueueInternal {
                event: Event::NewEpochTopology {
                    epoch: EpochNumber::GENESIS.next(),
                    topology: self.membership.topology.clone(),
                },
            }];
        }

        // A topology that arrived while transferring may now be due.
        if self.pending_topology.as_ref().is_some_and(|(n, _)| *n == next) {
            let (next, topology) = self.pending_topology.take().expect("just checked");
            debug!(epoch = %next, "applying topology remembered during transfer");
            return vec![Action::EnqueueInternal {
                event: Event::NewEpochTopology {
                    epoch: next,
                    topology,
                },
            }];
        }
        Vec::new()
    }

    /// Operator probe: the active topology.
    pub fn on_query_topology(&self, request_id: RequestId) -> Vec<Action> {
        vec![Action::RespondOrderingTopology {
            request_id,
            epoch: self.current_info.number,
            peers: self.membership.topology.sorted_peers(),
        }]
    }

    /// A storage or collaborator failure. Storage is authoritative, so the
    /// node stops rather than diverge.
    pub fn on_async_exception(&mut self, operation: &'static str, error: String) -> Vec<Action> {
        error!(operation, %error, "asynchronous collaborator failed, halting");
        vec![Action::Halt {
            reason: format!("{operation}: {error}"),
        }]
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Helpers
    // ═══════════════════════════════════════════════════════════════════════

    /// Queued future-epoch messages for the (new) current epoch are replayed
    /// through verification: their signatures were only checked against the
    /// previous topology's keys. Older entries are dropped.
    fn drain_future_queue(&mut self) -> Vec<Action> {
        let current = self.current_info.number;
        let mut actions = Vec::new();
        let queue = std::mem::take(&mut self.future_queue);
        for (epoch, messages) in queue {
            if epoch < current {
                debug!(%epoch, count = messages.len(), "discarding surpassed queued messages");
            } else if epoch == current {
                debug!(%epoch, count = messages.len(), "replaying queued messages");
                actions.extend(messages.into_iter().map(|message| Action::EnqueueInternal {
                    event: Event::PbftMessageReceived { message },
                }));
            } else {
                self.future_queue.insert(epoch, messages);
            }
        }
        actions
    }

    fn non_compliance(&self, message: &PbftMessage, kind: NonComplianceKind) -> Action {
        Action::ReportNonCompliance {
            report: NonComplianceReport {
                sender: Some(message.sender().clone()),
                epoch: Some(message.metadata().epoch),
                view: Some(message.view()),
                block: Some(message.metadata().block_number),
                kind,
            },
        }
    }
}

impl std::fmt::Debug for ConsensusState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsensusState")
            .field("me", &self.membership.me)
            .field("mode", &self.mode)
            .field("current_epoch", &self.current_info.number)
            .field("latest_completed", &self.latest_completed.info.number)
            .field("future_queue", &self.future_queue.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sequent_types::test_utils::{test_key, test_peer, test_topology};
    use sequent_types::{BlockMetadata, Commit, Hash, Prepare, ViewNumber};

    const N: usize = 4;

    fn consensus(me: usize) -> ConsensusState {
        ConsensusState::new(
            test_peer(me),
            test_key(me),
            test_topology(N, Duration::ZERO),
            BftConfig {
                epoch_length: 2,
                ..BftConfig::default()
            },
            RecoveredState::default(),
        )
    }

    /// Drive a fresh node through bootstrap into epoch 1.
    fn bootstrapped(me: usize) -> ConsensusState {
        let mut state = consensus(me);
        state.on_start();
        let actions =
            state.on_new_epoch_topology(EpochNumber(1), test_topology(N, Duration::ZERO));
        let info = actions
            .iter()
            .find_map(|a| match a {
                Action::PersistEpochStart { info } => Some(*info),
                _ => None,
            })
            .expect("bootstrap persists the first epoch");
        state.on_new_epoch_stored(info);
        state
    }

    #[test]
    fn fresh_start_bootstraps_first_epoch() {
        let mut state = consensus(0);
        let actions = state.on_start();
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::EnqueueInternal {
                event: Event::NewEpochTopology { epoch, .. }
            } if *epoch == EpochNumber(1)
        )));
    }

    #[test]
    fn duplicate_topology_is_ignored() {
        let mut state = bootstrapped(0);
        assert_eq!(state.current_epoch(), EpochNumber(1));
        let actions =
            state.on_new_epoch_topology(EpochNumber(1), test_topology(N, Duration::ZERO));
        assert!(actions.is_empty());
    }

    #[test]
    fn stale_topology_is_ignored_and_gap_is_remembered() {
        let mut state = bootstrapped(0);
        assert!(state
            .on_new_epoch_topology(EpochNumber(0), test_topology(N, Duration::ZERO))
            .is_empty());
        // Epoch 3 cannot start until epoch 2 completes; it is remembered.
        assert!(state
            .on_new_epoch_topology(EpochNumber(3), test_topology(N, Duration::ZERO))
            .is_empty());
        assert!(state.pending_topology.is_some());
    }

    #[test]
    fn epoch_completion_emits_blocks_and_persists() {
        let mut state = bootstrapped(0);
        let certificate = CommitCertificate::new(vec![Commit::new(
            BlockMetadata::new(EpochNumber(1), BlockNumber(1)),
            ViewNumber(0),
            Hash::digest(b""),
            test_peer(1),
            0,
            &test_key(1),
        )]);

        let block0 = OrderedBlock {
            metadata: BlockMetadata::new(EpochNumber(1), BlockNumber(0)),
            payload: OrderingPayload::empty(),
            original_leader: test_peer(0),
            is_last_in_epoch: false,
        };
        let actions = state.on_block_ordered(block0.clone(), certificate.clone());
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::EmitOrderedBlock { .. })));
        assert!(!actions
            .iter()
            .any(|a| matches!(a, Action::PersistEpochCompletion { .. })));

        // Duplicate decisions are suppressed.
        assert!(state.on_block_ordered(block0, certificate.clone()).is_empty());

        let block1 = OrderedBlock {
            metadata: BlockMetadata::new(EpochNumber(1), BlockNumber(1)),
            payload: OrderingPayload::empty(),
            original_leader: test_peer(1),
            is_last_in_epoch: true,
        };
        let actions = state.on_block_ordered(block1, certificate);
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::PersistEpochCompletion { epoch, .. } if *epoch == EpochNumber(1))));

        let actions = state.on_complete_epoch_stored(EpochNumber(1));
        assert!(actions.is_empty());
        assert_eq!(state.latest_completed().info.number, EpochNumber(1));
    }

    #[test]
    fn out_of_bounds_and_foreign_senders_are_flagged() {
        let mut state = bootstrapped(1);
        let out_of_bounds = PbftMessage::Prepare(Prepare::new(
            BlockMetadata::new(EpochNumber(1), BlockNumber(7)),
            ViewNumber(0),
            Hash::digest(b"x"),
            test_peer(2),
            0,
            &test_key(2),
        ));
        let actions = state.on_pbft_verified(out_of_bounds, true);
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::ReportNonCompliance { report }
                if report.kind == NonComplianceKind::BlockOutOfBounds
        )));

        let foreign = PbftMessage::Prepare(Prepare::new(
            BlockMetadata::new(EpochNumber(1), BlockNumber(0)),
            ViewNumber(0),
            Hash::digest(b"x"),
            test_peer(9),
            0,
            &test_key(9),
        ));
        let actions = state.on_pbft_received(foreign);
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::ReportNonCompliance { report }
                if report.kind == NonComplianceKind::SenderNotInTopology
        )));
    }

    #[test]
    fn invalid_signature_is_flagged() {
        let mut state = bootstrapped(1);
        let message = PbftMessage::Prepare(Prepare::new(
            BlockMetadata::new(EpochNumber(1), BlockNumber(0)),
            ViewNumber(0),
            Hash::digest(b"x"),
            test_peer(2),
            0,
            &test_key(2),
        ));
        let actions = state.on_pbft_verified(message, false);
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::ReportNonCompliance { report }
                if report.kind == NonComplianceKind::InvalidSignature
        )));
    }

    #[test]
    fn future_messages_queue_and_trigger_catch_up() {
        let mut state = bootstrapped(3);
        assert_eq!(state.current_epoch(), EpochNumber(1));

        // Weak quorum is 2; one peer far ahead is not enough.
        let from_p0 = PbftMessage::Prepare(Prepare::new(
            BlockMetadata::new(EpochNumber(6), BlockNumber(40)),
            ViewNumber(0),
            Hash::digest(b"x"),
            test_peer(0),
            0,
            &test_key(0),
        ));
        assert!(state.on_pbft_verified(from_p0, true).is_empty());
        assert_eq!(state.mode(), ConsensusMode::Live);

        let from_p1 = PbftMessage::Prepare(Prepare::new(
            BlockMetadata::new(EpochNumber(6), BlockNumber(41)),
            ViewNumber(0),
            Hash::digest(b"x"),
            test_peer(1),
            0,
            &test_key(1),
        ));
        let actions = state.on_pbft_verified(from_p1, true);
        assert_eq!(state.mode(), ConsensusMode::CatchingUp);
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::EnqueueInternal {
                event: Event::StateTransferNeeded { from_epoch, target_epoch }
            } if *from_epoch == EpochNumber(1) && *target_epoch == Some(EpochNumber(6))
        )));

        // The queue survives the mode switch.
        assert_eq!(state.future_queue.len(), 1);
    }

    #[test]
    fn onboarding_node_transfers_before_participating() {
        // A joining node holds a snapshot and an existing topology it is
        // not yet part of.
        let mut state = ConsensusState::new(
            test_peer(7),
            test_key(7),
            test_topology(N, Duration::ZERO),
            BftConfig::default(),
            RecoveredState {
                onboarding: Some(OnboardingSnapshot {
                    start_epoch: EpochNumber(3),
                }),
                ..RecoveredState::default()
            },
        );
        let actions = state.on_start();
        assert_eq!(state.mode(), ConsensusMode::CatchingUp);
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::EnqueueInternal {
                event: Event::StateTransferNeeded {
                    from_epoch,
                    target_epoch: None,
                }
            } if *from_epoch == EpochNumber(3)
        )));
    }

    #[test]
    fn storage_failure_halts_the_node() {
        let mut state = bootstrapped(0);
        let actions = state.on_async_exception("startEpoch", "disk gone".into());
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::Halt { reason } if reason.contains("startEpoch"))));
    }

    #[test]
    fn transfer_completion_resumes_live_mode() {
        let mut state = bootstrapped(3);
        state.mode = ConsensusMode::CatchingUp;
        let caught_up = CompletedEpoch {
            info: EpochInfo {
                number: EpochNumber(5),
                start_block: BlockNumber(8),
                length: 2,
                topology_activation_time: Duration::ZERO,
            },
            last_block_commits: vec![],
        };
        let actions = state.on_state_transfer_completed(caught_up);
        assert!(actions.is_empty());
        assert_eq!(state.mode(), ConsensusMode::Live);
        assert_eq!(state.latest_completed().info.number, EpochNumber(5));
        assert_eq!(state.current_epoch(), EpochNumber(5));
    }
}
