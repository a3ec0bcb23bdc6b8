//! PBFT for one leader's slice of an epoch.
//!
//! A segment runs an independent PBFT instance per block slot. Slots move
//! `Idle → PrePrepared → Prepared → Committed → Completed`; a view change
//! can reset any non-completed slot into a higher view with a rotated
//! leader.
//!
//! All handlers assume the message already passed signature verification and
//! the consensus-level topology and bounds checks.

use crate::config::BftConfig;
use sequent_core::{
    Action, Event, NonComplianceKind, NonComplianceReport, OutboundMessage, TimerId,
};
use sequent_types::{
    BlockMetadata, BlockNumber, Commit, CommitCertificate, EpochInfo, KeyPair, Membership, NewView,
    OrderedBlock, OrderingPayload, PbftMessage, PeerId, PrePrepare, Prepare, PreparedCertificate,
    Segment, ViewChange, ViewNumber,
};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Protocol phase of a single slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum SlotPhase {
    /// No accepted pre-prepare in the current view.
    Idle,
    /// Pre-prepare accepted, collecting prepares.
    PrePrepared,
    /// Prepared quorum reached, collecting commits.
    Prepared,
    /// Commit quorum reached, certificate formed.
    Committed,
    /// Decision reported. Terminal.
    Completed,
}

/// Per-slot PBFT state. Message buckets are keyed by view so that messages
/// for a view this node has not yet entered are retained rather than lost.
#[derive(Debug)]
struct SlotState {
    view: ViewNumber,
    phase: SlotPhase,
    /// Accepted pre-prepare per view.
    pre_prepares: BTreeMap<ViewNumber, PrePrepare>,
    /// Prepares per view, first message per sender wins.
    prepares: BTreeMap<ViewNumber, BTreeMap<PeerId, Prepare>>,
    /// Commits per view, first message per sender wins.
    commits: BTreeMap<ViewNumber, BTreeMap<PeerId, Commit>>,
    /// View-change votes per target view.
    view_changes: BTreeMap<ViewNumber, BTreeMap<PeerId, ViewChange>>,
    /// Highest prepared certificate this node holds for the slot.
    prepared_cert: Option<PreparedCertificate>,
    /// Target view of an in-progress view change, if any.
    pending_view: Option<ViewNumber>,
    /// Target views this node already announced a new-view for (as leader).
    new_view_sent: BTreeSet<ViewNumber>,
    /// Consecutive view changes on this slot, drives timeout doubling.
    timeout_changes: u32,
}

impl SlotState {
    fn new() -> Self {
        Self {
            view: ViewNumber::INITIAL,
            phase: SlotPhase::Idle,
            pre_prepares: BTreeMap::new(),
            prepares: BTreeMap::new(),
            commits: BTreeMap::new(),
            view_changes: BTreeMap::new(),
            prepared_cert: None,
            pending_view: None,
            new_view_sent: BTreeSet::new(),
            timeout_changes: 0,
        }
    }

    fn is_completed(&self) -> bool {
        self.phase == SlotPhase::Completed
    }
}

/// PBFT instance for one segment of an epoch.
pub struct SegmentState {
    membership: Membership,
    key: KeyPair,
    config: BftConfig,
    epoch_info: EpochInfo,
    segment: Segment,
    slots: BTreeMap<BlockNumber, SlotState>,
    now: Duration,
}

impl SegmentState {
    /// Create the segment's slot instances. Call [`Self::start`] to arm
    /// timers and, on the leader, request proposals.
    pub fn new(
        membership: Membership,
        key: KeyPair,
        config: BftConfig,
        epoch_info: EpochInfo,
        segment: Segment,
    ) -> Self {
        let slots = segment
            .slots
            .iter()
            .map(|b| (*b, SlotState::new()))
            .collect();
        Self {
            membership,
            key,
            config,
            epoch_info,
            segment,
            slots,
            now: Duration::ZERO,
        }
    }

    /// Inject the current time.
    pub fn set_time(&mut self, now: Duration) {
        self.now = now;
    }

    /// The segment's view-0 leader.
    pub fn original_leader(&self) -> &PeerId {
        &self.segment.original_leader
    }

    /// Whether `block` belongs to this segment.
    pub fn owns(&self, block: BlockNumber) -> bool {
        self.slots.contains_key(&block)
    }

    /// Whether every slot has been reported.
    pub fn is_complete(&self) -> bool {
        self.slots.values().all(SlotState::is_completed)
    }

    /// Arm per-slot timers; as original leader, request payloads for every
    /// open slot.
    pub fn start(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        let am_leader = self.segment.original_leader == self.membership.me;
        for (block, slot) in &self.slots {
            if slot.is_completed() {
                continue;
            }
            actions.push(Action::SetTimer {
                id: TimerId::ViewChange(*block),
                duration: self.config.timeout_after(slot.timeout_changes),
            });
            if am_leader {
                actions.push(Action::RequestProposal {
                    epoch: self.epoch_info.number,
                    block: *block,
                });
            }
        }
        actions
    }

    /// Rebuild slot state after a restart: completed blocks are terminal,
    /// retained messages are re-applied. Own messages are installed first so
    /// the node can never contradict what it signed before the crash.
    pub fn restore(
        &mut self,
        completed: &[(OrderedBlock, CommitCertificate)],
        messages: &[PbftMessage],
    ) -> Vec<Action> {
        for (block, _) in completed {
            if let Some(slot) = self.slots.get_mut(&block.metadata.block_number) {
                slot.phase = SlotPhase::Completed;
            }
        }

        let me = self.membership.me.clone();
        let (own, others): (Vec<_>, Vec<_>) = messages
            .iter()
            .filter(|m| self.owns(m.metadata().block_number))
            .cloned()
            .partition(|m| *m.sender() == me);

        for message in own {
            self.install_own(message);
        }

        let mut actions = Vec::new();
        for message in others {
            actions.extend(self.on_message(message));
        }
        actions
    }

    fn install_own(&mut self, message: PbftMessage) {
        let block = message.metadata().block_number;
        let Some(slot) = self.slots.get_mut(&block) else {
            return;
        };
        match message {
            PbftMessage::PrePrepare(pp) => {
                slot.pre_prepares.entry(pp.view).or_insert(pp);
            }
            PbftMessage::Prepare(p) => {
                slot.prepares
                    .entry(p.view)
                    .or_default()
                    .entry(p.sender.clone())
                    .or_insert(p);
            }
            PbftMessage::Commit(c) => {
                slot.commits
                    .entry(c.view)
                    .or_default()
                    .entry(c.sender.clone())
                    .or_insert(c);
            }
            PbftMessage::ViewChange(vc) => {
                slot.pending_view = Some(vc.new_view.max(slot.pending_view.unwrap_or(vc.new_view)));
                slot.view_changes
                    .entry(vc.new_view)
                    .or_default()
                    .entry(vc.sender.clone())
                    .or_insert(vc);
            }
            PbftMessage::NewView(nv) => {
                slot.new_view_sent.insert(nv.new_view);
            }
        }
    }

    /// The availability layer produced a payload for `block`.
    pub fn on_proposal(&mut self, block: BlockNumber, payload: OrderingPayload) -> Vec<Action> {
        let Some(slot) = self.slots.get(&block) else {
            return Vec::new();
        };
        let view = slot.view;
        if slot.is_completed()
            || slot.pending_view.is_some()
            || self.leader_for_view(view) != self.membership.me
            || slot.pre_prepares.contains_key(&view)
        {
            // The slot moved on while the proposal was in flight.
            trace!(%block, "dropping proposal for a slot no longer awaiting one");
            return Vec::new();
        }

        let pre_prepare = PrePrepare::new(
            BlockMetadata::new(self.epoch_info.number, block),
            view,
            payload,
            self.membership.me.clone(),
            self.timestamp(),
            &self.key,
        );
        debug!(%block, %view, digest = ?pre_prepare.digest, "proposing");

        let mut actions = vec![
            Action::PersistPbftMessage {
                message: PbftMessage::PrePrepare(pre_prepare.clone()),
            },
            Action::Broadcast {
                message: OutboundMessage::Pbft(PbftMessage::PrePrepare(pre_prepare.clone())),
            },
        ];
        if let Some(slot) = self.slots.get_mut(&block) {
            slot.pre_prepares.insert(view, pre_prepare);
        }
        actions.extend(self.try_advance(block));
        actions
    }

    /// Progress timeout fired for `block`: vote to change the view.
    pub fn on_timeout(&mut self, block: BlockNumber) -> Vec<Action> {
        let (target, timeout, prepared) = {
            let Some(slot) = self.slots.get_mut(&block) else {
                return Vec::new();
            };
            if slot.is_completed() {
                return Vec::new();
            }
            let target = match slot.pending_view {
                Some(pending) => pending.next(),
                None => slot.view.next(),
            };
            slot.pending_view = Some(target);
            slot.timeout_changes += 1;
            let timeout = self.config.timeout_after(slot.timeout_changes);
            info!(%block, view = %slot.view, %target, ?timeout, "slot timed out, voting for view change");
            (target, timeout, slot.prepared_cert.clone())
        };

        let vote = ViewChange::new(
            BlockMetadata::new(self.epoch_info.number, block),
            target,
            prepared,
            self.membership.me.clone(),
            self.timestamp(),
            &self.key,
        );
        self.slots
            .get_mut(&block)
            .expect("present")
            .view_changes
            .entry(target)
            .or_default()
            .insert(vote.sender.clone(), vote.clone());

        let mut actions = vec![
            Action::SetTimer {
                id: TimerId::ViewChange(block),
                duration: timeout,
            },
            Action::PersistPbftMessage {
                message: PbftMessage::ViewChange(vote.clone()),
            },
            Action::Broadcast {
                message: OutboundMessage::Pbft(PbftMessage::ViewChange(vote)),
            },
        ];
        actions.extend(self.try_complete_view_change(block, target));
        actions
    }

    /// Apply a verified PBFT message addressed to this segment.
    pub fn on_message(&mut self, message: PbftMessage) -> Vec<Action> {
        let block = message.metadata().block_number;
        let Some(slot) = self.slots.get(&block) else {
            return Vec::new();
        };
        if slot.is_completed() {
            trace!(%block, kind = message.type_name(), "slot completed, ignoring");
            return Vec::new();
        }
        match message {
            PbftMessage::PrePrepare(pp) => self.on_pre_prepare(pp),
            PbftMessage::Prepare(p) => self.on_prepare(p),
            PbftMessage::Commit(c) => self.on_commit(c),
            PbftMessage::ViewChange(vc) => self.on_view_change(vc),
            PbftMessage::NewView(nv) => self.on_new_view(nv),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Happy path
    // ═══════════════════════════════════════════════════════════════════════

    fn on_pre_prepare(&mut self, pp: PrePrepare) -> Vec<Action> {
        let block = pp.metadata.block_number;
        let expected_leader = self.leader_for_view(pp.view);
        let slot = self.slots.get_mut(&block).expect("checked by caller");

        if pp.view < slot.view {
            return Vec::new();
        }
        if pp.sender != expected_leader {
            warn!(%block, view = %pp.view, sender = %pp.sender, "pre-prepare from non-leader");
            return vec![self.non_compliance(&pp.metadata, pp.view, &pp.sender)];
        }
        if pp.digest != pp.payload.digest() {
            warn!(%block, sender = %pp.sender, "pre-prepare digest does not match payload");
            return vec![self.non_compliance(&pp.metadata, pp.view, &pp.sender)];
        }
        match slot.pre_prepares.get(&pp.view) {
            Some(existing) if existing.digest == pp.digest => return Vec::new(),
            Some(_) => {
                // Two distinct proposals for the same (block, view).
                warn!(%block, view = %pp.view, sender = %pp.sender, "conflicting pre-prepare");
                return vec![self.non_compliance(&pp.metadata, pp.view, &pp.sender)];
            }
            None => {}
        }

        slot.pre_prepares.insert(pp.view, pp);
        self.try_advance(block)
    }

    fn on_prepare(&mut self, prepare: Prepare) -> Vec<Action> {
        let block = prepare.metadata.block_number;
        let leader = self.leader_for_view(prepare.view);
        let slot = self.slots.get_mut(&block).expect("checked by caller");
        if prepare.view < slot.view || prepare.sender == leader {
            // The per-view leader speaks through its pre-prepare.
            return Vec::new();
        }
        slot.prepares
            .entry(prepare.view)
            .or_default()
            .entry(prepare.sender.clone())
            .or_insert(prepare);
        self.try_advance(block)
    }

    fn on_commit(&mut self, commit: Commit) -> Vec<Action> {
        let block = commit.metadata.block_number;
        let slot = self.slots.get_mut(&block).expect("checked by caller");
        if commit.view < slot.view {
            return Vec::new();
        }
        slot.commits
            .entry(commit.view)
            .or_default()
            .entry(commit.sender.clone())
            .or_insert(commit);
        self.try_advance(block)
    }

    /// Drive the slot forward as far as the collected messages justify.
    fn try_advance(&mut self, block: BlockNumber) -> Vec<Action> {
        let mut actions = Vec::new();
        let me = self.membership.me.clone();
        let f = self.membership.f();
        let quorum = self.membership.quorum();

        let Some(slot) = self.slots.get(&block) else {
            return actions;
        };
        if slot.is_completed() || slot.pending_view.is_some() {
            return actions;
        }
        let view = slot.view;
        let Some(pp) = slot.pre_prepares.get(&view).cloned() else {
            return actions;
        };
        let leader = self.leader_for_view(view);

        // Accepting the pre-prepare: non-leaders answer with a prepare.
        let have_own_prepare = slot
            .prepares
            .get(&view)
            .is_some_and(|m| m.contains_key(&me));
        if slot.phase == SlotPhase::Idle {
            self.slots.get_mut(&block).expect("present").phase = SlotPhase::PrePrepared;
            if me != leader && !have_own_prepare {
                let prepare = Prepare::new(
                    pp.metadata,
                    view,
                    pp.digest,
                    me.clone(),
                    self.timestamp(),
                    &self.key,
                );
                actions.push(Action::PersistPbftMessage {
                    message: PbftMessage::Prepare(prepare.clone()),
                });
                actions.push(Action::Broadcast {
                    message: OutboundMessage::Pbft(PbftMessage::Prepare(prepare.clone())),
                });
                self.slots
                    .get_mut(&block)
                    .expect("present")
                    .prepares
                    .entry(view)
                    .or_default()
                    .insert(me.clone(), prepare);
            }
        }

        // Prepared: the pre-prepare plus 2f matching prepares from peers
        // other than the leader (own included when this node is not leading).
        let slot = self.slots.get(&block).expect("present");
        let matching_prepares: Vec<Prepare> = slot
            .prepares
            .get(&view)
            .map(|m| {
                m.values()
                    .filter(|p| p.digest == pp.digest)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        if slot.phase == SlotPhase::PrePrepared && matching_prepares.len() >= 2 * f {
            info!(%block, %view, "prepared");
            let prepared = PreparedCertificate {
                pre_prepare: pp.clone(),
                prepares: matching_prepares,
            };
            let commit = Commit::new(
                pp.metadata,
                view,
                pp.digest,
                me.clone(),
                self.timestamp(),
                &self.key,
            );
            let slot = self.slots.get_mut(&block).expect("present");
            slot.phase = SlotPhase::Prepared;
            slot.prepared_cert = Some(prepared);
            let already_committed = slot
                .commits
                .get(&view)
                .is_some_and(|m| m.contains_key(&me));
            if !already_committed {
                slot.commits
                    .entry(view)
                    .or_default()
                    .insert(me.clone(), commit.clone());
                actions.push(Action::PersistPbftMessage {
                    message: PbftMessage::Commit(commit.clone()),
                });
                actions.push(Action::Broadcast {
                    message: OutboundMessage::Pbft(PbftMessage::Commit(commit)),
                });
            }
        }

        // Committed: 2f + 1 matching commits from distinct peers.
        let slot = self.slots.get(&block).expect("present");
        let matching_commits: Vec<Commit> = slot
            .commits
            .get(&view)
            .map(|m| {
                m.values()
                    .filter(|c| c.digest == pp.digest)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        if slot.phase == SlotPhase::Prepared && matching_commits.len() >= quorum {
            let certificate = CommitCertificate::new(matching_commits);
            let ordered = OrderedBlock {
                metadata: pp.metadata,
                payload: pp.payload.clone(),
                original_leader: self.segment.original_leader.clone(),
                is_last_in_epoch: self.epoch_info.last_block() == Some(block),
            };
            info!(%block, %view, "committed, reporting ordered block");
            let slot = self.slots.get_mut(&block).expect("present");
            slot.phase = SlotPhase::Completed;
            actions.push(Action::CancelTimer {
                id: TimerId::ViewChange(block),
            });
            actions.push(Action::PersistOrderedBlock {
                block: ordered.clone(),
                certificate: certificate.clone(),
            });
            actions.push(Action::EnqueueInternal {
                event: Event::BlockOrdered {
                    block: ordered,
                    certificate,
                },
            });
        }

        actions
    }

    // ═══════════════════════════════════════════════════════════════════════
    // View change
    // ═══════════════════════════════════════════════════════════════════════

    fn on_view_change(&mut self, vc: ViewChange) -> Vec<Action> {
        let block = vc.metadata.block_number;
        let target = vc.new_view;
        {
            let slot = self.slots.get(&block).expect("checked by caller");
            if target <= slot.view {
                return Vec::new();
            }
        }
        if let Some(prepared) = &vc.prepared {
            if !self.prepared_certificate_is_valid(prepared, &vc.metadata) {
                warn!(%block, sender = %vc.sender, "view change carries an invalid prepared certificate");
                return vec![self.non_compliance(&vc.metadata, target, &vc.sender)];
            }
        }

        let slot = self.slots.get_mut(&block).expect("checked by caller");
        slot.view_changes
            .entry(target)
            .or_default()
            .entry(vc.sender.clone())
            .or_insert(vc);
        self.try_complete_view_change(block, target)
    }

    fn try_complete_view_change(&mut self, block: BlockNumber, target: ViewNumber) -> Vec<Action> {
        let quorum = self.membership.quorum();
        let me = self.membership.me.clone();
        let leader = self.leader_for_view(target);

        let Some(slot) = self.slots.get(&block) else {
            return Vec::new();
        };
        let votes = match slot.view_changes.get(&target) {
            Some(votes) if votes.len() >= quorum => votes.clone(),
            _ => return Vec::new(),
        };
        if leader != me || slot.new_view_sent.contains(&target) {
            return Vec::new();
        }

        // Derive the new proposal from the highest prepared certificate in
        // the vote set; with nothing prepared, the slot is filled with an
        // empty block to keep the segment moving.
        let highest = votes
            .values()
            .filter_map(|v| v.prepared.as_ref())
            .max_by_key(|cert| cert.pre_prepare.view);
        let metadata = BlockMetadata::new(self.epoch_info.number, block);
        let payload = match highest {
            Some(cert) => cert.pre_prepare.payload.clone(),
            None => OrderingPayload::empty(),
        };
        let pre_prepare = PrePrepare::new(
            metadata,
            target,
            payload,
            me.clone(),
            self.timestamp(),
            &self.key,
        );
        let new_view = NewView::new(
            metadata,
            target,
            votes.values().cloned().collect(),
            pre_prepare,
            me.clone(),
            self.timestamp(),
            &self.key,
        );
        info!(%block, %target, "view change quorum reached, announcing new view");

        let slot = self.slots.get_mut(&block).expect("present");
        slot.new_view_sent.insert(target);

        let mut actions = vec![
            Action::PersistPbftMessage {
                message: PbftMessage::NewView(new_view.clone()),
            },
            Action::Broadcast {
                message: OutboundMessage::Pbft(PbftMessage::NewView(new_view.clone())),
            },
        ];
        actions.extend(self.enter_view(block, target, new_view.pre_prepare));
        actions
    }

    fn on_new_view(&mut self, nv: NewView) -> Vec<Action> {
        let block = nv.metadata.block_number;
        let target = nv.new_view;
        {
            let slot = self.slots.get(&block).expect("checked by caller");
            if target <= slot.view {
                return Vec::new();
            }
        }
        if nv.sender != self.leader_for_view(target) {
            warn!(%block, %target, sender = %nv.sender, "new-view from wrong leader");
            return vec![self.non_compliance(&nv.metadata, target, &nv.sender)];
        }
        if !self.new_view_is_justified(&nv) {
            warn!(%block, %target, sender = %nv.sender, "new-view justification invalid");
            return vec![self.non_compliance(&nv.metadata, target, &nv.sender)];
        }
        self.enter_view(block, target, nv.pre_prepare)
    }

    /// A new-view is justified by a quorum of valid view-change votes and a
    /// pre-prepare consistent with the highest prepared certificate therein.
    fn new_view_is_justified(&self, nv: &NewView) -> bool {
        let mut senders = BTreeSet::new();
        for vc in &nv.view_changes {
            if vc.metadata != nv.metadata
                || vc.new_view != nv.new_view
                || !self.membership.topology.contains(&vc.sender)
                || !senders.insert(vc.sender.clone())
            {
                return false;
            }
            if let Some(prepared) = &vc.prepared {
                if !self.prepared_certificate_is_valid(prepared, &vc.metadata) {
                    return false;
                }
            }
        }
        if senders.len() < self.membership.quorum() {
            return false;
        }

        if nv.pre_prepare.metadata != nv.metadata
            || nv.pre_prepare.view != nv.new_view
            || nv.pre_prepare.digest != nv.pre_prepare.payload.digest()
        {
            return false;
        }
        let highest = nv
            .view_changes
            .iter()
            .filter_map(|v| v.prepared.as_ref())
            .max_by_key(|cert| cert.pre_prepare.view);
        match highest {
            Some(cert) => nv.pre_prepare.digest == cert.pre_prepare.digest,
            None => nv.pre_prepare.payload.0.is_empty(),
        }
    }

    /// Structural validity of a prepared certificate: an in-segment
    /// pre-prepare plus `2f` matching prepares from distinct non-leader
    /// topology peers.
    fn prepared_certificate_is_valid(
        &self,
        prepared: &PreparedCertificate,
        metadata: &BlockMetadata,
    ) -> bool {
        let pp = &prepared.pre_prepare;
        if pp.metadata != *metadata
            || pp.digest != pp.payload.digest()
            || pp.sender != self.leader_for_view(pp.view)
        {
            return false;
        }
        let mut senders = BTreeSet::new();
        for prepare in &prepared.prepares {
            if prepare.metadata != *metadata
                || prepare.view != pp.view
                || prepare.digest != pp.digest
                || prepare.sender == pp.sender
                || !self.membership.topology.contains(&prepare.sender)
                || !senders.insert(prepare.sender.clone())
            {
                return false;
            }
        }
        senders.len() >= 2 * self.membership.f()
    }

    /// Move the slot into `target`, seeded with the new leader's
    /// pre-prepare, and resume the normal protocol there.
    fn enter_view(
        &mut self,
        block: BlockNumber,
        target: ViewNumber,
        pre_prepare: PrePrepare,
    ) -> Vec<Action> {
        debug!(%block, %target, "entering view");
        {
            let slot = self.slots.get_mut(&block).expect("checked by caller");
            slot.view = target;
            slot.pending_view = None;
            slot.phase = SlotPhase::Idle;
            slot.pre_prepares.insert(target, pre_prepare);
        }
        let timeout = {
            let slot = self.slots.get(&block).expect("present");
            self.config.timeout_after(slot.timeout_changes)
        };
        let mut actions = vec![Action::SetTimer {
            id: TimerId::ViewChange(block),
            duration: timeout,
        }];
        actions.extend(self.try_advance(block));
        actions
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Leader rotation
    // ═══════════════════════════════════════════════════════════════════════

    /// Leader of this segment at `view`. View 0 belongs to the original
    /// leader; later views walk the topology in identity order from
    /// `view mod n`, skipping peers that already led this segment at a lower
    /// view (no skipping once everyone has led).
    pub fn leader_for_view(&self, view: ViewNumber) -> PeerId {
        if view == ViewNumber::INITIAL {
            return self.segment.original_leader.clone();
        }
        let peers = self.membership.topology.sorted_peers();
        let n = peers.len();
        let mut led: BTreeSet<PeerId> = BTreeSet::new();
        led.insert(self.segment.original_leader.clone());
        let mut leader = self.segment.original_leader.clone();
        for v in 1..=view.0 {
            if led.len() == n {
                led.clear();
            }
            let start = (v % n as u64) as usize;
            leader = (0..n)
                .map(|offset| &peers[(start + offset) % n])
                .find(|p| !led.contains(*p))
                .expect("a non-empty topology always has a candidate")
                .clone();
            led.insert(leader.clone());
        }
        leader
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Helpers
    // ═══════════════════════════════════════════════════════════════════════

    fn timestamp(&self) -> u64 {
        self.now.as_micros() as u64
    }

    fn non_compliance(
        &self,
        metadata: &BlockMetadata,
        view: ViewNumber,
        sender: &PeerId,
    ) -> Action {
        Action::ReportNonCompliance {
            report: NonComplianceReport {
                sender: Some(sender.clone()),
                epoch: Some(metadata.epoch),
                view: Some(view),
                block: Some(metadata.block_number),
                kind: NonComplianceKind::ProtocolViolation,
            },
        }
    }
}

impl std::fmt::Debug for SegmentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentState")
            .field("leader", &self.segment.original_leader)
            .field("epoch", &self.epoch_info.number)
            .field("slots", &self.slots.len())
            .field(
                "completed",
                &self.slots.values().filter(|s| s.is_completed()).count(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sequent_types::test_utils::{test_key, test_peer, test_topology};
    use sequent_types::{EpochNumber, Hash};

    const N: usize = 4;

    fn epoch_info() -> EpochInfo {
        EpochInfo {
            number: EpochNumber(1),
            start_block: BlockNumber(0),
            length: 4,
            topology_activation_time: Duration::ZERO,
        }
    }

    /// Segment of peer 0 (slot 0) as seen by node `me`.
    fn segment_for(me: usize) -> SegmentState {
        let topology = test_topology(N, Duration::ZERO);
        let membership = Membership::new(test_peer(me), topology);
        SegmentState::new(
            membership,
            test_key(me),
            BftConfig::default(),
            epoch_info(),
            Segment {
                original_leader: test_peer(0),
                slots: vec![BlockNumber(0)],
            },
        )
    }

    fn metadata() -> BlockMetadata {
        BlockMetadata::new(EpochNumber(1), BlockNumber(0))
    }

    fn pre_prepare_from_leader() -> PrePrepare {
        PrePrepare::new(
            metadata(),
            ViewNumber(0),
            OrderingPayload(b"batch".to_vec()),
            test_peer(0),
            0,
            &test_key(0),
        )
    }

    fn broadcasts(actions: &[Action]) -> Vec<&OutboundMessage> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Broadcast { message } => Some(message),
                _ => None,
            })
            .collect()
    }

    fn ordered_blocks(actions: &[Action]) -> Vec<&OrderedBlock> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::EnqueueInternal {
                    event: Event::BlockOrdered { block, .. },
                } => Some(block),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn leader_proposes_on_payload() {
        let mut segment = segment_for(0);
        let start = segment.start();
        assert!(start
            .iter()
            .any(|a| matches!(a, Action::RequestProposal { block, .. } if block.0 == 0)));

        let actions = segment.on_proposal(BlockNumber(0), OrderingPayload(b"batch".to_vec()));
        let sent = broadcasts(&actions);
        assert_eq!(sent.len(), 1);
        assert!(matches!(
            sent[0],
            OutboundMessage::Pbft(PbftMessage::PrePrepare(_))
        ));
    }

    #[test]
    fn follower_prepares_on_pre_prepare() {
        let mut segment = segment_for(1);
        segment.start();
        let actions = segment.on_message(PbftMessage::PrePrepare(pre_prepare_from_leader()));
        let sent = broadcasts(&actions);
        assert_eq!(sent.len(), 1);
        assert!(matches!(
            sent[0],
            OutboundMessage::Pbft(PbftMessage::Prepare(_))
        ));
    }

    #[test]
    fn slot_commits_with_quorum_and_reports_once() {
        let mut segment = segment_for(1);
        segment.start();
        let pp = pre_prepare_from_leader();
        segment.on_message(PbftMessage::PrePrepare(pp.clone()));

        // One more prepare (own + p2) reaches 2f = 2.
        let actions = segment.on_message(PbftMessage::Prepare(Prepare::new(
            metadata(),
            ViewNumber(0),
            pp.digest,
            test_peer(2),
            0,
            &test_key(2),
        )));
        assert!(broadcasts(&actions)
            .iter()
            .any(|m| matches!(m, OutboundMessage::Pbft(PbftMessage::Commit(_)))));

        // Own commit is already counted; two more reach 2f + 1 = 3.
        segment.on_message(PbftMessage::Commit(Commit::new(
            metadata(),
            ViewNumber(0),
            pp.digest,
            test_peer(0),
            0,
            &test_key(0),
        )));
        let actions = segment.on_message(PbftMessage::Commit(Commit::new(
            metadata(),
            ViewNumber(0),
            pp.digest,
            test_peer(2),
            0,
            &test_key(2),
        )));
        let ordered = ordered_blocks(&actions);
        assert_eq!(ordered.len(), 1);
        assert_eq!(ordered[0].payload, OrderingPayload(b"batch".to_vec()));
        assert!(segment.is_complete());

        // Duplicates after completion are ignored.
        let actions = segment.on_message(PbftMessage::Commit(Commit::new(
            metadata(),
            ViewNumber(0),
            pp.digest,
            test_peer(3),
            0,
            &test_key(3),
        )));
        assert!(actions.is_empty());
    }

    #[test]
    fn mismatched_commit_digests_do_not_count() {
        let mut segment = segment_for(1);
        segment.start();
        let pp = pre_prepare_from_leader();
        segment.on_message(PbftMessage::PrePrepare(pp.clone()));
        segment.on_message(PbftMessage::Prepare(Prepare::new(
            metadata(),
            ViewNumber(0),
            pp.digest,
            test_peer(2),
            0,
            &test_key(2),
        )));

        // A commit for a different digest never contributes to the quorum.
        let bad = Hash::digest(b"forged");
        let actions = segment.on_message(PbftMessage::Commit(Commit::new(
            metadata(),
            ViewNumber(0),
            bad,
            test_peer(3),
            0,
            &test_key(3),
        )));
        assert!(ordered_blocks(&actions).is_empty());
        let actions = segment.on_message(PbftMessage::Commit(Commit::new(
            metadata(),
            ViewNumber(0),
            pp.digest,
            test_peer(0),
            0,
            &test_key(0),
        )));
        assert!(ordered_blocks(&actions).is_empty());
        let actions = segment.on_message(PbftMessage::Commit(Commit::new(
            metadata(),
            ViewNumber(0),
            pp.digest,
            test_peer(2),
            0,
            &test_key(2),
        )));
        assert_eq!(ordered_blocks(&actions).len(), 1);
    }

    #[test]
    fn pre_prepare_from_non_leader_is_flagged() {
        let mut segment = segment_for(1);
        segment.start();
        let forged = PrePrepare::new(
            metadata(),
            ViewNumber(0),
            OrderingPayload(b"forged".to_vec()),
            test_peer(2),
            0,
            &test_key(2),
        );
        let actions = segment.on_message(PbftMessage::PrePrepare(forged));
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::ReportNonCompliance { report }
                if report.kind == NonComplianceKind::ProtocolViolation
        )));
    }

    #[test]
    fn conflicting_pre_prepare_is_flagged() {
        let mut segment = segment_for(1);
        segment.start();
        segment.on_message(PbftMessage::PrePrepare(pre_prepare_from_leader()));
        let conflicting = PrePrepare::new(
            metadata(),
            ViewNumber(0),
            OrderingPayload(b"other".to_vec()),
            test_peer(0),
            0,
            &test_key(0),
        );
        let actions = segment.on_message(PbftMessage::PrePrepare(conflicting));
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::ReportNonCompliance { .. })));
    }

    #[test]
    fn rotation_starts_at_original_leader_and_skips_prior_leaders() {
        let segment = segment_for(1);
        assert_eq!(segment.leader_for_view(ViewNumber(0)), test_peer(0));
        let v1 = segment.leader_for_view(ViewNumber(1));
        assert_ne!(v1, test_peer(0));
        let v2 = segment.leader_for_view(ViewNumber(2));
        assert_ne!(v2, test_peer(0));
        assert_ne!(v2, v1);
    }

    #[test]
    fn timeout_votes_view_change_and_quorum_elects_new_leader() {
        // Node 1 times out on slot 0 of the silent leader p0.
        let mut segment = segment_for(1);
        segment.start();
        let actions = segment.on_timeout(BlockNumber(0));
        let sent = broadcasts(&actions);
        assert!(matches!(
            sent[0],
            OutboundMessage::Pbft(PbftMessage::ViewChange(_))
        ));

        // The view-1 leader collects the quorum and announces the new view.
        let new_leader = segment.leader_for_view(ViewNumber(1));
        let leader_index: usize = new_leader.as_str().trim_start_matches("peer-").parse().unwrap();
        let mut leader_segment = segment_for(leader_index);
        leader_segment.start();
        leader_segment.on_timeout(BlockNumber(0));

        let mut new_view_actions = Vec::new();
        for i in (0..N).filter(|i| test_peer(*i) != new_leader) {
            let vote = ViewChange::new(
                metadata(),
                ViewNumber(1),
                None,
                test_peer(i),
                0,
                &test_key(i),
            );
            new_view_actions = leader_segment.on_message(PbftMessage::ViewChange(vote));
            if !new_view_actions.is_empty() {
                let has_new_view = broadcasts(&new_view_actions)
                    .iter()
                    .any(|m| matches!(m, OutboundMessage::Pbft(PbftMessage::NewView(_))));
                if has_new_view {
                    break;
                }
            }
        }
        let new_views: Vec<NewView> = broadcasts(&new_view_actions)
            .iter()
            .filter_map(|m| match m {
                OutboundMessage::Pbft(PbftMessage::NewView(nv)) => Some(nv.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(new_views.len(), 1);
        let nv = &new_views[0];
        assert_eq!(nv.new_view, ViewNumber(1));
        // Nothing was prepared, so the new view resumes with an empty block.
        assert!(nv.pre_prepare.payload.0.is_empty());

        // A follower accepts the new view and prepares in it.
        let mut follower = segment_for(if leader_index == 3 { 2 } else { 3 });
        follower.start();
        follower.on_timeout(BlockNumber(0));
        let actions = follower.on_message(PbftMessage::NewView(nv.clone()));
        assert!(broadcasts(&actions).iter().any(|m| matches!(
            m,
            OutboundMessage::Pbft(PbftMessage::Prepare(p)) if p.view == ViewNumber(1)
        )));
    }

    #[test]
    fn new_view_from_wrong_leader_is_flagged() {
        let mut segment = segment_for(1);
        segment.start();
        let wrong = if segment.leader_for_view(ViewNumber(1)) == test_peer(2) {
            3
        } else {
            2
        };
        let votes: Vec<ViewChange> = (0..3)
            .map(|i| ViewChange::new(metadata(), ViewNumber(1), None, test_peer(i), 0, &test_key(i)))
            .collect();
        let nv = NewView::new(
            metadata(),
            ViewNumber(1),
            votes,
            PrePrepare::new(
                metadata(),
                ViewNumber(1),
                OrderingPayload::empty(),
                test_peer(wrong),
                0,
                &test_key(wrong),
            ),
            test_peer(wrong),
            0,
            &test_key(wrong),
        );
        let actions = segment.on_message(PbftMessage::NewView(nv));
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::ReportNonCompliance { .. })));
    }

    #[test]
    fn restore_marks_completed_blocks_and_replays_messages() {
        let mut segment = segment_for(1);
        let ordered = OrderedBlock {
            metadata: metadata(),
            payload: OrderingPayload(b"batch".to_vec()),
            original_leader: test_peer(0),
            is_last_in_epoch: false,
        };
        let actions = segment.restore(
            &[(ordered, CommitCertificate::new(vec![]))],
            &[PbftMessage::PrePrepare(pre_prepare_from_leader())],
        );
        // Slot already decided: the replayed pre-prepare is ignored.
        assert!(broadcasts(&actions).is_empty());
        assert!(segment.is_complete());
    }
}
