//! Action types for the deterministic state machines.

use crate::{Event, NonComplianceReport, OutboundMessage, TimerId};
use sequent_types::{
    Commit, CommitCertificate, EpochInfo, EpochNumber, OrderedBlock, OrderedBlockForOutput,
    OrderingTopology, PbftMessage, PeerId, PublicKey, RequestId, Signature, StoredEpoch,
};
use std::sync::Arc;
use std::time::Duration;

/// One signature to verify: key, canonical message bytes, signature.
///
/// A PBFT message may require several (a new-view bundles the signed
/// view-change set and a pre-prepare); the whole batch must pass for the
/// message to count as verified.
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureCheck {
    /// Verification key, pre-resolved from the message's epoch topology.
    pub public_key: PublicKey,
    /// Canonical signing bytes.
    pub message: Vec<u8>,
    /// The claimed signature.
    pub signature: Signature,
}

impl SignatureCheck {
    /// Run the check. The runner calls this off the actor thread.
    pub fn verify(&self) -> bool {
        self.public_key.verify(&self.message, &self.signature)
    }
}

/// Actions the state machines want performed.
///
/// Actions are commands; the runner executes them and converts results of
/// delegated work back into [`Event`]s. This is the only way the machines
/// touch the network, storage, crypto workers, or the output sink.
#[derive(Debug, Clone)]
pub enum Action {
    // ═══════════════════════════════════════════════════════════════════════
    // Network
    // ═══════════════════════════════════════════════════════════════════════
    /// Send a message to one peer.
    Send {
        /// Destination peer.
        to: PeerId,
        /// The message.
        message: OutboundMessage,
    },

    /// Send a message to every peer of the active topology except self.
    Broadcast {
        /// The message.
        message: OutboundMessage,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Timers
    // ═══════════════════════════════════════════════════════════════════════
    /// Set (or reset) a timer.
    SetTimer {
        /// Timer identity; setting again reschedules.
        id: TimerId,
        /// Delay until it fires.
        duration: Duration,
    },

    /// Cancel a previously set timer.
    CancelTimer {
        /// Timer identity.
        id: TimerId,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Internal
    // ═══════════════════════════════════════════════════════════════════════
    /// Enqueue an internal event for immediate processing.
    EnqueueInternal {
        /// The event to feed back.
        event: Event,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Delegated work (async, returns a callback event)
    // ═══════════════════════════════════════════════════════════════════════
    /// Verify a PBFT message's signatures off the actor thread: the envelope
    /// plus every signed message nested inside it.
    ///
    /// Returns [`Event::PbftMessageVerified`].
    VerifyPbftMessage {
        /// The message to check.
        message: PbftMessage,
        /// All signatures that must pass, pre-resolved by the state machine.
        checks: Vec<SignatureCheck>,
    },

    /// Verify a transferred epoch's commit certificate off the actor thread.
    ///
    /// Returns [`Event::StoredEpochVerified`].
    VerifyStoredEpoch {
        /// The epoch whose certificate to check.
        epoch: Box<StoredEpoch>,
        /// The topology the certificate must verify under.
        topology: Arc<OrderingTopology>,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Storage
    // ═══════════════════════════════════════════════════════════════════════
    /// Persist that a new epoch has begun. Must be durable before
    /// [`Event::NewEpochStored`] is delivered.
    PersistEpochStart {
        /// The new epoch.
        info: EpochInfo,
    },

    /// Persist epoch completion with its last-block commits. Must be durable
    /// before [`Event::CompleteEpochStored`] is delivered.
    PersistEpochCompletion {
        /// The completed epoch.
        epoch: EpochNumber,
        /// Commits of the final block, anchoring the next epoch.
        last_block_commits: Vec<Commit>,
    },

    /// Persist a decided block with its certificate, for crash recovery and
    /// for serving state transfer.
    PersistOrderedBlock {
        /// The decided block.
        block: OrderedBlock,
        /// Its commit certificate.
        certificate: CommitCertificate,
    },

    /// Persist a PBFT message this node produced for an in-flight block, so
    /// a restart cannot equivocate.
    PersistPbftMessage {
        /// The message to retain.
        message: PbftMessage,
    },

    /// Persist an epoch obtained through state transfer. Must be durable
    /// before [`Event::TransferredEpochStored`] is delivered.
    PersistTransferredEpoch {
        /// The verified epoch.
        epoch: Box<StoredEpoch>,
    },

    /// Read every completed epoch at or after `from` to answer a transfer
    /// request. Returns [`Event::StoredEpochsLoaded`].
    FetchStoredEpochs {
        /// First epoch wanted.
        from: EpochNumber,
        /// The peer that asked, for callback correlation.
        requester: PeerId,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Collaborators
    // ═══════════════════════════════════════════════════════════════════════
    /// Ask the availability layer for a payload to propose.
    ///
    /// Returns [`Event::ProposalCreated`].
    RequestProposal {
        /// Epoch the slot belongs to.
        epoch: EpochNumber,
        /// The slot needing a payload.
        block: sequent_types::BlockNumber,
    },

    /// Hand a decided block to the output sink.
    EmitOrderedBlock {
        /// The block with its provenance tag.
        block: OrderedBlockForOutput,
    },

    /// Answer an admin topology probe.
    RespondOrderingTopology {
        /// Correlation id of the probe.
        request_id: RequestId,
        /// Current epoch number.
        epoch: EpochNumber,
        /// Active peers.
        peers: Vec<PeerId>,
    },

    /// Record a protocol violation by a remote peer.
    ReportNonCompliance {
        /// What happened and who did it.
        report: NonComplianceReport,
    },

    /// Stop the node. Emitted on storage failure or invariant violation;
    /// the runner must not deliver further events.
    Halt {
        /// Why the node is stopping.
        reason: String,
    },
}

impl Action {
    /// Check if this action performs network I/O.
    pub fn is_network(&self) -> bool {
        matches!(self, Action::Send { .. } | Action::Broadcast { .. })
    }

    /// Check if this action is delegated work returning a callback event.
    pub fn is_delegated(&self) -> bool {
        matches!(
            self,
            Action::VerifyPbftMessage { .. }
                | Action::VerifyStoredEpoch { .. }
                | Action::FetchStoredEpochs { .. }
                | Action::RequestProposal { .. }
        )
    }

    /// Check if this action writes to the epoch store.
    pub fn is_storage_write(&self) -> bool {
        matches!(
            self,
            Action::PersistEpochStart { .. }
                | Action::PersistEpochCompletion { .. }
                | Action::PersistOrderedBlock { .. }
                | Action::PersistPbftMessage { .. }
                | Action::PersistTransferredEpoch { .. }
        )
    }

    /// Action kind for telemetry.
    pub fn type_name(&self) -> &'static str {
        match self {
            Action::Send { .. } => "Send",
            Action::Broadcast { .. } => "Broadcast",
            Action::SetTimer { .. } => "SetTimer",
            Action::CancelTimer { .. } => "CancelTimer",
            Action::EnqueueInternal { .. } => "EnqueueInternal",
            Action::VerifyPbftMessage { .. } => "VerifyPbftMessage",
            Action::VerifyStoredEpoch { .. } => "VerifyStoredEpoch",
            Action::PersistEpochStart { .. } => "PersistEpochStart",
            Action::PersistEpochCompletion { .. } => "PersistEpochCompletion",
            Action::PersistOrderedBlock { .. } => "PersistOrderedBlock",
            Action::PersistPbftMessage { .. } => "PersistPbftMessage",
            Action::PersistTransferredEpoch { .. } => "PersistTransferredEpoch",
            Action::FetchStoredEpochs { .. } => "FetchStoredEpochs",
            Action::RequestProposal { .. } => "RequestProposal",
            Action::EmitOrderedBlock { .. } => "EmitOrderedBlock",
            Action::RespondOrderingTopology { .. } => "RespondOrderingTopology",
            Action::ReportNonCompliance { .. } => "ReportNonCompliance",
            Action::Halt { .. } => "Halt",
        }
    }
}
