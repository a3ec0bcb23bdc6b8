//! Event types for the deterministic state machines.

use crate::TimerId;
use sequent_messages::{BlockTransferRequest, BlockTransferResponse};
use sequent_types::{
    CommitCertificate, CompletedEpoch, EpochInfo, EpochNumber, OrderedBlock, OrderingPayload,
    OrderingTopology, PbftMessage, PeerId, RequestId, StoredEpoch,
};
use std::sync::Arc;

/// Priority levels for event ordering within the same timestamp.
///
/// Events at the same simulation time are processed in priority order; lower
/// values run first. Internal events are consequences of prior processing
/// and must land before new external input to preserve causality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum EventPriority {
    /// Consequences of prior event processing.
    Internal = 0,
    /// Timers scheduled by the node itself.
    Timer = 1,
    /// External input from other peers.
    Network = 2,
    /// External input from operators.
    Client = 3,
}

/// All possible inputs to a node.
///
/// Events are passive data; the state machines process them and return
/// [`crate::Action`]s.
#[derive(Debug, Clone)]
pub enum Event {
    // ═══════════════════════════════════════════════════════════════════════
    // Lifecycle
    // ═══════════════════════════════════════════════════════════════════════
    /// Begin operating. The recovered store snapshot is part of the node's
    /// construction; this event only starts the machinery.
    Start,

    /// The output module determined the topology for an epoch.
    NewEpochTopology {
        /// The epoch this topology orders.
        epoch: EpochNumber,
        /// Peers and their verification keys for that epoch.
        topology: Arc<OrderingTopology>,
    },

    /// The availability layer produced a payload for a slot this node leads.
    ///
    /// Response to [`crate::Action::RequestProposal`].
    ProposalCreated {
        /// Epoch the slot belongs to.
        epoch: EpochNumber,
        /// The slot to propose for.
        block: sequent_types::BlockNumber,
        /// Payload to order.
        payload: OrderingPayload,
    },

    /// An asynchronous collaborator failed. Storage is authoritative, so the
    /// node halts after logging.
    AsyncException {
        /// The operation that failed.
        operation: &'static str,
        /// Failure description.
        error: String,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Timers
    // ═══════════════════════════════════════════════════════════════════════
    /// A timer set via [`crate::Action::SetTimer`] fired.
    TimerFired {
        /// Which timer.
        id: TimerId,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Network
    // ═══════════════════════════════════════════════════════════════════════
    /// A parsed but not yet signature-verified PBFT message arrived.
    PbftMessageReceived {
        /// The unverified message.
        message: PbftMessage,
    },

    /// A state-transfer request arrived.
    BlockTransferRequestReceived {
        /// The request.
        request: BlockTransferRequest,
    },

    /// A state-transfer response arrived.
    BlockTransferResponseReceived {
        /// The response.
        response: Box<BlockTransferResponse>,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Internal
    // ═══════════════════════════════════════════════════════════════════════
    /// A segment decided a block.
    BlockOrdered {
        /// The decided block.
        block: OrderedBlock,
        /// Its commit certificate.
        certificate: CommitCertificate,
    },

    /// Live consensus must give way to bulk block transfer, either because
    /// this node is onboarding or because the catch-up detector fired.
    StateTransferNeeded {
        /// First epoch to request.
        from_epoch: EpochNumber,
        /// Epoch reported by the peers that are ahead, when known. Transfer
        /// is complete once the node holds every epoch below it.
        target_epoch: Option<EpochNumber>,
    },

    /// State transfer finished; live consensus resumes after the recorded
    /// epoch. Carries the genesis record when there was nothing to fetch.
    StateTransferCompleted {
        /// The newest completed epoch after transfer.
        last_completed: Box<CompletedEpoch>,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Async callbacks (pipe-to-self results of delegated work)
    // ═══════════════════════════════════════════════════════════════════════
    /// Signature verification of a PBFT message completed.
    ///
    /// Callback from [`crate::Action::VerifyPbftMessage`].
    PbftMessageVerified {
        /// The message that was checked.
        message: PbftMessage,
        /// Whether the signature verifies under the sender's epoch key.
        valid: bool,
    },

    /// Commit-certificate verification of a transferred epoch completed.
    ///
    /// Callback from [`crate::Action::VerifyStoredEpoch`].
    StoredEpochVerified {
        /// The epoch that was checked.
        epoch: Box<StoredEpoch>,
        /// Whether the certificate verifies under that epoch's topology.
        valid: bool,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Storage callbacks
    // ═══════════════════════════════════════════════════════════════════════
    /// `startEpoch` became durable.
    ///
    /// Callback from [`crate::Action::PersistEpochStart`].
    NewEpochStored {
        /// The epoch that was persisted.
        info: EpochInfo,
    },

    /// `completeEpoch` became durable.
    ///
    /// Callback from [`crate::Action::PersistEpochCompletion`].
    CompleteEpochStored {
        /// The epoch that was persisted.
        epoch: EpochNumber,
    },

    /// A state-transferred epoch became durable.
    ///
    /// Callback from [`crate::Action::PersistTransferredEpoch`].
    TransferredEpochStored {
        /// The epoch that was persisted.
        epoch: EpochNumber,
    },

    /// Completed epochs were read for a transfer server response.
    ///
    /// Callback from [`crate::Action::FetchStoredEpochs`].
    StoredEpochsLoaded {
        /// The peer that asked.
        requester: PeerId,
        /// Every completed epoch at or after the requested one.
        epochs: Vec<StoredEpoch>,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Admin
    // ═══════════════════════════════════════════════════════════════════════
    /// Operator asked for the active ordering topology.
    QueryOrderingTopology {
        /// Correlation id for the reply.
        request_id: RequestId,
    },
}

impl Event {
    /// The priority of this event when timestamps tie.
    pub fn priority(&self) -> EventPriority {
        match self {
            Event::BlockOrdered { .. }
            | Event::StateTransferNeeded { .. }
            | Event::StateTransferCompleted { .. }
            | Event::PbftMessageVerified { .. }
            | Event::StoredEpochVerified { .. }
            | Event::NewEpochStored { .. }
            | Event::CompleteEpochStored { .. }
            | Event::TransferredEpochStored { .. }
            | Event::StoredEpochsLoaded { .. }
            | Event::AsyncException { .. } => EventPriority::Internal,

            Event::TimerFired { .. } => EventPriority::Timer,

            Event::PbftMessageReceived { .. }
            | Event::BlockTransferRequestReceived { .. }
            | Event::BlockTransferResponseReceived { .. }
            | Event::NewEpochTopology { .. }
            | Event::ProposalCreated { .. } => EventPriority::Network,

            Event::Start | Event::QueryOrderingTopology { .. } => EventPriority::Client,
        }
    }

    /// Event kind for telemetry.
    pub fn type_name(&self) -> &'static str {
        match self {
            Event::Start => "Start",
            Event::NewEpochTopology { .. } => "NewEpochTopology",
            Event::ProposalCreated { .. } => "ProposalCreated",
            Event::AsyncException { .. } => "AsyncException",
            Event::TimerFired { .. } => "TimerFired",
            Event::PbftMessageReceived { .. } => "PbftMessageReceived",
            Event::BlockTransferRequestReceived { .. } => "BlockTransferRequestReceived",
            Event::BlockTransferResponseReceived { .. } => "BlockTransferResponseReceived",
            Event::BlockOrdered { .. } => "BlockOrdered",
            Event::StateTransferNeeded { .. } => "StateTransferNeeded",
            Event::StateTransferCompleted { .. } => "StateTransferCompleted",
            Event::PbftMessageVerified { .. } => "PbftMessageVerified",
            Event::StoredEpochVerified { .. } => "StoredEpochVerified",
            Event::NewEpochStored { .. } => "NewEpochStored",
            Event::CompleteEpochStored { .. } => "CompleteEpochStored",
            Event::TransferredEpochStored { .. } => "TransferredEpochStored",
            Event::StoredEpochsLoaded { .. } => "StoredEpochsLoaded",
            Event::QueryOrderingTopology { .. } => "QueryOrderingTopology",
        }
    }
}
