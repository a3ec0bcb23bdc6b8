//! Core vocabulary for the sequent state machines.
//!
//! The ordering service is built on a sans-io, event-driven model:
//!
//! ```text
//! Events → StateMachine::handle() → Actions
//! ```
//!
//! Each state machine is:
//! - **Synchronous**: no async, no `.await`
//! - **Deterministic**: same state + event = same actions
//! - **Pure-ish**: mutates itself, performs no I/O
//!
//! The runner (simulation or production) delivers events, executes the
//! returned actions, and feeds results of delegated work — signature
//! verification, storage, availability — back as events. That boundary is
//! the only suspension point, so no lock is ever held across one.

mod action;
mod event;
mod message;
mod traits;

pub use action::{Action, SignatureCheck};
pub use event::{Event, EventPriority};
pub use message::OutboundMessage;
pub use traits::{StateMachine, SubStateMachine};

use sequent_types::{BlockNumber, EpochNumber, PeerId, ViewNumber};

/// Timer identity. Setting a timer with an id already pending reschedules it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerId {
    /// Per-slot PBFT progress timeout.
    ViewChange(BlockNumber),
    /// Re-send outstanding block-transfer requests.
    TransferRetry,
}

/// Kinds of remote protocol violation, used as metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NonComplianceKind {
    /// The message could not be parsed.
    Malformed,
    /// The signature does not verify under the sender's epoch key.
    InvalidSignature,
    /// The sender is not part of the epoch's topology.
    SenderNotInTopology,
    /// The block number is outside the epoch's slot range.
    BlockOutOfBounds,
    /// The message violates the PBFT protocol (wrong leader, conflicting
    /// proposal, invalid new-view justification).
    ProtocolViolation,
}

impl NonComplianceKind {
    /// Stable label for the metrics sink.
    pub fn as_label(&self) -> &'static str {
        match self {
            NonComplianceKind::Malformed => "malformed",
            NonComplianceKind::InvalidSignature => "invalid_signature",
            NonComplianceKind::SenderNotInTopology => "sender_not_in_topology",
            NonComplianceKind::BlockOutOfBounds => "block_out_of_bounds",
            NonComplianceKind::ProtocolViolation => "protocol_violation",
        }
    }
}

/// A recorded protocol violation, labeled by who, where, and what.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonComplianceReport {
    /// Offending peer, when identifiable.
    pub sender: Option<PeerId>,
    /// Epoch claimed by the message.
    pub epoch: Option<EpochNumber>,
    /// View claimed by the message.
    pub view: Option<ViewNumber>,
    /// Block claimed by the message.
    pub block: Option<BlockNumber>,
    /// The violation.
    pub kind: NonComplianceKind,
}
