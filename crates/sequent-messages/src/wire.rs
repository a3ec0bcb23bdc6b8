//! Protobuf wire shapes.
//!
//! The envelope layout is fixed for interoperability: varint epoch, view and
//! block numbers, length-prefixed sender identity, varint microsecond
//! timestamp, a oneof payload tag, and a length-prefixed signature. The
//! structs are hand-written prost derives; there is no build-time codegen.

/// Envelope carried by every PBFT consensus message.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WirePbftMessage {
    /// Epoch number.
    #[prost(uint64, tag = "1")]
    pub epoch: u64,
    /// View number (the target view for view-change kinds).
    #[prost(uint64, tag = "2")]
    pub view: u64,
    /// Block number.
    #[prost(uint64, tag = "3")]
    pub block: u64,
    /// Sender identity, UTF-8 bytes.
    #[prost(bytes = "vec", tag = "4")]
    pub sender: Vec<u8>,
    /// Construction time, microseconds since the UNIX epoch.
    #[prost(uint64, tag = "5")]
    pub timestamp_micros: u64,
    /// Tagged payload. Absence is a parse error, never a default.
    #[prost(oneof = "wire_pbft_message::Payload", tags = "6, 7, 8, 9, 10")]
    pub payload: Option<wire_pbft_message::Payload>,
    /// Ed25519 signature bytes.
    #[prost(bytes = "vec", tag = "11")]
    pub signature: Vec<u8>,
}

/// Payload variants of [`WirePbftMessage`].
pub mod wire_pbft_message {
    /// The oneof payload.
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Payload {
        /// Leader proposal.
        #[prost(message, tag = "6")]
        PrePrepare(super::WirePrePrepare),
        /// Acceptance acknowledgement.
        #[prost(message, tag = "7")]
        Prepare(super::WirePrepare),
        /// Finalization vote.
        #[prost(message, tag = "8")]
        Commit(super::WireCommit),
        /// View-change vote.
        #[prost(message, tag = "9")]
        ViewChange(super::WireViewChange),
        /// View-change conclusion.
        #[prost(message, tag = "10")]
        NewView(Box<super::WireNewView>),
    }
}

/// Pre-prepare payload: the proposed bytes and their digest.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WirePrePrepare {
    /// Proposed payload bytes.
    #[prost(bytes = "vec", tag = "1")]
    pub payload: Vec<u8>,
    /// 32-byte digest of `payload`.
    #[prost(bytes = "vec", tag = "2")]
    pub digest: Vec<u8>,
}

/// Prepare payload.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WirePrepare {
    /// 32-byte digest of the accepted pre-prepare.
    #[prost(bytes = "vec", tag = "1")]
    pub digest: Vec<u8>,
}

/// Commit payload.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WireCommit {
    /// 32-byte digest being committed.
    #[prost(bytes = "vec", tag = "1")]
    pub digest: Vec<u8>,
}

/// Evidence of a prepared value, nested inside view changes.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WirePreparedCertificate {
    /// The prepared pre-prepare, as a full signed envelope.
    #[prost(message, optional, boxed, tag = "1")]
    pub pre_prepare: Option<Box<WirePbftMessage>>,
    /// The prepares forming the prepared quorum, as full signed envelopes.
    #[prost(message, repeated, tag = "2")]
    pub prepares: Vec<WirePbftMessage>,
}

/// View-change payload.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WireViewChange {
    /// Highest prepared certificate held for the slot, if any.
    #[prost(message, optional, tag = "1")]
    pub prepared: Option<WirePreparedCertificate>,
}

/// New-view payload.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WireNewView {
    /// Justifying view-change votes, as full signed envelopes.
    #[prost(message, repeated, tag = "1")]
    pub view_changes: Vec<WirePbftMessage>,
    /// The pre-prepare to resume with, as a full signed envelope.
    #[prost(message, optional, boxed, tag = "2")]
    pub pre_prepare: Option<Box<WirePbftMessage>>,
}

/// Request for all completed epochs starting at `from_epoch`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WireBlockTransferRequest {
    /// First epoch the requester needs.
    #[prost(uint64, tag = "1")]
    pub from_epoch: u64,
    /// Requester identity, UTF-8 bytes.
    #[prost(bytes = "vec", tag = "2")]
    pub sender: Vec<u8>,
}

/// One ordered block inside a transfer response.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WireStoredBlock {
    /// Block number.
    #[prost(uint64, tag = "1")]
    pub block_number: u64,
    /// Decided payload bytes.
    #[prost(bytes = "vec", tag = "2")]
    pub payload: Vec<u8>,
    /// View-0 leader identity, UTF-8 bytes.
    #[prost(bytes = "vec", tag = "3")]
    pub leader: Vec<u8>,
    /// Whether this is the final slot of the epoch.
    #[prost(bool, tag = "4")]
    pub is_last_in_epoch: bool,
}

/// One completed epoch served to a state-transfer client.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WireBlockTransferResponse {
    /// Epoch number.
    #[prost(uint64, tag = "1")]
    pub epoch: u64,
    /// First block slot of the epoch.
    #[prost(uint64, tag = "2")]
    pub start_block: u64,
    /// Number of slots in the epoch.
    #[prost(uint64, tag = "3")]
    pub length: u64,
    /// Topology activation time, microseconds.
    #[prost(uint64, tag = "4")]
    pub topology_activation_micros: u64,
    /// All ordered blocks of the epoch, ascending.
    #[prost(message, repeated, tag = "5")]
    pub blocks: Vec<WireStoredBlock>,
    /// Commits deciding the last block, as full signed envelopes.
    #[prost(message, repeated, tag = "6")]
    pub commits: Vec<WirePbftMessage>,
    /// Responder identity, UTF-8 bytes.
    #[prost(bytes = "vec", tag = "7")]
    pub sender: Vec<u8>,
}
