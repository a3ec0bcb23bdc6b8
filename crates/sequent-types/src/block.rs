//! Blocks as seen by the ordering layer.

use crate::{BlockNumber, EpochNumber, Hash, PeerId};

/// Identity of a block slot. Unique across all history.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct BlockMetadata {
    /// Epoch the slot belongs to.
    pub epoch: EpochNumber,
    /// Slot number within the total order.
    pub block_number: BlockNumber,
}

impl BlockMetadata {
    /// Construct block metadata.
    pub fn new(epoch: EpochNumber, block_number: BlockNumber) -> Self {
        Self {
            epoch,
            block_number,
        }
    }
}

/// Opaque payload proposed for a slot. The ordering layer never interprets
/// it; availability and transaction semantics live elsewhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderingPayload(pub Vec<u8>);

impl OrderingPayload {
    /// An empty payload, ordered when a leader has nothing to propose.
    pub fn empty() -> Self {
        OrderingPayload(Vec::new())
    }

    /// Content digest, bound into pre-prepares.
    pub fn digest(&self) -> Hash {
        Hash::digest(&self.0)
    }
}

/// A block after consensus has decided it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderedBlock {
    /// Slot identity.
    pub metadata: BlockMetadata,
    /// The decided payload.
    pub payload: OrderingPayload,
    /// View-0 leader of the slot's segment.
    pub original_leader: PeerId,
    /// Whether this is the final slot of its epoch.
    pub is_last_in_epoch: bool,
}

/// Where a block handed to the output sink came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockProvenance {
    /// Decided by live consensus on this node.
    FromConsensus,
    /// Fetched and certificate-checked during state transfer.
    FromStateTransfer,
}

/// An ordered block annotated for the output sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderedBlockForOutput {
    /// The decided block.
    pub block: OrderedBlock,
    /// Provenance tag for the consumer.
    pub provenance: BlockProvenance,
}
