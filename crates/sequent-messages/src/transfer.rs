//! Block-transfer request/response messages.

use sequent_types::{EpochNumber, PeerId, StoredEpoch};

/// Ask a peer for every completed epoch from `from_epoch` onward.
///
/// Unsigned: any peer may ask, and responses are self-authenticating via
/// their commit certificates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockTransferRequest {
    /// First epoch the requester needs.
    pub from_epoch: EpochNumber,
    /// The requesting peer, so responses can be routed back.
    pub sender: PeerId,
}

/// One completed epoch, served independently of any other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockTransferResponse {
    /// The epoch's blocks and anchoring certificate.
    pub epoch: StoredEpoch,
    /// The responding peer.
    pub sender: PeerId,
}
