//! Outbound message types.

use sequent_messages::{BlockTransferRequest, BlockTransferResponse};
use sequent_types::PbftMessage;

/// Messages a node can send to other peers. The runner owns the actual
/// network I/O and the wire encoding.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    /// PBFT consensus message.
    Pbft(PbftMessage),
    /// State-transfer request.
    BlockTransferRequest(BlockTransferRequest),
    /// State-transfer response.
    BlockTransferResponse(Box<BlockTransferResponse>),
}

impl OutboundMessage {
    /// Message kind for telemetry.
    pub fn type_name(&self) -> &'static str {
        match self {
            OutboundMessage::Pbft(m) => m.type_name(),
            OutboundMessage::BlockTransferRequest(_) => "BlockTransferRequest",
            OutboundMessage::BlockTransferResponse(_) => "BlockTransferResponse",
        }
    }

    /// Check if this is a live-consensus message.
    pub fn is_consensus(&self) -> bool {
        matches!(self, OutboundMessage::Pbft(_))
    }

    /// Check if this is a state-transfer message.
    pub fn is_transfer(&self) -> bool {
        !self.is_consensus()
    }
}
