//! Network messages for the sequent ordering service.
//!
//! Typed message definitions plus the protobuf wire codec. Parsing is pure
//! and never verifies signatures; the consensus module owns verification.

pub mod codec;
pub mod transfer;
pub mod wire;

pub use codec::{
    parse_pbft, parse_transfer_request, parse_transfer_response, pbft_from_wire, pbft_to_wire,
    serialize_pbft, serialize_transfer_request, serialize_transfer_response, WireError,
};
pub use transfer::{BlockTransferRequest, BlockTransferResponse};
