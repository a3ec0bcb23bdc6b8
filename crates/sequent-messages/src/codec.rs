//! Conversion between typed messages and their wire shapes.
//!
//! Parsing is pure: it never consults node state and never verifies
//! signatures. Signature bytes are carried through untouched and checked by
//! the consensus module before any message is applied.

use crate::transfer::{BlockTransferRequest, BlockTransferResponse};
use crate::wire::{
    wire_pbft_message, WireBlockTransferRequest, WireBlockTransferResponse, WireCommit,
    WireNewView, WirePbftMessage, WirePrePrepare, WirePrepare, WirePreparedCertificate,
    WireStoredBlock, WireViewChange,
};
use prost::Message as _;
use sequent_types::{
    BlockMetadata, BlockNumber, Commit, CommitCertificate, EpochInfo, EpochNumber, Hash, NewView,
    OrderedBlock, OrderingPayload, PbftMessage, PeerId, PrePrepare, Prepare, PreparedCertificate,
    Signature, StoredEpoch, ViewChange, ViewNumber,
};
use std::time::Duration;

/// Parse failures. Each one maps to a `Malformed` non-compliance report.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// Protobuf decoding failed.
    #[error("protobuf decode: {0}")]
    Decode(String),
    /// The payload oneof is empty.
    #[error("message has an empty payload tag")]
    MissingPayload,
    /// Sender bytes are not valid UTF-8.
    #[error("sender identity is not valid UTF-8")]
    InvalidSender,
    /// A digest field is not exactly 32 bytes.
    #[error("digest is not 32 bytes")]
    InvalidDigest,
    /// A signature field is not exactly 64 bytes.
    #[error("signature is not 64 bytes")]
    InvalidSignature,
    /// A nested envelope carries the wrong payload kind.
    #[error("nested message is not a {expected}")]
    UnexpectedNested {
        /// The kind the context requires.
        expected: &'static str,
    },
}

impl From<prost::DecodeError> for WireError {
    fn from(err: prost::DecodeError) -> Self {
        WireError::Decode(err.to_string())
    }
}

// ─── PBFT messages ───

/// Encode a PBFT message to wire bytes.
pub fn serialize_pbft(message: &PbftMessage) -> Vec<u8> {
    pbft_to_wire(message).encode_to_vec()
}

/// Parse a PBFT message from wire bytes.
pub fn parse_pbft(bytes: &[u8]) -> Result<PbftMessage, WireError> {
    let wire = WirePbftMessage::decode(bytes)?;
    pbft_from_wire(&wire)
}

/// Lower a typed PBFT message to its wire shape.
pub fn pbft_to_wire(message: &PbftMessage) -> WirePbftMessage {
    let payload = match message {
        PbftMessage::PrePrepare(m) => wire_pbft_message::Payload::PrePrepare(WirePrePrepare {
            payload: m.payload.0.clone(),
            digest: m.digest.as_bytes().to_vec(),
        }),
        PbftMessage::Prepare(m) => wire_pbft_message::Payload::Prepare(WirePrepare {
            digest: m.digest.as_bytes().to_vec(),
        }),
        PbftMessage::Commit(m) => wire_pbft_message::Payload::Commit(WireCommit {
            digest: m.digest.as_bytes().to_vec(),
        }),
        PbftMessage::ViewChange(m) => wire_pbft_message::Payload::ViewChange(WireViewChange {
            prepared: m.prepared.as_ref().map(prepared_to_wire),
        }),
        PbftMessage::NewView(m) => wire_pbft_message::Payload::NewView(Box::new(WireNewView {
            view_changes: m
                .view_changes
                .iter()
                .map(|vc| pbft_to_wire(&PbftMessage::ViewChange(vc.clone())))
                .collect(),
            pre_prepare: Some(Box::new(pbft_to_wire(&PbftMessage::PrePrepare(
                m.pre_prepare.clone(),
            )))),
        })),
    };
    WirePbftMessage {
        epoch: message.metadata().epoch.0,
        view: message.view().0,
        block: message.metadata().block_number.0,
        sender: message.sender().as_bytes().to_vec(),
        timestamp_micros: message.timestamp_micros(),
        payload: Some(payload),
        signature: message.signature().as_bytes().to_vec(),
    }
}

/// Raise a wire envelope to a typed PBFT message.
pub fn pbft_from_wire(wire: &WirePbftMessage) -> Result<PbftMessage, WireError> {
    let metadata = BlockMetadata::new(EpochNumber(wire.epoch), BlockNumber(wire.block));
    let view = ViewNumber(wire.view);
    let sender = PeerId::from_utf8(&wire.sender).ok_or(WireError::InvalidSender)?;
    let signature = Signature::from_slice(&wire.signature).ok_or(WireError::InvalidSignature)?;
    let timestamp_micros = wire.timestamp_micros;

    let payload = wire.payload.as_ref().ok_or(WireError::MissingPayload)?;
    let message = match payload {
        wire_pbft_message::Payload::PrePrepare(p) => PbftMessage::PrePrepare(PrePrepare {
            metadata,
            view,
            payload: OrderingPayload(p.payload.clone()),
            digest: parse_digest(&p.digest)?,
            sender,
            timestamp_micros,
            signature,
        }),
        wire_pbft_message::Payload::Prepare(p) => PbftMessage::Prepare(Prepare {
            metadata,
            view,
            digest: parse_digest(&p.digest)?,
            sender,
            timestamp_micros,
            signature,
        }),
        wire_pbft_message::Payload::Commit(p) => PbftMessage::Commit(Commit {
            metadata,
            view,
            digest: parse_digest(&p.digest)?,
            sender,
            timestamp_micros,
            signature,
        }),
        wire_pbft_message::Payload::ViewChange(p) => PbftMessage::ViewChange(ViewChange {
            metadata,
            new_view: view,
            prepared: p.prepared.as_ref().map(prepared_from_wire).transpose()?,
            sender,
            timestamp_micros,
            signature,
        }),
        wire_pbft_message::Payload::NewView(p) => {
            let view_changes = p
                .view_changes
                .iter()
                .map(|w| match pbft_from_wire(w)? {
                    PbftMessage::ViewChange(vc) => Ok(vc),
                    _ => Err(WireError::UnexpectedNested {
                        expected: "ViewChange",
                    }),
                })
                .collect::<Result<Vec<_>, _>>()?;
            let pre_prepare = p
                .pre_prepare
                .as_deref()
                .ok_or(WireError::MissingPayload)
                .and_then(expect_pre_prepare)?;
            PbftMessage::NewView(NewView {
                metadata,
                new_view: view,
                view_changes,
                pre_prepare,
                sender,
                timestamp_micros,
                signature,
            })
        }
    };
    Ok(message)
}

fn prepared_to_wire(prepared: &PreparedCertificate) -> WirePreparedCertificate {
    WirePreparedCertificate {
        pre_prepare: Some(Box::new(pbft_to_wire(&PbftMessage::PrePrepare(
            prepared.pre_prepare.clone(),
        )))),
        prepares: prepared
            .prepares
            .iter()
            .map(|p| pbft_to_wire(&PbftMessage::Prepare(p.clone())))
            .collect(),
    }
}

fn prepared_from_wire(wire: &WirePreparedCertificate) -> Result<PreparedCertificate, WireError> {
    let pre_prepare = wire
        .pre_prepare
        .as_deref()
        .ok_or(WireError::MissingPayload)
        .and_then(expect_pre_prepare)?;
    let prepares = wire
        .prepares
        .iter()
        .map(|w| match pbft_from_wire(w)? {
            PbftMessage::Prepare(p) => Ok(p),
            _ => Err(WireError::UnexpectedNested {
                expected: "Prepare",
            }),
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(PreparedCertificate {
        pre_prepare,
        prepares,
    })
}

fn expect_pre_prepare(wire: &WirePbftMessage) -> Result<PrePrepare, WireError> {
    match pbft_from_wire(wire)? {
        PbftMessage::PrePrepare(p) => Ok(p),
        _ => Err(WireError::UnexpectedNested {
            expected: "PrePrepare",
        }),
    }
}

fn parse_digest(bytes: &[u8]) -> Result<Hash, WireError> {
    Hash::from_slice(bytes).ok_or(WireError::InvalidDigest)
}

// ─── Block transfer ───

/// Encode a block-transfer request to wire bytes.
pub fn serialize_transfer_request(request: &BlockTransferRequest) -> Vec<u8> {
    WireBlockTransferRequest {
        from_epoch: request.from_epoch.0,
        sender: request.sender.as_bytes().to_vec(),
    }
    .encode_to_vec()
}

/// Parse a block-transfer request from wire bytes.
pub fn parse_transfer_request(bytes: &[u8]) -> Result<BlockTransferRequest, WireError> {
    let wire = WireBlockTransferRequest::decode(bytes)?;
    Ok(BlockTransferRequest {
        from_epoch: EpochNumber(wire.from_epoch),
        sender: PeerId::from_utf8(&wire.sender).ok_or(WireError::InvalidSender)?,
    })
}

/// Encode a block-transfer response to wire bytes.
pub fn serialize_transfer_response(response: &BlockTransferResponse) -> Vec<u8> {
    let epoch = &response.epoch;
    WireBlockTransferResponse {
        epoch: epoch.info.number.0,
        start_block: epoch.info.start_block.0,
        length: epoch.info.length,
        topology_activation_micros: epoch.info.topology_activation_time.as_micros() as u64,
        blocks: epoch
            .blocks
            .iter()
            .map(|b| WireStoredBlock {
                block_number: b.metadata.block_number.0,
                payload: b.payload.0.clone(),
                leader: b.original_leader.as_bytes().to_vec(),
                is_last_in_epoch: b.is_last_in_epoch,
            })
            .collect(),
        commits: epoch
            .certificate
            .commits
            .iter()
            .map(|c| pbft_to_wire(&PbftMessage::Commit(c.clone())))
            .collect(),
        sender: response.sender.as_bytes().to_vec(),
    }
    .encode_to_vec()
}

/// Parse a block-transfer response from wire bytes.
pub fn parse_transfer_response(bytes: &[u8]) -> Result<BlockTransferResponse, WireError> {
    let wire = WireBlockTransferResponse::decode(bytes)?;
    let number = EpochNumber(wire.epoch);
    let info = EpochInfo {
        number,
        start_block: BlockNumber(wire.start_block),
        length: wire.length,
        topology_activation_time: Duration::from_micros(wire.topology_activation_micros),
    };
    let blocks = wire
        .blocks
        .iter()
        .map(|b| {
            Ok(OrderedBlock {
                metadata: BlockMetadata::new(number, BlockNumber(b.block_number)),
                payload: OrderingPayload(b.payload.clone()),
                original_leader: PeerId::from_utf8(&b.leader).ok_or(WireError::InvalidSender)?,
                is_last_in_epoch: b.is_last_in_epoch,
            })
        })
        .collect::<Result<Vec<_>, WireError>>()?;
    let commits = wire
        .commits
        .iter()
        .map(|w| match pbft_from_wire(w)? {
            PbftMessage::Commit(c) => Ok(c),
            _ => Err(WireError::UnexpectedNested { expected: "Commit" }),
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(BlockTransferResponse {
        epoch: StoredEpoch {
            info,
            blocks,
            certificate: CommitCertificate::new(commits),
        },
        sender: PeerId::from_utf8(&wire.sender).ok_or(WireError::InvalidSender)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sequent_types::test_utils::{test_key, test_peer};
    use sequent_types::KeyPair;

    fn metadata() -> BlockMetadata {
        BlockMetadata::new(EpochNumber(3), BlockNumber(17))
    }

    fn pre_prepare(key: &KeyPair) -> PrePrepare {
        PrePrepare::new(
            metadata(),
            ViewNumber(1),
            OrderingPayload(b"batch-bytes".to_vec()),
            test_peer(0),
            42,
            key,
        )
    }

    #[test]
    fn pre_prepare_roundtrip() {
        let message = PbftMessage::PrePrepare(pre_prepare(&test_key(0)));
        let parsed = parse_pbft(&serialize_pbft(&message)).unwrap();
        assert_eq!(parsed, message);
    }

    #[test]
    fn prepare_and_commit_roundtrip() {
        let key = test_key(1);
        let digest = Hash::digest(b"batch-bytes");
        for message in [
            PbftMessage::Prepare(Prepare::new(
                metadata(),
                ViewNumber(0),
                digest,
                test_peer(1),
                7,
                &key,
            )),
            PbftMessage::Commit(Commit::new(
                metadata(),
                ViewNumber(0),
                digest,
                test_peer(1),
                8,
                &key,
            )),
        ] {
            let parsed = parse_pbft(&serialize_pbft(&message)).unwrap();
            assert_eq!(parsed, message);
        }
    }

    #[test]
    fn view_change_roundtrip_with_prepared_certificate() {
        let key = test_key(2);
        let pp = pre_prepare(&key);
        let prepares = vec![Prepare::new(
            metadata(),
            ViewNumber(1),
            pp.digest,
            test_peer(1),
            9,
            &key,
        )];
        let vc = ViewChange::new(
            metadata(),
            ViewNumber(2),
            Some(PreparedCertificate {
                pre_prepare: pp.clone(),
                prepares,
            }),
            test_peer(2),
            10,
            &key,
        );
        let message = PbftMessage::ViewChange(vc.clone());
        let parsed = parse_pbft(&serialize_pbft(&message)).unwrap();
        assert_eq!(parsed, message);

        let new_view = PbftMessage::NewView(NewView::new(
            metadata(),
            ViewNumber(2),
            vec![vc],
            pp,
            test_peer(1),
            11,
            &key,
        ));
        let parsed = parse_pbft(&serialize_pbft(&new_view)).unwrap();
        assert_eq!(parsed, new_view);
    }

    #[test]
    fn empty_payload_tag_is_a_parse_error() {
        let wire = WirePbftMessage {
            epoch: 1,
            view: 0,
            block: 2,
            sender: b"p0".to_vec(),
            timestamp_micros: 0,
            payload: None,
            signature: vec![0u8; 64],
        };
        let bytes = wire.encode_to_vec();
        assert_eq!(parse_pbft(&bytes), Err(WireError::MissingPayload));
    }

    #[test]
    fn short_digest_is_a_parse_error() {
        let wire = WirePbftMessage {
            epoch: 1,
            view: 0,
            block: 2,
            sender: b"p0".to_vec(),
            timestamp_micros: 0,
            payload: Some(wire_pbft_message::Payload::Commit(WireCommit {
                digest: vec![1, 2, 3],
            })),
            signature: vec![0u8; 64],
        };
        assert_eq!(
            parse_pbft(&wire.encode_to_vec()),
            Err(WireError::InvalidDigest)
        );
    }

    #[test]
    fn transfer_response_roundtrip() {
        let commits: Vec<Commit> = (0..3)
            .map(|i| {
                Commit::new(
                    BlockMetadata::new(EpochNumber(2), BlockNumber(5)),
                    ViewNumber(0),
                    Hash::digest(b"last"),
                    test_peer(i),
                    3,
                    &test_key(i),
                )
            })
            .collect();
        let response = BlockTransferResponse {
            epoch: StoredEpoch {
                info: EpochInfo {
                    number: EpochNumber(2),
                    start_block: BlockNumber(4),
                    length: 2,
                    topology_activation_time: Duration::from_micros(99),
                },
                blocks: vec![OrderedBlock {
                    metadata: BlockMetadata::new(EpochNumber(2), BlockNumber(4)),
                    payload: OrderingPayload(b"blk".to_vec()),
                    original_leader: test_peer(0),
                    is_last_in_epoch: false,
                }],
                certificate: CommitCertificate::new(commits),
            },
            sender: test_peer(1),
        };
        let parsed = parse_transfer_response(&serialize_transfer_response(&response)).unwrap();
        assert_eq!(parsed, response);

        let request = BlockTransferRequest {
            from_epoch: EpochNumber(2),
            sender: test_peer(3),
        };
        let parsed = parse_transfer_request(&serialize_transfer_request(&request)).unwrap();
        assert_eq!(parsed, request);
    }
}
