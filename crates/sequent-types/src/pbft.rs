//! PBFT consensus messages.
//!
//! Five tagged variants drive the per-segment protocol. Messages are
//! immutable once constructed; the constructors sign with the local key so
//! an unsigned message can never escape the module that built it.

use crate::signing;
use crate::{BlockMetadata, Hash, KeyPair, OrderingPayload, PeerId, Signature, ViewNumber};

/// Leader's proposal binding a payload digest to (block, view).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrePrepare {
    /// Slot identity.
    pub metadata: BlockMetadata,
    /// View in which this proposal is made.
    pub view: ViewNumber,
    /// The proposed payload.
    pub payload: OrderingPayload,
    /// Digest of `payload`; what prepares and commits refer to.
    pub digest: Hash,
    /// Proposing leader.
    pub sender: PeerId,
    /// Construction time, microseconds since the UNIX epoch.
    pub timestamp_micros: u64,
    /// Signature over the canonical signing bytes.
    pub signature: Signature,
}

impl PrePrepare {
    /// Compose and sign a pre-prepare.
    pub fn new(
        metadata: BlockMetadata,
        view: ViewNumber,
        payload: OrderingPayload,
        sender: PeerId,
        timestamp_micros: u64,
        key: &KeyPair,
    ) -> Self {
        let digest = payload.digest();
        let signature = key.sign(&signing::pre_prepare_message(&metadata, view, &digest));
        Self {
            metadata,
            view,
            payload,
            digest,
            sender,
            timestamp_micros,
            signature,
        }
    }

    /// Canonical bytes covered by `signature`.
    pub fn signing_bytes(&self) -> Vec<u8> {
        signing::pre_prepare_message(&self.metadata, self.view, &self.digest)
    }
}

/// Acknowledgement that a peer accepted a pre-prepare.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prepare {
    /// Slot identity.
    pub metadata: BlockMetadata,
    /// View this prepare belongs to.
    pub view: ViewNumber,
    /// Digest of the accepted pre-prepare.
    pub digest: Hash,
    /// Acknowledging peer.
    pub sender: PeerId,
    /// Construction time, microseconds since the UNIX epoch.
    pub timestamp_micros: u64,
    /// Signature over the canonical signing bytes.
    pub signature: Signature,
}

impl Prepare {
    /// Compose and sign a prepare.
    pub fn new(
        metadata: BlockMetadata,
        view: ViewNumber,
        digest: Hash,
        sender: PeerId,
        timestamp_micros: u64,
        key: &KeyPair,
    ) -> Self {
        let signature = key.sign(&signing::prepare_message(&metadata, view, &digest));
        Self {
            metadata,
            view,
            digest,
            sender,
            timestamp_micros,
            signature,
        }
    }

    /// Canonical bytes covered by `signature`.
    pub fn signing_bytes(&self) -> Vec<u8> {
        signing::prepare_message(&self.metadata, self.view, &self.digest)
    }
}

/// Vote to finalize a prepared value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    /// Slot identity.
    pub metadata: BlockMetadata,
    /// View this commit belongs to.
    pub view: ViewNumber,
    /// Digest being committed.
    pub digest: Hash,
    /// Committing peer.
    pub sender: PeerId,
    /// Construction time, microseconds since the UNIX epoch.
    pub timestamp_micros: u64,
    /// Signature over the canonical signing bytes.
    pub signature: Signature,
}

impl Commit {
    /// Compose and sign a commit.
    pub fn new(
        metadata: BlockMetadata,
        view: ViewNumber,
        digest: Hash,
        sender: PeerId,
        timestamp_micros: u64,
        key: &KeyPair,
    ) -> Self {
        let signature = key.sign(&signing::commit_message(&metadata, view, &digest));
        Self {
            metadata,
            view,
            digest,
            sender,
            timestamp_micros,
            signature,
        }
    }

    /// Canonical bytes covered by `signature`.
    pub fn signing_bytes(&self) -> Vec<u8> {
        signing::commit_message(&self.metadata, self.view, &self.digest)
    }
}

/// Evidence that a value was prepared at some view: the pre-prepare plus the
/// prepares that formed the prepared quorum. Carried inside view changes so
/// a new leader cannot lose a potentially-committed value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedCertificate {
    /// The prepared proposal.
    pub pre_prepare: PrePrepare,
    /// Matching prepares from distinct peers.
    pub prepares: Vec<Prepare>,
}

impl PreparedCertificate {
    /// Digest summarizing the certificate, bound into view-change signatures.
    pub fn summary(&self) -> Hash {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(self.pre_prepare.digest.as_bytes());
        bytes.extend_from_slice(&self.pre_prepare.view.0.to_le_bytes());
        for prepare in &self.prepares {
            bytes.extend_from_slice(prepare.sender.as_bytes());
            bytes.extend_from_slice(prepare.signature.as_bytes());
        }
        Hash::digest(&bytes)
    }
}

/// Vote to abandon the current view of a slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewChange {
    /// Slot identity.
    pub metadata: BlockMetadata,
    /// The view being voted into.
    pub new_view: ViewNumber,
    /// Highest prepared certificate held for this slot, if any.
    pub prepared: Option<PreparedCertificate>,
    /// Voting peer.
    pub sender: PeerId,
    /// Construction time, microseconds since the UNIX epoch.
    pub timestamp_micros: u64,
    /// Signature over the canonical signing bytes.
    pub signature: Signature,
}

impl ViewChange {
    /// Compose and sign a view-change vote.
    pub fn new(
        metadata: BlockMetadata,
        new_view: ViewNumber,
        prepared: Option<PreparedCertificate>,
        sender: PeerId,
        timestamp_micros: u64,
        key: &KeyPair,
    ) -> Self {
        let summary = prepared.as_ref().map(|p| p.summary()).unwrap_or(Hash::ZERO);
        let signature = key.sign(&signing::view_change_message(&metadata, new_view, &summary));
        Self {
            metadata,
            new_view,
            prepared,
            sender,
            timestamp_micros,
            signature,
        }
    }

    /// Canonical bytes covered by `signature`.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let summary = self
            .prepared
            .as_ref()
            .map(|p| p.summary())
            .unwrap_or(Hash::ZERO);
        signing::view_change_message(&self.metadata, self.new_view, &summary)
    }
}

/// New leader's announcement of a completed view change: the justifying
/// view-change set plus the pre-prepare to resume with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewView {
    /// Slot identity.
    pub metadata: BlockMetadata,
    /// The view being entered.
    pub new_view: ViewNumber,
    /// Quorum of view-change votes justifying the change.
    pub view_changes: Vec<ViewChange>,
    /// Proposal for the new view, derived from the highest prepared
    /// certificate in `view_changes` or fresh if none prepared.
    pub pre_prepare: PrePrepare,
    /// The new leader.
    pub sender: PeerId,
    /// Construction time, microseconds since the UNIX epoch.
    pub timestamp_micros: u64,
    /// Signature over the canonical signing bytes.
    pub signature: Signature,
}

impl NewView {
    /// Compose and sign a new-view.
    pub fn new(
        metadata: BlockMetadata,
        new_view: ViewNumber,
        view_changes: Vec<ViewChange>,
        pre_prepare: PrePrepare,
        sender: PeerId,
        timestamp_micros: u64,
        key: &KeyPair,
    ) -> Self {
        let summary = Self::content_summary(&view_changes, &pre_prepare);
        let signature = key.sign(&signing::new_view_message(&metadata, new_view, &summary));
        Self {
            metadata,
            new_view,
            view_changes,
            pre_prepare,
            sender,
            timestamp_micros,
            signature,
        }
    }

    fn content_summary(view_changes: &[ViewChange], pre_prepare: &PrePrepare) -> Hash {
        let mut bytes = Vec::new();
        for vc in view_changes {
            bytes.extend_from_slice(vc.sender.as_bytes());
            bytes.extend_from_slice(vc.signature.as_bytes());
        }
        bytes.extend_from_slice(pre_prepare.signature.as_bytes());
        Hash::digest(&bytes)
    }

    /// Canonical bytes covered by `signature`.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let summary = Self::content_summary(&self.view_changes, &self.pre_prepare);
        signing::new_view_message(&self.metadata, self.new_view, &summary)
    }
}

/// Tagged union of every PBFT message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PbftMessage {
    /// Leader proposal.
    PrePrepare(PrePrepare),
    /// Acceptance acknowledgement.
    Prepare(Prepare),
    /// Finalization vote.
    Commit(Commit),
    /// View-change vote.
    ViewChange(ViewChange),
    /// View-change conclusion.
    NewView(NewView),
}

impl PbftMessage {
    /// Slot identity carried by the message.
    pub fn metadata(&self) -> &BlockMetadata {
        match self {
            PbftMessage::PrePrepare(m) => &m.metadata,
            PbftMessage::Prepare(m) => &m.metadata,
            PbftMessage::Commit(m) => &m.metadata,
            PbftMessage::ViewChange(m) => &m.metadata,
            PbftMessage::NewView(m) => &m.metadata,
        }
    }

    /// View carried by the message (the target view for view-change kinds).
    pub fn view(&self) -> ViewNumber {
        match self {
            PbftMessage::PrePrepare(m) => m.view,
            PbftMessage::Prepare(m) => m.view,
            PbftMessage::Commit(m) => m.view,
            PbftMessage::ViewChange(m) => m.new_view,
            PbftMessage::NewView(m) => m.new_view,
        }
    }

    /// Originating peer.
    pub fn sender(&self) -> &PeerId {
        match self {
            PbftMessage::PrePrepare(m) => &m.sender,
            PbftMessage::Prepare(m) => &m.sender,
            PbftMessage::Commit(m) => &m.sender,
            PbftMessage::ViewChange(m) => &m.sender,
            PbftMessage::NewView(m) => &m.sender,
        }
    }

    /// Construction timestamp in microseconds since the UNIX epoch.
    pub fn timestamp_micros(&self) -> u64 {
        match self {
            PbftMessage::PrePrepare(m) => m.timestamp_micros,
            PbftMessage::Prepare(m) => m.timestamp_micros,
            PbftMessage::Commit(m) => m.timestamp_micros,
            PbftMessage::ViewChange(m) => m.timestamp_micros,
            PbftMessage::NewView(m) => m.timestamp_micros,
        }
    }

    /// Signature envelope.
    pub fn signature(&self) -> &Signature {
        match self {
            PbftMessage::PrePrepare(m) => &m.signature,
            PbftMessage::Prepare(m) => &m.signature,
            PbftMessage::Commit(m) => &m.signature,
            PbftMessage::ViewChange(m) => &m.signature,
            PbftMessage::NewView(m) => &m.signature,
        }
    }

    /// Canonical bytes covered by the signature.
    pub fn signing_bytes(&self) -> Vec<u8> {
        match self {
            PbftMessage::PrePrepare(m) => m.signing_bytes(),
            PbftMessage::Prepare(m) => m.signing_bytes(),
            PbftMessage::Commit(m) => m.signing_bytes(),
            PbftMessage::ViewChange(m) => m.signing_bytes(),
            PbftMessage::NewView(m) => m.signing_bytes(),
        }
    }

    /// Message kind for logs and metrics.
    pub fn type_name(&self) -> &'static str {
        match self {
            PbftMessage::PrePrepare(_) => "PrePrepare",
            PbftMessage::Prepare(_) => "Prepare",
            PbftMessage::Commit(_) => "Commit",
            PbftMessage::ViewChange(_) => "ViewChange",
            PbftMessage::NewView(_) => "NewView",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BlockNumber, EpochNumber};

    fn metadata() -> BlockMetadata {
        BlockMetadata::new(EpochNumber(1), BlockNumber(4))
    }

    #[test]
    fn constructors_produce_verifiable_signatures() {
        let key = KeyPair::from_seed(&[1u8; 32]);
        let sender = PeerId::new("p0");

        let pre_prepare = PrePrepare::new(
            metadata(),
            ViewNumber(0),
            OrderingPayload(b"batch".to_vec()),
            sender.clone(),
            10,
            &key,
        );
        assert!(key
            .public_key()
            .verify(&pre_prepare.signing_bytes(), &pre_prepare.signature));

        let prepare = Prepare::new(
            metadata(),
            ViewNumber(0),
            pre_prepare.digest,
            sender.clone(),
            11,
            &key,
        );
        let message = PbftMessage::Prepare(prepare);
        assert!(key
            .public_key()
            .verify(&message.signing_bytes(), message.signature()));
    }

    #[test]
    fn view_change_signature_binds_prepared_certificate() {
        let key = KeyPair::from_seed(&[2u8; 32]);
        let sender = PeerId::new("p1");
        let pre_prepare = PrePrepare::new(
            metadata(),
            ViewNumber(0),
            OrderingPayload(b"batch".to_vec()),
            sender.clone(),
            1,
            &key,
        );
        let prepared = PreparedCertificate {
            pre_prepare,
            prepares: vec![],
        };

        let with_cert = ViewChange::new(
            metadata(),
            ViewNumber(1),
            Some(prepared),
            sender.clone(),
            2,
            &key,
        );
        let without_cert = ViewChange::new(metadata(), ViewNumber(1), None, sender, 2, &key);
        assert_ne!(with_cert.signature, without_cert.signature);
    }
}
