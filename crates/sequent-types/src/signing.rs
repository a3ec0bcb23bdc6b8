//! Canonical signing-message construction.
//!
//! Every PBFT message is signed over a domain-separated byte string rather
//! than its wire encoding, so re-serialization can never invalidate a
//! signature. Verification keys are resolved from the topology of the
//! message's epoch.

use crate::{BlockMetadata, Hash, ViewNumber};

/// Domain tag for pre-prepare signatures.
pub const DOMAIN_PRE_PREPARE: &[u8] = b"sequent.pbft.pre-prepare:";
/// Domain tag for prepare signatures.
pub const DOMAIN_PREPARE: &[u8] = b"sequent.pbft.prepare:";
/// Domain tag for commit signatures.
pub const DOMAIN_COMMIT: &[u8] = b"sequent.pbft.commit:";
/// Domain tag for view-change signatures.
pub const DOMAIN_VIEW_CHANGE: &[u8] = b"sequent.pbft.view-change:";
/// Domain tag for new-view signatures.
pub const DOMAIN_NEW_VIEW: &[u8] = b"sequent.pbft.new-view:";

fn message_bytes(
    domain: &[u8],
    metadata: &BlockMetadata,
    view: ViewNumber,
    digest: &Hash,
) -> Vec<u8> {
    let mut message = Vec::with_capacity(domain.len() + 24 + 32);
    message.extend_from_slice(domain);
    message.extend_from_slice(&metadata.epoch.0.to_le_bytes());
    message.extend_from_slice(&metadata.block_number.0.to_le_bytes());
    message.extend_from_slice(&view.0.to_le_bytes());
    message.extend_from_slice(digest.as_bytes());
    message
}

/// Signing bytes for a pre-prepare over `digest` at (metadata, view).
pub fn pre_prepare_message(metadata: &BlockMetadata, view: ViewNumber, digest: &Hash) -> Vec<u8> {
    message_bytes(DOMAIN_PRE_PREPARE, metadata, view, digest)
}

/// Signing bytes for a prepare.
pub fn prepare_message(metadata: &BlockMetadata, view: ViewNumber, digest: &Hash) -> Vec<u8> {
    message_bytes(DOMAIN_PREPARE, metadata, view, digest)
}

/// Signing bytes for a commit.
pub fn commit_message(metadata: &BlockMetadata, view: ViewNumber, digest: &Hash) -> Vec<u8> {
    message_bytes(DOMAIN_COMMIT, metadata, view, digest)
}

/// Signing bytes for a view-change vote. `prepared_summary` digests the
/// attached prepared certificate, or is `Hash::ZERO` when none is held.
pub fn view_change_message(
    metadata: &BlockMetadata,
    new_view: ViewNumber,
    prepared_summary: &Hash,
) -> Vec<u8> {
    message_bytes(DOMAIN_VIEW_CHANGE, metadata, new_view, prepared_summary)
}

/// Signing bytes for a new-view. `content_summary` digests the bundled
/// view-change set and pre-prepare.
pub fn new_view_message(
    metadata: &BlockMetadata,
    new_view: ViewNumber,
    content_summary: &Hash,
) -> Vec<u8> {
    message_bytes(DOMAIN_NEW_VIEW, metadata, new_view, content_summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BlockNumber, EpochNumber};

    #[test]
    fn domains_separate_message_kinds() {
        let metadata = BlockMetadata::new(EpochNumber(1), BlockNumber(3));
        let digest = Hash::digest(b"payload");
        let prepare = prepare_message(&metadata, ViewNumber(0), &digest);
        let commit = commit_message(&metadata, ViewNumber(0), &digest);
        assert_ne!(prepare, commit);
    }
}
