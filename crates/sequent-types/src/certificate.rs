//! Commit certificates.

use crate::{BlockMetadata, Commit, Membership, OrderingTopology, PeerId};
use std::collections::BTreeSet;

/// Why a commit certificate failed validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CertificateError {
    /// Fewer than `2f + 1` distinct commits.
    #[error("certificate has {got} commits, quorum is {quorum}")]
    BelowQuorum {
        /// Distinct commits present.
        got: usize,
        /// Required strong quorum.
        quorum: usize,
    },
    /// The same peer appears more than once.
    #[error("duplicate commit from {0}")]
    DuplicateSender(PeerId),
    /// A committing peer is not in the epoch's topology.
    #[error("commit from {0} outside the topology")]
    UnknownSender(PeerId),
    /// Commits disagree on (metadata, view, digest).
    #[error("commits disagree on block, view, or digest")]
    Mismatched,
    /// A commit signature does not verify.
    #[error("commit signature from {0} does not verify")]
    BadSignature(PeerId),
}

/// Proof of a decision: at least `2f + 1` matching commits from distinct
/// topology peers. Self-authenticating given the topology of its epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitCertificate {
    /// The matching commits.
    pub commits: Vec<Commit>,
}

impl CommitCertificate {
    /// Build a certificate from collected commits.
    pub fn new(commits: Vec<Commit>) -> Self {
        Self { commits }
    }

    /// The slot this certificate decides, if non-empty.
    pub fn metadata(&self) -> Option<&BlockMetadata> {
        self.commits.first().map(|c| &c.metadata)
    }

    /// Structural validation: quorum size, distinct in-topology senders,
    /// agreement on (metadata, view, digest). Signature checks are separate
    /// because they are delegated work.
    pub fn validate_structure(&self, membership: &Membership) -> Result<(), CertificateError> {
        let quorum = membership.quorum();
        let first = match self.commits.first() {
            Some(first) => first,
            None => {
                return Err(CertificateError::BelowQuorum { got: 0, quorum });
            }
        };

        let mut seen = BTreeSet::new();
        for commit in &self.commits {
            if !membership.topology.contains(&commit.sender) {
                return Err(CertificateError::UnknownSender(commit.sender.clone()));
            }
            if !seen.insert(commit.sender.clone()) {
                return Err(CertificateError::DuplicateSender(commit.sender.clone()));
            }
            if commit.metadata != first.metadata
                || commit.view != first.view
                || commit.digest != first.digest
            {
                return Err(CertificateError::Mismatched);
            }
        }
        if seen.len() < quorum {
            return Err(CertificateError::BelowQuorum {
                got: seen.len(),
                quorum,
            });
        }
        Ok(())
    }

    /// Full cryptographic validation under `topology`. Synchronous; callers
    /// on an actor thread should route through their runner's verification
    /// action instead.
    pub fn verify_signatures(&self, topology: &OrderingTopology) -> Result<(), CertificateError> {
        for commit in &self.commits {
            let key = topology
                .public_key(&commit.sender)
                .ok_or_else(|| CertificateError::UnknownSender(commit.sender.clone()))?;
            if !key.verify(&commit.signing_bytes(), &commit.signature) {
                return Err(CertificateError::BadSignature(commit.sender.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BlockNumber, EpochNumber, Hash, KeyPair, ViewNumber};
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    fn harness(n: usize) -> (Membership, Vec<KeyPair>) {
        let keys: Vec<KeyPair> = (0..n).map(|i| KeyPair::from_seed(&[i as u8; 32])).collect();
        let peers: BTreeMap<_, _> = keys
            .iter()
            .enumerate()
            .map(|(i, k)| (PeerId::new(format!("p{i}")), k.public_key()))
            .collect();
        let topology = Arc::new(OrderingTopology::new(peers, Duration::ZERO));
        (Membership::new(PeerId::new("p0"), topology), keys)
    }

    fn commit(i: usize, key: &KeyPair, digest: Hash) -> Commit {
        Commit::new(
            BlockMetadata::new(EpochNumber(1), BlockNumber(0)),
            ViewNumber(0),
            digest,
            PeerId::new(format!("p{i}")),
            0,
            key,
        )
    }

    #[test]
    fn accepts_quorum_of_matching_commits() {
        let (membership, keys) = harness(4);
        let digest = Hash::digest(b"payload");
        let commits: Vec<_> = keys
            .iter()
            .take(3)
            .enumerate()
            .map(|(i, k)| commit(i, k, digest))
            .collect();
        let cert = CommitCertificate::new(commits);
        assert_eq!(cert.validate_structure(&membership), Ok(()));
        assert_eq!(cert.verify_signatures(&membership.topology), Ok(()));
    }

    #[test]
    fn rejects_below_quorum() {
        let (membership, keys) = harness(4);
        let digest = Hash::digest(b"payload");
        let cert = CommitCertificate::new(vec![commit(0, &keys[0], digest)]);
        assert_eq!(
            cert.validate_structure(&membership),
            Err(CertificateError::BelowQuorum { got: 1, quorum: 3 })
        );
    }

    #[test]
    fn rejects_duplicate_and_mismatched() {
        let (membership, keys) = harness(4);
        let digest = Hash::digest(b"payload");

        let duplicated = CommitCertificate::new(vec![
            commit(0, &keys[0], digest),
            commit(0, &keys[0], digest),
            commit(1, &keys[1], digest),
        ]);
        assert!(matches!(
            duplicated.validate_structure(&membership),
            Err(CertificateError::DuplicateSender(_))
        ));

        let mismatched = CommitCertificate::new(vec![
            commit(0, &keys[0], digest),
            commit(1, &keys[1], Hash::digest(b"other")),
            commit(2, &keys[2], digest),
        ]);
        assert_eq!(
            mismatched.validate_structure(&membership),
            Err(CertificateError::Mismatched)
        );
    }

    #[test]
    fn rejects_forged_signature() {
        let (membership, keys) = harness(4);
        let digest = Hash::digest(b"payload");
        // p1's commit signed with p3's key.
        let forged = Commit::new(
            BlockMetadata::new(EpochNumber(1), BlockNumber(0)),
            ViewNumber(0),
            digest,
            PeerId::new("p1"),
            0,
            &keys[3],
        );
        let cert = CommitCertificate::new(vec![
            commit(0, &keys[0], digest),
            forged,
            commit(2, &keys[2], digest),
        ]);
        assert_eq!(cert.validate_structure(&membership), Ok(()));
        assert!(matches!(
            cert.verify_signatures(&membership.topology),
            Err(CertificateError::BadSignature(_))
        ));
    }
}
