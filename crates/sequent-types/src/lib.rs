//! Foundation types for the sequent BFT ordering service.
//!
//! This crate provides the types shared by every layer:
//!
//! - **Primitives**: [`Hash`], keys and signatures
//! - **Identity**: [`PeerId`], [`OrderingTopology`], [`Membership`]
//! - **Epoch structure**: [`EpochInfo`], [`Segment`] assignment
//! - **Consensus messages**: the PBFT variants and [`CommitCertificate`]
//! - **Store records**: immutable snapshots exchanged with the epoch store
//!
//! It is self-contained: no other workspace crate is a dependency, making it
//! the foundation layer.

mod block;
mod certificate;
mod crypto;
mod epoch;
mod hash;
mod identifiers;
mod peer;
mod pbft;
mod segment;
pub mod signing;
mod store;
mod topology;

pub use block::{
    BlockMetadata, BlockProvenance, OrderedBlock, OrderedBlockForOutput, OrderingPayload,
};
pub use certificate::{CertificateError, CommitCertificate};
pub use crypto::{KeyPair, PublicKey, Signature};
pub use epoch::EpochInfo;
pub use hash::Hash;
pub use identifiers::{BlockNumber, EpochNumber, RequestId, ViewNumber};
pub use peer::PeerId;
pub use pbft::{Commit, NewView, PbftMessage, PrePrepare, Prepare, PreparedCertificate, ViewChange};
pub use segment::{assign_segments, leader_of_slot, Segment};
pub use store::{CompletedEpoch, EpochInProgress, OnboardingSnapshot, StoredEpoch};
pub use topology::{Membership, OrderingTopology};

/// Test helpers shared by unit and integration tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    /// Deterministic key for peer index `i`.
    pub fn test_key(i: usize) -> KeyPair {
        let mut seed = [0u8; 32];
        seed[0] = i as u8;
        seed[1] = 0xa5;
        KeyPair::from_seed(&seed)
    }

    /// Peer id for index `i`.
    pub fn test_peer(i: usize) -> PeerId {
        PeerId::new(format!("peer-{i}"))
    }

    /// Topology of `n` peers with deterministic keys.
    pub fn test_topology(n: usize, activation_time: Duration) -> Arc<OrderingTopology> {
        let peers: BTreeMap<_, _> = (0..n)
            .map(|i| (test_peer(i), test_key(i).public_key()))
            .collect();
        Arc::new(OrderingTopology::new(peers, activation_time))
    }
}
