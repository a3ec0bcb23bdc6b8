//! Ordering topology and membership.

use crate::{PeerId, PublicKey};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// The set of peers active for an epoch, each bound to the verification key
/// valid for that epoch.
///
/// Fixed for the duration of an epoch. The `BTreeMap` keeps peers in identity
/// order, which every deterministic choice (segment assignment, leader
/// rotation, tie-breaks) relies on.
#[derive(Clone, PartialEq, Eq)]
pub struct OrderingTopology {
    peers: BTreeMap<PeerId, PublicKey>,
    /// When this topology became active.
    activation_time: Duration,
}

impl OrderingTopology {
    /// Build a topology from peers and their keys.
    pub fn new(peers: BTreeMap<PeerId, PublicKey>, activation_time: Duration) -> Self {
        Self {
            peers,
            activation_time,
        }
    }

    /// The empty genesis topology.
    pub fn genesis() -> Self {
        Self {
            peers: BTreeMap::new(),
            activation_time: Duration::ZERO,
        }
    }

    /// Number of peers.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether the topology has no peers (genesis only).
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Whether `peer` is a member.
    pub fn contains(&self, peer: &PeerId) -> bool {
        self.peers.contains_key(peer)
    }

    /// The verification key bound to `peer` for this epoch.
    pub fn public_key(&self, peer: &PeerId) -> Option<PublicKey> {
        self.peers.get(peer).copied()
    }

    /// Peers in identity order.
    pub fn peers(&self) -> impl Iterator<Item = &PeerId> + '_ {
        self.peers.keys()
    }

    /// Peers in identity order, collected.
    pub fn sorted_peers(&self) -> Vec<PeerId> {
        self.peers.keys().cloned().collect()
    }

    /// The peer at `index` in identity order.
    pub fn peer_at(&self, index: usize) -> Option<&PeerId> {
        self.peers.keys().nth(index)
    }

    /// When this topology became active.
    pub fn activation_time(&self) -> Duration {
        self.activation_time
    }
}

impl fmt::Debug for OrderingTopology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderingTopology")
            .field("peers", &self.peers.keys().collect::<Vec<_>>())
            .field("activation_time", &self.activation_time)
            .finish()
    }
}

/// This peer's view of an active topology.
#[derive(Clone, Debug)]
pub struct Membership {
    /// The local peer.
    pub me: PeerId,
    /// The active ordering topology.
    pub topology: Arc<OrderingTopology>,
}

impl Membership {
    /// Build a membership view. `me` need not be in the topology (an
    /// onboarding node queries a topology it is not yet part of).
    pub fn new(me: PeerId, topology: Arc<OrderingTopology>) -> Self {
        Self { me, topology }
    }

    /// Topology size `n`.
    pub fn n(&self) -> usize {
        self.topology.len()
    }

    /// Fault tolerance `f = (n - 1) / 3`.
    pub fn f(&self) -> usize {
        self.n().saturating_sub(1) / 3
    }

    /// Strong quorum `2f + 1`.
    pub fn quorum(&self) -> usize {
        2 * self.f() + 1
    }

    /// Weak quorum `f + 1`: guaranteed to contain one honest peer.
    pub fn weak_quorum(&self) -> usize {
        self.f() + 1
    }

    /// Whether the local peer is part of the topology.
    pub fn is_member(&self) -> bool {
        self.topology.contains(&self.me)
    }

    /// Every peer except the local one, in identity order.
    pub fn others(&self) -> Vec<PeerId> {
        self.topology
            .peers()
            .filter(|p| **p != self.me)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KeyPair;

    fn topology_of(n: usize) -> Arc<OrderingTopology> {
        let peers = (0..n)
            .map(|i| {
                let key = KeyPair::from_seed(&[i as u8; 32]);
                (PeerId::new(format!("p{i}")), key.public_key())
            })
            .collect();
        Arc::new(OrderingTopology::new(peers, Duration::ZERO))
    }

    #[test]
    fn quorum_sizes() {
        for (n, f, quorum, weak) in [(1, 0, 1, 1), (4, 1, 3, 2), (7, 2, 5, 3), (10, 3, 7, 4)] {
            let m = Membership::new(PeerId::new("p0"), topology_of(n));
            assert_eq!(m.f(), f, "n={n}");
            assert_eq!(m.quorum(), quorum, "n={n}");
            assert_eq!(m.weak_quorum(), weak, "n={n}");
        }
    }

    #[test]
    fn others_excludes_self() {
        let m = Membership::new(PeerId::new("p1"), topology_of(4));
        let others = m.others();
        assert_eq!(others.len(), 3);
        assert!(!others.contains(&PeerId::new("p1")));
    }
}
