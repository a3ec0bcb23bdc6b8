//! Peer identity.

use std::fmt;

/// Opaque peer identity.
///
/// Total-ordered so leader rotation and tie-breaking are deterministic on
/// every node. On the wire the identity travels as its UTF-8 bytes.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct PeerId(String);

impl PeerId {
    /// Create a peer id from a name.
    pub fn new(name: impl Into<String>) -> Self {
        PeerId(name.into())
    }

    /// The identity as wire bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Parse an identity from wire bytes.
    pub fn from_utf8(bytes: &[u8]) -> Option<Self> {
        std::str::from_utf8(bytes).ok().map(PeerId::new)
    }

    /// The identity as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.0)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_lexicographic() {
        let mut peers = vec![PeerId::new("p2"), PeerId::new("p0"), PeerId::new("p1")];
        peers.sort();
        assert_eq!(peers[0].as_str(), "p0");
        assert_eq!(peers[2].as_str(), "p2");
    }

    #[test]
    fn utf8_roundtrip() {
        let peer = PeerId::new("sequencer-3");
        assert_eq!(PeerId::from_utf8(peer.as_bytes()), Some(peer));
        assert_eq!(PeerId::from_utf8(&[0xff, 0xfe]), None);
    }
}
