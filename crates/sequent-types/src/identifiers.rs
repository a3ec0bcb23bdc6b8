//! Newtype identifiers used throughout the ordering service.

use std::fmt;

/// Epoch number (monotonically increasing, genesis is 0).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct EpochNumber(pub u64);

impl EpochNumber {
    /// The genesis epoch: empty topology, no blocks.
    pub const GENESIS: Self = EpochNumber(0);

    /// The next epoch.
    pub fn next(self) -> Self {
        EpochNumber(self.0 + 1)
    }

    /// The previous epoch, `None` at genesis.
    pub fn prev(self) -> Option<Self> {
        self.0.checked_sub(1).map(EpochNumber)
    }
}

impl fmt::Display for EpochNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Epoch({})", self.0)
    }
}

/// Position of a block in the totally ordered stream. Unique across history.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct BlockNumber(pub u64);

impl BlockNumber {
    /// The following block number.
    pub fn next(self) -> Self {
        BlockNumber(self.0 + 1)
    }
}

impl fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Block({})", self.0)
    }
}

/// PBFT view number. Rotates the leader on failure; 0 is the original leader.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct ViewNumber(pub u64);

impl ViewNumber {
    /// The initial view of every slot.
    pub const INITIAL: Self = ViewNumber(0);

    /// The next view.
    pub fn next(self) -> Self {
        ViewNumber(self.0 + 1)
    }
}

impl fmt::Display for ViewNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "View({})", self.0)
    }
}

/// Correlation id for admin requests routed through the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub u64);
