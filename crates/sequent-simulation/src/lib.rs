//! Deterministic simulation of a sequent ordering network.
//!
//! Every node is a [`sequent_node::NodeStateMachine`]; the
//! [`SimulationRunner`] owns the global event queue and executes every
//! action the machines return. Network latency, jitter, and packet loss are
//! driven by a seeded RNG, so any failure reproduces from its seed. Fault
//! injection covers crash-silent peers, byzantine commit equivocation,
//! partitions, and full node restarts from persisted state.

mod event_queue;
mod metrics;
mod network;
mod runner;
mod storage;

/// Index of a node within a simulation (simulation-only routing; the
/// protocol itself addresses peers by [`sequent_types::PeerId`]).
pub type NodeIndex = u32;

pub use metrics::SimulationMetrics;
pub use network::{NetworkConfig, SimulatedNetwork};
pub use runner::{NodeHarness, SimulationConfig, SimulationRunner, SimulationStats};
pub use storage::SimEpochStore;
