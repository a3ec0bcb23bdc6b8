//! State transfer for the sequent ordering service.
//!
//! Bulk block transfer replaces live PBFT when a node is onboarding into an
//! existing network or has fallen behind by more than the catch-up
//! threshold. The manager is a sans-io state machine like the rest of the
//! node: network sends, storage writes, and certificate verification are
//! all returned as actions.

mod config;
mod state;

pub use config::SyncConfig;
pub use state::StateTransferState;
