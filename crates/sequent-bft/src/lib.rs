//! Epoch-structured PBFT ordering state machine.
//!
//! This crate implements the consensus module of the ordering service as a
//! synchronous, event-driven model:
//!
//! - [`ConsensusState`] owns the epoch lifecycle, routes verified PBFT
//!   messages, and arbitrates between live ordering and catch-up.
//! - [`EpochState`] aggregates the segments of the active epoch and tracks
//!   which slots have been decided.
//! - `SegmentState` runs one PBFT instance per slot of one leader's segment,
//!   including the view-change sub-protocol.
//! - [`CatchupDetector`] watches how far ahead the rest of the network is.
//!
//! All I/O is performed by the runner via returned `Action`s; signature
//! verification and storage are delegated work whose results come back as
//! events.
//!
//! # Protocol shape
//!
//! Each epoch partitions its block slots into per-leader segments. Within a
//! segment every slot runs classic three-phase PBFT:
//!
//! - **Pre-prepare**: the slot's leader binds a payload digest to
//!   (block, view) and broadcasts it.
//! - **Prepare**: peers acknowledge; the pre-prepare plus `2f` matching
//!   prepares form a prepared certificate.
//! - **Commit**: prepared peers vote to finalize; `2f + 1` matching commits
//!   form the commit certificate that proves the decision.
//!
//! A slot that stalls votes itself into the next view; `2f + 1` view-change
//! votes let the rotated leader resume from the highest prepared
//! certificate, so a potentially-committed value is never lost.

mod catchup;
mod config;
mod epoch_state;
mod segment;
mod state;
mod validation;

pub use catchup::CatchupDetector;
pub use config::BftConfig;
pub use epoch_state::EpochState;
pub use segment::SegmentState;
pub use state::{ConsensusMode, ConsensusState, RecoveredState};
pub use validation::{signature_checks, UnknownSigner};
