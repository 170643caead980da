//! # paxoskv Consensus Engine
//!
//! The three Multi-Paxos role state machines:
//!
//! - [`Acceptor`]: the stateful voter. Orders promises and accepts by
//!   ballot, persists every transition before replying, and notifies
//!   learners after each accept.
//! - [`Proposer`]: drives the protocol. Runs leader election over the
//!   acceptors, emits heartbeats while leading, and pushes queued client
//!   writes through per-slot accept rounds.
//! - [`Learner`]: tallies accept notifications, declares slots decided at
//!   quorum, applies the decided sequence to the key-value state in strict
//!   slot order, and repairs gaps by syncing with peer learners.
//!
//! The state machines are transport-agnostic: they consume and produce the
//! wire message types from `paxoskv-core` and lean on `paxoskv-network` for
//! fan-out. HTTP routing lives in `paxoskv-api`.

mod acceptor;
mod learner;
mod proposer;

pub use acceptor::Acceptor;
pub use learner::{Learner, LearnerReadError};
pub use proposer::{ProposeError, Proposer, ReadError};

use paxoskv_network::NetworkError;
use paxoskv_storage::StorageError;

/// Failures a role state machine can surface to its HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum ConsensusError {
    /// Stable storage refused the write that must precede the reply. The
    /// in-memory state was left untouched.
    #[error("durability failure: {0}")]
    Durability(#[from] StorageError),

    /// The peer transport could not be constructed.
    #[error("transport failure: {0}")]
    Transport(#[from] NetworkError),
}
