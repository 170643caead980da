//! # paxoskv Core Types
//!
//! Shared vocabulary for every paxoskv node role and for the client library:
//! wire message definitions, ballot arithmetic, quorum math, node roles, and
//! the configuration structures each role loads from its environment.
//!
//! The crate is deliberately free of I/O. Everything here is plain data that
//! the consensus, storage, network, and API crates agree on.

pub mod ballot;
pub mod config;
pub mod messages;

use serde::{Deserialize, Serialize};

pub use ballot::Ballot;

/// Errors produced while interpreting configuration or protocol data.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A configuration value was missing or failed to parse.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A host list entry was not of the form `host:port`.
    #[error("invalid host entry {entry:?}: {reason}")]
    HostEntry { entry: String, reason: String },
}

/// Role a proposer currently plays in the leader-election state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Follower => write!(f, "FOLLOWER"),
            Role::Candidate => write!(f, "CANDIDATE"),
            Role::Leader => write!(f, "LEADER"),
        }
    }
}

/// Size of a majority quorum among `total` acceptors.
pub fn quorum_size(total: usize) -> usize {
    total / 2 + 1
}

/// Seconds since the Unix epoch as a float, the timestamp format every wire
/// message carries.
pub fn unix_ts() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Generate a fresh transaction id for response correlation.
pub fn generate_tid() -> String {
    uuid::Uuid::new_v4().to_string()
}
