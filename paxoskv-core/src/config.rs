//! Per-role configuration, loaded from environment variables.
//!
//! Each node role reads its identity, listen port, peer host lists, data
//! directory, and timing parameters from the environment, with defaults that
//! match the standard three-acceptor deployment. Host lists are comma
//! separated `host:port` pairs.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ballot::MAX_PROPOSER_ID;
use crate::{quorum_size, CoreError};

/// A peer address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostPort {
    pub host: String,
    pub port: u16,
}

impl HostPort {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }

    /// Base URL for HTTP requests to this peer.
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl std::fmt::Display for HostPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for HostPort {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s.rsplit_once(':').ok_or_else(|| CoreError::HostEntry {
            entry: s.to_string(),
            reason: "expected host:port".into(),
        })?;
        if host.is_empty() {
            return Err(CoreError::HostEntry {
                entry: s.to_string(),
                reason: "empty host".into(),
            });
        }
        let port = port.parse().map_err(|_| CoreError::HostEntry {
            entry: s.to_string(),
            reason: "port is not a number".into(),
        })?;
        Ok(HostPort { host: host.to_string(), port })
    }
}

/// Parse a `host:port,host:port,…` list. Empty input yields an empty list.
pub fn parse_hosts(hosts: &str) -> Result<Vec<HostPort>, CoreError> {
    hosts
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(HostPort::from_str)
        .collect()
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr>(name: &str, default: &str) -> Result<T, CoreError> {
    let raw = env_or(name, default);
    raw.parse()
        .map_err(|_| CoreError::Config(format!("{name}={raw:?} failed to parse")))
}

/// Configuration for an acceptor node.
#[derive(Debug, Clone)]
pub struct AcceptorConfig {
    pub acceptor_id: u32,
    pub bind_address: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub total_acceptors: usize,
    /// Learners to notify after each successful accept.
    pub learner_hosts: Vec<HostPort>,
}

impl AcceptorConfig {
    pub fn from_env() -> Result<Self, CoreError> {
        Ok(Self {
            acceptor_id: env_parse("ACCEPTOR_ID", "1")?,
            bind_address: env_or("BIND_ADDRESS", "0.0.0.0"),
            port: env_parse("ACCEPTOR_PORT", "5001")?,
            data_dir: PathBuf::from(env_or("DATA_DIR", "/data")),
            total_acceptors: env_parse("TOTAL_ACCEPTORS", "3")?,
            learner_hosts: parse_hosts(&env_or("LEARNER_HOSTS", "learner1:7001,learner2:7002"))?,
        })
    }

    /// Directory holding this acceptor's durable state.
    pub fn state_dir(&self) -> PathBuf {
        self.data_dir.join(format!("acceptor{}", self.acceptor_id))
    }
}

/// Configuration for a proposer node.
#[derive(Debug, Clone)]
pub struct ProposerConfig {
    pub proposer_id: u32,
    pub bind_address: String,
    pub port: u16,
    pub acceptor_hosts: Vec<HostPort>,
    pub learner_hosts: Vec<HostPort>,
    /// Peer proposers that receive this node's leadership heartbeats.
    pub other_proposers: Vec<HostPort>,
    pub heartbeat_interval: Duration,
    pub leader_timeout: Duration,
}

impl ProposerConfig {
    pub fn from_env() -> Result<Self, CoreError> {
        let config = Self {
            proposer_id: env_parse("PROPOSER_ID", "1")?,
            bind_address: env_or("BIND_ADDRESS", "0.0.0.0"),
            port: env_parse("PROPOSER_PORT", "6001")?,
            acceptor_hosts: parse_hosts(&env_or(
                "ACCEPTOR_HOSTS",
                "acceptor1:5001,acceptor2:5002,acceptor3:5003",
            ))?,
            learner_hosts: parse_hosts(&env_or("LEARNER_HOSTS", "learner1:7001,learner2:7002"))?,
            other_proposers: parse_hosts(&env_or("OTHER_PROPOSERS", ""))?,
            heartbeat_interval: Duration::from_millis(env_parse("HEARTBEAT_INTERVAL", "500")?),
            leader_timeout: Duration::from_millis(env_parse("LEADER_TIMEOUT", "1500")?),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.proposer_id > MAX_PROPOSER_ID {
            return Err(CoreError::Config(format!(
                "proposer id {} exceeds the ballot id width ({} max)",
                self.proposer_id, MAX_PROPOSER_ID
            )));
        }
        if self.acceptor_hosts.is_empty() {
            return Err(CoreError::Config("no acceptors configured".into()));
        }
        if self.heartbeat_interval >= self.leader_timeout {
            return Err(CoreError::Config(format!(
                "heartbeat interval {:?} must be shorter than leader timeout {:?}",
                self.heartbeat_interval, self.leader_timeout
            )));
        }
        Ok(())
    }

    /// Majority size among the configured acceptors.
    pub fn quorum(&self) -> usize {
        quorum_size(self.acceptor_hosts.len())
    }
}

/// Configuration for a learner node.
#[derive(Debug, Clone)]
pub struct LearnerConfig {
    pub learner_id: u32,
    pub bind_address: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub total_acceptors: usize,
    /// Confirmations required before a slot is decided. Defaults to a
    /// majority of the acceptors.
    pub quorum_size: usize,
    /// Peer learners used for gap synchronization.
    pub other_learners: Vec<HostPort>,
    pub proposer_hosts: Vec<HostPort>,
}

impl LearnerConfig {
    pub fn from_env() -> Result<Self, CoreError> {
        let total_acceptors: usize = env_parse("TOTAL_ACCEPTORS", "3")?;
        let default_quorum = quorum_size(total_acceptors).to_string();
        let config = Self {
            learner_id: env_parse("LEARNER_ID", "1")?,
            bind_address: env_or("BIND_ADDRESS", "0.0.0.0"),
            port: env_parse("LEARNER_PORT", "7001")?,
            data_dir: PathBuf::from(env_or("DATA_DIR", "/data")),
            total_acceptors,
            quorum_size: env_parse("QUORUM_SIZE", &default_quorum)?,
            other_learners: parse_hosts(&env_or("OTHER_LEARNERS", ""))?,
            proposer_hosts: parse_hosts(&env_or(
                "PROPOSER_HOSTS",
                "proposer1:6001,proposer2:6002",
            ))?,
        };
        if config.quorum_size == 0 || config.quorum_size > config.total_acceptors {
            return Err(CoreError::Config(format!(
                "quorum size {} is outside 1..={}",
                config.quorum_size, config.total_acceptors
            )));
        }
        Ok(config)
    }

    /// Directory holding this learner's decision log and snapshots.
    pub fn state_dir(&self) -> PathBuf {
        self.data_dir.join(format!("learner{}", self.learner_id))
    }
}
