//! Acceptor state persistence.
//!
//! The whole acceptor state lives in one `state.json` per acceptor:
//! `{max_promised, max_accepted, accepted_slot, accepted_value,
//! log_proposals}`. The file is rewritten atomically before any reply is
//! sent, so a restarted acceptor resumes exactly where its last answered
//! request left it.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use paxoskv_core::Ballot;

use crate::{load_json, save_json, StorageError};

/// Audit record for one ballot seen by an acceptor. Created on promise,
/// completed on accept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalRecord {
    pub proposal_number: Ballot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot: Option<u64>,
    pub tid: String,
    pub promise_time: f64,
    pub was_accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accept_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// The durable portion of an acceptor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistedAcceptorState {
    pub max_promised: Ballot,
    pub max_accepted: Ballot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_slot: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_value: Option<Value>,
    /// Ballot -> record, keyed by the raw ballot number.
    #[serde(default)]
    pub log_proposals: BTreeMap<u64, ProposalRecord>,
}

/// Handle on an acceptor's state file.
#[derive(Debug, Clone)]
pub struct AcceptorStore {
    state_path: PathBuf,
}

impl AcceptorStore {
    /// `dir` is the acceptor's private directory, e.g. `<data_dir>/acceptor1`.
    pub fn new(dir: PathBuf) -> Self {
        Self { state_path: dir.join("state.json") }
    }

    /// Read back persisted state; a missing file means a fresh acceptor.
    pub async fn load(&self) -> Result<PersistedAcceptorState, StorageError> {
        match load_json::<PersistedAcceptorState>(&self.state_path).await? {
            Some(state) => {
                info!(
                    path = %self.state_path.display(),
                    max_promised = %state.max_promised,
                    max_accepted = %state.max_accepted,
                    "loaded acceptor state"
                );
                Ok(state)
            }
            None => Ok(PersistedAcceptorState::default()),
        }
    }

    /// Persist the full state. Must complete before the acceptor replies.
    pub async fn save(&self, state: &PersistedAcceptorState) -> Result<(), StorageError> {
        save_json(&self.state_path, state).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("paxoskv-acceptor-store-{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn fresh_store_loads_zero_state() {
        let store = AcceptorStore::new(scratch_dir());
        let state = store.load().await.unwrap();
        assert!(state.max_promised.is_zero());
        assert!(state.max_accepted.is_zero());
        assert!(state.accepted_value.is_none());
        assert!(state.log_proposals.is_empty());
    }

    #[tokio::test]
    async fn state_survives_restart() {
        let dir = scratch_dir();
        let store = AcceptorStore::new(dir.clone());

        let ballot = Ballot::new(3, 1);
        let mut state = PersistedAcceptorState {
            max_promised: ballot,
            max_accepted: ballot,
            accepted_slot: Some(7),
            accepted_value: Some(json!({"type": "put", "key": "x", "value": "v"})),
            log_proposals: BTreeMap::new(),
        };
        state.log_proposals.insert(
            ballot.0,
            ProposalRecord {
                proposal_number: ballot,
                slot: Some(7),
                tid: "t-1".into(),
                promise_time: 1.0,
                was_accepted: true,
                accept_time: Some(2.0),
                value: state.accepted_value.clone(),
            },
        );
        store.save(&state).await.unwrap();

        // A new handle over the same directory sees the same state.
        let reloaded = AcceptorStore::new(dir.clone()).load().await.unwrap();
        assert_eq!(reloaded.max_promised, ballot);
        assert_eq!(reloaded.max_accepted, ballot);
        assert_eq!(reloaded.accepted_slot, Some(7));
        assert_eq!(reloaded.accepted_value, state.accepted_value);
        assert!(reloaded.log_proposals[&ballot.0].was_accepted);

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
