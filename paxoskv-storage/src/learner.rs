//! Learner persistence: the decision log and application-state snapshots.
//!
//! The decision log (`decisions_log.json`) is the map of every slot the
//! learner has heard about, rewritten whenever an entry changes and always
//! before the triggering LEARN is acknowledged. Snapshots
//! (`state_snapshot.json`) capture `{state, version, timestamp}` every K
//! applied decisions so restarts replay only the tail of the log.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use paxoskv_core::messages::DecisionRecord;
use paxoskv_core::unix_ts;

use crate::{load_json, save_json, StorageError};

/// A point-in-time copy of the applied key-value state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub state: BTreeMap<String, Value>,
    /// `last_applied` at the moment the snapshot was taken.
    pub version: u64,
    pub timestamp: f64,
}

impl Snapshot {
    pub fn new(state: BTreeMap<String, Value>, version: u64) -> Self {
        Self { state, version, timestamp: unix_ts() }
    }
}

/// Handle on a learner's decision log and snapshot files.
#[derive(Debug, Clone)]
pub struct LearnerStore {
    log_path: PathBuf,
    snapshot_path: PathBuf,
}

impl LearnerStore {
    /// `dir` is the learner's private directory, e.g. `<data_dir>/learner1`.
    pub fn new(dir: PathBuf) -> Self {
        Self {
            log_path: dir.join("decisions_log.json"),
            snapshot_path: dir.join("state_snapshot.json"),
        }
    }

    /// Load the decision log; missing file means no decisions yet.
    pub async fn load_decisions(&self) -> Result<BTreeMap<u64, DecisionRecord>, StorageError> {
        let decisions = load_json::<BTreeMap<u64, DecisionRecord>>(&self.log_path)
            .await?
            .unwrap_or_default();
        if !decisions.is_empty() {
            info!(
                path = %self.log_path.display(),
                entries = decisions.len(),
                "loaded decision log"
            );
        }
        Ok(decisions)
    }

    /// Persist the decision log. Must complete before the LEARN ack.
    pub async fn save_decisions(
        &self,
        decisions: &BTreeMap<u64, DecisionRecord>,
    ) -> Result<(), StorageError> {
        save_json(&self.log_path, decisions).await
    }

    pub async fn load_snapshot(&self) -> Result<Option<Snapshot>, StorageError> {
        load_json(&self.snapshot_path).await
    }

    pub async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<(), StorageError> {
        save_json(&self.snapshot_path, snapshot).await
    }
}
