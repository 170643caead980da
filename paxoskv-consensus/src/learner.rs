//! The learner role: decision tally, ordered application, and gap repair.
//!
//! Learners hear `LEARN` notifications from acceptors and declare a slot
//! decided once a quorum of distinct acceptors has confirmed it. Decided
//! slots are applied to the key-value state strictly in slot order; missing
//! slots are fetched from peer learners. The decision log is persisted
//! before any LEARN is acknowledged, and the applied state is snapshotted
//! every few decisions so restarts replay only the tail.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use paxoskv_core::config::{HostPort, LearnerConfig};
use paxoskv_core::messages::{
    ConsistencyLevel, DecisionRecord, Learn, LearnAck, Operation, ReadRequest, ReadResponse,
    SyncRequest, SyncResponse,
};
use paxoskv_core::unix_ts;
use paxoskv_network::PeerClient;
use paxoskv_storage::{LearnerStore, Snapshot};

use crate::ConsensusError;

/// Snapshot the applied state every this many applied decisions.
const SNAPSHOT_EVERY: u64 = 10;

/// Cadence of the background gap check.
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(5);

/// Chance per maintenance tick of probing a peer for divergence.
const CONSISTENCY_PROBE_CHANCE: f64 = 0.1;

/// Why a learner refused a read.
#[derive(Debug, thiserror::Error)]
pub enum LearnerReadError {
    /// Strong reads must go through the leader proposer's read pipeline.
    #[error("strong reads are served by the leader proposer")]
    StrongReadRefused,

    /// The query had neither a key nor a recognized type.
    #[error("unrecognized query shape")]
    BadQuery,
}

struct LearnerInner {
    decisions: BTreeMap<u64, DecisionRecord>,
    last_applied: u64,
    highest_seen: u64,
    state: BTreeMap<String, Value>,
    /// Peers whose sync responses conflicted with local decisions; no
    /// further merges are taken from them.
    halted_peers: HashSet<u32>,
}

/// The learner state machine. Decision log and applied state share one lock
/// so apply cascades observe a consistent view.
pub struct Learner {
    id: u32,
    quorum: usize,
    other_learners: Vec<HostPort>,
    store: LearnerStore,
    peers: PeerClient,
    inner: Mutex<LearnerInner>,
    /// Gap ranges noticed by LEARN ingestion, drained by the background
    /// sync task so request handling never blocks on peer RPCs.
    gap_tx: mpsc::UnboundedSender<(u64, u64)>,
    gap_rx: Mutex<Option<mpsc::UnboundedReceiver<(u64, u64)>>>,
}

impl Learner {
    /// Build a learner, reloading the decision log and the latest snapshot
    /// and replaying decided slots the snapshot does not yet cover.
    pub async fn new(config: &LearnerConfig) -> Result<Self, ConsensusError> {
        let store = LearnerStore::new(config.state_dir());
        let decisions = store.load_decisions().await?;
        let snapshot = store.load_snapshot().await?;

        let (mut state, mut last_applied) = match snapshot {
            Some(snapshot) => (snapshot.state, snapshot.version),
            None => (BTreeMap::new(), 0),
        };

        // Replay the decided tail above the snapshot.
        let mut replayed = 0u64;
        while let Some(entry) = decisions.get(&(last_applied + 1)) {
            if !entry.decided {
                break;
            }
            Self::apply_value(&mut state, &entry.value);
            last_applied += 1;
            replayed += 1;
        }

        let highest_seen = decisions.keys().next_back().copied().unwrap_or(0).max(last_applied);
        info!(
            learner_id = config.learner_id,
            decisions = decisions.len(),
            last_applied,
            highest_seen,
            replayed,
            "learner initialized"
        );

        let (gap_tx, gap_rx) = mpsc::unbounded_channel();
        Ok(Self {
            id: config.learner_id,
            quorum: config.quorum_size,
            other_learners: config.other_learners.clone(),
            store,
            peers: PeerClient::with_default_timeout()?,
            inner: Mutex::new(LearnerInner {
                decisions,
                last_applied,
                highest_seen,
                state,
                halted_peers: HashSet::new(),
            }),
            gap_tx,
            gap_rx: Mutex::new(Some(gap_rx)),
        })
    }

    /// Spawn the background tasks: a drain of gap notices queued by LEARN
    /// ingestion, and the periodic maintenance loop that re-runs the gap
    /// check with an occasional consistency probe against a random peer.
    pub async fn start(self: Arc<Self>) {
        if let Some(mut gap_rx) = self.gap_rx.lock().await.take() {
            let me = Arc::clone(&self);
            tokio::spawn(async move {
                while let Some((from, to)) = gap_rx.recv().await {
                    me.request_sync(from, to).await;
                }
            });
        }

        let me = Arc::clone(&self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(MAINTENANCE_INTERVAL);
            loop {
                ticker.tick().await;
                me.run_gap_check().await;
                let probe = {
                    let mut rng = rand::thread_rng();
                    rng.gen_bool(CONSISTENCY_PROBE_CHANCE)
                };
                if probe {
                    me.consistency_probe().await;
                }
            }
        });
    }

    // -- LEARN ingestion -----------------------------------------------------

    /// Tally one `LEARN`. Confirmations are a set, so retransmits are
    /// harmless. Once a quorum of acceptors has confirmed the slot it is
    /// decided and the apply cascade runs. The decision log is persisted
    /// before the ack goes out.
    pub async fn handle_learn(&self, msg: Learn) -> Result<LearnAck, ConsensusError> {
        let mut inner = self.inner.lock().await;
        let now = unix_ts();

        match inner.decisions.entry(msg.slot) {
            std::collections::btree_map::Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.value != msg.value {
                    if entry.decided {
                        // A decided slot never changes value. The local
                        // decision wins; this notification is discarded.
                        error!(
                            learner_id = self.id,
                            slot = msg.slot,
                            acceptor = msg.acceptor_id,
                            "inconsistency alert: LEARN conflicts with a decided slot"
                        );
                    } else {
                        warn!(
                            learner_id = self.id,
                            slot = msg.slot,
                            acceptor = msg.acceptor_id,
                            "conflicting LEARN for undecided slot; keeping first value"
                        );
                    }
                    return Ok(LearnAck::new(self.id, msg.slot));
                }
                entry.confirming_acceptors.insert(msg.acceptor_id);
                entry.last_seen = now;
            }
            std::collections::btree_map::Entry::Vacant(vacant) => {
                debug!(learner_id = self.id, slot = msg.slot, acceptor = msg.acceptor_id, "new slot seen");
                vacant.insert(DecisionRecord {
                    slot: msg.slot,
                    proposal_number: msg.proposal_number,
                    value: msg.value.clone(),
                    confirming_acceptors: [msg.acceptor_id].into(),
                    first_seen: now,
                    last_seen: now,
                    decided: false,
                });
            }
        }

        let newly_decided = {
            let entry = inner
                .decisions
                .get_mut(&msg.slot)
                .filter(|entry| !entry.decided && entry.confirming_acceptors.len() >= self.quorum);
            match entry {
                Some(entry) => {
                    entry.decided = true;
                    true
                }
                None => false,
            }
        };
        if newly_decided {
            info!(learner_id = self.id, slot = msg.slot, "slot decided");
            self.apply_cascade(&mut inner).await;
        }

        inner.highest_seen = inner.highest_seen.max(msg.slot);
        self.store.save_decisions(&inner.decisions).await?;

        let gap = Self::gap_range(&inner);
        drop(inner);
        if let Some((from, to)) = gap {
            let _ = self.gap_tx.send((from, to));
        }

        Ok(LearnAck::new(self.id, msg.slot))
    }

    /// Apply decided slots in order starting right after `last_applied`,
    /// snapshotting every `SNAPSHOT_EVERY` applied decisions.
    async fn apply_cascade(&self, inner: &mut LearnerInner) {
        loop {
            let next = inner.last_applied + 1;
            let value = match inner.decisions.get(&next) {
                Some(entry) if entry.decided => entry.value.clone(),
                _ => break,
            };
            Self::apply_value(&mut inner.state, &value);
            inner.last_applied = next;
            debug!(learner_id = self.id, slot = next, "applied decision");

            if inner.last_applied % SNAPSHOT_EVERY == 0 {
                let snapshot = Snapshot::new(inner.state.clone(), inner.last_applied);
                if let Err(err) = self.store.save_snapshot(&snapshot).await {
                    error!(learner_id = self.id, error = %err, "snapshot write failed");
                }
            }
        }
    }

    /// Execute one decided value against the key-value state. The value
    /// wraps an operation document: put assigns, delete removes, noop only
    /// advances the sequence.
    fn apply_value(state: &mut BTreeMap<String, Value>, value: &Value) {
        let operation = value.get("operation").cloned().unwrap_or(Value::Null);
        match serde_json::from_value::<Operation>(operation) {
            Ok(Operation::Put { key, value }) => {
                state.insert(key, value);
            }
            Ok(Operation::Delete { key }) => {
                state.remove(&key);
            }
            Ok(Operation::Noop) => {}
            Err(err) => {
                // The slot still advances; an unreadable operation must not
                // wedge the sequence.
                warn!(error = %err, "unrecognized operation in decided value");
            }
        }
    }

    /// First missing slot between the applied watermark and the highest
    /// slot heard of, if any.
    fn gap_range(inner: &LearnerInner) -> Option<(u64, u64)> {
        let mut next = inner.last_applied + 1;
        while next <= inner.highest_seen {
            if !inner.decisions.contains_key(&next) {
                return Some((next, inner.highest_seen));
            }
            next += 1;
        }
        None
    }

    // -- learner-to-learner sync ---------------------------------------------

    /// Ask peer learners for decisions in `[from, to]`; the first usable
    /// response is merged.
    async fn request_sync(&self, from: u64, to: u64) {
        if self.other_learners.is_empty() {
            return;
        }
        info!(learner_id = self.id, from, to, "requesting sync for gap");
        let request = SyncRequest::new(from, to, self.id);
        for peer in &self.other_learners {
            match self.peers.post_json::<SyncRequest, SyncResponse>(peer, "/sync", &request).await {
                Ok(response) => {
                    self.merge_sync_response(response).await;
                    return;
                }
                Err(err) => {
                    warn!(learner_id = self.id, peer = %peer, error = %err, "sync request failed");
                }
            }
        }
    }

    /// Serve a peer's sync request with every locally-known decision in the
    /// range; the subset may be sparse.
    pub async fn handle_sync_request(&self, request: SyncRequest) -> SyncResponse {
        let inner = self.inner.lock().await;
        let decisions: Vec<DecisionRecord> = inner
            .decisions
            .range(request.from_seq..=request.to_seq)
            .map(|(_, entry)| entry.clone())
            .collect();
        debug!(
            learner_id = self.id,
            requester = request.learner_id,
            from = request.from_seq,
            to = request.to_seq,
            served = decisions.len(),
            "serving sync request"
        );
        SyncResponse::new(decisions, self.id)
    }

    /// Merge a peer's decisions: unknown entries are inserted, matching
    /// entries have their confirmation sets unioned (and may become decided
    /// through the peer's quorum), and a conflict with a locally decided
    /// slot halts all future merging from that peer.
    pub async fn merge_sync_response(&self, response: SyncResponse) {
        enum Merge {
            Insert,
            Union,
            Replace,
            Skip,
            Conflict,
        }

        let mut inner = self.inner.lock().await;
        if inner.halted_peers.contains(&response.learner_id) {
            warn!(
                learner_id = self.id,
                peer = response.learner_id,
                "ignoring sync response from conflicted peer"
            );
            return;
        }

        let mut merged = 0u64;
        for decision in response.decisions {
            let action = match inner.decisions.get(&decision.slot) {
                None => Merge::Insert,
                Some(local) if local.value == decision.value => Merge::Union,
                Some(local) if local.decided && decision.decided => Merge::Conflict,
                // A peer quorum outranks a local minority tally.
                Some(_) if decision.decided => Merge::Replace,
                Some(_) => Merge::Skip,
            };
            match action {
                Merge::Insert => {
                    inner.highest_seen = inner.highest_seen.max(decision.slot);
                    inner.decisions.insert(decision.slot, decision);
                    merged += 1;
                }
                Merge::Union => {
                    let slot = decision.slot;
                    if let Some(local) = inner.decisions.get_mut(&slot) {
                        local
                            .confirming_acceptors
                            .extend(decision.confirming_acceptors.iter().copied());
                        local.last_seen = local.last_seen.max(decision.last_seen);
                        if decision.decided && !local.decided {
                            local.decided = true;
                            merged += 1;
                        }
                    }
                }
                Merge::Replace => {
                    warn!(
                        learner_id = self.id,
                        peer = response.learner_id,
                        slot = decision.slot,
                        "peer quorum overrides undecided local tally"
                    );
                    inner.highest_seen = inner.highest_seen.max(decision.slot);
                    inner.decisions.insert(decision.slot, decision);
                    merged += 1;
                }
                Merge::Skip => {}
                Merge::Conflict => {
                    error!(
                        learner_id = self.id,
                        peer = response.learner_id,
                        slot = decision.slot,
                        "inconsistency alert: peer decided a different value; halting merges"
                    );
                    inner.halted_peers.insert(response.learner_id);
                    break;
                }
            }
        }

        if merged > 0 {
            info!(
                learner_id = self.id,
                peer = response.learner_id,
                merged,
                "merged sync response"
            );
            self.apply_cascade(&mut inner).await;
            if let Err(err) = self.store.save_decisions(&inner.decisions).await {
                error!(learner_id = self.id, error = %err, "failed to persist merged decisions");
            }
        }
        // Any remaining holes are picked up by the periodic gap check.
    }

    /// Background gap check entry point.
    pub async fn run_gap_check(&self) {
        let gap = {
            let inner = self.inner.lock().await;
            Self::gap_range(&inner)
        };
        if let Some((from, to)) = gap {
            self.request_sync(from, to).await;
        }
    }

    /// Compare watermarks with one random peer and log divergence. Repair
    /// itself is left to the gap sync.
    async fn consistency_probe(&self) {
        if self.other_learners.is_empty() {
            return;
        }
        let peer = {
            let mut rng = rand::thread_rng();
            self.other_learners[rng.gen_range(0..self.other_learners.len())].clone()
        };
        match self.peers.get_json::<Value>(&peer, "/status").await {
            Ok(status) => {
                let inner = self.inner.lock().await;
                let peer_applied = status["last_applied"].as_u64().unwrap_or(0);
                if peer_applied > inner.last_applied {
                    info!(
                        learner_id = self.id,
                        peer = %peer,
                        behind_by = peer_applied - inner.last_applied,
                        "consistency probe: trailing peer"
                    );
                }
            }
            Err(err) => {
                debug!(learner_id = self.id, peer = %peer, error = %err, "consistency probe failed");
            }
        }
    }

    // -- reads ---------------------------------------------------------------

    /// Serve a read against the applied state. `eventual` and `session`
    /// reads are answered directly with the current applied watermark;
    /// `strong` reads are refused here and belong to the leader proposer.
    pub async fn handle_read(&self, request: ReadRequest) -> Result<ReadResponse, LearnerReadError> {
        if request.consistency_level == ConsistencyLevel::Strong {
            return Err(LearnerReadError::StrongReadRefused);
        }

        let inner = self.inner.lock().await;
        let query = &request.query;
        let result = if let Some(key) = &query.key {
            inner.state.get(key).cloned().unwrap_or(Value::Null)
        } else {
            match query.kind.as_deref() {
                Some("all") => json!(inner.state),
                Some("prefix") => {
                    let prefix = query.prefix.as_deref().unwrap_or("");
                    let matched: BTreeMap<&String, &Value> = inner
                        .state
                        .iter()
                        .filter(|(key, _)| key.starts_with(prefix))
                        .collect();
                    json!(matched)
                }
                _ => return Err(LearnerReadError::BadQuery),
            }
        };

        Ok(ReadResponse::new(request.request_id, result, inner.last_applied))
    }

    /// Role-specific status document for `/status`.
    pub async fn status(&self) -> Value {
        let inner = self.inner.lock().await;
        json!({
            "learner_id": self.id,
            "last_applied": inner.last_applied,
            "highest_seen": inner.highest_seen,
            "total_decisions": inner.decisions.len(),
            "state_size": inner.state.len(),
            "quorum_size": self.quorum,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paxoskv_core::Ballot;
    use std::path::PathBuf;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("paxoskv-learner-test-{}", uuid::Uuid::new_v4()))
    }

    fn config(dir: &PathBuf) -> LearnerConfig {
        LearnerConfig {
            learner_id: 1,
            bind_address: "127.0.0.1".into(),
            port: 0,
            data_dir: dir.clone(),
            total_acceptors: 3,
            quorum_size: 2,
            other_learners: vec![],
            proposer_hosts: vec![],
        }
    }

    fn put(slot: u64, key: &str, value: &str) -> Value {
        let _ = slot;
        json!({"operation": {"type": "put", "key": key, "value": value}})
    }

    fn learn(slot: u64, acceptor: u32, value: Value) -> Learn {
        Learn::new(slot, Ballot::new(slot, 1), value, acceptor, format!("t-{slot}-{acceptor}"))
    }

    async fn read_key(learner: &Learner, key: &str) -> (Value, u64) {
        let response = learner
            .handle_read(ReadRequest::new(
                "r".into(),
                paxoskv_core::messages::ReadQuery::key(key),
                ConsistencyLevel::Eventual,
                "c".into(),
            ))
            .await
            .unwrap();
        (response.result, response.sequence_number)
    }

    #[tokio::test]
    async fn decides_at_quorum_and_applies_in_order() {
        let dir = scratch_dir();
        let learner = Learner::new(&config(&dir)).await.unwrap();

        // One confirmation is not enough.
        learner.handle_learn(learn(1, 1, put(1, "x", "1"))).await.unwrap();
        let (value, applied) = read_key(&learner, "x").await;
        assert_eq!(value, Value::Null);
        assert_eq!(applied, 0);

        // The second confirmation decides and applies slot 1. A retransmit
        // from the same acceptor would not have: confirmations are a set.
        learner.handle_learn(learn(1, 1, put(1, "x", "1"))).await.unwrap();
        assert_eq!(read_key(&learner, "x").await.1, 0);
        learner.handle_learn(learn(1, 2, put(1, "x", "1"))).await.unwrap();
        let (value, applied) = read_key(&learner, "x").await;
        assert_eq!(value, json!("1"));
        assert_eq!(applied, 1);

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn gap_holds_back_later_slots_until_filled() {
        let dir = scratch_dir();
        let learner = Learner::new(&config(&dir)).await.unwrap();

        // Slot 8 is decided but slot 7 never arrives: nothing applies.
        learner.handle_learn(learn(8, 1, put(8, "b", "8"))).await.unwrap();
        learner.handle_learn(learn(8, 2, put(8, "b", "8"))).await.unwrap();
        // Slots 1-6 are decided so only 7 is missing.
        for slot in 1..=6 {
            learner.handle_learn(learn(slot, 1, put(slot, "k", "v"))).await.unwrap();
            learner.handle_learn(learn(slot, 2, put(slot, "k", "v"))).await.unwrap();
        }
        {
            let inner = learner.inner.lock().await;
            assert_eq!(inner.last_applied, 6);
            assert_eq!(Learner::gap_range(&inner), Some((7, 8)));
        }

        // A peer's sync response for slot 7 unblocks the cascade through 8.
        let response = SyncResponse::new(
            vec![DecisionRecord {
                slot: 7,
                proposal_number: Ballot::new(7, 1),
                value: put(7, "a", "7"),
                confirming_acceptors: [1, 2].into(),
                first_seen: 1.0,
                last_seen: 1.0,
                decided: true,
            }],
            2,
        );
        learner.merge_sync_response(response).await;

        let inner = learner.inner.lock().await;
        assert_eq!(inner.last_applied, 8);
        assert_eq!(inner.state["a"], json!("7"));
        assert_eq!(inner.state["b"], json!("8"));
        drop(inner);

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn decided_slot_never_changes_value() {
        let dir = scratch_dir();
        let learner = Learner::new(&config(&dir)).await.unwrap();

        learner.handle_learn(learn(1, 1, put(1, "x", "a"))).await.unwrap();
        learner.handle_learn(learn(1, 2, put(1, "x", "a"))).await.unwrap();

        // A conflicting LEARN is discarded.
        learner.handle_learn(learn(1, 3, put(1, "x", "b"))).await.unwrap();
        assert_eq!(read_key(&learner, "x").await.0, json!("a"));

        // A conflicting sync response halts merging from that peer.
        let conflicting = SyncResponse::new(
            vec![DecisionRecord {
                slot: 1,
                proposal_number: Ballot::new(9, 2),
                value: put(1, "x", "b"),
                confirming_acceptors: [2, 3].into(),
                first_seen: 1.0,
                last_seen: 1.0,
                decided: true,
            }],
            7,
        );
        learner.merge_sync_response(conflicting).await;
        assert_eq!(read_key(&learner, "x").await.0, json!("a"));
        {
            let inner = learner.inner.lock().await;
            assert!(inner.halted_peers.contains(&7));
        }

        // Even a non-conflicting follow-up from the halted peer is ignored.
        let follow_up = SyncResponse::new(
            vec![DecisionRecord {
                slot: 2,
                proposal_number: Ballot::new(2, 1),
                value: put(2, "y", "2"),
                confirming_acceptors: [1, 2].into(),
                first_seen: 1.0,
                last_seen: 1.0,
                decided: true,
            }],
            7,
        );
        learner.merge_sync_response(follow_up).await;
        let inner = learner.inner.lock().await;
        assert!(!inner.decisions.contains_key(&2));
        drop(inner);

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn sync_request_returns_the_known_subset() {
        let dir = scratch_dir();
        let learner = Learner::new(&config(&dir)).await.unwrap();

        for slot in [1u64, 3] {
            learner.handle_learn(learn(slot, 1, put(slot, "k", "v"))).await.unwrap();
        }

        let response = learner.handle_sync_request(SyncRequest::new(1, 5, 9)).await;
        let slots: Vec<u64> = response.decisions.iter().map(|d| d.slot).collect();
        assert_eq!(slots, vec![1, 3]);

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn restart_replays_the_decided_tail() {
        let dir = scratch_dir();
        {
            let learner = Learner::new(&config(&dir)).await.unwrap();
            for slot in 1..=12u64 {
                let value = put(slot, &format!("k{slot}"), "v");
                learner.handle_learn(learn(slot, 1, value.clone())).await.unwrap();
                learner.handle_learn(learn(slot, 2, value)).await.unwrap();
            }
            let inner = learner.inner.lock().await;
            assert_eq!(inner.last_applied, 12);
            drop(inner);
        }

        // Snapshot was taken at slot 10; slots 11 and 12 replay from the log.
        let restarted = Learner::new(&config(&dir)).await.unwrap();
        let inner = restarted.inner.lock().await;
        assert_eq!(inner.last_applied, 12);
        assert_eq!(inner.state.len(), 12);
        assert_eq!(inner.state["k11"], json!("v"));
        assert_eq!(inner.state["k12"], json!("v"));
        drop(inner);

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn reads_cover_key_all_and_prefix() {
        let dir = scratch_dir();
        let learner = Learner::new(&config(&dir)).await.unwrap();

        for (slot, key) in [(1, "user:alice"), (2, "user:bob"), (3, "order:1")] {
            let value = put(slot, key, "v");
            learner.handle_learn(learn(slot as u64, 1, value.clone())).await.unwrap();
            learner.handle_learn(learn(slot as u64, 2, value)).await.unwrap();
        }

        let all = learner
            .handle_read(ReadRequest::new(
                "r1".into(),
                paxoskv_core::messages::ReadQuery::all(),
                ConsistencyLevel::Eventual,
                "c".into(),
            ))
            .await
            .unwrap();
        assert_eq!(all.result.as_object().unwrap().len(), 3);
        assert_eq!(all.sequence_number, 3);

        let prefixed = learner
            .handle_read(ReadRequest::new(
                "r2".into(),
                paxoskv_core::messages::ReadQuery::prefix("user:"),
                ConsistencyLevel::Session,
                "c".into(),
            ))
            .await
            .unwrap();
        assert_eq!(prefixed.result.as_object().unwrap().len(), 2);

        let strong = learner
            .handle_read(ReadRequest::new(
                "r3".into(),
                paxoskv_core::messages::ReadQuery::key("user:alice"),
                ConsistencyLevel::Strong,
                "c".into(),
            ))
            .await;
        assert!(matches!(strong, Err(LearnerReadError::StrongReadRefused)));

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn delete_and_noop_apply_correctly() {
        let dir = scratch_dir();
        let learner = Learner::new(&config(&dir)).await.unwrap();

        let ops = [
            put(1, "x", "1"),
            json!({"operation": {"type": "noop"}}),
            json!({"operation": {"type": "delete", "key": "x"}}),
        ];
        for (index, value) in ops.iter().enumerate() {
            let slot = index as u64 + 1;
            learner.handle_learn(learn(slot, 1, value.clone())).await.unwrap();
            learner.handle_learn(learn(slot, 2, value.clone())).await.unwrap();
        }

        let (value, applied) = read_key(&learner, "x").await;
        assert_eq!(value, Value::Null);
        assert_eq!(applied, 3);

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
