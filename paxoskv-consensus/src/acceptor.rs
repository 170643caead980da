//! The acceptor role: the stateful voter of the protocol.
//!
//! An acceptor holds the highest ballot it promised, the highest ballot it
//! accepted, and the latest accepted `(slot, value)` pair. Every externally
//! visible transition is persisted before the reply leaves the node, so a
//! restarted acceptor can never contradict an answer it already gave.

use std::collections::HashMap;

use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use paxoskv_core::config::{AcceptorConfig, HostPort};
use paxoskv_core::messages::{
    Accept, AcceptReply, Heartbeat, HeartbeatAck, Learn, LearnAck, Prepare, PrepareReply,
};
use paxoskv_core::{generate_tid, unix_ts};
use paxoskv_network::PeerClient;
use paxoskv_storage::{AcceptorStore, PersistedAcceptorState, ProposalRecord};

use crate::ConsensusError;

struct AcceptorInner {
    durable: PersistedAcceptorState,
    /// Leader hint from heartbeats. Status-only; never consulted by the
    /// promise/accept decisions.
    observed_leader: Option<u32>,
    last_heartbeat: HashMap<u32, f64>,
}

/// The acceptor state machine.
///
/// One mutex guards the whole read-modify-persist-reply critical section so
/// prepare and accept handling never interleave.
pub struct Acceptor {
    id: u32,
    learner_hosts: Vec<HostPort>,
    store: AcceptorStore,
    peers: PeerClient,
    inner: Mutex<AcceptorInner>,
}

impl Acceptor {
    /// Build an acceptor, reloading any state a previous incarnation
    /// persisted.
    pub async fn new(config: &AcceptorConfig) -> Result<Self, ConsensusError> {
        let store = AcceptorStore::new(config.state_dir());
        let durable = store.load().await?;
        info!(
            acceptor_id = config.acceptor_id,
            max_promised = %durable.max_promised,
            max_accepted = %durable.max_accepted,
            "acceptor initialized"
        );
        Ok(Self {
            id: config.acceptor_id,
            learner_hosts: config.learner_hosts.clone(),
            store,
            peers: PeerClient::with_default_timeout()?,
            inner: Mutex::new(AcceptorInner {
                durable,
                observed_leader: None,
                last_heartbeat: HashMap::new(),
            }),
        })
    }

    /// Handle `PREPARE`: promise iff the ballot outbids everything promised
    /// so far. The promise carries the currently accepted triple so the
    /// proposer can honor P2c.
    pub async fn handle_prepare(&self, msg: Prepare) -> Result<PrepareReply, ConsensusError> {
        let mut inner = self.inner.lock().await;
        let tid = generate_tid();
        inner.last_heartbeat.insert(msg.proposer_id, unix_ts());

        let ballot = msg.proposal_number;
        if ballot > inner.durable.max_promised {
            let mut next = inner.durable.clone();
            next.max_promised = ballot;
            next.log_proposals.insert(
                ballot.0,
                ProposalRecord {
                    proposal_number: ballot,
                    slot: None,
                    tid: tid.clone(),
                    promise_time: unix_ts(),
                    was_accepted: false,
                    accept_time: None,
                    value: None,
                },
            );
            self.store.save(&next).await?;

            let reply = PrepareReply::promise(
                ballot,
                (!next.max_accepted.is_zero()).then_some(next.max_accepted),
                next.accepted_slot,
                next.accepted_value.clone(),
                tid,
            );
            info!(
                acceptor_id = self.id,
                ballot = %ballot,
                proposer = msg.proposer_id,
                previous = %inner.durable.max_promised,
                "promised"
            );
            inner.durable = next;
            Ok(reply)
        } else {
            info!(
                acceptor_id = self.id,
                ballot = %ballot,
                promised = %inner.durable.max_promised,
                "refused promise"
            );
            Ok(PrepareReply::not_promise(inner.durable.max_promised, tid))
        }
    }

    /// Handle `ACCEPT`: accept iff the ballot is at least the highest
    /// promise. On success the new state is persisted, the reply is built,
    /// and learners are notified in the background.
    pub async fn handle_accept(&self, msg: Accept) -> Result<AcceptReply, ConsensusError> {
        let mut inner = self.inner.lock().await;
        let tid = generate_tid();
        inner.last_heartbeat.insert(msg.proposer_id, unix_ts());

        let ballot = msg.proposal_number;
        if ballot >= inner.durable.max_promised {
            let mut next = inner.durable.clone();
            next.max_promised = ballot;
            next.max_accepted = ballot;
            next.accepted_slot = Some(msg.slot);
            next.accepted_value = Some(msg.value.clone());

            let record = next.log_proposals.entry(ballot.0).or_insert_with(|| ProposalRecord {
                proposal_number: ballot,
                slot: None,
                tid: tid.clone(),
                promise_time: unix_ts(),
                was_accepted: false,
                accept_time: None,
                value: None,
            });
            record.slot = Some(msg.slot);
            record.was_accepted = true;
            record.accept_time = Some(unix_ts());
            record.value = Some(msg.value.clone());

            self.store.save(&next).await?;
            inner.durable = next;

            info!(
                acceptor_id = self.id,
                ballot = %ballot,
                slot = msg.slot,
                proposer = msg.proposer_id,
                "accepted"
            );
            let reply = AcceptReply::accepted(ballot, msg.slot, msg.value.clone(), tid.clone());
            self.notify_learners(msg, tid);
            Ok(reply)
        } else {
            info!(
                acceptor_id = self.id,
                ballot = %ballot,
                promised = %inner.durable.max_promised,
                "refused accept"
            );
            Ok(AcceptReply::not_accepted(inner.durable.max_promised, tid))
        }
    }

    /// Handle `HEARTBEAT`: record the announced leader for status reporting.
    pub async fn handle_heartbeat(&self, msg: Heartbeat) -> HeartbeatAck {
        let mut inner = self.inner.lock().await;
        debug!(
            acceptor_id = self.id,
            leader = msg.leader_id,
            seq = msg.sequence_number,
            "heartbeat"
        );
        inner.observed_leader = Some(msg.leader_id);
        inner.last_heartbeat.insert(msg.leader_id, unix_ts());
        HeartbeatAck::new(self.id)
    }

    /// Fan the accepted value out to every learner. Fire-and-forget: the
    /// acceptor never retries, the learners' gap sync and the other
    /// acceptors cover lost notifications.
    fn notify_learners(&self, msg: Accept, tid: String) {
        if self.learner_hosts.is_empty() {
            return;
        }
        let learn = Learn::new(msg.slot, msg.proposal_number, msg.value, self.id, tid);
        let peers = self.peers.clone();
        let learners = self.learner_hosts.clone();
        tokio::spawn(async move {
            let results = peers.broadcast::<Learn, LearnAck>(&learners, "/learn", &learn).await;
            for (peer, result) in results {
                if let Err(err) = result {
                    warn!(learner = %peer, slot = learn.slot, error = %err, "learn notification failed");
                }
            }
        });
    }

    /// Role-specific status document for `/status`.
    pub async fn status(&self) -> Value {
        let inner = self.inner.lock().await;
        json!({
            "acceptor_id": self.id,
            "max_promised": inner.durable.max_promised,
            "max_accepted": inner.durable.max_accepted,
            "accepted_slot": inner.durable.accepted_slot,
            "has_accepted_value": inner.durable.accepted_value.is_some(),
            "current_leader": inner.observed_leader,
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
    use serde_json::json;
    use std::path::PathBuf;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("paxoskv-acceptor-test-{}", uuid::Uuid::new_v4()))
    }

    fn config(dir: &PathBuf) -> AcceptorConfig {
        AcceptorConfig {
            acceptor_id: 2,
            bind_address: "127.0.0.1".into(),
            port: 0,
            data_dir: dir.clone(),
            total_acceptors: 3,
            learner_hosts: vec![],
        }
    }

    fn put(key: &str, value: &str) -> Value {
        json!({"operation": {"type": "put", "key": key, "value": value}})
    }

    #[tokio::test]
    async fn promises_only_strictly_higher_ballots() {
        let dir = scratch_dir();
        let acceptor = Acceptor::new(&config(&dir)).await.unwrap();

        let high = Ballot::new(2, 1);
        match acceptor.handle_prepare(Prepare::new(high, 1)).await.unwrap() {
            PrepareReply::Promise { proposal_number, accepted_value, .. } => {
                assert_eq!(proposal_number, high);
                assert!(accepted_value.is_none());
            }
            other => panic!("expected promise, got {other:?}"),
        }

        // A lower ballot, and the same ballot again, are both refused with
        // the current promise so the proposer can jump its counter.
        for ballot in [Ballot::new(1, 3), high] {
            match acceptor.handle_prepare(Prepare::new(ballot, 3)).await.unwrap() {
                PrepareReply::NotPromise { promised_proposal, .. } => {
                    assert_eq!(promised_proposal, high);
                }
                other => panic!("expected not-promise, got {other:?}"),
            }
        }

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn accepts_at_or_above_the_promise_only() {
        let dir = scratch_dir();
        let acceptor = Acceptor::new(&config(&dir)).await.unwrap();

        let promised = Ballot::new(3, 1);
        acceptor.handle_prepare(Prepare::new(promised, 1)).await.unwrap();

        match acceptor
            .handle_accept(Accept::new(Ballot::new(2, 2), 1, put("x", "stale"), 2))
            .await
            .unwrap()
        {
            AcceptReply::NotAccepted { promised_proposal, .. } => {
                assert_eq!(promised_proposal, promised);
            }
            other => panic!("expected not-accepted, got {other:?}"),
        }

        match acceptor
            .handle_accept(Accept::new(promised, 1, put("x", "1"), 1))
            .await
            .unwrap()
        {
            AcceptReply::Accepted { proposal_number, slot, .. } => {
                assert_eq!(proposal_number, promised);
                assert_eq!(slot, 1);
            }
            other => panic!("expected accepted, got {other:?}"),
        }

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn promise_carries_the_accepted_pair_for_reproposal() {
        let dir = scratch_dir();
        let acceptor = Acceptor::new(&config(&dir)).await.unwrap();

        let first = Ballot::new(1, 1);
        acceptor.handle_accept(Accept::new(first, 1, put("x", "a"), 1)).await.unwrap();

        // A later candidate preparing a higher ballot must learn about the
        // accepted value so it re-proposes it.
        match acceptor.handle_prepare(Prepare::new(Ballot::new(2, 2), 2)).await.unwrap() {
            PrepareReply::Promise { accepted_proposal, accepted_slot, accepted_value, .. } => {
                assert_eq!(accepted_proposal, Some(first));
                assert_eq!(accepted_slot, Some(1));
                assert_eq!(accepted_value, Some(put("x", "a")));
            }
            other => panic!("expected promise, got {other:?}"),
        }

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn restart_resumes_from_persisted_state() {
        let dir = scratch_dir();
        {
            let acceptor = Acceptor::new(&config(&dir)).await.unwrap();
            acceptor
                .handle_accept(Accept::new(Ballot::new(1, 1), 1, put("x", "v"), 1))
                .await
                .unwrap();
        }

        // A fresh incarnation over the same data directory answers from the
        // persisted state: the next prepare sees the accepted pair, and the
        // old promise bound still holds.
        let restarted = Acceptor::new(&config(&dir)).await.unwrap();
        match restarted.handle_prepare(Prepare::new(Ballot::new(2, 1), 1)).await.unwrap() {
            PrepareReply::Promise { accepted_proposal, accepted_value, .. } => {
                assert_eq!(accepted_proposal, Some(Ballot::new(1, 1)));
                assert_eq!(accepted_value, Some(put("x", "v")));
            }
            other => panic!("expected promise, got {other:?}"),
        }
        match restarted.handle_prepare(Prepare::new(Ballot::new(1, 1), 1)).await.unwrap() {
            PrepareReply::NotPromise { promised_proposal, .. } => {
                assert_eq!(promised_proposal, Ballot::new(2, 1));
            }
            other => panic!("expected not-promise, got {other:?}"),
        }

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
