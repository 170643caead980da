//! The proposer role: leader election and the proposal pipeline.
//!
//! A proposer is a follower until the leader goes silent, a candidate while
//! its prepare fan-out is in flight, and the leader once a quorum of
//! acceptors has promised its ballot. The leader emits heartbeats, drains
//! queued client writes one slot at a time through accept rounds, and, when
//! outbid, falls back to re-prepare with a higher ballot.
//!
//! Three background loops run next to the HTTP handlers: the heartbeat
//! emitter, the election monitor, and the proposal processor. All role state
//! sits behind a single mutex; RPC fan-out happens with the lock released.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rand::Rng;
use serde_json::{json, Value};
use tokio::sync::{oneshot, Mutex};
use tokio::time::{interval, sleep, timeout};
use tracing::{debug, info, warn};

use paxoskv_core::config::{HostPort, ProposerConfig};
use paxoskv_core::messages::{
    Accept, AcceptReply, ClientReply, ClientRequest, ConsistencyLevel, Heartbeat, HeartbeatAck,
    Operation, Prepare, PrepareReply, ProposerStatus, ReadRequest, ReadResponse,
};
use paxoskv_core::{Ballot, Role};
use paxoskv_network::{PeerClient, QuorumOutcome, Verdict};

use crate::ConsensusError;

/// Hard deadline on an election attempt; a slower attempt is purged.
const ELECTION_DEADLINE: Duration = Duration::from_secs(10);

/// How often the election monitor re-checks leader liveness.
const MONITOR_TICK: Duration = Duration::from_millis(100);

/// How often the proposal processor looks for queued work.
const PROCESSOR_TICK: Duration = Duration::from_millis(50);

/// How long a strong read waits for its consensus barrier.
const READ_BARRIER_DEADLINE: Duration = Duration::from_secs(10);

/// Failures of a proposal attempt.
#[derive(Debug, thiserror::Error)]
pub enum ProposeError {
    #[error("this proposer is not the leader")]
    NotLeader { leader_hint: Option<u32> },

    #[error("no quorum of acceptors answered")]
    NoQuorum,

    #[error("superseded by ballot {0}")]
    Superseded(Ballot),
}

/// Failures of a leader-linearized read.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("this proposer is not the leader")]
    NotLeader { leader_hint: Option<u32> },

    #[error("read barrier did not commit: {0}")]
    Barrier(String),

    #[error("no learner has applied through slot {0}")]
    LearnersLagging(u64),
}

/// A client write waiting for its slot.
struct PendingWrite {
    request_id: String,
    client_id: String,
    operation: Operation,
    /// Present for internal barrier writes; receives the decided slot.
    completion: Option<oneshot::Sender<u64>>,
}

/// A proposal currently in flight, keyed by its ballot.
#[allow(dead_code)]
struct LiveProposal {
    ballot: Ballot,
    slot: u64,
    value: Value,
    request_id: Option<String>,
    started: Instant,
}

struct ProposerState {
    role: Role,
    leader_id: Option<u32>,
    counter: u64,
    heartbeat_seq: u64,
    prepare_quorum_achieved: bool,
    is_preparing: bool,
    last_heartbeat: Instant,
    /// Next consensus slot this leader will assign.
    next_slot: u64,
    queue: VecDeque<PendingWrite>,
}

/// The proposer state machine.
pub struct Proposer {
    config: ProposerConfig,
    quorum: usize,
    peers: PeerClient,
    state: Mutex<ProposerState>,
    live: DashMap<u64, LiveProposal>,
    /// request_id -> decided slot, for status visibility after the queued ack.
    completed: DashMap<String, u64>,
}

impl Proposer {
    pub fn new(config: ProposerConfig) -> Result<Self, ConsensusError> {
        let quorum = config.quorum();
        info!(
            proposer_id = config.proposer_id,
            acceptors = config.acceptor_hosts.len(),
            quorum,
            "proposer initialized"
        );
        Ok(Self {
            quorum,
            peers: PeerClient::with_default_timeout()?,
            state: Mutex::new(ProposerState {
                role: Role::Follower,
                leader_id: None,
                counter: 0,
                heartbeat_seq: 0,
                prepare_quorum_achieved: false,
                is_preparing: false,
                last_heartbeat: Instant::now(),
                next_slot: 1,
                queue: VecDeque::new(),
            }),
            live: DashMap::new(),
            completed: DashMap::new(),
            config,
        })
    }

    /// Spawn the heartbeat emitter, election monitor, and proposal
    /// processor. They run for the life of the process.
    pub fn start(self: Arc<Self>) {
        let me = Arc::clone(&self);
        tokio::spawn(async move { me.heartbeat_loop().await });
        let me = Arc::clone(&self);
        tokio::spawn(async move { me.election_monitor().await });
        tokio::spawn(async move { self.proposal_processor().await });
    }

    fn next_ballot(state: &mut ProposerState, proposer_id: u32) -> Ballot {
        state.counter += 1;
        Ballot::new(state.counter, proposer_id)
    }

    /// Jump the counter past an observed higher ballot so the next attempt
    /// outbids it.
    fn observe_ballot(state: &mut ProposerState, observed: Ballot) {
        if observed.next_counter() > state.counter {
            state.counter = observed.next_counter();
        }
    }

    /// Highest accepted triple across a quorum of promises; this is the
    /// value a new leader is obliged to re-propose.
    fn highest_accepted(
        promises: Vec<(Option<Ballot>, Option<u64>, Option<Value>)>,
    ) -> Option<(Ballot, u64, Value)> {
        let mut carried: Option<(Ballot, u64, Value)> = None;
        for (ballot, slot, value) in promises {
            if let (Some(ballot), Some(slot), Some(value)) = (ballot, slot, value) {
                if carried.as_ref().map_or(true, |(highest, _, _)| ballot > *highest) {
                    carried = Some((ballot, slot, value));
                }
            }
        }
        carried
    }

    // -- background loops ---------------------------------------------------

    async fn heartbeat_loop(self: Arc<Self>) {
        let mut ticker = interval(self.config.heartbeat_interval);
        loop {
            ticker.tick().await;
            let is_leader = { self.state.lock().await.role == Role::Leader };
            if is_leader {
                // Fan out without blocking the tick so one dead peer cannot
                // slow the heartbeat cadence below the leader timeout.
                let me = Arc::clone(&self);
                tokio::spawn(async move { me.send_heartbeat().await });
            }
        }
    }

    async fn election_monitor(self: Arc<Self>) {
        let mut ticker = interval(MONITOR_TICK);
        loop {
            ticker.tick().await;
            if !self.leader_is_silent().await {
                continue;
            }
            info!(proposer_id = self.config.proposer_id, "leader timeout detected");

            // Jitter keeps simultaneous candidates from livelocking.
            let jitter = {
                let mut rng = rand::thread_rng();
                Duration::from_millis(rng.gen_range(0..1000))
            };
            sleep(jitter).await;

            if self.leader_is_silent().await {
                Arc::clone(&self).start_election().await;
            }
        }
    }

    async fn leader_is_silent(&self) -> bool {
        let state = self.state.lock().await;
        state.role != Role::Leader
            && !state.is_preparing
            && state.last_heartbeat.elapsed() > self.config.leader_timeout
    }

    async fn proposal_processor(self: Arc<Self>) {
        let mut ticker = interval(PROCESSOR_TICK);
        loop {
            ticker.tick().await;
            let job = {
                let mut state = self.state.lock().await;
                if state.role == Role::Leader && state.prepare_quorum_achieved {
                    let slot = state.next_slot;
                    state.queue.pop_front().map(|write| (slot, write))
                } else {
                    None
                }
            };
            if let Some((slot, write)) = job {
                let request_id = write.request_id.clone();
                if let Err(err) = self.accept_phase(slot, write).await {
                    // The client retries end-to-end; the write is dropped here.
                    warn!(request_id = %request_id, error = %err, "dropping proposal");
                }
            }
        }
    }

    // -- heartbeats ----------------------------------------------------------

    /// Announce leadership to every acceptor and peer proposer.
    pub async fn send_heartbeat(&self) {
        let beat = {
            let mut state = self.state.lock().await;
            if state.role != Role::Leader {
                return;
            }
            state.heartbeat_seq += 1;
            Heartbeat::new(self.config.proposer_id, state.heartbeat_seq)
        };
        let mut targets = self.config.acceptor_hosts.clone();
        targets.extend(self.config.other_proposers.iter().cloned());
        let results =
            self.peers.broadcast::<Heartbeat, HeartbeatAck>(&targets, "/heartbeat", &beat).await;
        let failed = results.iter().filter(|(_, result)| result.is_err()).count();
        if failed > 0 {
            debug!(failed, total = targets.len(), "some heartbeats went unanswered");
        }
    }

    /// A heartbeat arrived on this proposer's own HTTP surface. Adopt the
    /// sender as leader and fall back to follower if that is not us.
    pub async fn handle_heartbeat(&self, beat: Heartbeat) -> HeartbeatAck {
        let mut state = self.state.lock().await;
        state.last_heartbeat = Instant::now();
        if beat.leader_id != self.config.proposer_id {
            if state.role == Role::Leader {
                info!(new_leader = beat.leader_id, "observed another leader; stepping down");
            }
            state.role = Role::Follower;
            state.leader_id = Some(beat.leader_id);
            state.prepare_quorum_achieved = false;
        }
        HeartbeatAck::new(self.config.proposer_id)
    }

    // -- elections -----------------------------------------------------------

    /// Run one election attempt: fresh ballot, prepare fan-out, and on a
    /// quorum of promises a transition to leader (re-proposing any carried
    /// value first, as P2c requires).
    pub async fn start_election(self: Arc<Self>) {
        let ballot = {
            let mut state = self.state.lock().await;
            if state.is_preparing || state.role == Role::Leader {
                return;
            }
            state.role = Role::Candidate;
            state.prepare_quorum_achieved = false;
            state.is_preparing = true;
            Self::next_ballot(&mut state, self.config.proposer_id)
        };
        info!(ballot = %ballot, "starting election");
        self.live.insert(
            ballot.0,
            LiveProposal {
                ballot,
                slot: 0,
                value: Value::Null,
                request_id: None,
                started: Instant::now(),
            },
        );

        // Watchdog: purge the attempt if it never resolves.
        let me = Arc::clone(&self);
        tokio::spawn(async move {
            sleep(ELECTION_DEADLINE).await;
            if me.live.remove(&ballot.0).is_some() {
                let mut state = me.state.lock().await;
                state.is_preparing = false;
                if state.role == Role::Candidate {
                    state.role = Role::Follower;
                }
                warn!(ballot = %ballot, "election attempt timed out");
            }
        });

        let prepare = Prepare::new(ballot, self.config.proposer_id);
        let outcome = self
            .peers
            .solicit(
                &self.config.acceptor_hosts,
                "/prepare",
                &prepare,
                self.quorum,
                |reply: PrepareReply| match reply {
                    PrepareReply::Promise {
                        accepted_proposal, accepted_slot, accepted_value, ..
                    } => Verdict::Aye((accepted_proposal, accepted_slot, accepted_value)),
                    PrepareReply::NotPromise { promised_proposal, .. } => {
                        Verdict::Nay(promised_proposal)
                    }
                },
            )
            .await;

        if self.live.remove(&ballot.0).is_none() {
            // The watchdog got here first; its cleanup already ran.
            return;
        }

        match outcome {
            QuorumOutcome::Reached(promises) => {
                let carried = Self::highest_accepted(promises);
                {
                    let mut state = self.state.lock().await;
                    state.role = Role::Leader;
                    state.leader_id = Some(self.config.proposer_id);
                    state.prepare_quorum_achieved = true;
                    state.is_preparing = false;
                    state.last_heartbeat = Instant::now();
                    if let Some((_, carried_slot, _)) = &carried {
                        if state.next_slot <= *carried_slot {
                            state.next_slot = carried_slot + 1;
                        }
                    }
                }
                info!(ballot = %ballot, "won election; now leader");
                self.send_heartbeat().await;

                if let Some((carried_ballot, carried_slot, carried_value)) = carried {
                    info!(
                        slot = carried_slot,
                        carried_from = %carried_ballot,
                        "re-proposing value carried in promises"
                    );
                    if let Err(err) = self.settle_value(carried_slot, carried_value).await {
                        warn!(error = %err, "could not settle carried value; yielding");
                        let mut state = self.state.lock().await;
                        state.role = Role::Follower;
                        state.prepare_quorum_achieved = false;
                    }
                }
            }
            QuorumOutcome::Rejected { nay: promised, .. } => {
                info!(ballot = %ballot, promised = %promised, "election lost to a higher ballot");
                let mut state = self.state.lock().await;
                Self::observe_ballot(&mut state, promised);
                state.role = Role::Follower;
                state.is_preparing = false;
                // Give the winner a full timeout window to announce itself.
                state.last_heartbeat = Instant::now();
            }
            QuorumOutcome::Incomplete { ayes, failures } => {
                warn!(
                    ballot = %ballot,
                    promises = ayes.len(),
                    needed = self.quorum,
                    failures,
                    "election could not reach a quorum"
                );
                let mut state = self.state.lock().await;
                state.role = Role::Follower;
                state.is_preparing = false;
            }
        }
    }

    /// Re-run the prepare phase under a fresh ballot after being outbid.
    /// Returns the highest accepted triple from the new promise quorum.
    async fn run_prepare(&self) -> Result<Option<(Ballot, u64, Value)>, ProposeError> {
        let ballot = {
            let mut state = self.state.lock().await;
            Self::next_ballot(&mut state, self.config.proposer_id)
        };
        let prepare = Prepare::new(ballot, self.config.proposer_id);
        let outcome = self
            .peers
            .solicit(
                &self.config.acceptor_hosts,
                "/prepare",
                &prepare,
                self.quorum,
                |reply: PrepareReply| match reply {
                    PrepareReply::Promise {
                        accepted_proposal, accepted_slot, accepted_value, ..
                    } => Verdict::Aye((accepted_proposal, accepted_slot, accepted_value)),
                    PrepareReply::NotPromise { promised_proposal, .. } => {
                        Verdict::Nay(promised_proposal)
                    }
                },
            )
            .await;
        match outcome {
            QuorumOutcome::Reached(promises) => {
                let mut state = self.state.lock().await;
                state.prepare_quorum_achieved = true;
                drop(state);
                Ok(Self::highest_accepted(promises))
            }
            QuorumOutcome::Rejected { nay: promised, .. } => {
                let mut state = self.state.lock().await;
                Self::observe_ballot(&mut state, promised);
                Err(ProposeError::Superseded(promised))
            }
            QuorumOutcome::Incomplete { .. } => Err(ProposeError::NoQuorum),
        }
    }

    // -- the accept pipeline -------------------------------------------------

    /// One fan-out of `ACCEPT(ballot, slot, value)` to all acceptors.
    async fn accept_round(
        &self,
        ballot: Ballot,
        slot: u64,
        value: &Value,
    ) -> QuorumOutcome<(), Ballot> {
        let accept = Accept::new(ballot, slot, value.clone(), self.config.proposer_id);
        debug!(ballot = %ballot, slot, "sending accept fan-out");
        self.peers
            .solicit(
                &self.config.acceptor_hosts,
                "/accept",
                &accept,
                self.quorum,
                |reply: AcceptReply| match reply {
                    AcceptReply::Accepted { .. } => Verdict::Aye(()),
                    AcceptReply::NotAccepted { promised_proposal, .. } => {
                        Verdict::Nay(promised_proposal)
                    }
                },
            )
            .await
    }

    /// Push one already-decided-elsewhere or carried value through an accept
    /// round without a client attached. Used for P2c re-proposals.
    async fn settle_value(&self, slot: u64, value: Value) -> Result<(), ProposeError> {
        let ballot = {
            let mut state = self.state.lock().await;
            Self::next_ballot(&mut state, self.config.proposer_id)
        };
        match self.accept_round(ballot, slot, &value).await {
            QuorumOutcome::Reached(_) => {
                let mut state = self.state.lock().await;
                if state.next_slot <= slot {
                    state.next_slot = slot + 1;
                }
                info!(slot, ballot = %ballot, "carried value settled");
                Ok(())
            }
            QuorumOutcome::Rejected { nay: promised, .. } => {
                let mut state = self.state.lock().await;
                Self::observe_ballot(&mut state, promised);
                state.prepare_quorum_achieved = false;
                Err(ProposeError::Superseded(promised))
            }
            QuorumOutcome::Incomplete { .. } => Err(ProposeError::NoQuorum),
        }
    }

    /// Drive one client write to a decision: accept fan-out, and on
    /// conflict a counter bump, backoff, re-prepare, and retry of the same
    /// value, honoring any value the new promise quorum carries. Gives up
    /// when the leader-timeout window closes.
    async fn accept_phase(&self, mut slot: u64, mut write: PendingWrite) -> Result<u64, ProposeError> {
        let value = json!({ "operation": write.operation });
        let deadline = Instant::now() + self.config.leader_timeout;

        loop {
            let ballot = {
                let mut state = self.state.lock().await;
                Self::next_ballot(&mut state, self.config.proposer_id)
            };
            self.live.insert(
                ballot.0,
                LiveProposal {
                    ballot,
                    slot,
                    value: value.clone(),
                    request_id: Some(write.request_id.clone()),
                    started: Instant::now(),
                },
            );
            let outcome = self.accept_round(ballot, slot, &value).await;
            self.live.remove(&ballot.0);

            match outcome {
                QuorumOutcome::Reached(_) => {
                    {
                        let mut state = self.state.lock().await;
                        if state.next_slot <= slot {
                            state.next_slot = slot + 1;
                        }
                    }
                    self.completed.insert(write.request_id.clone(), slot);
                    if let Some(done) = write.completion.take() {
                        let _ = done.send(slot);
                    }
                    info!(
                        slot,
                        ballot = %ballot,
                        request_id = %write.request_id,
                        client_id = %write.client_id,
                        "write decided"
                    );
                    return Ok(slot);
                }
                QuorumOutcome::Rejected { nay: promised, .. } => {
                    warn!(ballot = %ballot, promised = %promised, "accept outbid; re-preparing");
                    {
                        let mut state = self.state.lock().await;
                        Self::observe_ballot(&mut state, promised);
                        state.prepare_quorum_achieved = false;
                    }
                    if Instant::now() >= deadline {
                        return Err(ProposeError::Superseded(promised));
                    }
                    let backoff = {
                        let mut rng = rand::thread_rng();
                        Duration::from_millis(rng.gen_range(100..=500))
                    };
                    sleep(backoff).await;

                    let carried = self.run_prepare().await?;
                    if let Some((_, carried_slot, carried_value)) = carried {
                        if carried_slot > slot
                            || (carried_slot == slot && carried_value != value)
                        {
                            // Another proposer moved the sequence along (or
                            // claimed our slot). Settle its value first and
                            // slide our write behind it.
                            self.settle_value(carried_slot, carried_value).await?;
                            slot = carried_slot + 1;
                        }
                    }
                }
                QuorumOutcome::Incomplete { ayes, failures } => {
                    warn!(
                        ballot = %ballot,
                        accepted = ayes.len(),
                        needed = self.quorum,
                        failures,
                        "accept round could not reach a quorum"
                    );
                    return Err(ProposeError::NoQuorum);
                }
            }
        }
    }

    // -- client surface ------------------------------------------------------

    /// Route a client `/request` message: writes are queued when this node
    /// leads, redirected when another leader is known, and refused
    /// otherwise; status requests are always answered.
    pub async fn handle_client_request(&self, request: ClientRequest) -> ClientReply {
        match request {
            ClientRequest::Write { request_id, client_id, operation, .. } => {
                let mut state = self.state.lock().await;
                if state.role != Role::Leader {
                    return match state.leader_id {
                        Some(leader) if leader != self.config.proposer_id => {
                            ClientReply::redirect(request_id, leader)
                        }
                        _ => ClientReply::error(Some(request_id), "no known leader"),
                    };
                }
                info!(request_id = %request_id, client_id = %client_id, "write queued");
                state.queue.push_back(PendingWrite {
                    request_id: request_id.clone(),
                    client_id,
                    operation,
                    completion: None,
                });
                ClientReply::queued(request_id, self.config.proposer_id)
            }
            ClientRequest::Status { request_id, .. } => {
                ClientReply::status(request_id, self.status().await)
            }
        }
    }

    pub async fn status(&self) -> ProposerStatus {
        let state = self.state.lock().await;
        ProposerStatus {
            proposer_id: self.config.proposer_id,
            role: state.role,
            leader_id: state.leader_id,
            queue_size: state.queue.len(),
            active_proposals: self.live.len(),
        }
    }

    // -- strong reads --------------------------------------------------------

    /// Serve a strong read by committing a noop barrier through consensus,
    /// then reading from a learner that has applied through the barrier's
    /// slot. Linearization point: the noop's decision.
    pub async fn linearized_read(&self, read: ReadRequest) -> Result<ReadResponse, ReadError> {
        let (barrier_tx, barrier_rx) = oneshot::channel();
        {
            let mut state = self.state.lock().await;
            if state.role != Role::Leader {
                return Err(ReadError::NotLeader { leader_hint: state.leader_id });
            }
            state.queue.push_back(PendingWrite {
                request_id: format!("barrier-{}", paxoskv_core::generate_tid()),
                client_id: read.client_id.clone(),
                operation: Operation::Noop,
                completion: Some(barrier_tx),
            });
        }

        let barrier_slot = match timeout(READ_BARRIER_DEADLINE, barrier_rx).await {
            Ok(Ok(slot)) => slot,
            Ok(Err(_)) => return Err(ReadError::Barrier("barrier proposal dropped".into())),
            Err(_) => return Err(ReadError::Barrier("barrier timed out".into())),
        };
        debug!(slot = barrier_slot, "read barrier decided");

        // Any learner that has applied through the barrier serves the read.
        let forwarded = ReadRequest::new(
            read.request_id.clone(),
            read.query.clone(),
            ConsistencyLevel::Session,
            read.client_id.clone(),
        );
        for _ in 0..40 {
            for learner in &self.config.learner_hosts {
                match self
                    .peers
                    .post_json::<ReadRequest, ReadResponse>(learner, "/read", &forwarded)
                    .await
                {
                    Ok(response) if response.sequence_number >= barrier_slot => {
                        return Ok(ReadResponse::new(
                            read.request_id.clone(),
                            response.result,
                            response.sequence_number,
                        ));
                    }
                    Ok(_) => continue,
                    Err(err) => {
                        debug!(learner = %learner, error = %err, "learner unavailable for strong read");
                    }
                }
            }
            sleep(Duration::from_millis(50)).await;
        }
        Err(ReadError::LearnersLagging(barrier_slot))
    }

    pub fn id(&self) -> u32 {
        self.config.proposer_id
    }

    /// Peer list used by clients redirected here.
    pub fn learners(&self) -> &[HostPort] {
        &self.config.learner_hosts
    }
}
