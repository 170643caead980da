//! Wire message definitions.
//!
//! Every message is JSON over HTTP and carries a `type` tag plus a
//! `timestamp` (float seconds since the epoch). Requests that an endpoint can
//! answer in more than one way are modeled as internally tagged enums so the
//! sender branches on the deserialized reply directly.
//!
//! Numeric identifiers (ballots, slots, node ids) are JSON integers; values
//! are arbitrary JSON.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ballot::Ballot;
use crate::{unix_ts, Role};

/// State-machine command carried by a write and applied by learners.
///
/// `noop` commands advance the decided sequence without touching the map;
/// the leader uses them to linearize strong reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Operation {
    Put { key: String, value: Value },
    Delete { key: String },
    Noop,
}

// ---------------------------------------------------------------------------
// Proposer -> acceptor
// ---------------------------------------------------------------------------

/// `PREPARE`: ask acceptors to promise a ballot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prepare {
    #[serde(rename = "type")]
    pub kind: String,
    pub proposal_number: Ballot,
    pub proposer_id: u32,
    pub timestamp: f64,
}

impl Prepare {
    pub fn new(proposal_number: Ballot, proposer_id: u32) -> Self {
        Self { kind: "PREPARE".into(), proposal_number, proposer_id, timestamp: unix_ts() }
    }
}

/// `ACCEPT`: ask acceptors to accept `value` for `slot` under a ballot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Accept {
    #[serde(rename = "type")]
    pub kind: String,
    pub proposal_number: Ballot,
    pub slot: u64,
    pub value: Value,
    pub proposer_id: u32,
    pub timestamp: f64,
}

impl Accept {
    pub fn new(proposal_number: Ballot, slot: u64, value: Value, proposer_id: u32) -> Self {
        Self {
            kind: "ACCEPT".into(),
            proposal_number,
            slot,
            value,
            proposer_id,
            timestamp: unix_ts(),
        }
    }
}

/// `HEARTBEAT`: leader liveness announcement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    #[serde(rename = "type")]
    pub kind: String,
    pub leader_id: u32,
    pub sequence_number: u64,
    pub timestamp: f64,
}

impl Heartbeat {
    pub fn new(leader_id: u32, sequence_number: u64) -> Self {
        Self { kind: "HEARTBEAT".into(), leader_id, sequence_number, timestamp: unix_ts() }
    }
}

// ---------------------------------------------------------------------------
// Acceptor -> proposer
// ---------------------------------------------------------------------------

/// Reply to `PREPARE`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PrepareReply {
    /// The acceptor promised the ballot. Carries the acceptor's currently
    /// accepted triple, if any, so the proposer can honor P2c.
    #[serde(rename = "PROMISE")]
    Promise {
        proposal_number: Ballot,
        accepted_proposal: Option<Ballot>,
        accepted_slot: Option<u64>,
        accepted_value: Option<Value>,
        tid: String,
        timestamp: f64,
    },
    /// The acceptor already promised a higher ballot, reported so the
    /// proposer can jump its counter past it.
    #[serde(rename = "NOT_PROMISE")]
    NotPromise { promised_proposal: Ballot, tid: String, timestamp: f64 },
}

impl PrepareReply {
    pub fn promise(
        proposal_number: Ballot,
        accepted_proposal: Option<Ballot>,
        accepted_slot: Option<u64>,
        accepted_value: Option<Value>,
        tid: String,
    ) -> Self {
        PrepareReply::Promise {
            proposal_number,
            accepted_proposal,
            accepted_slot,
            accepted_value,
            tid,
            timestamp: unix_ts(),
        }
    }

    pub fn not_promise(promised_proposal: Ballot, tid: String) -> Self {
        PrepareReply::NotPromise { promised_proposal, tid, timestamp: unix_ts() }
    }
}

/// Reply to `ACCEPT`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AcceptReply {
    #[serde(rename = "ACCEPTED")]
    Accepted { proposal_number: Ballot, slot: u64, value: Value, tid: String, timestamp: f64 },
    #[serde(rename = "NOT_ACCEPTED")]
    NotAccepted { promised_proposal: Ballot, tid: String, timestamp: f64 },
}

impl AcceptReply {
    pub fn accepted(proposal_number: Ballot, slot: u64, value: Value, tid: String) -> Self {
        AcceptReply::Accepted { proposal_number, slot, value, tid, timestamp: unix_ts() }
    }

    pub fn not_accepted(promised_proposal: Ballot, tid: String) -> Self {
        AcceptReply::NotAccepted { promised_proposal, tid, timestamp: unix_ts() }
    }
}

/// Reply to `HEARTBEAT`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatAck {
    #[serde(rename = "type")]
    pub kind: String,
    pub acceptor_id: u32,
    pub timestamp: f64,
}

impl HeartbeatAck {
    pub fn new(acceptor_id: u32) -> Self {
        Self { kind: "HEARTBEAT_ACK".into(), acceptor_id, timestamp: unix_ts() }
    }
}

// ---------------------------------------------------------------------------
// Acceptor -> learner
// ---------------------------------------------------------------------------

/// `LEARN`: an acceptor reports that it accepted `value` for `slot`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Learn {
    #[serde(rename = "type")]
    pub kind: String,
    pub slot: u64,
    pub proposal_number: Ballot,
    pub value: Value,
    pub acceptor_id: u32,
    pub tid: String,
    pub timestamp: f64,
}

impl Learn {
    pub fn new(slot: u64, proposal_number: Ballot, value: Value, acceptor_id: u32, tid: String) -> Self {
        Self {
            kind: "LEARN".into(),
            slot,
            proposal_number,
            value,
            acceptor_id,
            tid,
            timestamp: unix_ts(),
        }
    }
}

/// Reply to `LEARN`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnAck {
    #[serde(rename = "type")]
    pub kind: String,
    pub learner_id: u32,
    pub slot: u64,
    pub timestamp: f64,
}

impl LearnAck {
    pub fn new(learner_id: u32, slot: u64) -> Self {
        Self { kind: "LEARN_ACK".into(), learner_id, slot, timestamp: unix_ts() }
    }
}

// ---------------------------------------------------------------------------
// Learner <-> learner
// ---------------------------------------------------------------------------

/// One decision as exchanged between learners and as persisted in the
/// decision log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub slot: u64,
    pub proposal_number: Ballot,
    pub value: Value,
    pub confirming_acceptors: BTreeSet<u32>,
    pub first_seen: f64,
    pub last_seen: f64,
    pub decided: bool,
}

/// `SYNC_REQUEST`: ask a peer learner for decisions in `[from_seq, to_seq]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub from_seq: u64,
    pub to_seq: u64,
    pub learner_id: u32,
    pub timestamp: f64,
}

impl SyncRequest {
    pub fn new(from_seq: u64, to_seq: u64, learner_id: u32) -> Self {
        Self { kind: "SYNC_REQUEST".into(), from_seq, to_seq, learner_id, timestamp: unix_ts() }
    }
}

/// `SYNC_RESPONSE`: the locally-known subset of the requested range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResponse {
    #[serde(rename = "type")]
    pub kind: String,
    pub decisions: Vec<DecisionRecord>,
    pub learner_id: u32,
    pub timestamp: f64,
}

impl SyncResponse {
    pub fn new(decisions: Vec<DecisionRecord>, learner_id: u32) -> Self {
        Self { kind: "SYNC_RESPONSE".into(), decisions, learner_id, timestamp: unix_ts() }
    }
}

// ---------------------------------------------------------------------------
// Client <-> proposer
// ---------------------------------------------------------------------------

/// Requests a client may post to a proposer's `/request` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientRequest {
    #[serde(rename = "WRITE_REQUEST")]
    Write {
        request_id: String,
        client_id: String,
        operation: Operation,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
        timestamp: f64,
    },
    #[serde(rename = "STATUS_REQUEST")]
    Status { request_id: String, client_id: String, timestamp: f64 },
}

impl ClientRequest {
    pub fn write(request_id: String, client_id: String, operation: Operation) -> Self {
        ClientRequest::Write {
            request_id,
            client_id,
            operation,
            timeout_ms: None,
            timestamp: unix_ts(),
        }
    }

    pub fn status(request_id: String, client_id: String) -> Self {
        ClientRequest::Status { request_id, client_id, timestamp: unix_ts() }
    }

    pub fn request_id(&self) -> &str {
        match self {
            ClientRequest::Write { request_id, .. } => request_id,
            ClientRequest::Status { request_id, .. } => request_id,
        }
    }
}

/// Proposer status as reported in `STATUS_RESPONSE` and on `/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposerStatus {
    pub proposer_id: u32,
    pub role: Role,
    pub leader_id: Option<u32>,
    pub queue_size: usize,
    pub active_proposals: usize,
}

/// Replies a proposer may give on `/request`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientReply {
    #[serde(rename = "WRITE_ACKNOWLEDGMENT")]
    WriteAcknowledgment { request_id: String, status: String, leader_id: u32, timestamp: f64 },
    #[serde(rename = "REDIRECT")]
    Redirect { request_id: String, correct_leader: u32, reason: String, timestamp: f64 },
    #[serde(rename = "STATUS_RESPONSE")]
    StatusResponse { request_id: String, status_info: ProposerStatus, timestamp: f64 },
    #[serde(rename = "ERROR")]
    Error { request_id: Option<String>, error: String, timestamp: f64 },
}

impl ClientReply {
    pub fn queued(request_id: String, leader_id: u32) -> Self {
        ClientReply::WriteAcknowledgment {
            request_id,
            status: "queued".into(),
            leader_id,
            timestamp: unix_ts(),
        }
    }

    pub fn redirect(request_id: String, correct_leader: u32) -> Self {
        ClientReply::Redirect {
            request_id,
            correct_leader,
            reason: "not_leader".into(),
            timestamp: unix_ts(),
        }
    }

    pub fn status(request_id: String, status_info: ProposerStatus) -> Self {
        ClientReply::StatusResponse { request_id, status_info, timestamp: unix_ts() }
    }

    pub fn error(request_id: Option<String>, error: impl Into<String>) -> Self {
        ClientReply::Error { request_id, error: error.into(), timestamp: unix_ts() }
    }
}

// ---------------------------------------------------------------------------
// Client <-> learner (and proposer, for strong reads)
// ---------------------------------------------------------------------------

/// Consistency level requested with a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsistencyLevel {
    Eventual,
    Session,
    Strong,
}

/// What to read. `key` wins over `type` when both are present, mirroring how
/// queries have always been interpreted on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReadQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

impl ReadQuery {
    pub fn key(key: impl Into<String>) -> Self {
        ReadQuery { key: Some(key.into()), ..Default::default() }
    }

    pub fn all() -> Self {
        ReadQuery { kind: Some("all".into()), ..Default::default() }
    }

    pub fn prefix(prefix: impl Into<String>) -> Self {
        ReadQuery { kind: Some("prefix".into()), prefix: Some(prefix.into()), ..Default::default() }
    }
}

/// `READ_REQUEST` posted to a learner's (or, for strong reads, the leader
/// proposer's) `/read` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub request_id: String,
    pub query: ReadQuery,
    pub consistency_level: ConsistencyLevel,
    pub client_id: String,
    pub timestamp: f64,
}

impl ReadRequest {
    pub fn new(
        request_id: String,
        query: ReadQuery,
        consistency_level: ConsistencyLevel,
        client_id: String,
    ) -> Self {
        Self {
            kind: "READ_REQUEST".into(),
            request_id,
            query,
            consistency_level,
            client_id,
            timestamp: unix_ts(),
        }
    }
}

/// `READ_RESPONSE`: result plus the responder's applied watermark, which lets
/// clients observe read monotonicity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadResponse {
    #[serde(rename = "type")]
    pub kind: String,
    pub request_id: String,
    pub result: Value,
    pub sequence_number: u64,
    pub timestamp: f64,
}

impl ReadResponse {
    pub fn new(request_id: String, result: Value, sequence_number: u64) -> Self {
        Self { kind: "READ_RESPONSE".into(), request_id, result, sequence_number, timestamp: unix_ts() }
    }
}
