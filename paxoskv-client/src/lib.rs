//! # paxoskv Client Library
//!
//! Talks to a paxoskv cluster on behalf of an application: discovers the
//! leader by polling proposer status endpoints, follows redirects, retries
//! with exponential backoff and jitter (capped at five attempts end to
//! end), and routes reads by the requested consistency level — learners for
//! `eventual` and `session`, the leader proposer for `strong`.
//!
//! Session consistency is tracked client-side: the highest applied sequence
//! number observed so far is remembered, and a replica that has fallen
//! behind it is skipped.

use std::collections::HashMap;
use std::time::Duration;

use rand::Rng;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use paxoskv_core::config::HostPort;
use paxoskv_core::messages::{
    ClientReply, ClientRequest, ConsistencyLevel, Operation, ProposerStatus, ReadQuery,
    ReadRequest, ReadResponse,
};

/// Hard cap on end-to-end attempts for one operation.
const MAX_ATTEMPTS: u32 = 5;

/// Base of the exponential backoff schedule.
const BACKOFF_BASE_MS: u64 = 100;

/// Ceiling of the backoff schedule.
const BACKOFF_CAP_MS: u64 = 10_000;

/// Client-side failures.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("no proposers configured")]
    NoProposers,

    #[error("no learners configured")]
    NoLearners,

    #[error("gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("cluster refused the request: {0}")]
    Refused(String),
}

/// Acknowledgment of a queued write.
#[derive(Debug, Clone)]
pub struct WriteReceipt {
    pub request_id: String,
    pub leader_id: u32,
}

/// Result of a read, with the replica's applied watermark.
#[derive(Debug, Clone)]
pub struct ReadResult {
    pub result: Value,
    pub sequence_number: u64,
}

/// Error body returned by node HTTP surfaces for refused reads.
#[derive(Debug, Deserialize)]
struct NodeErrorBody {
    error: String,
    #[serde(default)]
    leader_hint: Option<u32>,
}

#[derive(Debug, Default)]
struct LeaderHint {
    leader_id: Option<u32>,
    /// proposer_id -> address, learned from status polling.
    known_proposers: HashMap<u32, HostPort>,
}

/// Backoff before retry `attempt` (0-based): `base × 2^attempt`, capped,
/// multiplied by uniform jitter in [0.8, 1.2].
pub fn backoff_delay(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE_MS.saturating_mul(1u64 << attempt.min(20));
    let capped = exp.min(BACKOFF_CAP_MS);
    let jitter = rand::thread_rng().gen_range(0.8..=1.2);
    Duration::from_millis((capped as f64 * jitter) as u64)
}

/// A handle on a paxoskv cluster.
pub struct PaxosClient {
    client_id: String,
    proposer_hosts: Vec<HostPort>,
    learner_hosts: Vec<HostPort>,
    http: reqwest::Client,
    leader: Mutex<LeaderHint>,
    /// Highest sequence number observed; floor for session reads.
    session_floor: Mutex<u64>,
    /// request_id -> receipt, so an acknowledged write is never re-submitted.
    acked: Mutex<HashMap<String, WriteReceipt>>,
}

impl PaxosClient {
    pub fn new(
        client_id: impl Into<String>,
        proposer_hosts: Vec<HostPort>,
        learner_hosts: Vec<HostPort>,
    ) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|err| ClientError::Refused(err.to_string()))?;
        Ok(Self {
            client_id: client_id.into(),
            proposer_hosts,
            learner_hosts,
            http,
            leader: Mutex::new(LeaderHint::default()),
            session_floor: Mutex::new(0),
            acked: Mutex::new(HashMap::new()),
        })
    }

    // -- leader discovery ----------------------------------------------------

    /// Poll proposer status endpoints, caching every proposer's address and
    /// adopting any self-reported or hinted leader.
    pub async fn discover_leader(&self) -> Option<u32> {
        let mut hint = self.leader.lock().await;
        hint.leader_id = None;
        let mut reported: Option<u32> = None;

        for peer in &self.proposer_hosts {
            let url = format!("{}/status", peer.url());
            let status = match self.http.get(&url).send().await {
                Ok(response) => response.json::<ProposerStatus>().await,
                Err(err) => {
                    warn!(peer = %peer, error = %err, "status poll failed");
                    continue;
                }
            };
            match status {
                Ok(status) => {
                    hint.known_proposers.insert(status.proposer_id, peer.clone());
                    if status.role == paxoskv_core::Role::Leader {
                        info!(leader = status.proposer_id, peer = %peer, "discovered leader");
                        hint.leader_id = Some(status.proposer_id);
                        return hint.leader_id;
                    }
                    if reported.is_none() {
                        reported = status.leader_id;
                    }
                }
                Err(err) => warn!(peer = %peer, error = %err, "undecodable status"),
            }
        }

        if let Some(leader) = reported {
            info!(leader, "leader learned from a follower's hint");
            hint.leader_id = Some(leader);
        }
        hint.leader_id
    }

    async fn preferred_proposer(&self) -> Result<HostPort, ClientError> {
        if self.proposer_hosts.is_empty() {
            return Err(ClientError::NoProposers);
        }
        let hint = self.leader.lock().await;
        if let Some(address) =
            hint.leader_id.and_then(|leader| hint.known_proposers.get(&leader).cloned())
        {
            return Ok(address);
        }
        drop(hint);
        let index = rand::thread_rng().gen_range(0..self.proposer_hosts.len());
        Ok(self.proposer_hosts[index].clone())
    }

    async fn adopt_leader(&self, leader_id: u32) {
        let mut hint = self.leader.lock().await;
        hint.leader_id = Some(leader_id);
    }

    // -- writes --------------------------------------------------------------

    /// Write a key-value pair. Resolves once the leader has queued the
    /// write; the decided value becomes visible through reads.
    pub async fn put(&self, key: impl Into<String>, value: Value) -> Result<WriteReceipt, ClientError> {
        self.submit(Operation::Put { key: key.into(), value }).await
    }

    /// Delete a key.
    pub async fn delete(&self, key: impl Into<String>) -> Result<WriteReceipt, ClientError> {
        self.submit(Operation::Delete { key: key.into() }).await
    }

    async fn submit(&self, operation: Operation) -> Result<WriteReceipt, ClientError> {
        // One request id for the whole retry loop, so the cluster can
        // correlate re-submissions of the same logical write.
        let request_id = uuid::Uuid::new_v4().to_string();

        let mut last_error = String::from("no attempt made");
        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(backoff_delay(attempt - 1)).await;
            }

            let target = self.preferred_proposer().await?;
            let request = ClientRequest::write(
                request_id.clone(),
                self.client_id.clone(),
                operation.clone(),
            );
            debug!(request_id = %request_id, target = %target, attempt, "sending write");

            let url = format!("{}/request", target.url());
            let reply = match self.http.post(&url).json(&request).send().await {
                Ok(response) => response.json::<ClientReply>().await,
                Err(err) => {
                    last_error = err.to_string();
                    warn!(target = %target, error = %last_error, "write attempt failed");
                    self.discover_leader().await;
                    continue;
                }
            };

            match reply {
                Ok(ClientReply::WriteAcknowledgment { request_id, leader_id, .. }) => {
                    // The acknowledging node is the leader; remember it.
                    {
                        let mut hint = self.leader.lock().await;
                        hint.leader_id = Some(leader_id);
                        hint.known_proposers.insert(leader_id, target.clone());
                    }
                    let receipt = WriteReceipt { request_id: request_id.clone(), leader_id };
                    self.acked.lock().await.insert(request_id, receipt.clone());
                    return Ok(receipt);
                }
                Ok(ClientReply::Redirect { correct_leader, .. }) => {
                    info!(correct_leader, "redirected; retargeting");
                    self.adopt_leader(correct_leader).await;
                    // Make sure we have an address for the hinted leader.
                    let known = {
                        let hint = self.leader.lock().await;
                        hint.known_proposers.contains_key(&correct_leader)
                    };
                    if !known {
                        self.discover_leader().await;
                        self.adopt_leader(correct_leader).await;
                    }
                    last_error = format!("redirected to proposer {correct_leader}");
                }
                Ok(ClientReply::Error { error, .. }) => {
                    last_error = error;
                    warn!(error = %last_error, "cluster error; will rediscover leader");
                    self.discover_leader().await;
                }
                Ok(ClientReply::StatusResponse { .. }) => {
                    last_error = "unexpected status response to a write".into();
                }
                Err(err) => {
                    last_error = err.to_string();
                }
            }
        }

        Err(ClientError::RetriesExhausted { attempts: MAX_ATTEMPTS, last_error })
    }

    // -- reads ---------------------------------------------------------------

    /// Read under the requested consistency level.
    pub async fn read(
        &self,
        query: ReadQuery,
        level: ConsistencyLevel,
    ) -> Result<ReadResult, ClientError> {
        match level {
            ConsistencyLevel::Strong => self.strong_read(query).await,
            ConsistencyLevel::Eventual | ConsistencyLevel::Session => {
                self.replica_read(query, level).await
            }
        }
    }

    /// Read a single key; `None` when absent.
    pub async fn get(
        &self,
        key: impl Into<String>,
        level: ConsistencyLevel,
    ) -> Result<Option<Value>, ClientError> {
        let outcome = self.read(ReadQuery::key(key), level).await?;
        Ok((!outcome.result.is_null()).then_some(outcome.result))
    }

    async fn replica_read(
        &self,
        query: ReadQuery,
        level: ConsistencyLevel,
    ) -> Result<ReadResult, ClientError> {
        if self.learner_hosts.is_empty() {
            return Err(ClientError::NoLearners);
        }
        let floor = match level {
            ConsistencyLevel::Session => *self.session_floor.lock().await,
            _ => 0,
        };

        let mut last_error = String::from("no learner answered");
        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(backoff_delay(attempt - 1)).await;
            }

            // Rotate through the learners starting from a random one.
            let start = rand::thread_rng().gen_range(0..self.learner_hosts.len());
            for offset in 0..self.learner_hosts.len() {
                let learner = &self.learner_hosts[(start + offset) % self.learner_hosts.len()];
                let request = ReadRequest::new(
                    uuid::Uuid::new_v4().to_string(),
                    query.clone(),
                    level,
                    self.client_id.clone(),
                );
                let url = format!("{}/read", learner.url());
                match self.http.post(&url).json(&request).send().await {
                    Ok(response) if response.status().is_success() => {
                        match response.json::<ReadResponse>().await {
                            Ok(body) if body.sequence_number >= floor => {
                                self.note_sequence(body.sequence_number).await;
                                return Ok(ReadResult {
                                    result: body.result,
                                    sequence_number: body.sequence_number,
                                });
                            }
                            Ok(body) => {
                                debug!(
                                    learner = %learner,
                                    seen = body.sequence_number,
                                    floor,
                                    "replica behind session floor; trying another"
                                );
                                last_error = format!(
                                    "learner at {learner} behind session floor ({} < {floor})",
                                    body.sequence_number
                                );
                            }
                            Err(err) => last_error = err.to_string(),
                        }
                    }
                    Ok(response) => last_error = format!("learner answered {}", response.status()),
                    Err(err) => last_error = err.to_string(),
                }
            }
        }

        Err(ClientError::RetriesExhausted { attempts: MAX_ATTEMPTS, last_error })
    }

    async fn strong_read(&self, query: ReadQuery) -> Result<ReadResult, ClientError> {
        if self.proposer_hosts.is_empty() {
            return Err(ClientError::NoProposers);
        }

        let mut last_error = String::from("no leader reachable");
        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(backoff_delay(attempt - 1)).await;
            }
            if self.leader.lock().await.leader_id.is_none() {
                self.discover_leader().await;
            }

            let target = self.preferred_proposer().await?;
            let request = ReadRequest::new(
                uuid::Uuid::new_v4().to_string(),
                query.clone(),
                ConsistencyLevel::Strong,
                self.client_id.clone(),
            );
            let url = format!("{}/read", target.url());
            match self.http.post(&url).json(&request).send().await {
                Ok(response) if response.status().is_success() => {
                    match response.json::<ReadResponse>().await {
                        Ok(body) => {
                            self.note_sequence(body.sequence_number).await;
                            return Ok(ReadResult {
                                result: body.result,
                                sequence_number: body.sequence_number,
                            });
                        }
                        Err(err) => last_error = err.to_string(),
                    }
                }
                Ok(response) => {
                    let status = response.status();
                    match response.json::<NodeErrorBody>().await {
                        Ok(body) => {
                            last_error = body.error;
                            if let Some(leader) = body.leader_hint {
                                info!(leader, "strong read redirected to leader");
                                self.adopt_leader(leader).await;
                            } else {
                                self.discover_leader().await;
                            }
                        }
                        Err(_) => {
                            last_error = format!("proposer answered {status}");
                            self.discover_leader().await;
                        }
                    }
                }
                Err(err) => {
                    last_error = err.to_string();
                    self.discover_leader().await;
                }
            }
        }

        Err(ClientError::RetriesExhausted { attempts: MAX_ATTEMPTS, last_error })
    }

    async fn note_sequence(&self, sequence: u64) {
        let mut floor = self.session_floor.lock().await;
        if sequence > *floor {
            *floor = sequence;
        }
    }

    /// The receipt of an already-acknowledged write, if any. Lets callers
    /// correlate their own request ids without re-submitting.
    pub async fn receipt_for(&self, request_id: &str) -> Option<WriteReceipt> {
        self.acked.lock().await.get(request_id).cloned()
    }

    // -- status --------------------------------------------------------------

    /// Gather status documents from every configured node.
    pub async fn cluster_status(&self) -> Value {
        let mut nodes = Vec::new();
        for peer in self.proposer_hosts.iter().chain(self.learner_hosts.iter()) {
            let url = format!("{}/status", peer.url());
            let status = match self.http.get(&url).send().await {
                Ok(response) => response.json::<Value>().await.unwrap_or(Value::Null),
                Err(err) => json!({ "error": err.to_string() }),
            };
            nodes.push(json!({ "address": peer.to_string(), "status": status }));
        }
        json!(nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps_with_jitter_bounds() {
        for _ in 0..50 {
            let first = backoff_delay(0).as_millis() as f64;
            assert!((80.0..=120.0).contains(&first), "attempt 0 gave {first}ms");

            let third = backoff_delay(2).as_millis() as f64;
            assert!((320.0..=480.0).contains(&third), "attempt 2 gave {third}ms");

            // Far past the cap the schedule flattens at 10s (± jitter).
            let capped = backoff_delay(30).as_millis() as f64;
            assert!((8_000.0..=12_000.0).contains(&capped), "capped gave {capped}ms");
        }
    }

    #[test]
    fn backoff_is_monotone_in_expectation_below_the_cap() {
        // Expected value doubles per attempt until the cap, so even with
        // jitter the upper bound of attempt n stays below the lower bound
        // of attempt n + 2.
        for attempt in 0..5u32 {
            let upper = 100u64 * (1 << attempt) * 12 / 10;
            let lower_two_later = 100u64 * (1 << (attempt + 2)) * 8 / 10;
            assert!(upper < lower_two_later);
        }
    }
}
