//! # paxoskv Peer Transport
//!
//! JSON-over-HTTP communication between nodes: a pooled client with a finite
//! per-request timeout, parallel fan-out to a peer set, and quorum-wait
//! collection that resolves as soon as enough matching answers are in rather
//! than waiting for every peer.

use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use paxoskv_core::config::HostPort;

/// Default timeout applied to every peer RPC.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(3);

/// Transport-level failures. Protocol rejections (NOT_PROMISE and friends)
/// are data, not errors; this type covers only unreachable peers, timeouts,
/// and undecodable replies.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("peer at {url} answered {status}")]
    Status { url: String, status: reqwest::StatusCode },
}

/// How a quorum-wait classifier judges one reply.
pub enum Verdict<A, N> {
    /// Counts toward the quorum.
    Aye(A),
    /// A protocol rejection; resolves the round immediately.
    Nay(N),
}

/// Result of soliciting a quorum of ayes from a peer set.
#[derive(Debug)]
pub enum QuorumOutcome<A, N> {
    /// Enough ayes arrived. Carries every aye received up to that point.
    Reached(Vec<A>),
    /// A rejection arrived before the quorum did.
    Rejected { ayes: Vec<A>, nay: N },
    /// The peer set was exhausted without a quorum; `failures` counts peers
    /// that were unreachable or returned garbage.
    Incomplete { ayes: Vec<A>, failures: usize },
}

/// Pooled HTTP client for node-to-node messages.
#[derive(Debug, Clone)]
pub struct PeerClient {
    http: reqwest::Client,
}

impl PeerClient {
    pub fn new(timeout: Duration) -> Result<Self, NetworkError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| NetworkError::Request { url: "<builder>".into(), source })?;
        Ok(Self { http })
    }

    pub fn with_default_timeout() -> Result<Self, NetworkError> {
        Self::new(DEFAULT_RPC_TIMEOUT)
    }

    /// POST `body` to `peer` at `path` and decode the JSON reply.
    pub async fn post_json<Req, Resp>(
        &self,
        peer: &HostPort,
        path: &str,
        body: &Req,
    ) -> Result<Resp, NetworkError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let url = format!("{}{}", peer.url(), path);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|source| NetworkError::Request { url: url.clone(), source })?;
        if !response.status().is_success() {
            return Err(NetworkError::Status { url, status: response.status() });
        }
        response
            .json::<Resp>()
            .await
            .map_err(|source| NetworkError::Request { url, source })
    }

    /// GET a JSON document from `peer` at `path`.
    pub async fn get_json<Resp>(&self, peer: &HostPort, path: &str) -> Result<Resp, NetworkError>
    where
        Resp: DeserializeOwned,
    {
        let url = format!("{}{}", peer.url(), path);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|source| NetworkError::Request { url: url.clone(), source })?;
        if !response.status().is_success() {
            return Err(NetworkError::Status { url, status: response.status() });
        }
        response
            .json::<Resp>()
            .await
            .map_err(|source| NetworkError::Request { url, source })
    }

    /// Fire `body` at every peer in parallel and collect whatever comes
    /// back. Used for heartbeats and LEARN notifications, where stragglers
    /// and failures are tolerated.
    pub async fn broadcast<Req, Resp>(
        &self,
        peers: &[HostPort],
        path: &str,
        body: &Req,
    ) -> Vec<(HostPort, Result<Resp, NetworkError>)>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let mut inflight: FuturesUnordered<_> = peers
            .iter()
            .map(|peer| async move {
                let result = self.post_json::<Req, Resp>(peer, path, body).await;
                (peer.clone(), result)
            })
            .collect();

        let mut results = Vec::with_capacity(peers.len());
        while let Some(outcome) = inflight.next().await {
            if let (peer, Err(err)) = &outcome {
                debug!(peer = %peer, error = %err, "broadcast peer failed");
            }
            results.push(outcome);
        }
        results
    }

    /// Fan `body` out to every peer and resolve as soon as `quorum` replies
    /// classify as ayes, a reply classifies as a nay, or the peer set is
    /// exhausted. Replies arriving after resolution are discarded; acceptor
    /// idempotence makes that safe.
    pub async fn solicit<Req, Resp, A, N>(
        &self,
        peers: &[HostPort],
        path: &str,
        body: &Req,
        quorum: usize,
        classify: impl Fn(Resp) -> Verdict<A, N>,
    ) -> QuorumOutcome<A, N>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let mut inflight: FuturesUnordered<_> = peers
            .iter()
            .map(|peer| async move {
                let result = self.post_json::<Req, Resp>(peer, path, body).await;
                (peer.clone(), result)
            })
            .collect();

        let mut ayes = Vec::new();
        let mut failures = 0usize;
        while let Some((peer, result)) = inflight.next().await {
            match result {
                Ok(reply) => match classify(reply) {
                    Verdict::Aye(aye) => {
                        ayes.push(aye);
                        if ayes.len() >= quorum {
                            return QuorumOutcome::Reached(ayes);
                        }
                    }
                    Verdict::Nay(nay) => {
                        return QuorumOutcome::Rejected { ayes, nay };
                    }
                },
                Err(err) => {
                    warn!(peer = %peer, path, error = %err, "peer unreachable during fan-out");
                    failures += 1;
                }
            }
        }
        QuorumOutcome::Incomplete { ayes, failures }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Transport behavior against live sockets is covered by the workspace
    // integration tests; here we pin down the pure classification logic.

    #[test]
    fn outcome_shapes_carry_their_evidence() {
        let reached: QuorumOutcome<u32, ()> = QuorumOutcome::Reached(vec![1, 2]);
        match reached {
            QuorumOutcome::Reached(ayes) => assert_eq!(ayes, vec![1, 2]),
            _ => panic!("expected reached"),
        }

        let rejected: QuorumOutcome<u32, &str> =
            QuorumOutcome::Rejected { ayes: vec![1], nay: "higher ballot" };
        match rejected {
            QuorumOutcome::Rejected { ayes, nay } => {
                assert_eq!(ayes, vec![1]);
                assert_eq!(nay, "higher ballot");
            }
            _ => panic!("expected rejected"),
        }
    }
}
