//! End-to-end tests over a real cluster on loopback HTTP: every node role
//! runs in-process with its production router, wired together by the same
//! host lists a deployment would use.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};

use paxoskv_api::{acceptor_router, learner_router, proposer_router, spawn_server};
use paxoskv_client::PaxosClient;
use paxoskv_consensus::{Acceptor, Learner, Proposer};
use paxoskv_core::config::{AcceptorConfig, HostPort, LearnerConfig, ProposerConfig};
use paxoskv_core::messages::{ClientReply, ClientRequest, ConsistencyLevel, Operation, ReadQuery};

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .expect("bind ephemeral port")
        .local_addr()
        .expect("local addr")
        .port()
}

fn local(port: u16) -> HostPort {
    HostPort::new("127.0.0.1", port)
}

fn scratch_dir(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("paxoskv-cluster-{tag}-{}", uuid::Uuid::new_v4()))
}

async fn spawn_acceptor(id: u32, port: u16, learners: Vec<HostPort>, dir: &PathBuf) {
    let config = AcceptorConfig {
        acceptor_id: id,
        bind_address: "127.0.0.1".into(),
        port,
        data_dir: dir.clone(),
        total_acceptors: 3,
        learner_hosts: learners,
    };
    let acceptor = Arc::new(Acceptor::new(&config).await.expect("acceptor boots"));
    spawn_server(&format!("127.0.0.1:{port}"), acceptor_router(acceptor))
        .await
        .expect("acceptor serves");
}

async fn spawn_learner(
    id: u32,
    port: u16,
    other_learners: Vec<HostPort>,
    dir: &PathBuf,
) -> Arc<Learner> {
    let config = LearnerConfig {
        learner_id: id,
        bind_address: "127.0.0.1".into(),
        port,
        data_dir: dir.clone(),
        total_acceptors: 3,
        quorum_size: 2,
        other_learners,
        proposer_hosts: vec![],
    };
    let learner = Arc::new(Learner::new(&config).await.expect("learner boots"));
    Arc::clone(&learner).start().await;
    spawn_server(&format!("127.0.0.1:{port}"), learner_router(Arc::clone(&learner)))
        .await
        .expect("learner serves");
    learner
}

async fn spawn_proposer(
    id: u32,
    port: u16,
    acceptors: Vec<HostPort>,
    learners: Vec<HostPort>,
    other_proposers: Vec<HostPort>,
) -> Arc<Proposer> {
    let config = ProposerConfig {
        proposer_id: id,
        bind_address: "127.0.0.1".into(),
        port,
        acceptor_hosts: acceptors,
        learner_hosts: learners,
        other_proposers,
        heartbeat_interval: Duration::from_millis(100),
        leader_timeout: Duration::from_millis(400),
    };
    let proposer = Arc::new(Proposer::new(config).expect("proposer boots"));
    Arc::clone(&proposer).start();
    spawn_server(&format!("127.0.0.1:{port}"), proposer_router(Arc::clone(&proposer)))
        .await
        .expect("proposer serves");
    proposer
}

/// Poll `probe` until it yields `Some` or the deadline passes.
async fn eventually<T, F, Fut>(deadline: Duration, mut probe: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Option<T>>,
{
    let start = Instant::now();
    loop {
        if let Some(found) = probe().await {
            return Some(found);
        }
        if start.elapsed() > deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

struct Cluster {
    #[allow(dead_code)]
    acceptor_ports: Vec<u16>,
    learner_ports: Vec<u16>,
    proposer_ports: Vec<u16>,
    proposers: Vec<Arc<Proposer>>,
    dirs: Vec<PathBuf>,
}

impl Cluster {
    /// Three acceptors, two learners, `proposer_count` proposers.
    async fn start(tag: &str, proposer_count: u32) -> Cluster {
        let acceptor_ports: Vec<u16> = (0..3).map(|_| free_port()).collect();
        let learner_ports: Vec<u16> = (0..2).map(|_| free_port()).collect();
        let proposer_ports: Vec<u16> = (0..proposer_count).map(|_| free_port()).collect();

        let learner_hosts: Vec<HostPort> = learner_ports.iter().map(|p| local(*p)).collect();
        let acceptor_hosts: Vec<HostPort> = acceptor_ports.iter().map(|p| local(*p)).collect();

        let mut dirs = Vec::new();
        for (index, port) in learner_ports.iter().enumerate() {
            let dir = scratch_dir(tag);
            let peers: Vec<HostPort> = learner_ports
                .iter()
                .filter(|other| *other != port)
                .map(|p| local(*p))
                .collect();
            spawn_learner(index as u32 + 1, *port, peers, &dir).await;
            dirs.push(dir);
        }
        for (index, port) in acceptor_ports.iter().enumerate() {
            let dir = scratch_dir(tag);
            spawn_acceptor(index as u32 + 1, *port, learner_hosts.clone(), &dir).await;
            dirs.push(dir);
        }

        let mut proposers = Vec::new();
        for (index, port) in proposer_ports.iter().enumerate() {
            let peers: Vec<HostPort> = proposer_ports
                .iter()
                .filter(|other| *other != port)
                .map(|p| local(*p))
                .collect();
            let proposer = spawn_proposer(
                index as u32 + 1,
                *port,
                acceptor_hosts.clone(),
                learner_hosts.clone(),
                peers,
            )
            .await;
            proposers.push(proposer);
        }

        Cluster { acceptor_ports, learner_ports, proposer_ports, proposers, dirs }
    }

    fn client(&self, client_id: &str) -> PaxosClient {
        PaxosClient::new(
            client_id,
            self.proposer_ports.iter().map(|p| local(*p)).collect(),
            self.learner_ports.iter().map(|p| local(*p)).collect(),
        )
        .expect("client builds")
    }

    /// Wait until exactly one proposer reports leadership and return its id.
    async fn wait_for_leader(&self) -> u32 {
        let leader = eventually(Duration::from_secs(15), || async {
            let mut leaders = Vec::new();
            for proposer in &self.proposers {
                let status = proposer.status().await;
                if status.role == paxoskv_core::Role::Leader {
                    leaders.push(status.proposer_id);
                }
            }
            match leaders.as_slice() {
                [single] => Some(*single),
                _ => None,
            }
        })
        .await;
        leader.expect("a single leader should emerge")
    }

    async fn cleanup(self) {
        for dir in &self.dirs {
            let _ = tokio::fs::remove_dir_all(dir).await;
        }
    }
}

#[tokio::test]
async fn write_then_read_across_the_cluster() {
    let cluster = Cluster::start("happy", 1).await;
    cluster.wait_for_leader().await;

    let client = cluster.client("c-happy");
    client.put("x", json!("1")).await.expect("write acknowledged");

    // The decided value becomes visible at both learners.
    let http = reqwest::Client::new();
    for port in &cluster.learner_ports {
        let port = *port;
        let http = http.clone();
        let seen = eventually(Duration::from_secs(15), || {
            let http = http.clone();
            async move {
                let request = serde_json::json!({
                    "type": "READ_REQUEST",
                    "request_id": uuid::Uuid::new_v4().to_string(),
                    "query": {"key": "x"},
                    "consistency_level": "eventual",
                    "client_id": "probe",
                    "timestamp": 0.0,
                });
                let response = http
                    .post(format!("http://127.0.0.1:{port}/read"))
                    .json(&request)
                    .send()
                    .await
                    .ok()?;
                let body: Value = response.json().await.ok()?;
                (body["result"] == json!("1")).then_some(())
            }
        })
        .await;
        assert!(seen.is_some(), "learner on port {port} never saw the write");
    }

    // A strong read through the leader observes the write as well.
    let strong = client.read(ReadQuery::key("x"), ConsistencyLevel::Strong).await.unwrap();
    assert_eq!(strong.result, json!("1"));
    assert!(strong.sequence_number >= 1);

    cluster.cleanup().await;
}

#[tokio::test]
async fn election_settles_on_one_leader_and_followers_redirect() {
    let cluster = Cluster::start("election", 2).await;

    // After the initial silence one of the two proposers wins; the other
    // observes its heartbeats and stays a follower.
    let leader_id = cluster.wait_for_leader().await;

    let follower = cluster
        .proposers
        .iter()
        .find(|proposer| proposer.id() != leader_id)
        .expect("one follower");
    let follower_status = eventually(Duration::from_secs(10), || async {
        let status = follower.status().await;
        (status.leader_id == Some(leader_id)).then_some(status)
    })
    .await
    .expect("follower learns the leader");
    assert_eq!(follower_status.role, paxoskv_core::Role::Follower);

    // A write posted straight at the follower is redirected to the leader.
    let follower_port = cluster.proposer_ports[(follower.id() - 1) as usize];
    let request = ClientRequest::write(
        "direct-1".into(),
        "c-direct".into(),
        Operation::Put { key: "k".into(), value: json!("v") },
    );
    let reply: ClientReply = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{follower_port}/request"))
        .json(&request)
        .send()
        .await
        .expect("follower reachable")
        .json()
        .await
        .expect("reply decodes");
    match reply {
        ClientReply::Redirect { correct_leader, .. } => assert_eq!(correct_leader, leader_id),
        other => panic!("expected redirect, got {other:?}"),
    }

    // The client library follows the redirect on its own and the write lands.
    let client = cluster.client("c-election");
    let receipt = client.put("k", json!("v")).await.expect("write acknowledged");
    assert_eq!(receipt.leader_id, leader_id);

    let value = eventually(Duration::from_secs(15), || async {
        client
            .get("k", ConsistencyLevel::Eventual)
            .await
            .ok()
            .flatten()
            .filter(|value| *value == json!("v"))
    })
    .await;
    assert!(value.is_some(), "redirected write never became visible");

    cluster.cleanup().await;
}

#[tokio::test]
async fn learners_fill_gaps_from_their_peers() {
    // Two learners with no acceptors: LEARN traffic is injected directly.
    let l1_port = free_port();
    let l2_port = free_port();
    let dir1 = scratch_dir("gap-l1");
    let dir2 = scratch_dir("gap-l2");
    spawn_learner(1, l1_port, vec![local(l2_port)], &dir1).await;
    spawn_learner(2, l2_port, vec![local(l1_port)], &dir2).await;

    let http = reqwest::Client::new();
    let learn = |port: u16, slot: u64, acceptor: u32| {
        let http = http.clone();
        async move {
            let message = serde_json::json!({
                "type": "LEARN",
                "slot": slot,
                "proposal_number": slot << 16 | 1,
                "value": {"operation": {"type": "put", "key": format!("k{slot}"), "value": slot}},
                "acceptor_id": acceptor,
                "tid": format!("t-{slot}-{acceptor}"),
                "timestamp": 0.0,
            });
            http.post(format!("http://127.0.0.1:{port}/learn"))
                .json(&message)
                .send()
                .await
                .expect("learn delivered");
        }
    };

    // Learner 2 hears slots 1 and 2 at quorum; learner 1 misses slot 1.
    for slot in 1..=2u64 {
        learn(l2_port, slot, 1).await;
        learn(l2_port, slot, 2).await;
    }
    learn(l1_port, 2, 1).await;
    learn(l1_port, 2, 2).await;

    // Learner 1 notices the gap, syncs slot 1 from learner 2, and applies
    // both slots in order.
    let caught_up = eventually(Duration::from_secs(15), || {
        let http = http.clone();
        async move {
            let status: Value = http
                .get(format!("http://127.0.0.1:{l1_port}/status"))
                .send()
                .await
                .ok()?
                .json()
                .await
                .ok()?;
            (status["last_applied"] == json!(2)).then_some(())
        }
    })
    .await;
    assert!(caught_up.is_some(), "learner 1 never filled its gap");

    let _ = tokio::fs::remove_dir_all(&dir1).await;
    let _ = tokio::fs::remove_dir_all(&dir2).await;
}
