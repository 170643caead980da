//! HTTP surface for the proposer role: the client-facing `/request`
//! endpoint, the heartbeat receiver, and the strong-read pipeline.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use paxoskv_consensus::Proposer;
use paxoskv_core::messages::{
    ClientReply, ClientRequest, ConsistencyLevel, Heartbeat, HeartbeatAck, ReadRequest,
    ReadResponse,
};

use crate::ApiError;

/// Router exposing a proposer over HTTP.
pub fn proposer_router(proposer: Arc<Proposer>) -> Router {
    Router::new()
        .route("/request", post(request))
        .route("/heartbeat", post(heartbeat))
        .route("/read", post(read))
        .route("/status", get(status))
        .route("/health", get(health))
        .with_state(proposer)
}

/// Client writes and status requests. Redirects and protocol errors are
/// in-band `ClientReply` values, not HTTP errors.
async fn request(
    State(proposer): State<Arc<Proposer>>,
    Json(msg): Json<ClientRequest>,
) -> Json<ClientReply> {
    Json(proposer.handle_client_request(msg).await)
}

async fn heartbeat(
    State(proposer): State<Arc<Proposer>>,
    Json(msg): Json<Heartbeat>,
) -> Json<HeartbeatAck> {
    Json(proposer.handle_heartbeat(msg).await)
}

/// Strong reads only: the leader linearizes the read through a consensus
/// barrier. Weaker consistency levels belong to the learners.
async fn read(
    State(proposer): State<Arc<Proposer>>,
    Json(msg): Json<ReadRequest>,
) -> Result<Json<ReadResponse>, ApiError> {
    if msg.consistency_level != ConsistencyLevel::Strong {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "only strong reads are served by the proposer; use a learner",
        ));
    }
    Ok(Json(proposer.linearized_read(msg).await?))
}

async fn status(State(proposer): State<Arc<Proposer>>) -> Json<Value> {
    let status = proposer.status().await;
    Json(json!(status))
}

async fn health(State(proposer): State<Arc<Proposer>>) -> Json<Value> {
    let status = proposer.status().await;
    Json(json!({
        "status": "ok",
        "proposer_id": proposer.id(),
        "role": status.role,
        "leader_id": status.leader_id,
    }))
}
