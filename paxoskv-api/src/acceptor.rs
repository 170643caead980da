//! HTTP surface for the acceptor role.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use paxoskv_consensus::Acceptor;
use paxoskv_core::messages::{
    Accept, AcceptReply, Heartbeat, HeartbeatAck, Prepare, PrepareReply,
};

use crate::ApiError;

/// Router exposing an acceptor over HTTP.
pub fn acceptor_router(acceptor: Arc<Acceptor>) -> Router {
    Router::new()
        .route("/prepare", post(prepare))
        .route("/accept", post(accept))
        .route("/heartbeat", post(heartbeat))
        .route("/status", get(status))
        .route("/health", get(health))
        .with_state(acceptor)
}

async fn prepare(
    State(acceptor): State<Arc<Acceptor>>,
    Json(msg): Json<Prepare>,
) -> Result<Json<PrepareReply>, ApiError> {
    Ok(Json(acceptor.handle_prepare(msg).await?))
}

async fn accept(
    State(acceptor): State<Arc<Acceptor>>,
    Json(msg): Json<Accept>,
) -> Result<Json<AcceptReply>, ApiError> {
    Ok(Json(acceptor.handle_accept(msg).await?))
}

async fn heartbeat(
    State(acceptor): State<Arc<Acceptor>>,
    Json(msg): Json<Heartbeat>,
) -> Json<HeartbeatAck> {
    Json(acceptor.handle_heartbeat(msg).await)
}

async fn status(State(acceptor): State<Arc<Acceptor>>) -> Json<Value> {
    Json(acceptor.status().await)
}

async fn health(State(acceptor): State<Arc<Acceptor>>) -> Json<Value> {
    Json(json!({ "status": "ok", "acceptor_id": acceptor.id() }))
}
