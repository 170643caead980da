//! HTTP surface for the learner role: LEARN ingestion, learner-to-learner
//! sync, and client reads.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use paxoskv_consensus::Learner;
use paxoskv_core::messages::{
    Learn, LearnAck, ReadRequest, ReadResponse, SyncRequest, SyncResponse,
};

use crate::ApiError;

/// Router exposing a learner over HTTP.
pub fn learner_router(learner: Arc<Learner>) -> Router {
    Router::new()
        .route("/learn", post(learn))
        .route("/sync", post(sync))
        .route("/read", post(read))
        .route("/status", get(status))
        .route("/health", get(health))
        .with_state(learner)
}

async fn learn(
    State(learner): State<Arc<Learner>>,
    Json(msg): Json<Learn>,
) -> Result<Json<LearnAck>, ApiError> {
    Ok(Json(learner.handle_learn(msg).await?))
}

async fn sync(
    State(learner): State<Arc<Learner>>,
    Json(msg): Json<SyncRequest>,
) -> Json<SyncResponse> {
    Json(learner.handle_sync_request(msg).await)
}

async fn read(
    State(learner): State<Arc<Learner>>,
    Json(msg): Json<ReadRequest>,
) -> Result<Json<ReadResponse>, ApiError> {
    Ok(Json(learner.handle_read(msg).await?))
}

async fn status(State(learner): State<Arc<Learner>>) -> Json<Value> {
    Json(learner.status().await)
}

async fn health(State(learner): State<Arc<Learner>>) -> Json<Value> {
    let status = learner.status().await;
    Json(json!({
        "status": "ok",
        "learner_id": learner.id(),
        "last_applied": status["last_applied"],
        "highest_seen": status["highest_seen"],
    }))
}
