//! # paxoskv HTTP Surfaces
//!
//! One axum router per node role, exposing the JSON wire protocol:
//!
//! | Role     | Endpoints |
//! |----------|-----------|
//! | acceptor | `POST /prepare`, `POST /accept`, `POST /heartbeat`, `GET /status`, `GET /health` |
//! | proposer | `POST /request`, `POST /heartbeat`, `POST /read`, `GET /status`, `GET /health` |
//! | learner  | `POST /learn`, `POST /sync`, `POST /read`, `GET /status`, `GET /health` |
//!
//! Protocol rejections (NOT_PROMISE, REDIRECT, …) travel as ordinary 200
//! responses; HTTP error codes are reserved for malformed requests,
//! durability failures, and reads this node cannot serve.

mod acceptor;
mod learner;
mod proposer;

use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::info;

pub use acceptor::acceptor_router;
pub use learner::learner_router;
pub use proposer::proposer_router;

use paxoskv_consensus::{ConsensusError, LearnerReadError, ReadError};

/// JSON body for HTTP-level errors.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    leader_hint: Option<u32>,
}

/// Error type shared by all role handlers.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    leader_hint: Option<u32>,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into(), leader_hint: None }
    }

    fn with_leader_hint(mut self, hint: Option<u32>) -> Self {
        self.leader_hint = hint;
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message,
            code: self.status.as_u16(),
            leader_hint: self.leader_hint,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<ConsensusError> for ApiError {
    fn from(err: ConsensusError) -> Self {
        // Durability failures refuse the operation without touching state;
        // the peer treats the missing reply as silence.
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

impl From<ReadError> for ApiError {
    fn from(err: ReadError) -> Self {
        match err {
            ReadError::NotLeader { leader_hint } => {
                ApiError::new(StatusCode::CONFLICT, err.to_string()).with_leader_hint(leader_hint)
            }
            ReadError::Barrier(_) | ReadError::LearnersLagging(_) => {
                ApiError::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
            }
        }
    }
}

impl From<LearnerReadError> for ApiError {
    fn from(err: LearnerReadError) -> Self {
        match err {
            LearnerReadError::StrongReadRefused => {
                ApiError::new(StatusCode::CONFLICT, err.to_string())
            }
            LearnerReadError::BadQuery => ApiError::new(StatusCode::BAD_REQUEST, err.to_string()),
        }
    }
}

/// Bind `addr` and serve `router` in a background task, returning the bound
/// address (useful with port 0). The task runs for the life of the process.
pub async fn spawn_server(addr: &str, router: Router) -> Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    let local_addr = listener.local_addr().context("listener has no local address")?;

    let app = router.layer(TraceLayer::new_for_http());
    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            tracing::error!(error = %err, "http server terminated");
        }
    });

    info!(addr = %local_addr, "http server started");
    Ok(local_addr)
}
