//! HTTP surface of the gateway.
//!
//! - `POST /api/agent/run`, `GET /api/agent/status/:run_id`,
//!   `POST /api/agent/ghost` — the agent loop
//! - `POST /api/crawl`, `POST /api/markdown`, `POST /api/batch` — direct
//!   crawling without the agent
//! - `WS /stream/:session_id`, `GET /stream/:session_id/mjpeg`,
//!   `GET /stream/:session_id/status` — live browser streaming
//! - `POST /mesh/{join,heartbeat,execute,leave}`,
//!   `GET /mesh/{peers,status}` — the mesh wire protocol

pub mod agent;
pub mod crawl;
pub mod mesh;
pub mod stream;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::state::AppState;

/// Build the full router.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Agent loop
        .route("/api/agent/run", post(agent::run))
        .route("/api/agent/status/:run_id", get(agent::status))
        .route("/api/agent/ghost", post(agent::ghost))
        // Direct crawling
        .route("/api/crawl", post(crawl::crawl))
        .route("/api/markdown", post(crawl::markdown))
        .route("/api/batch", post(crawl::batch))
        // Streaming
        .route("/stream/:session_id", get(stream::websocket))
        .route("/stream/:session_id/mjpeg", get(stream::mjpeg))
        .route("/stream/:session_id/status", get(stream::status))
        // Mesh wire protocol
        .route("/mesh/join", post(mesh::join))
        .route("/mesh/heartbeat", post(mesh::heartbeat))
        .route("/mesh/execute", post(mesh::execute))
        .route("/mesh/leave", post(mesh::leave))
        .route("/mesh/peers", get(mesh::peers))
        .route("/mesh/status", get(mesh::status))
        // Health
        .route("/healthz", get(healthz))
        .layer(tower_http::cors::CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    Json(serde_json::json!({ "ok": true }))
}

/// Standardized error envelope: `{error, status, details?}`.
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = serde_json::json!({
            "error": self.message,
            "status": self.status.as_u16(),
        });
        if let Some(details) = self.details {
            body["details"] = details;
        }
        (self.status, Json(body)).into_response()
    }
}
