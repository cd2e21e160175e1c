//! Mesh wire-protocol endpoints.
//!
//! - `POST /mesh/join`       — peer discovery
//! - `POST /mesh/heartbeat`  — load reporting
//! - `POST /mesh/execute`    — remote tool execution (one hop max)
//! - `POST /mesh/leave`      — graceful departure
//! - `GET  /mesh/peers`      — known peers
//! - `GET  /mesh/status`     — this node's mesh status
//!
//! Every POST carries a `mesh_token`; an invalid token is a 401.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use wr_agent::Dispatcher;
use wr_mesh::dispatcher::execute_inbound;
use wr_mesh::models::{
    HeartbeatRequest, HeartbeatResponse, JoinRequest, JoinResponse, LeaveRequest, LeaveResponse,
    MeshToolRequest, MeshToolResponse,
};
use wr_mesh::MeshCoordinator;

use crate::state::AppState;

use super::ApiError;

fn require_mesh(state: &AppState) -> Result<Arc<MeshCoordinator>, ApiError> {
    state
        .mesh
        .clone()
        .ok_or_else(|| ApiError::unavailable("mesh not enabled"))
}

fn verify(coordinator: &MeshCoordinator, token: &str) -> Result<(), ApiError> {
    if coordinator.verify_token(token) {
        Ok(())
    } else {
        Err(ApiError::unauthorized("invalid mesh token"))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /mesh/join
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn join(
    State(state): State<AppState>,
    Json(body): Json<JoinRequest>,
) -> Result<Json<JoinResponse>, ApiError> {
    let coordinator = require_mesh(&state)?;
    verify(&coordinator, &body.mesh_token)?;

    tracing::info!(
        peer = %body.node_info.node_name,
        id = %body.node_info.node_id,
        "peer joined"
    );
    coordinator.register_peer(body.node_info, None);

    Ok(Json(JoinResponse {
        ok: true,
        node_info: coordinator.node_info(),
        known_peers: coordinator.known_peer_infos(),
        error: None,
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /mesh/heartbeat
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn heartbeat(
    State(state): State<AppState>,
    Json(body): Json<HeartbeatRequest>,
) -> Result<Json<HeartbeatResponse>, ApiError> {
    let coordinator = require_mesh(&state)?;
    verify(&coordinator, &body.mesh_token)?;

    let node_id = body.node_load.node_id.clone();
    coordinator.update_peer_load(&node_id, body.node_load);
    Ok(Json(HeartbeatResponse {
        ok: true,
        timestamp_ms: chrono::Utc::now().timestamp_millis(),
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /mesh/execute
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn execute(
    State(state): State<AppState>,
    Json(body): Json<MeshToolRequest>,
) -> Result<Json<MeshToolResponse>, ApiError> {
    let coordinator = require_mesh(&state)?;

    // Token + hop checks live in execute_inbound so the behavior is
    // identical for every transport.
    let local = Dispatcher::new(
        state.registry.clone(),
        state.settings.agent.run_config(),
    );
    let response = execute_inbound(&body, &local, &coordinator).await;
    Ok(Json(response))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /mesh/leave
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn leave(
    State(state): State<AppState>,
    Json(body): Json<LeaveRequest>,
) -> Result<Json<LeaveResponse>, ApiError> {
    let coordinator = require_mesh(&state)?;
    verify(&coordinator, &body.mesh_token)?;

    coordinator.remove_peer(&body.node_id);
    Ok(Json(LeaveResponse { ok: true }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /mesh/peers + /mesh/status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn peers(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let coordinator = require_mesh(&state)?;
    let peers: Vec<serde_json::Value> = coordinator
        .get_peers()
        .into_iter()
        .map(|p| {
            serde_json::json!({
                "info": p.info,
                "load": p.load,
                "last_heartbeat_ms": p.last_heartbeat_ms,
                "missed_heartbeats": p.missed_heartbeats,
                "healthy": p.healthy,
            })
        })
        .collect();
    Ok(Json(serde_json::json!({ "peers": peers })))
}

pub async fn status(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let coordinator = require_mesh(&state)?;
    let peers = coordinator.get_peers();
    let healthy = peers.iter().filter(|p| p.healthy).count();
    Ok(Json(serde_json::json!({
        "node": coordinator.node_info(),
        "load": coordinator.self_load(),
        "peer_count": peers.len(),
        "healthy_peer_count": healthy,
    })))
}
