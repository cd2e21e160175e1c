//! Agent endpoints.
//!
//! - `POST /api/agent/run`    — submit a task to the bounded loop
//! - `GET  /api/agent/status/:run_id` — persisted run summary
//! - `POST /api/agent/ghost`  — ghost protocol without the loop
//!
//! All return 503 with a hint while AGENT_ENABLED is false.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use wr_agent::dispatcher::ToolDispatch;
use wr_agent::{AgentEngine, Dispatcher, EventBus, TraceCollector};
use wr_crawl::ghost::run_ghost_protocol;
use wr_domain::run::RunConfig;
use wr_mesh::models::MeshContext;
use wr_mesh::MeshDispatcher;

use crate::state::AppState;

use super::ApiError;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct RunRequest {
    pub task: String,
    pub max_steps: Option<u32>,
    pub max_wall_time_ms: Option<u64>,
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    pub session_id: Option<String>,
    pub customer_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub run_id: String,
    pub success: bool,
    pub stop_reason: wr_domain::run::StopReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    pub steps: u32,
    pub wall_time_ms: u64,
    pub trace: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub session_id: Option<String>,
    pub customer_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GhostRequest {
    pub url: String,
    pub timeout: Option<u64>,
    pub prompt: Option<String>,
}

fn require_agent_enabled(state: &AppState) -> Result<(), ApiError> {
    if state.settings.agent.enabled {
        Ok(())
    } else {
        Err(ApiError::unavailable(
            "agent is disabled; set AGENT_ENABLED=true to enable it",
        ))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/agent/run
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn run(
    State(state): State<AppState>,
    Json(request): Json<RunRequest>,
) -> Result<Json<RunResponse>, ApiError> {
    require_agent_enabled(&state)?;
    if request.task.trim().is_empty() {
        return Err(ApiError::bad_request("task must be non-empty"));
    }
    let Some(provider) = state.provider.clone() else {
        return Err(ApiError::unavailable("no LLM provider configured"));
    };

    let session_id = request
        .session_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string()[..16].to_string());

    // Server limits seed the config; the request may narrow them.
    let mut config: RunConfig = state.settings.agent.run_config();
    if let Some(max_steps) = request.max_steps {
        config.max_steps = max_steps;
    }
    if let Some(max_wall_time_ms) = request.max_wall_time_ms {
        config.max_wall_time_ms = max_wall_time_ms;
    }
    if !request.allowed_tools.is_empty() {
        config.allowed_tools = request.allowed_tools.clone();
    }
    if !request.allowed_domains.is_empty() {
        config.allowed_domains = request.allowed_domains.clone();
    }

    // Local dispatcher, optionally wrapped by the mesh router.
    let local: Arc<dyn ToolDispatch> =
        Arc::new(Dispatcher::new(state.registry.clone(), config.clone()));
    let dispatcher: Arc<dyn ToolDispatch> = match &state.mesh {
        Some(mesh) => Arc::new(MeshDispatcher::new(
            local,
            mesh.clone(),
            MeshContext {
                customer_id: request.customer_id.clone(),
                session_id: Some(session_id.clone()),
                ..MeshContext::default()
            },
        )),
        None => local,
    };

    let collector = TraceCollector::new(session_id.clone(), config.redact_secrets);
    let mut bus = EventBus::new();
    collector.attach(&mut bus);

    let engine = AgentEngine::new(provider, dispatcher, state.registry.definitions(), bus);

    if let Some(mesh) = &state.mesh {
        mesh.counters().active_agent_runs.fetch_add(1, Ordering::Relaxed);
    }
    let result = engine.run_task(&request.task, config).await;
    if let Some(mesh) = &state.mesh {
        mesh.counters().active_agent_runs.fetch_sub(1, Ordering::Relaxed);
    }

    // Persist the summary; failure never fails the API call.
    let summary = collector.finalize(&result);
    if let Err(err) = state
        .traces
        .save(&summary, request.customer_id.as_deref(), &session_id)
        .await
    {
        tracing::error!(run_id = %result.run_id, error = %err, "trace persist failed");
    }

    Ok(Json(RunResponse {
        run_id: result.run_id,
        success: result.success,
        stop_reason: result.stop_reason,
        response: result.response,
        steps: result.steps,
        wall_time_ms: result.wall_time_ms,
        trace: summary.trace,
        error: result.error,
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/agent/status/:run_id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn status(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_agent_enabled(&state)?;
    let Some(session_id) = query.session_id else {
        return Err(ApiError::bad_request("session_id query parameter is required"));
    };

    match state
        .traces
        .load(&run_id, query.customer_id.as_deref(), &session_id)
        .await
    {
        Some(summary) => Ok(Json(serde_json::json!({
            "found": true,
            "summary": summary,
        }))),
        None => Ok(Json(serde_json::json!({ "found": false }))),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/agent/ghost
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn ghost(
    State(state): State<AppState>,
    Json(request): Json<GhostRequest>,
) -> Result<Json<wr_crawl::GhostResult>, ApiError> {
    require_agent_enabled(&state)?;
    let Some(provider) = state.provider.clone() else {
        return Err(ApiError::unavailable("no vision provider configured"));
    };

    let timeout_s = request.timeout.unwrap_or(state.settings.crawl.timeout_s);
    let result = run_ghost_protocol(
        &request.url,
        &state.pool,
        provider.as_ref(),
        timeout_s,
        request.prompt.as_deref(),
        None,
    )
    .await;
    Ok(Json(result))
}
