//! Mesh dispatcher: routes tool calls across nodes, falling back to local.
//!
//! Sits between the agent engine and the local dispatcher when the mesh is
//! enabled. All validation and execution logic stays in the local
//! dispatcher — this layer only adds the routing decision and the remote
//! hop, and any remote failure degrades to local execution.

use std::sync::Arc;

use wr_agent::dispatcher::ToolDispatch;
use wr_domain::tool::{ToolCall, ToolResult};

use crate::coordinator::MeshCoordinator;
use crate::models::{MeshContext, MeshToolCall};
use crate::router::select_target;

pub struct MeshDispatcher {
    local: Arc<dyn ToolDispatch>,
    coordinator: Arc<MeshCoordinator>,
    context: MeshContext,
}

impl MeshDispatcher {
    pub fn new(
        local: Arc<dyn ToolDispatch>,
        coordinator: Arc<MeshCoordinator>,
        context: MeshContext,
    ) -> Self {
        Self {
            local,
            coordinator,
            context,
        }
    }

    async fn execute_remote(&self, call: &ToolCall, peer_url: &str) -> Option<ToolResult> {
        let mesh_call = MeshToolCall {
            id: call.id.clone(),
            name: call.name.clone(),
            args: call.args.clone(),
        };
        let mut context = self.context.clone();
        context.originating_node = Some(self.coordinator.node_id.clone());

        let start = std::time::Instant::now();
        let response = self
            .coordinator
            .client()
            .execute_tool(peer_url, mesh_call, context)
            .await?;

        if !response.ok {
            tracing::warn!(error = ?response.error, "remote execute returned error");
            return None;
        }
        let result = response.tool_result?;

        let duration_ms = if result.duration_ms > 0 {
            result.duration_ms
        } else {
            start.elapsed().as_millis() as u64
        };
        Some(ToolResult {
            tool_call_id: result.tool_call_id,
            ok: result.ok,
            payload: result.payload,
            error_code: result.error_code,
            error_message: result.error_message,
            retriable: false,
            duration_ms,
        })
    }
}

/// Handle an inbound `/mesh/execute` request.
///
/// Always runs the tool through the plain local dispatcher — an executor
/// never re-routes, so a single originating request produces at most one
/// remote execution. Requests that have already been forwarded once
/// (`hop_count` past the single allowed hop) are refused outright.
pub async fn execute_inbound(
    request: &crate::models::MeshToolRequest,
    local: &dyn ToolDispatch,
    coordinator: &MeshCoordinator,
) -> crate::models::MeshToolResponse {
    use crate::models::{MeshToolResponse, MeshToolResult};

    if !coordinator.verify_token(&request.mesh_token) {
        return MeshToolResponse {
            ok: false,
            tool_result: None,
            executed_on: None,
            error: Some("invalid mesh token".into()),
        };
    }

    if request.hop_count > 1 {
        return MeshToolResponse {
            ok: false,
            tool_result: None,
            executed_on: None,
            error: Some("max hop count exceeded, refusing to forward".into()),
        };
    }

    let call = ToolCall {
        id: request.tool_call.id.clone(),
        name: request.tool_call.name.clone(),
        args: request.tool_call.args.clone(),
    };
    let result = local.dispatch(&call).await;

    MeshToolResponse {
        ok: true,
        tool_result: Some(MeshToolResult {
            tool_call_id: result.tool_call_id,
            ok: result.ok,
            payload: result.payload,
            error_code: result.error_code,
            error_message: result.error_message,
            duration_ms: result.duration_ms,
        }),
        executed_on: Some(coordinator.node_id.clone()),
        error: None,
    }
}

#[async_trait::async_trait]
impl ToolDispatch for MeshDispatcher {
    /// Route a tool call to the best node; any remote failure falls back
    /// to local execution.
    async fn dispatch(&self, call: &ToolCall) -> ToolResult {
        let decision = select_target(
            &call.name,
            &self.coordinator.node_id,
            &self.coordinator.self_load(),
            &self.coordinator.get_healthy_peers(),
            self.coordinator.prefer_local(),
        );

        let Some(decision) = decision else {
            return self.local.dispatch(call).await;
        };
        if decision.is_local {
            return self.local.dispatch(call).await;
        }

        tracing::info!(
            tool = %call.name,
            peer = %decision.target_name,
            score = decision.score,
            reason = %decision.reason,
            "routing tool call to peer"
        );

        if let Some(result) = self.execute_remote(call, &decision.target_url).await {
            return result;
        }

        tracing::warn!(
            tool = %call.name,
            peer = %decision.target_name,
            "remote execution failed, falling back to local"
        );
        self.local.dispatch(call).await
    }
}
