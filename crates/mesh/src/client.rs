//! HTTP client for mesh peer RPCs: join, heartbeat, leave, execute.
//!
//! Every failure returns `None` — peers vanish routinely and the callers
//! (coordinator health tracking, dispatcher fallback) treat absence of a
//! response as the signal.

use std::time::Duration;

use crate::auth::sign_mesh_token;
use crate::models::{
    HeartbeatRequest, HeartbeatResponse, JoinRequest, JoinResponse, LeaveRequest, MeshContext,
    MeshToolCall, MeshToolRequest, MeshToolResponse, NodeInfo, NodeLoad,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Execute gets the tool deadline plus headroom.
const EXECUTE_TIMEOUT: Duration = Duration::from_secs(35);

pub struct MeshClient {
    secret: String,
    client: reqwest::Client,
}

impl MeshClient {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            client: reqwest::Client::builder()
                .timeout(DEFAULT_TIMEOUT)
                .connect_timeout(CONNECT_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    fn endpoint(peer_url: &str, path: &str) -> String {
        format!("{}/mesh/{path}", peer_url.trim_end_matches('/'))
    }

    /// Send a join request to a peer.
    pub async fn join(&self, peer_url: &str, self_info: &NodeInfo) -> Option<JoinResponse> {
        let body = JoinRequest {
            node_info: self_info.clone(),
            mesh_token: sign_mesh_token(&self.secret),
        };
        let response = self
            .client
            .post(Self::endpoint(peer_url, "join"))
            .json(&body)
            .send()
            .await;
        match response {
            Ok(resp) if resp.status().is_success() => resp.json().await.ok(),
            Ok(resp) => {
                tracing::warn!(peer = peer_url, status = %resp.status(), "join rejected");
                None
            }
            Err(err) => {
                tracing::warn!(peer = peer_url, error = %err, "join failed");
                None
            }
        }
    }

    /// Send a heartbeat with our load snapshot.
    pub async fn heartbeat(&self, peer_url: &str, load: &NodeLoad) -> Option<HeartbeatResponse> {
        let body = HeartbeatRequest {
            node_load: load.clone(),
            mesh_token: sign_mesh_token(&self.secret),
        };
        let response = self
            .client
            .post(Self::endpoint(peer_url, "heartbeat"))
            .json(&body)
            .send()
            .await
            .ok()?;
        if response.status().is_success() {
            response.json().await.ok()
        } else {
            None
        }
    }

    /// Best-effort leave notification.
    pub async fn leave(&self, peer_url: &str, node_id: &str) -> bool {
        let body = LeaveRequest {
            node_id: node_id.to_string(),
            mesh_token: sign_mesh_token(&self.secret),
        };
        match self
            .client
            .post(Self::endpoint(peer_url, "leave"))
            .json(&body)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(err) => {
                tracing::debug!(peer = peer_url, error = %err, "leave notification failed");
                false
            }
        }
    }

    /// Execute a tool call on a remote peer. `hop_count = 1` marks the call
    /// as already forwarded so the peer refuses to forward again.
    pub async fn execute_tool(
        &self,
        peer_url: &str,
        tool_call: MeshToolCall,
        context: MeshContext,
    ) -> Option<MeshToolResponse> {
        let body = MeshToolRequest {
            tool_call,
            context,
            mesh_token: sign_mesh_token(&self.secret),
            hop_count: 1,
        };
        let response = self
            .client
            .post(Self::endpoint(peer_url, "execute"))
            .timeout(EXECUTE_TIMEOUT)
            .json(&body)
            .send()
            .await;
        match response {
            Ok(resp) if resp.status().is_success() => resp.json().await.ok(),
            Ok(resp) => {
                tracing::warn!(peer = peer_url, status = %resp.status(), "remote execute rejected");
                None
            }
            Err(err) => {
                tracing::warn!(peer = peer_url, error = %err, "remote execute failed");
                None
            }
        }
    }
}
