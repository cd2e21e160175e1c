//! Wire models for mesh peer communication.
//!
//! `NodeInfo` describes a peer's identity and capabilities, `NodeLoad`
//! carries real-time load metrics for routing, and the request/response
//! pairs wrap the four POST endpoints. Field names are the wire format —
//! snake_case everywhere.

use serde::{Deserialize, Serialize};
use serde_json::Value;

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Peer identity and load
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Identity and capabilities of a mesh peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: String,
    pub node_name: String,
    pub advertise_url: String,
    /// Tools this node can execute. Empty = all tools.
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "now_ms")]
    pub joined_at_ms: i64,
}

fn default_version() -> String {
    "1.0.0".into()
}

/// Real-time load snapshot sent with heartbeats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeLoad {
    pub node_id: String,
    #[serde(default)]
    pub active_crawls: u32,
    #[serde(default)]
    pub active_agent_runs: u32,
    #[serde(default)]
    pub browser_pool_free: u32,
    #[serde(default = "default_max_crawls")]
    pub max_concurrent_crawls: u32,
    #[serde(default = "now_ms")]
    pub timestamp_ms: i64,
}

fn default_max_crawls() -> u32 {
    5
}

/// Coordinator-internal tracking of a known peer.
#[derive(Debug, Clone)]
pub struct PeerState {
    pub info: NodeInfo,
    pub load: Option<NodeLoad>,
    pub last_heartbeat_ms: i64,
    pub missed_heartbeats: u32,
    pub healthy: bool,
}

impl PeerState {
    pub fn new(info: NodeInfo, load: Option<NodeLoad>) -> Self {
        Self {
            info,
            load,
            last_heartbeat_ms: now_ms(),
            missed_heartbeats: 0,
            healthy: true,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire protocol: join / heartbeat / leave
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRequest {
    pub node_info: NodeInfo,
    pub mesh_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinResponse {
    pub ok: bool,
    /// The responder's own identity.
    pub node_info: NodeInfo,
    #[serde(default)]
    pub known_peers: Vec<NodeInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub node_load: NodeLoad,
    pub mesh_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub ok: bool,
    #[serde(default = "now_ms")]
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaveRequest {
    pub node_id: String,
    pub mesh_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaveResponse {
    pub ok: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire protocol: tool execution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

/// Execution context forwarded with remote tool calls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeshContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub originating_node: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshToolRequest {
    pub tool_call: MeshToolCall,
    #[serde(default)]
    pub context: MeshContext,
    pub mesh_token: String,
    /// One-hop enforcement: receivers refuse to forward when > 0.
    #[serde(default)]
    pub hop_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshToolResult {
    pub tool_call_id: String,
    pub ok: bool,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshToolResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<MeshToolResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_on: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execute_request_round_trips_snake_case() {
        let request = MeshToolRequest {
            tool_call: MeshToolCall {
                id: "c1".into(),
                name: "crawl".into(),
                args: serde_json::json!({"url": "https://example.com"}),
            },
            context: MeshContext {
                run_id: Some("r1".into()),
                originating_node: Some("abc123".into()),
                ..MeshContext::default()
            },
            mesh_token: "1700.aabb".into(),
            hop_count: 1,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["tool_call"]["name"], "crawl");
        assert_eq!(json["hop_count"], 1);
        assert_eq!(json["context"]["originating_node"], "abc123");

        let back: MeshToolRequest = serde_json::from_value(json).unwrap();
        assert_eq!(back.tool_call.id, "c1");
    }

    #[test]
    fn defaults_fill_missing_wire_fields() {
        let load: NodeLoad = serde_json::from_str(r#"{"node_id": "n1"}"#).unwrap();
        assert_eq!(load.max_concurrent_crawls, 5);
        assert_eq!(load.active_crawls, 0);

        let request: MeshToolRequest = serde_json::from_str(
            r#"{"tool_call": {"id": "1", "name": "x"}, "mesh_token": "t"}"#,
        )
        .unwrap();
        assert_eq!(request.hop_count, 0);
    }
}
