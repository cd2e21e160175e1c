//! Integration tests for mesh routing and fallback.
//!
//! - a saturated local node routes to an idle peer, and when that peer is
//!   unreachable the agent still gets the local result
//! - an inbound execute runs the tool through the plain local dispatcher
//! - forwarded-again requests and bad tokens are refused

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};

use wr_agent::dispatcher::ToolDispatch;
use wr_agent::{Dispatcher, Tool, ToolOutcome, ToolRegistry};
use wr_domain::run::RunConfig;
use wr_domain::settings::MeshSettings;
use wr_domain::tool::{ToolCall, ToolDefinition};
use wr_mesh::dispatcher::execute_inbound;
use wr_mesh::models::{MeshContext, MeshToolCall, MeshToolRequest, NodeInfo, NodeLoad};
use wr_mesh::{sign_mesh_token, MeshCoordinator, MeshDispatcher};

const SECRET: &str = "test-mesh-secret";

// ── Counting tool ───────────────────────────────────────────────────────

struct CountingTool {
    executions: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl Tool for CountingTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "crawl".into(),
            description: "records each execution".into(),
            parameters: json!({"type": "object"}),
        }
    }

    async fn execute(&self, args: Value) -> ToolOutcome {
        self.executions.fetch_add(1, Ordering::SeqCst);
        ToolOutcome::ok(json!({"crawled": args["url"]}))
    }
}

fn local_dispatcher(executions: Arc<AtomicUsize>) -> Arc<Dispatcher> {
    let registry = ToolRegistry::new();
    registry.register(Arc::new(CountingTool { executions }));
    Arc::new(Dispatcher::new(Arc::new(registry), RunConfig::default()))
}

fn coordinator() -> Arc<MeshCoordinator> {
    MeshCoordinator::new(MeshSettings::default(), SECRET.into(), 5, vec![])
}

fn idle_peer(node_id: &str, url: &str) -> (NodeInfo, NodeLoad) {
    (
        NodeInfo {
            node_id: node_id.into(),
            node_name: format!("node-{node_id}"),
            advertise_url: url.into(),
            tools: vec![],
            capabilities: vec![],
            version: "1.0.0".into(),
            joined_at_ms: 0,
        },
        NodeLoad {
            node_id: node_id.into(),
            active_crawls: 0,
            active_agent_runs: 0,
            browser_pool_free: 1,
            max_concurrent_crawls: 5,
            timestamp_ms: 0,
        },
    )
}

fn crawl_call() -> ToolCall {
    ToolCall {
        id: "c1".into(),
        name: "crawl".into(),
        args: json!({"url": "https://example.com"}),
    }
}

// ── Fallback to local ───────────────────────────────────────────────────

#[tokio::test]
async fn unreachable_peer_falls_back_to_local_execution() {
    let executions = Arc::new(AtomicUsize::new(0));
    let local = local_dispatcher(executions.clone());
    let coordinator = coordinator();

    // Local is saturated; peer B is idle but its address refuses connections.
    coordinator
        .counters()
        .active_crawls
        .store(5, Ordering::Relaxed);
    let (info, load) = idle_peer("b", "http://127.0.0.1:9");
    coordinator.register_peer(info, Some(load));

    let mesh = MeshDispatcher::new(local.clone(), coordinator, MeshContext::default());
    let result = mesh.dispatch(&crawl_call()).await;

    // The agent observes exactly the local result: ok, executed once.
    assert!(result.ok);
    assert_eq!(result.payload["crawled"], "https://example.com");
    assert_eq!(executions.load(Ordering::SeqCst), 1);

    // And it matches a direct local dispatch (modulo duration).
    let direct = local.dispatch(&crawl_call()).await;
    assert_eq!(result.ok, direct.ok);
    assert_eq!(result.payload, direct.payload);
}

#[tokio::test]
async fn idle_local_node_never_leaves_the_machine() {
    let executions = Arc::new(AtomicUsize::new(0));
    let local = local_dispatcher(executions.clone());
    let coordinator = coordinator();
    let (info, load) = idle_peer("b", "http://127.0.0.1:9");
    coordinator.register_peer(info, Some(load));

    let mesh = MeshDispatcher::new(local, coordinator, MeshContext::default());
    let result = mesh.dispatch(&crawl_call()).await;
    assert!(result.ok);
    assert_eq!(executions.load(Ordering::SeqCst), 1);
}

// ── Inbound execution ───────────────────────────────────────────────────

fn inbound_request(hop_count: u32, token: String) -> MeshToolRequest {
    MeshToolRequest {
        tool_call: MeshToolCall {
            id: "c1".into(),
            name: "crawl".into(),
            args: json!({"url": "https://example.com"}),
        },
        context: MeshContext::default(),
        mesh_token: token,
        hop_count,
    }
}

#[tokio::test]
async fn inbound_execute_runs_the_tool_locally() {
    let executions = Arc::new(AtomicUsize::new(0));
    let local = local_dispatcher(executions.clone());
    let coordinator = coordinator();

    let request = inbound_request(1, sign_mesh_token(SECRET));
    let response = execute_inbound(&request, local.as_ref(), &coordinator).await;

    assert!(response.ok);
    let result = response.tool_result.unwrap();
    assert!(result.ok);
    assert_eq!(result.tool_call_id, "c1");
    assert_eq!(response.executed_on.as_deref(), Some(coordinator.node_id.as_str()));
    assert_eq!(executions.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn already_forwarded_requests_are_refused() {
    let executions = Arc::new(AtomicUsize::new(0));
    let local = local_dispatcher(executions.clone());
    let coordinator = coordinator();

    let request = inbound_request(2, sign_mesh_token(SECRET));
    let response = execute_inbound(&request, local.as_ref(), &coordinator).await;

    assert!(!response.ok);
    assert!(response.error.unwrap().contains("hop count"));
    assert_eq!(executions.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn bad_tokens_never_execute() {
    let executions = Arc::new(AtomicUsize::new(0));
    let local = local_dispatcher(executions.clone());
    let coordinator = coordinator();

    let request = inbound_request(1, sign_mesh_token("wrong-secret"));
    let response = execute_inbound(&request, local.as_ref(), &coordinator).await;

    assert!(!response.ok);
    assert_eq!(executions.load(Ordering::SeqCst), 0);
}
