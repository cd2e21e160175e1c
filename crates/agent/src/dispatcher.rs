//! Tool dispatcher: validates, executes, and normalizes tool calls.
//!
//! The dispatcher never returns an error — every failure becomes a
//! `ToolResult` with a code from the closed error set, so the loop caller
//! never sees a raw failure.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use sha2::{Digest, Sha256};

use wr_domain::run::RunConfig;
use wr_domain::tool::{ToolCall, ToolResult};

use crate::registry::ToolRegistry;

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const MAX_RETRIES: u32 = 1;
const RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Anything that can execute tool calls for the engine: the local
/// dispatcher, or a mesh dispatcher that may forward to peers.
#[async_trait::async_trait]
pub trait ToolDispatch: Send + Sync {
    async fn dispatch(&self, call: &ToolCall) -> ToolResult;

    /// Execute multiple tool calls concurrently, results in call order.
    async fn dispatch_many(&self, calls: &[ToolCall]) -> Vec<ToolResult> {
        futures_util::future::join_all(calls.iter().map(|c| self.dispatch(c))).await
    }
}

/// Validates and executes tool calls against the shared registry.
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    config: RunConfig,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>, config: RunConfig) -> Self {
        Self {
            registry,
            config,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }

    /// Deterministic hash of tool args for trace dedup: first 12 hex chars
    /// of SHA-256 over canonical JSON (sorted keys, no whitespace).
    pub fn args_hash(args: &Value) -> String {
        let canonical = canonical_json(args);
        let digest = Sha256::digest(canonical.as_bytes());
        hex::encode(digest)[..12].to_string()
    }

    // ── Validation ────────────────────────────────────────────────

    fn validate(&self, call: &ToolCall) -> Result<(), ToolFailure> {
        if call.name.is_empty() {
            return Err(ToolFailure::new("validation_error", "tool name is required", false));
        }
        // Empty allowed_tools = allow all.
        if !self.config.allowed_tools.is_empty() && !self.config.allowed_tools.contains(&call.name) {
            return Err(ToolFailure::new(
                "policy_denied",
                format!("tool '{}' not in allowed_tools", call.name),
                false,
            ));
        }
        if !self.registry.contains(&call.name) {
            return Err(ToolFailure::new(
                "tool_unavailable",
                format!("tool '{}' not found in registry", call.name),
                false,
            ));
        }
        Ok(())
    }

    // ── Execution ─────────────────────────────────────────────────

    /// Run the tool under a deadline; retry once on a timeout-class failure.
    async fn execute_with_timeout(&self, call: &ToolCall) -> ToolResult {
        // Presence is checked in validate(); a race here still errors cleanly.
        let Some(tool) = self.registry.get(&call.name) else {
            return ToolResult::error(
                call.id.clone(),
                "tool_unavailable",
                format!("tool '{}' not found in registry", call.name),
                false,
                0,
            );
        };

        let mut timed_out = false;
        for attempt in 0..=MAX_RETRIES {
            let start = Instant::now();
            let args = call.args.clone();
            let tool = tool.clone();

            // Spawned so a panicking tool surfaces as a join error, not a
            // dispatcher panic.
            let mut handle = tokio::spawn(async move { tool.execute(args).await });

            match tokio::time::timeout(self.timeout, &mut handle).await {
                Ok(Ok(outcome)) => {
                    let duration = start.elapsed().as_millis() as u64;
                    if outcome.success {
                        return ToolResult::ok(call.id.clone(), outcome.data, duration);
                    }
                    return ToolResult::error(
                        call.id.clone(),
                        "execution_error",
                        outcome.error.unwrap_or_else(|| "tool returned failure".into()),
                        false,
                        duration,
                    );
                }
                Ok(Err(join_err)) => {
                    let duration = start.elapsed().as_millis() as u64;
                    tracing::error!(tool = %call.name, error = %join_err, "tool task failed");
                    return ToolResult::error(
                        call.id.clone(),
                        "execution_error",
                        format!("tool '{}' panicked: {join_err}", call.name),
                        false,
                        duration,
                    );
                }
                Err(_) => {
                    handle.abort();
                    timed_out = true;
                    if attempt < MAX_RETRIES {
                        tracing::warn!(
                            tool = %call.name,
                            attempt = attempt + 1,
                            "tool timed out, retrying once"
                        );
                        tokio::time::sleep(RETRY_BACKOFF).await;
                    }
                }
            }
        }

        debug_assert!(timed_out);
        ToolResult::error(
            call.id.clone(),
            "tool_timeout",
            format!("tool '{}' timed out after {}ms", call.name, self.timeout.as_millis()),
            true,
            self.timeout.as_millis() as u64 * (MAX_RETRIES as u64 + 1) + RETRY_BACKOFF.as_millis() as u64,
        )
    }
}

#[async_trait::async_trait]
impl ToolDispatch for Dispatcher {
    /// Execute a single tool call and return a normalized result.
    async fn dispatch(&self, call: &ToolCall) -> ToolResult {
        let start = Instant::now();
        if let Err(failure) = self.validate(call) {
            return ToolResult::error(
                call.id.clone(),
                failure.code,
                failure.message,
                failure.retriable,
                start.elapsed().as_millis() as u64,
            );
        }
        self.execute_with_timeout(call).await
    }
}

struct ToolFailure {
    code: &'static str,
    message: String,
    retriable: bool,
}

impl ToolFailure {
    fn new(code: &'static str, message: impl Into<String>, retriable: bool) -> Self {
        Self {
            code,
            message: message.into(),
            retriable,
        }
    }
}

/// Canonical JSON: object keys sorted ascending, no whitespace. Guaranteed
/// stable regardless of the map implementation behind `serde_json::Value`.
fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::to_string(k).unwrap_or_default(),
                        canonical_json(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let fields: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", fields.join(","))
        }
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Tool, ToolOutcome};
    use serde_json::json;
    use wr_domain::tool::ToolDefinition;

    struct Echo;

    #[async_trait::async_trait]
    impl Tool for Echo {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "echo".into(),
                description: "echoes args".into(),
                parameters: json!({"type": "object"}),
            }
        }

        async fn execute(&self, args: Value) -> ToolOutcome {
            ToolOutcome::ok(args)
        }
    }

    struct Failing;

    #[async_trait::async_trait]
    impl Tool for Failing {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "failing".into(),
                description: "always fails".into(),
                parameters: json!({"type": "object"}),
            }
        }

        async fn execute(&self, _args: Value) -> ToolOutcome {
            ToolOutcome::error("boom")
        }
    }

    struct Panicking;

    #[async_trait::async_trait]
    impl Tool for Panicking {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "panicking".into(),
                description: "always panics".into(),
                parameters: json!({"type": "object"}),
            }
        }

        async fn execute(&self, _args: Value) -> ToolOutcome {
            panic!("intentional panic for dispatcher test");
        }
    }

    struct Slow {
        calls: Arc<std::sync::atomic::AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Tool for Slow {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "slow".into(),
                description: "sleeps past the deadline".into(),
                parameters: json!({"type": "object"}),
            }
        }

        async fn execute(&self, _args: Value) -> ToolOutcome {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(60)).await;
            ToolOutcome::ok(json!("too late"))
        }
    }

    fn registry() -> Arc<ToolRegistry> {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(Echo));
        registry.register(Arc::new(Failing));
        registry.register(Arc::new(Panicking));
        Arc::new(registry)
    }

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall {
            id: "1".into(),
            name: name.into(),
            args,
        }
    }

    #[tokio::test]
    async fn successful_tool_returns_ok_payload() {
        let dispatcher = Dispatcher::new(registry(), RunConfig::default());
        let result = dispatcher.dispatch(&call("echo", json!({"x": 1}))).await;
        assert!(result.ok);
        assert_eq!(result.payload["x"], 1);
    }

    #[tokio::test]
    async fn unknown_tool_is_unavailable() {
        let dispatcher = Dispatcher::new(registry(), RunConfig::default());
        let result = dispatcher.dispatch(&call("missing", json!({}))).await;
        assert!(!result.ok);
        assert_eq!(result.error_code.as_deref(), Some("tool_unavailable"));
        assert!(!result.retriable);
    }

    #[tokio::test]
    async fn allowlist_denies_without_executing() {
        let config = RunConfig {
            allowed_tools: vec!["other".into()],
            ..RunConfig::default()
        };
        let dispatcher = Dispatcher::new(registry(), config);
        let result = dispatcher.dispatch(&call("echo", json!({}))).await;
        assert_eq!(result.error_code.as_deref(), Some("policy_denied"));
    }

    #[tokio::test]
    async fn failing_tool_is_execution_error_not_retried() {
        let dispatcher = Dispatcher::new(registry(), RunConfig::default());
        let result = dispatcher.dispatch(&call("failing", json!({}))).await;
        assert!(!result.ok);
        assert_eq!(result.error_code.as_deref(), Some("execution_error"));
        assert_eq!(result.error_message.as_deref(), Some("boom"));
        assert!(!result.retriable);
    }

    #[tokio::test]
    async fn panicking_tool_is_execution_error() {
        let dispatcher = Dispatcher::new(registry(), RunConfig::default());
        let result = dispatcher.dispatch(&call("panicking", json!({}))).await;
        assert!(!result.ok);
        assert_eq!(result.error_code.as_deref(), Some("execution_error"));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_retries_exactly_once() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let registry = ToolRegistry::new();
        registry.register(Arc::new(Slow { calls: calls.clone() }));
        let dispatcher = Dispatcher::new(Arc::new(registry), RunConfig::default());

        let result = dispatcher.dispatch(&call("slow", json!({}))).await;
        assert!(!result.ok);
        assert_eq!(result.error_code.as_deref(), Some("tool_timeout"));
        assert!(result.retriable);
        // Two attempts, no more.
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn dispatch_many_preserves_call_order() {
        let dispatcher = Dispatcher::new(registry(), RunConfig::default());
        let calls = vec![
            ToolCall { id: "a".into(), name: "echo".into(), args: json!({"n": 1}) },
            ToolCall { id: "b".into(), name: "failing".into(), args: json!({}) },
            ToolCall { id: "c".into(), name: "echo".into(), args: json!({"n": 3}) },
        ];
        let results = dispatcher.dispatch_many(&calls).await;
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].tool_call_id, "a");
        assert_eq!(results[1].tool_call_id, "b");
        assert_eq!(results[2].tool_call_id, "c");
        assert!(results[0].ok && !results[1].ok && results[2].ok);
    }

    #[test]
    fn args_hash_is_order_insensitive_and_12_hex() {
        let a = json!({"b": 2, "a": 1});
        let b = json!({"a": 1, "b": 2});
        let ha = Dispatcher::args_hash(&a);
        let hb = Dispatcher::args_hash(&b);
        assert_eq!(ha, hb);
        assert_eq!(ha.len(), 12);
        assert!(ha.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(ha, Dispatcher::args_hash(&json!({"a": 1, "b": 3})));
    }

    #[test]
    fn canonical_json_sorts_nested_keys() {
        let value = json!({"z": {"b": 1, "a": [2, {"y": 0, "x": 9}]}, "a": null});
        assert_eq!(
            canonical_json(&value),
            r#"{"a":null,"z":{"a":[2,{"x":9,"y":0}],"b":1}}"#
        );
    }
}
