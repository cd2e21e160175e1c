//! Agent run state machine: configuration, mutable context, traces, results.
//!
//! A `RunContext` is owned by exactly one engine invocation — it is created
//! at task submit, mutated only by that engine, and dropped when the engine
//! returns. Nothing here is shared across tasks.

use serde::{Deserialize, Serialize};

use crate::tool::{AssistantAction, Message, ToolResult};

/// Consecutive empty/no-op assistant actions before a forced stop.
pub const NO_OP_THRESHOLD: u32 = 3;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// State machine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Agent loop states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Init,
    Plan,
    ExecuteTool,
    Observe,
    Respond,
    Stop,
    Error,
}

/// Why the agent loop terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    MaxSteps,
    MaxWallTime,
    MaxFailures,
    NoOpLoop,
    PolicyDenied,
    Completed,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Policy-bound limits for a single agent run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub max_steps: u32,
    pub max_wall_time_ms: u64,
    pub max_failures: u32,
    /// Empty = all tools allowed.
    pub allowed_tools: Vec<String>,
    /// Empty = all domains allowed.
    pub allowed_domains: Vec<String>,
    pub block_private_ranges: bool,
    pub redact_secrets: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_steps: 12,
            max_wall_time_ms: 90_000,
            max_failures: 3,
            allowed_tools: Vec::new(),
            allowed_domains: Vec::new(),
            block_private_ranges: true,
            redact_secrets: true,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Mutable context threaded through the agent loop. Sole writer: the engine.
#[derive(Debug)]
pub struct RunContext {
    pub run_id: String,
    pub task: String,
    pub config: RunConfig,
    pub state: RunState,
    pub step: u32,
    pub failures: u32,
    pub consecutive_no_ops: u32,
    pub messages: Vec<Message>,
    pub trace: Vec<StepTrace>,
    pub started_at: std::time::Instant,
}

impl RunContext {
    pub fn new(task: impl Into<String>, config: RunConfig) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().simple().to_string()[..16].to_string(),
            task: task.into(),
            config,
            state: RunState::Init,
            step: 0,
            failures: 0,
            consecutive_no_ops: 0,
            messages: Vec::new(),
            trace: Vec::new(),
            started_at: std::time::Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Step / run results
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Single-step trace record. Carries an args hash, never raw args.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepTrace {
    pub run_id: String,
    pub step_id: u32,
    pub state: RunState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args_hash: Option<String>,
    #[serde(default)]
    pub duration_ms: u64,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policy_flags: Vec<String>,
}

/// Outcome of a single step.
#[derive(Debug)]
pub struct StepResult {
    pub action: AssistantAction,
    pub tool_results: Vec<ToolResult>,
    pub stop_reason: Option<StopReason>,
}

/// Final outcome of a complete agent run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,
    pub success: bool,
    pub stop_reason: StopReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    pub trace: Vec<StepTrace>,
    pub steps: u32,
    pub wall_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_reason_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&StopReason::MaxWallTime).unwrap(),
            "\"max_wall_time\""
        );
        assert_eq!(
            serde_json::to_string(&StopReason::NoOpLoop).unwrap(),
            "\"no_op_loop\""
        );
    }

    #[test]
    fn fresh_context_starts_at_init() {
        let ctx = RunContext::new("do a thing", RunConfig::default());
        assert_eq!(ctx.state, RunState::Init);
        assert_eq!(ctx.step, 0);
        assert_eq!(ctx.run_id.len(), 16);
    }
}
