//! The bounded agent loop: plan → execute → observe, with a stop-condition
//! check at the top of every iteration.
//!
//! The engine owns its `RunContext` for the whole run. The outside world
//! observes progress only through the immutable events emitted on the bus.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;

use wr_domain::run::{
    RunConfig, RunContext, RunResult, RunState, StepResult, StepTrace, StopReason, NO_OP_THRESHOLD,
};
use wr_domain::tool::{AssistantAction, Message, MessageContent, Role, ToolCall, ToolResult};
use wr_domain::{Error, Result};
use wr_policy::check_tool_call;
use wr_providers::LlmAdapter;

use crate::dispatcher::{Dispatcher, ToolDispatch};
use crate::events::{Event, EventBus, EventPayload};

/// Bounded loop runner.
pub struct AgentEngine {
    provider: Arc<dyn LlmAdapter>,
    dispatcher: Arc<dyn ToolDispatch>,
    tool_defs: Vec<wr_domain::tool::ToolDefinition>,
    bus: EventBus,
}

impl AgentEngine {
    pub fn new(
        provider: Arc<dyn LlmAdapter>,
        dispatcher: Arc<dyn ToolDispatch>,
        tool_defs: Vec<wr_domain::tool::ToolDefinition>,
        bus: EventBus,
    ) -> Self {
        Self {
            provider,
            dispatcher,
            tool_defs,
            bus,
        }
    }

    // ── Top-level entry point ─────────────────────────────────────

    /// Execute a bounded agent loop and return the final result.
    pub async fn run_task(&self, task: &str, config: RunConfig) -> RunResult {
        let mut ctx = RunContext::new(task, config);
        ctx.messages.push(Message::user(task));
        ctx.state = RunState::Plan;

        self.emit(
            &ctx.run_id,
            EventPayload::RunStart {
                task: task.to_string(),
                config: ctx.config.clone(),
            },
        );

        loop {
            // Stop-condition check, every iteration, before any LLM call.
            if let Some(reason) = Self::check_stop(&ctx) {
                ctx.state = RunState::Stop;
                return self.finalize(&mut ctx, reason, None);
            }

            match self.tick(&mut ctx).await {
                Ok(step) => {
                    if let Some(reason) = step.stop_reason {
                        return self.finalize(&mut ctx, reason, None);
                    }
                }
                Err(err) => {
                    // Provider failure: count it and keep looping — the
                    // max_failures gate will fire if it keeps happening.
                    ctx.failures += 1;
                    tracing::warn!(
                        run_id = %ctx.run_id,
                        step = ctx.step,
                        error = %err,
                        "provider failed during plan"
                    );
                }
            }
        }
    }

    // ── Single tick: plan → execute → observe ─────────────────────

    async fn tick(&self, ctx: &mut RunContext) -> Result<StepResult> {
        ctx.step += 1;
        let step_id = ctx.step;
        let step_start = Instant::now();

        ctx.state = RunState::Plan;
        self.emit(
            &ctx.run_id,
            EventPayload::StepStart {
                step_id,
                state: RunState::Plan,
            },
        );

        let action = match self.provider.complete(&ctx.messages, &self.tool_defs).await {
            Ok(action) => action,
            Err(err) => {
                ctx.trace.push(StepTrace {
                    run_id: ctx.run_id.clone(),
                    step_id,
                    state: RunState::Plan,
                    tool_name: None,
                    args_hash: None,
                    duration_ms: step_start.elapsed().as_millis() as u64,
                    status: "provider_error".into(),
                    error_code: Some("provider_error".into()),
                    policy_flags: Vec::new(),
                });
                self.emit_step_end(ctx, step_id, step_start);
                return Err(Error::provider("adapter", err.to_string()));
            }
        };

        let step = match action {
            // Terminal text response.
            AssistantAction::Respond { text } => {
                ctx.state = RunState::Respond;
                ctx.messages.push(Message::assistant(text.clone()));
                ctx.consecutive_no_ops = 0;
                ctx.trace.push(StepTrace {
                    run_id: ctx.run_id.clone(),
                    step_id,
                    state: RunState::Respond,
                    tool_name: None,
                    args_hash: None,
                    duration_ms: step_start.elapsed().as_millis() as u64,
                    status: "ok".into(),
                    error_code: None,
                    policy_flags: Vec::new(),
                });
                ctx.state = RunState::Stop;
                StepResult {
                    action: AssistantAction::Respond { text },
                    tool_results: Vec::new(),
                    stop_reason: Some(StopReason::Completed),
                }
            }

            // Empty call list: a no-op, three in a row force a stop.
            AssistantAction::ToolCalls { calls } if calls.is_empty() => {
                ctx.consecutive_no_ops += 1;
                StepResult {
                    action: AssistantAction::ToolCalls { calls },
                    tool_results: Vec::new(),
                    stop_reason: None,
                }
            }

            AssistantAction::ToolCalls { calls } => {
                let results = self.execute_calls(ctx, step_id, &calls).await;

                // OBSERVE: feed results back into the conversation, in
                // call-list order so replays are deterministic.
                ctx.state = RunState::Observe;
                for result in &results {
                    let content = if result.ok {
                        payload_text(&result.payload)
                    } else {
                        format!(
                            "ERROR [{}]: {}",
                            result.error_code.as_deref().unwrap_or("error"),
                            result.error_message.as_deref().unwrap_or("unknown")
                        )
                    };
                    ctx.messages
                        .push(Message::tool_result(result.tool_call_id.clone(), content, !result.ok));
                }

                StepResult {
                    action: AssistantAction::ToolCalls { calls },
                    tool_results: results,
                    stop_reason: None,
                }
            }
        };

        self.emit_step_end(ctx, step_id, step_start);
        Ok(step)
    }

    /// Gate and execute one assistant action's tool calls. Denied calls get
    /// synthetic results; allowed calls run concurrently. Results come back
    /// in call-list order.
    async fn execute_calls(
        &self,
        ctx: &mut RunContext,
        step_id: u32,
        calls: &[ToolCall],
    ) -> Vec<ToolResult> {
        ctx.consecutive_no_ops = 0;
        ctx.state = RunState::ExecuteTool;
        ctx.messages.push(Message::assistant_tool_calls(calls));

        let mut slots: Vec<Option<ToolResult>> = vec![None; calls.len()];
        let mut allowed: Vec<(usize, &ToolCall)> = Vec::with_capacity(calls.len());

        for (idx, call) in calls.iter().enumerate() {
            let verdict = check_tool_call(call, &ctx.config).await;
            if verdict.allowed {
                self.emit(
                    &ctx.run_id,
                    EventPayload::ToolDispatch {
                        step_id,
                        tool_name: call.name.clone(),
                        args_hash: Dispatcher::args_hash(&call.args),
                    },
                );
                allowed.push((idx, call));
            } else {
                let reason = verdict.reason.unwrap_or_else(|| "denied".into());
                tracing::warn!(tool = %call.name, reason = %reason, "policy denied tool call");
                self.emit(
                    &ctx.run_id,
                    EventPayload::PolicyDenied {
                        step_id,
                        tool_name: call.name.clone(),
                        reason: reason.clone(),
                        flags: verdict.flags.clone(),
                    },
                );
                ctx.trace.push(StepTrace {
                    run_id: ctx.run_id.clone(),
                    step_id,
                    state: RunState::ExecuteTool,
                    tool_name: Some(call.name.clone()),
                    args_hash: None,
                    duration_ms: 0,
                    status: "policy_denied".into(),
                    error_code: Some("policy_denied".into()),
                    policy_flags: verdict.flags,
                });
                slots[idx] = Some(ToolResult::error(call.id.clone(), "policy_denied", reason, false, 0));
            }
        }

        // Dispatch the surviving calls concurrently.
        let dispatched = futures_util::future::join_all(
            allowed
                .iter()
                .map(|(idx, call)| async move { (*idx, self.dispatcher.dispatch(call).await) }),
        )
        .await;

        for (idx, result) in dispatched {
            let call = &calls[idx];
            self.emit(
                &ctx.run_id,
                EventPayload::ToolResult {
                    step_id,
                    tool_call_id: result.tool_call_id.clone(),
                    ok: result.ok,
                    error_code: result.error_code.clone(),
                    duration_ms: result.duration_ms,
                    retriable: result.retriable,
                },
            );
            ctx.trace.push(StepTrace {
                run_id: ctx.run_id.clone(),
                step_id,
                state: RunState::ExecuteTool,
                tool_name: Some(call.name.clone()),
                args_hash: Some(Dispatcher::args_hash(&call.args)),
                duration_ms: result.duration_ms,
                status: if result.ok {
                    "ok".into()
                } else {
                    result.error_code.clone().unwrap_or_else(|| "error".into())
                },
                error_code: result.error_code.clone(),
                policy_flags: Vec::new(),
            });
            slots[idx] = Some(result);
        }

        let results: Vec<ToolResult> = slots.into_iter().flatten().collect();
        // Every non-ok result counts toward the failure gate.
        ctx.failures += results.iter().filter(|r| !r.ok).count() as u32;
        results
    }

    // ── Stop conditions ───────────────────────────────────────────

    fn check_stop(ctx: &RunContext) -> Option<StopReason> {
        if ctx.step >= ctx.config.max_steps {
            return Some(StopReason::MaxSteps);
        }
        if ctx.elapsed_ms() >= ctx.config.max_wall_time_ms {
            return Some(StopReason::MaxWallTime);
        }
        if ctx.failures >= ctx.config.max_failures {
            return Some(StopReason::MaxFailures);
        }
        if ctx.consecutive_no_ops >= NO_OP_THRESHOLD {
            return Some(StopReason::NoOpLoop);
        }
        None
    }

    // ── Finalization ──────────────────────────────────────────────

    fn finalize(
        &self,
        ctx: &mut RunContext,
        stop_reason: StopReason,
        error: Option<String>,
    ) -> RunResult {
        let response = ctx.messages.iter().rev().find_map(|m| {
            match (&m.role, &m.content) {
                (Role::Assistant, MessageContent::Text(text)) => Some(text.clone()),
                _ => None,
            }
        });

        let success = stop_reason == StopReason::Completed && error.is_none();
        let result = RunResult {
            run_id: ctx.run_id.clone(),
            success,
            stop_reason,
            response,
            trace: ctx.trace.clone(),
            steps: ctx.step,
            wall_time_ms: ctx.elapsed_ms(),
            error: error.clone(),
        };

        self.emit(
            &ctx.run_id,
            EventPayload::RunEnd {
                success,
                stop_reason,
                steps: ctx.step,
                wall_time_ms: result.wall_time_ms,
                error,
            },
        );

        result
    }

    // ── Helpers ───────────────────────────────────────────────────

    fn emit(&self, run_id: &str, payload: EventPayload) {
        self.bus.emit(&Event::new(run_id, payload));
    }

    fn emit_step_end(&self, ctx: &RunContext, step_id: u32, step_start: Instant) {
        self.emit(
            &ctx.run_id,
            EventPayload::StepEnd {
                step_id,
                duration_ms: step_start.elapsed().as_millis() as u64,
            },
        );
    }
}

/// Tool payloads enter the conversation as plain text.
fn payload_text(payload: &Value) -> String {
    match payload {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
