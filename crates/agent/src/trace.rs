//! Trace collector: accumulates bus events into a replayable run summary.
//!
//! The summary is the persisted artifact for a run. It is replay-friendly:
//! load the JSON, iterate the trace, and diff against a new run. Raw tool
//! args and payloads never enter it — dispatch entries carry an args hash,
//! result entries carry status only.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use wr_domain::run::{RunConfig, RunResult};
use wr_policy::redact_value;

use crate::events::{Event, EventBus, EventPayload};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run summary (what gets persisted)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    pub run_id: String,
    pub task: String,
    pub success: bool,
    pub stop_reason: String,
    pub steps: u32,
    pub wall_time_ms: u64,
    pub failures: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<String>,
    #[serde(default)]
    pub config_snapshot: Option<RunConfig>,
    #[serde(default)]
    pub trace: Vec<Value>,
    #[serde(default)]
    pub policy_denials: Vec<Value>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trace collector
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct CollectorState {
    task: String,
    config_snapshot: Option<RunConfig>,
    started_at: Option<String>,
    trace: Vec<Value>,
    policy_denials: Vec<Value>,
    failures: u32,
}

/// Accumulates trace data from bus events during one run.
///
/// Usage: create, `attach` to the run's bus, let the engine emit, then
/// `finalize` with the run result.
pub struct TraceCollector {
    run_id: String,
    redact: bool,
    state: Mutex<CollectorState>,
}

impl TraceCollector {
    pub fn new(run_id: impl Into<String>, redact: bool) -> Arc<Self> {
        Arc::new(Self {
            run_id: run_id.into(),
            redact,
            state: Mutex::new(CollectorState::default()),
        })
    }

    /// Subscribe to every event on the bus.
    pub fn attach(self: &Arc<Self>, bus: &mut EventBus) {
        let collector = self.clone();
        bus.on_all(move |event| collector.observe(event));
    }

    fn observe(&self, event: &Event) {
        let mut state = self.state.lock();
        match &event.payload {
            EventPayload::RunStart { task, config } => {
                state.task = task.clone();
                state.started_at = Some(chrono::Utc::now().to_rfc3339());
                state.config_snapshot = Some(config.clone());
                state.trace.push(self.entry(event));
            }
            EventPayload::ToolResult { ok, .. } => {
                if !ok {
                    state.failures += 1;
                }
                state.trace.push(self.entry(event));
            }
            EventPayload::PolicyDenied { .. } => {
                let entry = self.entry(event);
                state.policy_denials.push(entry.clone());
                state.trace.push(entry);
            }
            EventPayload::StepStart { .. }
            | EventPayload::ToolDispatch { .. }
            | EventPayload::StepEnd { .. }
            | EventPayload::RunEnd { .. } => {
                state.trace.push(self.entry(event));
            }
        }
    }

    fn entry(&self, event: &Event) -> Value {
        let value = serde_json::to_value(event).unwrap_or(Value::Null);
        if self.redact {
            redact_value(&value)
        } else {
            value
        }
    }

    /// Build the summary from accumulated trace data and the run result.
    pub fn finalize(&self, result: &RunResult) -> RunSummary {
        let state = self.state.lock();
        let response = if self.redact {
            result.response.as_deref().map(wr_policy::redact_text)
        } else {
            result.response.clone()
        };
        RunSummary {
            run_id: result.run_id.clone(),
            task: state.task.clone(),
            success: result.success,
            stop_reason: stop_reason_str(&result.stop_reason),
            steps: result.steps,
            wall_time_ms: result.wall_time_ms,
            failures: state.failures,
            response,
            error: result.error.clone(),
            started_at: state.started_at.clone(),
            ended_at: Some(chrono::Utc::now().to_rfc3339()),
            config_snapshot: state.config_snapshot.clone(),
            trace: state.trace.clone(),
            policy_denials: state.policy_denials.clone(),
        }
    }
}

fn stop_reason_str(reason: &wr_domain::run::StopReason) -> String {
    serde_json::to_value(reason)
        .ok()
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventPayload;
    use wr_domain::run::StopReason;

    fn emit_all(bus: &EventBus, run_id: &str, payloads: Vec<EventPayload>) {
        for payload in payloads {
            bus.emit(&Event::new(run_id, payload));
        }
    }

    fn sample_result(run_id: &str) -> RunResult {
        RunResult {
            run_id: run_id.into(),
            success: true,
            stop_reason: StopReason::Completed,
            response: Some("done".into()),
            trace: Vec::new(),
            steps: 1,
            wall_time_ms: 42,
            error: None,
        }
    }

    #[test]
    fn summary_round_trips_through_json() {
        let collector = TraceCollector::new("r1", true);
        let mut bus = EventBus::new();
        collector.attach(&mut bus);

        emit_all(
            &bus,
            "r1",
            vec![
                EventPayload::RunStart {
                    task: "say hi".into(),
                    config: RunConfig::default(),
                },
                EventPayload::StepStart {
                    step_id: 1,
                    state: wr_domain::run::RunState::Plan,
                },
                EventPayload::StepEnd {
                    step_id: 1,
                    duration_ms: 3,
                },
                EventPayload::RunEnd {
                    success: true,
                    stop_reason: StopReason::Completed,
                    steps: 1,
                    wall_time_ms: 42,
                    error: None,
                },
            ],
        );

        let summary = collector.finalize(&sample_result("r1"));
        let json = serde_json::to_string(&summary).unwrap();
        let back: RunSummary = serde_json::from_str(&json).unwrap();
        assert_eq!(summary, back);
        assert_eq!(back.stop_reason, "completed");
        assert_eq!(back.trace.len(), 4);
    }

    #[test]
    fn dispatch_entries_carry_hash_never_args() {
        let collector = TraceCollector::new("r1", true);
        let mut bus = EventBus::new();
        collector.attach(&mut bus);

        emit_all(
            &bus,
            "r1",
            vec![EventPayload::ToolDispatch {
                step_id: 1,
                tool_name: "crawl".into(),
                args_hash: "abcdef012345".into(),
            }],
        );

        let summary = collector.finalize(&sample_result("r1"));
        let entry = &summary.trace[0];
        assert_eq!(entry["event"], "tool_dispatch");
        assert_eq!(entry["args_hash"], "abcdef012345");
        assert!(entry.get("args").is_none());
    }

    #[test]
    fn non_ok_results_count_as_failures() {
        let collector = TraceCollector::new("r1", false);
        let mut bus = EventBus::new();
        collector.attach(&mut bus);

        emit_all(
            &bus,
            "r1",
            vec![
                EventPayload::ToolResult {
                    step_id: 1,
                    tool_call_id: "a".into(),
                    ok: false,
                    error_code: Some("execution_error".into()),
                    duration_ms: 10,
                    retriable: false,
                },
                EventPayload::ToolResult {
                    step_id: 1,
                    tool_call_id: "b".into(),
                    ok: true,
                    error_code: None,
                    duration_ms: 10,
                    retriable: false,
                },
            ],
        );

        let summary = collector.finalize(&sample_result("r1"));
        assert_eq!(summary.failures, 1);
    }

    #[test]
    fn policy_denials_are_recorded_twice() {
        let collector = TraceCollector::new("r1", true);
        let mut bus = EventBus::new();
        collector.attach(&mut bus);

        emit_all(
            &bus,
            "r1",
            vec![EventPayload::PolicyDenied {
                step_id: 1,
                tool_name: "crawl".into(),
                reason: "domain 'x' resolves to private/loopback address".into(),
                flags: vec!["url_blocked".into()],
            }],
        );

        let summary = collector.finalize(&sample_result("r1"));
        assert_eq!(summary.policy_denials.len(), 1);
        assert_eq!(summary.trace.len(), 1);
        assert!(summary.policy_denials[0]["reason"]
            .as_str()
            .unwrap()
            .contains("private"));
    }
}
