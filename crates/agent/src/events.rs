//! Typed event system for agent lifecycle observability.
//!
//! Events are emitted at key points during a run. Listeners (the trace
//! collector, loggers) subscribe on the bus and receive immutable payloads.
//! Emission is synchronous and inline — listeners must be fast; a listener
//! panic is isolated and logged, never propagated.

use std::panic::AssertUnwindSafe;

use serde::Serialize;

use wr_domain::run::{RunConfig, RunState, StopReason};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    RunStart,
    StepStart,
    ToolDispatch,
    ToolResult,
    PolicyDenied,
    StepEnd,
    RunEnd,
}

/// Kind-specific event payloads. Tool dispatch carries an args hash, never
/// the raw args; tool results carry status, never the payload.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventPayload {
    RunStart {
        task: String,
        config: RunConfig,
    },
    StepStart {
        step_id: u32,
        state: RunState,
    },
    ToolDispatch {
        step_id: u32,
        tool_name: String,
        args_hash: String,
    },
    ToolResult {
        step_id: u32,
        tool_call_id: String,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_code: Option<String>,
        duration_ms: u64,
        retriable: bool,
    },
    PolicyDenied {
        step_id: u32,
        tool_name: String,
        reason: String,
        flags: Vec<String>,
    },
    StepEnd {
        step_id: u32,
        duration_ms: u64,
    },
    RunEnd {
        success: bool,
        stop_reason: StopReason,
        steps: u32,
        wall_time_ms: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::RunStart { .. } => EventKind::RunStart,
            EventPayload::StepStart { .. } => EventKind::StepStart,
            EventPayload::ToolDispatch { .. } => EventKind::ToolDispatch,
            EventPayload::ToolResult { .. } => EventKind::ToolResult,
            EventPayload::PolicyDenied { .. } => EventKind::PolicyDenied,
            EventPayload::StepEnd { .. } => EventKind::StepEnd,
            EventPayload::RunEnd { .. } => EventKind::RunEnd,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub run_id: String,
    pub timestamp_ms: i64,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    pub fn new(run_id: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            run_id: run_id.into(),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            payload,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event bus
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

type Listener = Box<dyn Fn(&Event) + Send + Sync>;

/// Simple synchronous pub/sub for agent events.
#[derive(Default)]
pub struct EventBus {
    listeners: Vec<(Option<EventKind>, Listener)>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a specific event kind.
    pub fn on(&mut self, kind: EventKind, listener: impl Fn(&Event) + Send + Sync + 'static) {
        self.listeners.push((Some(kind), Box::new(listener)));
    }

    /// Subscribe to every event kind.
    pub fn on_all(&mut self, listener: impl Fn(&Event) + Send + Sync + 'static) {
        self.listeners.push((None, Box::new(listener)));
    }

    /// Dispatch an event to all matching listeners, in subscription order.
    pub fn emit(&self, event: &Event) {
        for (kind, listener) in &self.listeners {
            if kind.map_or(true, |k| k == event.kind()) {
                let result =
                    std::panic::catch_unwind(AssertUnwindSafe(|| listener(event)));
                if result.is_err() {
                    tracing::error!(kind = ?event.kind(), "event listener panicked");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn step_start(run_id: &str) -> Event {
        Event::new(
            run_id,
            EventPayload::StepStart {
                step_id: 1,
                state: RunState::Plan,
            },
        )
    }

    #[test]
    fn kind_listeners_only_see_their_kind() {
        let step_count = Arc::new(AtomicUsize::new(0));
        let all_count = Arc::new(AtomicUsize::new(0));

        let mut bus = EventBus::new();
        {
            let step_count = step_count.clone();
            bus.on(EventKind::StepStart, move |_| {
                step_count.fetch_add(1, Ordering::SeqCst);
            });
        }
        {
            let all_count = all_count.clone();
            bus.on_all(move |_| {
                all_count.fetch_add(1, Ordering::SeqCst);
            });
        }

        bus.emit(&step_start("r1"));
        bus.emit(&Event::new(
            "r1",
            EventPayload::StepEnd {
                step_id: 1,
                duration_ms: 5,
            },
        ));

        assert_eq!(step_count.load(Ordering::SeqCst), 1);
        assert_eq!(all_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn panicking_listener_does_not_poison_the_rest() {
        let reached = Arc::new(AtomicUsize::new(0));
        let mut bus = EventBus::new();
        bus.on_all(|_| panic!("bad listener"));
        {
            let reached = reached.clone();
            bus.on_all(move |_| {
                reached.fetch_add(1, Ordering::SeqCst);
            });
        }

        bus.emit(&step_start("r1"));
        assert_eq!(reached.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn events_serialize_with_flattened_payload() {
        let event = step_start("abc");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["run_id"], "abc");
        assert_eq!(json["event"], "step_start");
        assert_eq!(json["step_id"], 1);
    }
}
