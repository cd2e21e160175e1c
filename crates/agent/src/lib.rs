//! The bounded agent runtime: tool registry, dispatcher, event bus, trace
//! collector, and the plan→execute→observe engine loop.

pub mod dispatcher;
pub mod engine;
pub mod events;
pub mod registry;
pub mod trace;

pub use dispatcher::{Dispatcher, ToolDispatch};
pub use engine::AgentEngine;
pub use events::{Event, EventBus, EventKind, EventPayload};
pub use registry::{Tool, ToolOutcome, ToolRegistry};
pub use trace::{RunSummary, TraceCollector};
