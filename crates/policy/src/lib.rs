//! Policy gates applied before any tool call or URL fetch executes.
//!
//! Stateless, config-driven checks: tool allowlists, domain allowlists,
//! private-network denial, secret redaction, and hidden prompt-injection
//! analysis. Everything returns machine-readable verdicts; nothing here
//! performs the action it is gating.

pub mod gate;
pub mod injection;
pub mod netguard;
pub mod redact;

pub use gate::{check_fetch_url, check_tool_call, Verdict};
pub use redact::{redact_text, redact_value, REDACTED};
