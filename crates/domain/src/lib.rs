//! Core domain types shared across all wraith crates.
//!
//! Everything here is provider- and transport-agnostic: tool calls and
//! results, conversation messages, the agent run state machine, the shared
//! error type, and the environment-driven settings tree.

pub mod error;
pub mod run;
pub mod settings;
pub mod tool;

pub use error::{Error, Result};
