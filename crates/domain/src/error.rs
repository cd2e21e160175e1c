//! Shared error type with a closed set of machine-readable codes.
//!
//! Loop callers never parse error messages — every variant maps to a stable
//! `code()` that travels on `ToolResult.error_code` and `RunResult.error`.

/// Shared error type used across all wraith crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("validation: {0}")]
    Validation(String),

    #[error("policy denied: {0}")]
    PolicyDenied(String),

    #[error("tool unavailable: {0}")]
    ToolUnavailable(String),

    #[error("tool timeout: {0}")]
    ToolTimeout(String),

    #[error("execution: {0}")]
    Execution(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("stop condition: {0}")]
    StopCondition(String),

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("config: {0}")]
    Config(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Stable machine-readable code attached to tool results and run errors.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation_error",
            Error::PolicyDenied(_) => "policy_denied",
            Error::ToolUnavailable(_) => "tool_unavailable",
            Error::ToolTimeout(_) => "tool_timeout",
            Error::Execution(_) => "execution_error",
            Error::Provider { .. } => "provider_error",
            Error::StopCondition(_) => "stop_condition",
            Error::NotSupported(_) => "not_supported",
            Error::Http(_) => "execution_error",
            Error::Config(_) => "validation_error",
            Error::Io(_) | Error::Json(_) => "execution_error",
        }
    }

    /// Whether a failure of this kind is worth one more attempt.
    pub fn retriable(&self) -> bool {
        matches!(self, Error::ToolTimeout(_) | Error::Provider { .. })
    }

    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_the_closed_set() {
        assert_eq!(Error::Validation("x".into()).code(), "validation_error");
        assert_eq!(Error::PolicyDenied("x".into()).code(), "policy_denied");
        assert_eq!(Error::ToolUnavailable("x".into()).code(), "tool_unavailable");
        assert_eq!(Error::ToolTimeout("x".into()).code(), "tool_timeout");
        assert_eq!(Error::Execution("x".into()).code(), "execution_error");
        assert_eq!(Error::provider("p", "m").code(), "provider_error");
        assert_eq!(Error::StopCondition("x".into()).code(), "stop_condition");
    }

    #[test]
    fn only_timeouts_and_providers_retry() {
        assert!(Error::ToolTimeout("x".into()).retriable());
        assert!(Error::provider("p", "m").retriable());
        assert!(!Error::Execution("x".into()).retriable());
        assert!(!Error::PolicyDenied("x".into()).retriable());
    }
}
