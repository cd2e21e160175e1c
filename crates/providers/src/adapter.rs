use wr_domain::tool::{AssistantAction, Message, ToolDefinition};
use wr_domain::{Error, Result};

/// Controls vision token cost on providers that meter by image detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisionDetail {
    Low,
    High,
}

impl VisionDetail {
    pub fn as_str(&self) -> &'static str {
        match self {
            VisionDetail::Low => "low",
            VisionDetail::High => "high",
        }
    }
}

/// Minimal interface that every provider adapter must satisfy.
#[async_trait::async_trait]
pub trait LlmAdapter: Send + Sync {
    /// A short identifier for logs and result attribution.
    fn name(&self) -> &str;

    /// Send conversation + tool schemas, get back the next assistant action.
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<AssistantAction>;

    /// Extract text from an image. Providers without a vision model keep the
    /// default, which fails with `not_supported`.
    async fn vision(&self, _image: &[u8], _prompt: &str, _detail: VisionDetail) -> Result<String> {
        Err(Error::NotSupported(format!(
            "provider '{}' does not support vision",
            self.name()
        )))
    }
}
