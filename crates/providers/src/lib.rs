//! LLM provider adapters.
//!
//! Implementations translate between our internal `Message`/`ToolDefinition`
//! types and the wire format of each provider's HTTP API. The engine only
//! sees [`LlmAdapter`]; it never cares which provider answered.

pub mod adapter;
pub mod anthropic;
pub mod fallback;
pub mod openai_compat;

use std::sync::Arc;

use wr_domain::settings::LlmSettings;
use wr_domain::{Error, Result};

pub use adapter::{LlmAdapter, VisionDetail};
pub use fallback::FallbackAdapter;

/// Build an adapter by provider name from settings.
///
/// `ollama` is served through the OpenAI-compatible adapter pointed at the
/// Ollama base URL (its `/v1` surface speaks the same dialect).
pub fn create_adapter(provider: &str, llm: &LlmSettings) -> Result<Arc<dyn LlmAdapter>> {
    match provider.trim().to_ascii_lowercase().as_str() {
        "openai" => Ok(Arc::new(openai_compat::OpenAiCompatAdapter::new(
            llm.openai_base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".into()),
            llm.openai_api_key.clone(),
            llm.openai_model.clone(),
            "openai",
        ))),
        "anthropic" => Ok(Arc::new(anthropic::AnthropicAdapter::new(
            llm.anthropic_api_key.clone(),
            llm.anthropic_model.clone(),
        ))),
        "ollama" => Ok(Arc::new(openai_compat::OpenAiCompatAdapter::new(
            llm.ollama_base_url.clone(),
            None,
            llm.ollama_model.clone(),
            "ollama",
        ))),
        other => Err(Error::Config(format!(
            "unknown provider '{other}' (expected openai, anthropic, or ollama)"
        ))),
    }
}
