//! Fallback chain: wraps multiple adapters and rotates on failure.

use std::sync::Arc;

use parking_lot::Mutex;

use wr_domain::tool::{AssistantAction, Message, ToolDefinition};
use wr_domain::{Error, Result};

use crate::adapter::{LlmAdapter, VisionDetail};

/// Rotates across adapters on transient failure, preserving the same
/// interface. Each `complete` gets up to two passes over the chain; vision
/// gets one pass, skipping adapters without vision support.
pub struct FallbackAdapter {
    adapters: Vec<Arc<dyn LlmAdapter>>,
    current: Mutex<usize>,
}

impl FallbackAdapter {
    pub fn new(adapters: Vec<Arc<dyn LlmAdapter>>) -> Result<Self> {
        if adapters.is_empty() {
            return Err(Error::Config("fallback chain requires at least one adapter".into()));
        }
        Ok(Self {
            adapters,
            current: Mutex::new(0),
        })
    }

    fn pick(&self) -> (usize, Arc<dyn LlmAdapter>) {
        let idx = *self.current.lock();
        (idx, self.adapters[idx].clone())
    }

    fn rotate(&self) {
        let mut current = self.current.lock();
        *current = (*current + 1) % self.adapters.len();
    }
}

#[async_trait::async_trait]
impl LlmAdapter for FallbackAdapter {
    fn name(&self) -> &str {
        "fallback"
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<AssistantAction> {
        let mut last_err: Option<Error> = None;

        for attempt in 0..self.adapters.len() * 2 {
            let (_, adapter) = self.pick();
            match adapter.complete(messages, tools).await {
                Ok(action) => return Ok(action),
                Err(err) => {
                    tracing::warn!(
                        provider = adapter.name(),
                        attempt = attempt + 1,
                        error = %err,
                        "provider failed, rotating"
                    );
                    last_err = Some(err);
                    self.rotate();
                }
            }
        }

        Err(last_err.unwrap_or_else(|| Error::provider("fallback", "no adapters attempted")))
    }

    async fn vision(&self, image: &[u8], prompt: &str, detail: VisionDetail) -> Result<String> {
        let mut last_err: Option<Error> = None;

        for _ in 0..self.adapters.len() {
            let (_, adapter) = self.pick();
            match adapter.vision(image, prompt, detail).await {
                Ok(text) => return Ok(text),
                Err(Error::NotSupported(_)) => self.rotate(),
                Err(err) => {
                    tracing::warn!(provider = adapter.name(), error = %err, "vision provider failed, rotating");
                    last_err = Some(err);
                    self.rotate();
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| Error::NotSupported("no adapter in the fallback chain supports vision".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyAdapter {
        fail_first: usize,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl LlmAdapter for FlakyAdapter {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn complete(
            &self,
            _messages: &[Message],
            _tools: &[ToolDefinition],
        ) -> Result<AssistantAction> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(Error::provider("flaky", "transient"))
            } else {
                Ok(AssistantAction::Respond { text: "ok".into() })
            }
        }
    }

    #[tokio::test]
    async fn rotation_recovers_from_transient_failure() {
        let chain = FallbackAdapter::new(vec![Arc::new(FlakyAdapter {
            fail_first: 1,
            calls: AtomicUsize::new(0),
        })])
        .unwrap();
        let action = chain.complete(&[], &[]).await.unwrap();
        assert!(matches!(action, AssistantAction::Respond { .. }));
    }

    #[tokio::test]
    async fn exhausted_chain_returns_last_error() {
        let chain = FallbackAdapter::new(vec![Arc::new(FlakyAdapter {
            fail_first: usize::MAX,
            calls: AtomicUsize::new(0),
        })])
        .unwrap();
        let err = chain.complete(&[], &[]).await.unwrap_err();
        assert_eq!(err.code(), "provider_error");
    }

    #[tokio::test]
    async fn vision_without_support_is_not_supported() {
        let chain = FallbackAdapter::new(vec![Arc::new(FlakyAdapter {
            fail_first: 0,
            calls: AtomicUsize::new(0),
        })])
        .unwrap();
        let err = chain.vision(b"img", "read it", VisionDetail::Low).await.unwrap_err();
        assert!(matches!(err, Error::NotSupported(_)));
    }
}
