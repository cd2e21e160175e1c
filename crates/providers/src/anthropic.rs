//! Anthropic messages-API adapter.

use std::time::Duration;

use base64::Engine;
use serde_json::{json, Value};

use wr_domain::tool::{
    AssistantAction, ContentPart, Message, MessageContent, Role, ToolCall, ToolDefinition,
};
use wr_domain::{Error, Result};

use crate::adapter::{LlmAdapter, VisionDetail};

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

pub struct AnthropicAdapter {
    client: reqwest::Client,
    api_key: Option<String>,
    model: String,
}

impl AnthropicAdapter {
    pub fn new(api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            api_key,
            model: model.into(),
        }
    }

    async fn post_messages(&self, body: Value) -> Result<Value> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| Error::provider("anthropic", "ANTHROPIC_API_KEY not configured"))?;

        let resp = self
            .client
            .post(API_URL)
            .header("x-api-key", key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::provider("anthropic", e.to_string()))?;
        let status = resp.status();
        let payload: Value = resp
            .json()
            .await
            .map_err(|e| Error::provider("anthropic", e.to_string()))?;

        if !status.is_success() {
            let detail = payload["error"]["message"]
                .as_str()
                .unwrap_or("request failed")
                .to_string();
            return Err(Error::provider("anthropic", format!("{status}: {detail}")));
        }
        Ok(payload)
    }

    /// Split our message log into the Anthropic shape: system string +
    /// alternating user/assistant turns. Tool results travel as user-role
    /// `tool_result` blocks referencing the assistant's `tool_use` ids.
    fn wire_messages(messages: &[Message]) -> (Option<String>, Vec<Value>) {
        let mut system = None;
        let mut out: Vec<Value> = Vec::with_capacity(messages.len());

        for msg in messages {
            match (&msg.role, &msg.content) {
                (Role::System, content) => {
                    system = content.text().map(str::to_string);
                }
                (Role::User, content) => out.push(json!({
                    "role": "user",
                    "content": content.text().unwrap_or_default(),
                })),
                (Role::Assistant, MessageContent::Text(text)) => out.push(json!({
                    "role": "assistant",
                    "content": text,
                })),
                (Role::Assistant, MessageContent::Parts(parts)) => {
                    let blocks: Vec<Value> = parts
                        .iter()
                        .filter_map(|p| match p {
                            ContentPart::Text { text } => {
                                Some(json!({"type": "text", "text": text}))
                            }
                            ContentPart::ToolUse { id, name, input } => Some(json!({
                                "type": "tool_use",
                                "id": id,
                                "name": name,
                                "input": input,
                            })),
                            _ => None,
                        })
                        .collect();
                    out.push(json!({"role": "assistant", "content": blocks}));
                }
                (Role::Tool, MessageContent::Parts(parts)) => {
                    let blocks: Vec<Value> = parts
                        .iter()
                        .filter_map(|p| match p {
                            ContentPart::ToolResult {
                                tool_call_id,
                                content,
                                is_error,
                            } => Some(json!({
                                "type": "tool_result",
                                "tool_use_id": tool_call_id,
                                "content": content,
                                "is_error": is_error,
                            })),
                            _ => None,
                        })
                        .collect();
                    out.push(json!({"role": "user", "content": blocks}));
                }
                (Role::Tool, MessageContent::Text(text)) => out.push(json!({
                    "role": "user",
                    "content": text,
                })),
            }
        }

        (system, out)
    }

    fn wire_tools(tools: &[ToolDefinition]) -> Vec<Value> {
        tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters,
                })
            })
            .collect()
    }

    fn parse_action(payload: &Value) -> Result<AssistantAction> {
        let blocks = payload["content"]
            .as_array()
            .ok_or_else(|| Error::provider("anthropic", "response carried no content"))?;

        let calls: Vec<ToolCall> = blocks
            .iter()
            .filter(|b| b["type"] == "tool_use")
            .map(|b| ToolCall {
                id: b["id"].as_str().unwrap_or_default().to_string(),
                name: b["name"].as_str().unwrap_or_default().to_string(),
                args: b["input"].clone(),
            })
            .collect();

        if !calls.is_empty() {
            return Ok(AssistantAction::ToolCalls { calls });
        }

        let text = blocks
            .iter()
            .filter_map(|b| b["text"].as_str())
            .collect::<Vec<_>>()
            .join("\n");
        Ok(AssistantAction::Respond { text })
    }
}

#[async_trait::async_trait]
impl LlmAdapter for AnthropicAdapter {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<AssistantAction> {
        let (system, wire) = Self::wire_messages(messages);
        let mut body = json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "messages": wire,
        });
        if let Some(system) = system {
            body["system"] = Value::String(system);
        }
        if !tools.is_empty() {
            body["tools"] = Value::Array(Self::wire_tools(tools));
        }

        let payload = self.post_messages(body).await?;
        Self::parse_action(&payload)
    }

    async fn vision(&self, image: &[u8], prompt: &str, _detail: VisionDetail) -> Result<String> {
        let body = json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "image", "source": {
                        "type": "base64",
                        "media_type": "image/png",
                        "data": base64::engine::general_purpose::STANDARD.encode(image),
                    }},
                    {"type": "text", "text": prompt},
                ],
            }],
        });

        let payload = self.post_messages(body).await?;
        let text = payload["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| b["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default();
        if text.is_empty() {
            return Err(Error::provider("anthropic", "vision response carried no text"));
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_results_become_user_role_blocks() {
        let messages = vec![
            Message::system("be useful"),
            Message::user("go"),
            Message::assistant_tool_calls(&[ToolCall {
                id: "tu_1".into(),
                name: "crawl".into(),
                args: json!({"url": "https://example.com"}),
            }]),
            Message::tool_result("tu_1", "page text", false),
        ];
        let (system, wire) = AnthropicAdapter::wire_messages(&messages);
        assert_eq!(system.as_deref(), Some("be useful"));
        assert_eq!(wire.len(), 3);
        assert_eq!(wire[1]["content"][0]["type"], "tool_use");
        assert_eq!(wire[2]["role"], "user");
        assert_eq!(wire[2]["content"][0]["tool_use_id"], "tu_1");
    }

    #[test]
    fn tool_use_blocks_parse_as_tool_calls() {
        let payload = json!({
            "content": [
                {"type": "text", "text": "let me check"},
                {"type": "tool_use", "id": "tu_2", "name": "markdown", "input": {"url": "https://a.b"}},
            ],
        });
        match AnthropicAdapter::parse_action(&payload).unwrap() {
            AssistantAction::ToolCalls { calls } => {
                assert_eq!(calls.len(), 1);
                assert_eq!(calls[0].id, "tu_2");
            }
            _ => panic!("expected tool calls"),
        }
    }

    #[test]
    fn text_blocks_parse_as_respond() {
        let payload = json!({"content": [{"type": "text", "text": "done"}]});
        match AnthropicAdapter::parse_action(&payload).unwrap() {
            AssistantAction::Respond { text } => assert_eq!(text, "done"),
            _ => panic!("expected respond"),
        }
    }
}
