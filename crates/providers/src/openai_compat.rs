//! OpenAI-compatible chat-completions adapter.
//!
//! Also fronts Ollama's `/v1` surface — same dialect, different base URL and
//! no API key.

use std::time::Duration;

use base64::Engine;
use serde_json::{json, Value};

use wr_domain::tool::{
    AssistantAction, ContentPart, Message, MessageContent, Role, ToolCall, ToolDefinition,
};
use wr_domain::{Error, Result};

use crate::adapter::{LlmAdapter, VisionDetail};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

pub struct OpenAiCompatAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    name: String,
}

impl OpenAiCompatAdapter {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            base_url: base_url.into(),
            api_key,
            model: model.into(),
            name: name.into(),
        }
    }

    async fn post_chat(&self, body: Value) -> Result<Value> {
        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));
        let mut req = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| Error::provider(&self.name, e.to_string()))?;
        let status = resp.status();
        let payload: Value = resp
            .json()
            .await
            .map_err(|e| Error::provider(&self.name, e.to_string()))?;

        if !status.is_success() {
            let detail = payload["error"]["message"]
                .as_str()
                .unwrap_or("request failed")
                .to_string();
            return Err(Error::provider(&self.name, format!("{status}: {detail}")));
        }
        Ok(payload)
    }

    fn wire_messages(messages: &[Message]) -> Vec<Value> {
        let mut out = Vec::with_capacity(messages.len());
        for msg in messages {
            match (&msg.role, &msg.content) {
                (Role::System, content) => out.push(json!({
                    "role": "system",
                    "content": content.text().unwrap_or_default(),
                })),
                (Role::User, content) => out.push(json!({
                    "role": "user",
                    "content": content.text().unwrap_or_default(),
                })),
                (Role::Assistant, MessageContent::Text(text)) => out.push(json!({
                    "role": "assistant",
                    "content": text,
                })),
                (Role::Assistant, MessageContent::Parts(parts)) => {
                    let tool_calls: Vec<Value> = parts
                        .iter()
                        .filter_map(|p| match p {
                            ContentPart::ToolUse { id, name, input } => Some(json!({
                                "id": id,
                                "type": "function",
                                "function": {
                                    "name": name,
                                    "arguments": input.to_string(),
                                },
                            })),
                            _ => None,
                        })
                        .collect();
                    out.push(json!({
                        "role": "assistant",
                        "content": Value::Null,
                        "tool_calls": tool_calls,
                    }));
                }
                (Role::Tool, MessageContent::Parts(parts)) => {
                    for part in parts {
                        if let ContentPart::ToolResult {
                            tool_call_id,
                            content,
                            ..
                        } = part
                        {
                            out.push(json!({
                                "role": "tool",
                                "tool_call_id": tool_call_id,
                                "content": content,
                            }));
                        }
                    }
                }
                (Role::Tool, MessageContent::Text(text)) => out.push(json!({
                    "role": "tool",
                    "content": text,
                })),
            }
        }
        out
    }

    fn wire_tools(tools: &[ToolDefinition]) -> Vec<Value> {
        tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    },
                })
            })
            .collect()
    }

    fn parse_action(&self, payload: &Value) -> Result<AssistantAction> {
        let message = &payload["choices"][0]["message"];
        if message.is_null() {
            return Err(Error::provider(&self.name, "response carried no message"));
        }

        if let Some(tool_calls) = message["tool_calls"].as_array() {
            if !tool_calls.is_empty() {
                let calls = tool_calls
                    .iter()
                    .map(|tc| {
                        let args_raw = tc["function"]["arguments"].as_str().unwrap_or("{}");
                        ToolCall {
                            id: tc["id"].as_str().unwrap_or_default().to_string(),
                            name: tc["function"]["name"].as_str().unwrap_or_default().to_string(),
                            args: serde_json::from_str(args_raw)
                                .unwrap_or(Value::String(args_raw.to_string())),
                        }
                    })
                    .collect();
                return Ok(AssistantAction::ToolCalls { calls });
            }
        }

        Ok(AssistantAction::Respond {
            text: message["content"].as_str().unwrap_or_default().to_string(),
        })
    }
}

#[async_trait::async_trait]
impl LlmAdapter for OpenAiCompatAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<AssistantAction> {
        let mut body = json!({
            "model": self.model,
            "messages": Self::wire_messages(messages),
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(Self::wire_tools(tools));
        }

        let payload = self.post_chat(body).await?;
        self.parse_action(&payload)
    }

    async fn vision(&self, image: &[u8], prompt: &str, detail: VisionDetail) -> Result<String> {
        let data_url = format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(image)
        );
        let body = json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": prompt},
                    {"type": "image_url", "image_url": {"url": data_url, "detail": detail.as_str()}},
                ],
            }],
        });

        let payload = self.post_chat(body).await?;
        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::provider(&self.name, "vision response carried no content"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_turns_become_one_wire_message_per_result() {
        let messages = vec![
            Message::user("go"),
            Message::assistant_tool_calls(&[ToolCall {
                id: "c1".into(),
                name: "crawl".into(),
                args: json!({"url": "https://example.com"}),
            }]),
            Message::tool_result("c1", "page text", false),
        ];
        let wire = OpenAiCompatAdapter::wire_messages(&messages);
        assert_eq!(wire.len(), 3);
        assert_eq!(wire[1]["tool_calls"][0]["function"]["name"], "crawl");
        assert_eq!(wire[2]["role"], "tool");
        assert_eq!(wire[2]["tool_call_id"], "c1");
    }

    #[test]
    fn tool_call_response_parses_arguments_json() {
        let adapter = OpenAiCompatAdapter::new("https://api.openai.com", None, "m", "openai");
        let payload = json!({
            "choices": [{"message": {
                "content": null,
                "tool_calls": [{
                    "id": "call_1",
                    "function": {"name": "crawl", "arguments": "{\"url\":\"https://a.b\"}"},
                }],
            }}],
        });
        match adapter.parse_action(&payload).unwrap() {
            AssistantAction::ToolCalls { calls } => {
                assert_eq!(calls[0].name, "crawl");
                assert_eq!(calls[0].args["url"], "https://a.b");
            }
            _ => panic!("expected tool calls"),
        }
    }

    #[test]
    fn text_response_parses_as_respond() {
        let adapter = OpenAiCompatAdapter::new("https://api.openai.com", None, "m", "openai");
        let payload = json!({"choices": [{"message": {"content": "hi"}}]});
        match adapter.parse_action(&payload).unwrap() {
            AssistantAction::Respond { text } => assert_eq!(text, "hi"),
            _ => panic!("expected respond"),
        }
    }
}
