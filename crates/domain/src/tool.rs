use serde::{Deserialize, Serialize};

/// A single tool invocation requested by the LLM (provider-agnostic).
/// Every adapter converts provider-specific tool calls to/from this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

/// Normalized result from executing a single tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub retriable: bool,
    #[serde(default)]
    pub duration_ms: u64,
}

impl ToolResult {
    pub fn ok(tool_call_id: impl Into<String>, payload: serde_json::Value, duration_ms: u64) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            ok: true,
            payload,
            error_code: None,
            error_message: None,
            retriable: false,
            duration_ms,
        }
    }

    pub fn error(
        tool_call_id: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
        retriable: bool,
        duration_ms: u64,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            ok: false,
            payload: serde_json::Value::Null,
            error_code: Some(code.into()),
            error_message: Some(message.into()),
            retriable,
            duration_ms,
        }
    }
}

/// Tool definition exposed to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
}

/// What the assistant wants to do next: answer, or call tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AssistantAction {
    /// A terminal text response.
    Respond { text: String },
    /// One or more tool invocations.
    ToolCalls { calls: Vec<ToolCall> },
}

/// A message in the conversation (provider-agnostic).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_call_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

// ── Convenience constructors ───────────────────────────────────────

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }

    /// Assistant turn carrying tool calls instead of text.
    pub fn assistant_tool_calls(calls: &[ToolCall]) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Parts(
                calls
                    .iter()
                    .map(|c| ContentPart::ToolUse {
                        id: c.id.clone(),
                        name: c.name.clone(),
                        input: c.args.clone(),
                    })
                    .collect(),
            ),
        }
    }

    /// Tool turn referencing the exact call id the assistant produced.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>, is_error: bool) -> Self {
        Self {
            role: Role::Tool,
            content: MessageContent::Parts(vec![ContentPart::ToolResult {
                tool_call_id: tool_call_id.into(),
                content: content.into(),
                is_error,
            }]),
        }
    }
}

impl MessageContent {
    /// Extract the plain-text content (first text part, or the full text).
    pub fn text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(t) => Some(t.as_str()),
            MessageContent::Parts(parts) => parts.iter().find_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assistant_action_round_trips() {
        let action = AssistantAction::ToolCalls {
            calls: vec![ToolCall {
                id: "c1".into(),
                name: "crawl".into(),
                args: serde_json::json!({"url": "https://example.com"}),
            }],
        };
        let json = serde_json::to_string(&action).unwrap();
        let back: AssistantAction = serde_json::from_str(&json).unwrap();
        match back {
            AssistantAction::ToolCalls { calls } => assert_eq!(calls[0].name, "crawl"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn tool_message_references_call_id() {
        let msg = Message::tool_result("call_9", "hello", false);
        assert_eq!(msg.role, Role::Tool);
        match &msg.content {
            MessageContent::Parts(parts) => match &parts[0] {
                ContentPart::ToolResult { tool_call_id, .. } => assert_eq!(tool_call_id, "call_9"),
                _ => panic!("wrong part"),
            },
            _ => panic!("wrong content"),
        }
    }

    #[test]
    fn text_extraction_prefers_first_text_part() {
        let content = MessageContent::Parts(vec![
            ContentPart::ToolUse {
                id: "1".into(),
                name: "x".into(),
                input: serde_json::Value::Null,
            },
            ContentPart::Text { text: "answer".into() },
        ]);
        assert_eq!(content.text(), Some("answer"));
    }
}
