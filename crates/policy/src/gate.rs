//! Pre-tool and pre-fetch policy gates.
//!
//! Every tool call and every URL fetch passes through here before execution.
//! A denied action returns a `Verdict` with `allowed = false` and a reason
//! string the LLM can observe and adapt to.

use serde::Serialize;
use serde_json::Value;

use wr_domain::run::RunConfig;
use wr_domain::tool::ToolCall;

use crate::netguard::check_url_policy;

/// Arg keys scanned for URL values.
const URL_KEYS: &[&str] = &["url", "urls", "target_url", "href"];

#[derive(Debug, Clone, Serialize)]
pub struct Verdict {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
}

impl Verdict {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            flags: Vec::new(),
        }
    }

    pub fn deny(reason: impl Into<String>, flag: &str) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            flags: vec![flag.to_string()],
        }
    }
}

/// Gate a tool call before dispatch.
///
/// Checks, in order:
/// 1. Tool is in `allowed_tools` (empty = all tools allowed).
/// 2. Every URL-bearing arg passes the domain + private-range checks.
pub async fn check_tool_call(call: &ToolCall, config: &RunConfig) -> Verdict {
    if !config.allowed_tools.is_empty() && !config.allowed_tools.contains(&call.name) {
        return Verdict::deny(
            format!("tool '{}' not in allowed_tools", call.name),
            "tool_blocked",
        );
    }

    if let Value::Object(args) = &call.args {
        for (key, value) in args {
            for url in extract_urls(key, value) {
                if let Some(denial) =
                    check_url_policy(url, &config.allowed_domains, config.block_private_ranges).await
                {
                    return Verdict::deny(denial, "url_blocked");
                }
            }
        }
    }

    Verdict::allow()
}

/// Gate a raw URL fetch (used by crawl paths before requesting).
pub async fn check_fetch_url(url: &str, config: &RunConfig) -> Verdict {
    match check_url_policy(url, &config.allowed_domains, config.block_private_ranges).await {
        Some(denial) => Verdict::deny(denial, "url_blocked"),
        None => Verdict::allow(),
    }
}

/// Pull URL strings out of a tool arg value (string or list of strings).
fn extract_urls<'a>(key: &str, value: &'a Value) -> Vec<&'a str> {
    if !URL_KEYS.contains(&key.to_ascii_lowercase().as_str()) {
        return Vec::new();
    }
    match value {
        Value::String(s) => vec![s.as_str()],
        Value::Array(items) => items.iter().filter_map(|v| v.as_str()).collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall {
            id: "1".into(),
            name: name.into(),
            args,
        }
    }

    #[tokio::test]
    async fn empty_allowlist_allows_any_tool() {
        let verdict = check_tool_call(&call("crawl", json!({})), &RunConfig::default()).await;
        assert!(verdict.allowed);
    }

    #[tokio::test]
    async fn tool_outside_allowlist_is_blocked() {
        let config = RunConfig {
            allowed_tools: vec!["markdown".into()],
            ..RunConfig::default()
        };
        let verdict = check_tool_call(&call("crawl", json!({})), &config).await;
        assert!(!verdict.allowed);
        assert_eq!(verdict.flags, vec!["tool_blocked"]);
    }

    #[tokio::test]
    async fn private_url_arg_is_blocked() {
        let verdict = check_tool_call(
            &call("crawl", json!({"url": "http://192.168.1.1"})),
            &RunConfig::default(),
        )
        .await;
        assert!(!verdict.allowed);
        assert!(verdict.reason.unwrap().contains("private"));
        assert_eq!(verdict.flags, vec!["url_blocked"]);
    }

    #[tokio::test]
    async fn url_list_args_are_scanned() {
        let verdict = check_tool_call(
            &call("batch", json!({"urls": ["http://10.0.0.5/a"]})),
            &RunConfig::default(),
        )
        .await;
        assert!(!verdict.allowed);
    }

    #[tokio::test]
    async fn non_url_args_are_ignored() {
        let verdict = check_tool_call(
            &call("crawl", json!({"query": "http://192.168.1.1"})),
            &RunConfig::default(),
        )
        .await;
        assert!(verdict.allowed);
    }

    #[tokio::test]
    async fn domain_allowlist_applies_to_fetch() {
        let config = RunConfig {
            allowed_domains: vec!["example.com".into()],
            block_private_ranges: false,
            ..RunConfig::default()
        };
        assert!(check_fetch_url("https://docs.example.com/x", &config).await.allowed);
        assert!(!check_fetch_url("https://other.org/x", &config).await.allowed);
    }
}
