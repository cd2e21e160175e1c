//! Lightweight HTTP pre-check before paying for a browser.
//!
//! One realistic GET; the response classifies as either "usable content"
//! or "needs a browser". Network failures classify as needs-browser so an
//! outage can never short-circuit the real crawl path.

use std::time::Duration;

use serde::Serialize;

/// Markers that indicate the page needs a real browser.
const BROWSER_NEEDED_MARKERS: &[&str] = &[
    "cf-browser-verification",
    "cf-challenge-running",
    "challenge-platform",
    "_cf_chl",
    "managed-challenge",
    "<noscript>",
    "enable javascript",
    "browser check",
    "ddos-guard",
    "datadome",
];

const MIN_USABLE_CONTENT_LEN: usize = 1024;
const MARKER_SCAN_PREFIX: usize = 5_000;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.6367.60 Safari/537.36";

/// Result of an HTTP pre-check.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PrecheckResult {
    pub url: String,
    pub success: bool,
    /// Defaults to true — the safe fallback.
    pub needs_browser: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip)]
    pub content: String,
    pub content_length: usize,
    #[serde(skip_serializing_if = "std::collections::HashMap::is_empty")]
    pub headers: std::collections::HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Populated when the content is directly usable without a browser.
    #[serde(skip)]
    pub usable_content: Option<String>,
}

impl PrecheckResult {
    fn failed(url: &str, error: impl Into<String>) -> Self {
        Self {
            url: url.to_string(),
            needs_browser: true,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Heuristic: does this response need a full browser to get real content?
pub fn needs_browser(status_code: Option<u16>, content: &str, content_length: usize) -> bool {
    if matches!(status_code, Some(403) | Some(503)) {
        return true;
    }

    // Very short responses are often challenge/redirect pages.
    if content_length < MIN_USABLE_CONTENT_LEN {
        return true;
    }

    let prefix: String = content.chars().take(MARKER_SCAN_PREFIX).collect::<String>().to_lowercase();
    BROWSER_NEEDED_MARKERS.iter().any(|m| prefix.contains(m))
}

/// Perform the pre-check GET. Browser-grade headers; follows redirects.
pub async fn http_precheck(url: &str, timeout_s: u64) -> PrecheckResult {
    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_s))
        .redirect(reqwest::redirect::Policy::limited(10))
        .user_agent(USER_AGENT)
        .build()
    {
        Ok(c) => c,
        Err(e) => return PrecheckResult::failed(url, e.to_string()),
    };

    let response = client
        .get(url)
        .header(
            "Accept",
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
        )
        .header("Accept-Language", "en-US,en;q=0.9")
        .header("Referer", "https://www.google.com/")
        .send()
        .await;

    let response = match response {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(url, error = %e, "HTTP precheck failed");
            return PrecheckResult::failed(url, e.to_string());
        }
    };

    let status = response.status().as_u16();
    let headers: std::collections::HashMap<String, String> = response
        .headers()
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
        .collect();

    let content = match response.text().await {
        Ok(body) => body,
        Err(e) => return PrecheckResult::failed(url, e.to_string()),
    };

    let content_length = content.len();
    let browser = needs_browser(Some(status), &content, content_length);
    let usable_content = if !browser && content_length > MIN_USABLE_CONTENT_LEN {
        Some(content.clone())
    } else {
        None
    };

    PrecheckResult {
        url: url.to_string(),
        success: true,
        needs_browser: browser,
        status_code: Some(status),
        content,
        content_length,
        headers,
        error: None,
        usable_content,
    }
}
