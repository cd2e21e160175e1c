//! Ghost protocol: vision-based fallback for anti-bot blocked pages.
//!
//! When DOM extraction is blocked, screenshot the rendered page and read the
//! pixels with a vision-capable model. Anti-bot detection watches the DOM;
//! it cannot watch a screenshot. If the live page turns out to render real
//! DOM content after all, the cheaper DOM markdown is preferred.

use std::time::{Duration, Instant};

use chromiumoxide::cdp::browser_protocol::page::{CaptureScreenshotFormat, CaptureScreenshotParams};
use serde::{Deserialize, Serialize};

use wr_providers::{LlmAdapter, VisionDetail};

use crate::markdown::html_to_markdown;
use crate::pool::BrowserPool;
use crate::quality::strip_markdown_noise;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Block detection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Categorized anti-bot block signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockSignal {
    CloudflareChallenge,
    Captcha,
    SessionVerification,
    AccessDenied,
    BotChallenge,
    EmptySpaShell,
    Http403,
    Http429,
    Http503,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BlockDetection {
    pub blocked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<BlockSignal>,
    pub reason: String,
    pub captcha_detected: bool,
    pub confidence: f64,
}

impl BlockDetection {
    fn hit(signal: BlockSignal, reason: impl Into<String>, confidence: f64) -> Self {
        Self {
            blocked: true,
            signal: Some(signal),
            reason: reason.into(),
            captcha_detected: signal == BlockSignal::Captcha,
            confidence,
        }
    }
}

/// Phrases that indicate anti-bot blocking, ordered by specificity.
const BLOCK_PATTERNS: &[(&str, BlockSignal, f64)] = &[
    ("cloudflare", BlockSignal::CloudflareChallenge, 0.95),
    ("verify your session", BlockSignal::SessionVerification, 0.9),
    ("captcha", BlockSignal::Captcha, 0.95),
    ("recaptcha", BlockSignal::Captcha, 0.95),
    ("hcaptcha", BlockSignal::Captcha, 0.95),
    ("access denied", BlockSignal::AccessDenied, 0.8),
    ("just a moment", BlockSignal::BotChallenge, 0.85),
    ("are you human", BlockSignal::BotChallenge, 0.9),
    ("attention required", BlockSignal::BotChallenge, 0.85),
    ("checking your browser", BlockSignal::BotChallenge, 0.9),
    ("please wait while we verify", BlockSignal::BotChallenge, 0.9),
    ("enable javascript and cookies", BlockSignal::BotChallenge, 0.8),
];

const EMPTY_SHELL_CHAR_THRESHOLD: usize = 200;
const EMPTY_SHELL_WORD_THRESHOLD: usize = 30;

/// Analyze crawl output for anti-bot block signals.
pub fn detect_block(
    html: &str,
    markdown: &str,
    status_code: Option<u16>,
    body_char_count: usize,
    body_word_count: usize,
) -> BlockDetection {
    let combined = format!("{}\n{}", html.to_lowercase(), markdown.to_lowercase());

    for (phrase, signal, confidence) in BLOCK_PATTERNS {
        if combined.contains(phrase) {
            return BlockDetection::hit(*signal, format!("detected '{phrase}' in page content"), *confidence);
        }
    }

    match status_code {
        Some(403) => return BlockDetection::hit(BlockSignal::Http403, "HTTP 403 Forbidden", 0.7),
        Some(429) => return BlockDetection::hit(BlockSignal::Http429, "HTTP 429 Too Many Requests", 0.8),
        Some(503) => {
            return BlockDetection::hit(
                BlockSignal::Http503,
                "HTTP 503 Service Unavailable (common anti-bot response)",
                0.75,
            )
        }
        _ => {}
    }

    // JS-heavy shell with almost no text content.
    if body_char_count < EMPTY_SHELL_CHAR_THRESHOLD
        && body_word_count < EMPTY_SHELL_WORD_THRESHOLD
        && !html.is_empty()
        && html.len() > 500
    {
        return BlockDetection::hit(
            BlockSignal::EmptySpaShell,
            "empty SPA shell: HTML present but minimal text content",
            0.6,
        );
    }

    BlockDetection::default()
}

/// Whether to activate the ghost protocol for a detection.
///
/// Conservative: disabled ghost, unblocked pages, and low-confidence
/// access-denied signals (an authn failure, not anti-bot) never trigger.
pub fn should_trigger_ghost(detection: &BlockDetection, ghost_enabled: bool, auto_trigger: bool) -> bool {
    if !ghost_enabled || !auto_trigger || !detection.blocked {
        return false;
    }
    if detection.signal == Some(BlockSignal::AccessDenied) && detection.confidence < 0.85 {
        return false;
    }
    true
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Screenshot capture
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const RENDER_SETTLE: Duration = Duration::from_secs(2);
const MIN_DOM_MARKDOWN_CHARS: usize = 200;

#[derive(Debug)]
struct GhostCapture {
    image_bytes: Vec<u8>,
    dom_markdown: Option<String>,
    capture_ms: u64,
}

async fn capture(pool: &BrowserPool, url: &str, timeout_s: u64) -> Result<GhostCapture, String> {
    let start = Instant::now();
    let session_id = format!("ghost-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);

    let Some(lease) = pool.acquire(&session_id).await else {
        return Err("browser pool saturated".into());
    };

    let result = async {
        tokio::time::timeout(Duration::from_secs(timeout_s), lease.page.goto(url))
            .await
            .map_err(|_| format!("navigation timeout after {timeout_s}s"))?
            .map_err(|e| format!("navigation failed: {e}"))?;
        let _ = lease.page.wait_for_navigation().await;
        // Challenge pages animate in; let the render settle.
        tokio::time::sleep(RENDER_SETTLE).await;

        let dom_markdown = match lease.page.content().await {
            Ok(html) if !html.is_empty() => Some(html_to_markdown(&html)),
            _ => None,
        };

        let params = CaptureScreenshotParams {
            format: Some(CaptureScreenshotFormat::Png),
            capture_beyond_viewport: Some(true),
            ..Default::default()
        };
        let image_bytes = lease
            .page
            .screenshot(params)
            .await
            .map_err(|e| format!("screenshot failed: {e}"))?;

        Ok(GhostCapture {
            image_bytes,
            dom_markdown,
            capture_ms: start.elapsed().as_millis() as u64,
        })
    }
    .await;

    pool.release(&lease).await;
    result
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Vision extraction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub const GHOST_EXTRACTION_PROMPT: &str = "You are extracting readable text content from a screenshot of a web page.

The page may show an anti-bot challenge, CAPTCHA, or the actual content behind it.

Instructions:
1. If you can see actual page content (articles, text, data), extract ALL of it faithfully.
2. If you see an anti-bot challenge or CAPTCHA page, describe what you see and note that the content is blocked.
3. Preserve the structure: use headings, lists, and paragraphs as they appear visually.
4. Do NOT add commentary or analysis — just extract what you see on the page.
5. If there are tables, reproduce them in markdown table format.
6. If there are images with alt text or captions, note them in brackets like [Image: description].

Extract the content now:";

/// Indicators that the extracted text describes a challenge page rather
/// than real content.
const BLOCKED_CONTENT_INDICATORS: &[&str] = &[
    "anti-bot",
    "captcha",
    "challenge",
    "verify you are human",
    "access denied",
    "please complete the security check",
];

pub(crate) fn extraction_looks_blocked(text: &str) -> bool {
    let lowered = text.to_lowercase();
    BLOCKED_CONTENT_INDICATORS.iter().any(|i| lowered.contains(i))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Full pipeline
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Complete result of a ghost extraction.
#[derive(Debug, Clone, Serialize)]
pub struct GhostResult {
    pub success: bool,
    pub url: String,
    pub content: String,
    /// "ghost" (vision) or "ghost_dom" (the DOM was readable after all).
    pub render_mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_signal: Option<BlockSignal>,
    pub block_reason: String,
    pub capture_ms: u64,
    pub extraction_ms: u64,
    pub total_ms: u64,
    pub provider: String,
    pub blocked_content: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GhostResult {
    fn failure(url: &str, detection: Option<&BlockDetection>, capture_ms: u64, total_ms: u64, error: String) -> Self {
        Self {
            success: false,
            url: url.to_string(),
            content: String::new(),
            render_mode: "ghost".into(),
            block_signal: detection.and_then(|d| d.signal),
            block_reason: detection.map(|d| d.reason.clone()).unwrap_or_default(),
            capture_ms,
            extraction_ms: 0,
            total_ms,
            provider: String::new(),
            blocked_content: false,
            error: Some(error),
        }
    }
}

/// Screenshot → (DOM markdown shortcut) → vision extract.
pub async fn run_ghost_protocol(
    url: &str,
    pool: &BrowserPool,
    provider: &dyn LlmAdapter,
    timeout_s: u64,
    prompt: Option<&str>,
    detection: Option<&BlockDetection>,
) -> GhostResult {
    let pipeline_start = Instant::now();
    tracing::info!(url, "ghost protocol activated");

    let capture = match capture(pool, url, timeout_s).await {
        Ok(c) => c,
        Err(err) => {
            let total_ms = pipeline_start.elapsed().as_millis() as u64;
            return GhostResult::failure(url, detection, 0, total_ms, format!("screenshot capture failed: {err}"));
        }
    };

    // Prefer the DOM markdown when the live page renders real content —
    // no vision bill for pages that unblocked themselves.
    if let Some(dom_markdown) = &capture.dom_markdown {
        let body = strip_markdown_noise(dom_markdown);
        let blocked = detect_block(
            "",
            dom_markdown,
            None,
            body.chars().count(),
            body.split_whitespace().count(),
        );
        if !blocked.blocked && body.chars().count() > MIN_DOM_MARKDOWN_CHARS {
            let total_ms = pipeline_start.elapsed().as_millis() as u64;
            return GhostResult {
                success: true,
                url: url.to_string(),
                content: dom_markdown.clone(),
                render_mode: "ghost_dom".into(),
                block_signal: detection.and_then(|d| d.signal),
                block_reason: detection.map(|d| d.reason.clone()).unwrap_or_default(),
                capture_ms: capture.capture_ms,
                extraction_ms: 0,
                total_ms,
                provider: "dom_markdown".into(),
                blocked_content: false,
                error: None,
            };
        }
    }

    let extraction_start = Instant::now();
    let extracted = provider
        .vision(
            &capture.image_bytes,
            prompt.unwrap_or(GHOST_EXTRACTION_PROMPT),
            VisionDetail::High,
        )
        .await;
    let extraction_ms = extraction_start.elapsed().as_millis() as u64;
    let total_ms = pipeline_start.elapsed().as_millis() as u64;

    match extracted {
        Ok(content) => {
            let blocked_content = extraction_looks_blocked(&content);
            tracing::info!(
                url,
                chars = content.len(),
                total_ms,
                capture_ms = capture.capture_ms,
                extraction_ms,
                "ghost protocol complete"
            );
            GhostResult {
                success: true,
                url: url.to_string(),
                content,
                render_mode: "ghost".into(),
                block_signal: detection.and_then(|d| d.signal),
                block_reason: detection.map(|d| d.reason.clone()).unwrap_or_default(),
                capture_ms: capture.capture_ms,
                extraction_ms,
                total_ms,
                provider: provider.name().to_string(),
                blocked_content,
                error: None,
            }
        }
        Err(err) => {
            let mut result = GhostResult::failure(
                url,
                detection,
                capture.capture_ms,
                total_ms,
                format!("vision extraction failed: {err}"),
            );
            result.extraction_ms = extraction_ms;
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocked_detection(signal: BlockSignal, confidence: f64) -> BlockDetection {
        BlockDetection {
            blocked: true,
            signal: Some(signal),
            reason: "test".into(),
            captcha_detected: false,
            confidence,
        }
    }

    #[test]
    fn block_phrases_map_to_signals() {
        let d = detect_block("<html>just a moment</html>", "", Some(200), 500, 100);
        assert!(d.blocked);
        assert_eq!(d.signal, Some(BlockSignal::BotChallenge));

        let d = detect_block("<html>solve this CAPTCHA</html>", "", None, 500, 100);
        assert_eq!(d.signal, Some(BlockSignal::Captcha));
        assert!(d.captcha_detected);
    }

    #[test]
    fn blocking_status_codes_map_to_http_signals() {
        let page = format!("<html>{}</html>", "content word ".repeat(100));
        assert_eq!(
            detect_block(&page, "", Some(403), 1000, 200).signal,
            Some(BlockSignal::Http403)
        );
        assert_eq!(
            detect_block(&page, "", Some(429), 1000, 200).signal,
            Some(BlockSignal::Http429)
        );
        assert_eq!(
            detect_block(&page, "", Some(503), 1000, 200).signal,
            Some(BlockSignal::Http503)
        );
    }

    #[test]
    fn big_html_with_no_text_is_an_empty_shell() {
        let html = format!("<html><script>{}</script></html>", "app();".repeat(200));
        let d = detect_block(&html, "", Some(200), 10, 2);
        assert_eq!(d.signal, Some(BlockSignal::EmptySpaShell));
    }

    #[test]
    fn healthy_pages_are_not_blocked() {
        let page = format!("<html>{}</html>", "content word ".repeat(200));
        let d = detect_block(&page, "", Some(200), 2000, 400);
        assert!(!d.blocked);
        assert!(d.signal.is_none());
    }

    #[test]
    fn ghost_never_triggers_when_disabled_or_unblocked() {
        let blocked = blocked_detection(BlockSignal::BotChallenge, 0.9);
        assert!(!should_trigger_ghost(&blocked, false, true));
        assert!(!should_trigger_ghost(&blocked, true, false));
        assert!(!should_trigger_ghost(&BlockDetection::default(), true, true));
        assert!(should_trigger_ghost(&blocked, true, true));
    }

    #[test]
    fn low_confidence_access_denied_does_not_trigger() {
        let authn = blocked_detection(BlockSignal::AccessDenied, 0.8);
        assert!(!should_trigger_ghost(&authn, true, true));

        let confident = blocked_detection(BlockSignal::AccessDenied, 0.9);
        assert!(should_trigger_ghost(&confident, true, true));
    }

    #[test]
    fn challenge_descriptions_flag_blocked_content() {
        assert!(extraction_looks_blocked("This page shows a CAPTCHA widget."));
        assert!(extraction_looks_blocked("Please complete the security check to continue"));
        assert!(!extraction_looks_blocked("Quarterly results rose 12% year over year."));
    }
}
