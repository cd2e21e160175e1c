//! Cloudflare challenge detection and resolution on a live page.
//!
//! Three stages, in order: detect (title, selectors, content heuristic),
//! wait for auto-resolve (most invisible Turnstiles clear themselves), and
//! an external CapSolver fallback for Turnstile/managed challenges when an
//! API key is configured.

use std::time::{Duration, Instant};

use chromiumoxide::page::Page;
use serde::{Deserialize, Serialize};

pub const AUTO_WAIT_MS: u64 = 15_000;
pub const POLL_INTERVAL_MS: u64 = 500;
pub const CAPSOLVER_TIMEOUT_MS: u64 = 30_000;

/// Types of Cloudflare challenges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeType {
    Turnstile,
    JsChallenge,
    BrowserCheck,
    ManagedChallenge,
    None,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChallengeDetection {
    pub detected: bool,
    pub challenge_type: ChallengeType,
    pub confidence: f64,
    pub selector_matched: String,
}

impl ChallengeDetection {
    fn none() -> Self {
        Self {
            detected: false,
            challenge_type: ChallengeType::None,
            confidence: 0.0,
            selector_matched: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChallengeResult {
    pub resolved: bool,
    pub challenge_type: ChallengeType,
    /// "auto_resolve", "capsolver", or "none".
    pub method: String,
    pub wait_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Selectors that indicate a challenge is present.
const CHALLENGE_SELECTORS: &[(&str, ChallengeType)] = &[
    ("#challenge-running", ChallengeType::JsChallenge),
    ("#challenge-stage", ChallengeType::JsChallenge),
    (".cf-browser-verification", ChallengeType::BrowserCheck),
    ("iframe[src*=\"challenges.cloudflare.com\"]", ChallengeType::Turnstile),
    ("#turnstile-wrapper", ChallengeType::Turnstile),
    ("#cf-challenge-running", ChallengeType::ManagedChallenge),
    (".cf-turnstile", ChallengeType::Turnstile),
];

/// Selectors that indicate the challenge has been resolved.
const RESOLVED_SELECTORS: &[&str] = &["#challenge-success", "#challenge-stage[style*=\"display: none\"]"];

/// Title fragments that indicate a challenge page, localized.
const CHALLENGE_TITLE_PATTERNS: &[&str] = &[
    // English
    "just a moment",
    "attention required",
    "checking your browser",
    "please wait",
    "one more step",
    "verify you are human",
    // Portuguese
    "um momento",
    "verificação de segurança",
    // Spanish
    "un momento",
    "verificación de seguridad",
    // French
    "un instant",
    "vérification de sécurité",
    // German
    "einen moment",
    "sicherheitsüberprüfung",
];

const CONTENT_SIGNALS: &[&str] = &[
    "cloudflare",
    "cf-browser-verification",
    "ray id",
    "challenge-platform",
    "turnstile",
    "cf_chl_opt",
    "performance & security by",
];

const SMALL_PAGE_LIMIT: usize = 10_000;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pure helpers (unit-tested without a browser)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(crate) fn title_matches_challenge(title: &str) -> Option<&'static str> {
    let lowered = title.to_lowercase();
    CHALLENGE_TITLE_PATTERNS
        .iter()
        .find(|p| lowered.contains(*p))
        .copied()
}

/// Some Cloudflare configs use custom interstitials without the standard
/// selectors: a small page mentioning two or more CF signals is enough.
pub(crate) fn content_heuristic(content: &str) -> Option<Vec<&'static str>> {
    if content.len() >= SMALL_PAGE_LIMIT {
        return None;
    }
    let lowered = content.to_lowercase();
    let matched: Vec<&'static str> = CONTENT_SIGNALS
        .iter()
        .filter(|s| lowered.contains(*s))
        .copied()
        .collect();
    if matched.len() >= 2 {
        Some(matched)
    } else {
        None
    }
}

pub(crate) fn sitekey_from_iframe_src(src: &str) -> Option<String> {
    let after = src.split("sitekey=").nth(1)?;
    let key = after.split('&').next()?.to_string();
    if key.is_empty() {
        None
    } else {
        Some(key)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Detection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn selector_state(page: &Page, selector: &str) -> &'static str {
    let script = format!(
        r#"(() => {{
            const el = document.querySelector('{selector}');
            if (!el) return "none";
            const r = el.getBoundingClientRect();
            const s = window.getComputedStyle(el);
            const visible = r.width > 0 && r.height > 0
                && s.display !== "none" && s.visibility !== "hidden";
            return visible ? "visible" : "hidden";
        }})()"#
    );
    let state = match page.evaluate(script).await {
        Ok(result) => result.into_value::<String>().unwrap_or_else(|_| "none".into()),
        Err(_) => "none".into(),
    };
    match state.as_str() {
        "visible" => "visible",
        "hidden" => "hidden",
        _ => "none",
    }
}

/// Detect whether a Cloudflare challenge is present on the page.
pub async fn detect_challenge(page: &Page) -> ChallengeDetection {
    // Title first — fast.
    if let Ok(Some(title)) = page.get_title().await {
        if let Some(pattern) = title_matches_challenge(&title) {
            return ChallengeDetection {
                detected: true,
                challenge_type: ChallengeType::JsChallenge,
                confidence: 0.9,
                selector_matched: format!("title:{pattern}"),
            };
        }
    }

    // DOM selectors. Visible matches carry higher confidence.
    for (selector, challenge_type) in CHALLENGE_SELECTORS {
        match selector_state(page, selector).await {
            "visible" => {
                return ChallengeDetection {
                    detected: true,
                    challenge_type: *challenge_type,
                    confidence: 0.95,
                    selector_matched: selector.to_string(),
                }
            }
            "hidden" => {
                return ChallengeDetection {
                    detected: true,
                    challenge_type: *challenge_type,
                    confidence: 0.7,
                    selector_matched: selector.to_string(),
                }
            }
            _ => {}
        }
    }

    // Content heuristic for custom interstitials.
    if let Ok(content) = page.content().await {
        if let Some(matched) = content_heuristic(&content) {
            tracing::info!(signals = ?matched, "challenge detected via content heuristic");
            return ChallengeDetection {
                detected: true,
                challenge_type: ChallengeType::ManagedChallenge,
                confidence: 0.8,
                selector_matched: format!("content_heuristic:{}", matched[..matched.len().min(3)].join(",")),
            };
        }
    }

    ChallengeDetection::none()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Auto-resolve wait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Poll until the challenge disappears or a resolved marker shows up.
pub async fn wait_for_auto_resolve(page: &Page, timeout_ms: u64) -> ChallengeResult {
    let detection = detect_challenge(page).await;
    if !detection.detected {
        return ChallengeResult {
            resolved: true,
            challenge_type: ChallengeType::None,
            method: "none".into(),
            wait_time_ms: 0,
            error: None,
        };
    }

    let start = Instant::now();
    loop {
        tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
        let elapsed = start.elapsed().as_millis() as u64;

        let current = detect_challenge(page).await;
        if !current.detected {
            return ChallengeResult {
                resolved: true,
                challenge_type: detection.challenge_type,
                method: "auto_resolve".into(),
                wait_time_ms: elapsed,
                error: None,
            };
        }

        for selector in RESOLVED_SELECTORS {
            if selector_state(page, selector).await != "none" {
                return ChallengeResult {
                    resolved: true,
                    challenge_type: detection.challenge_type,
                    method: "auto_resolve".into(),
                    wait_time_ms: elapsed,
                    error: None,
                };
            }
        }

        if elapsed >= timeout_ms {
            return ChallengeResult {
                resolved: false,
                challenge_type: detection.challenge_type,
                method: "none".into(),
                wait_time_ms: elapsed,
                error: Some(format!("challenge auto-resolve timeout after {timeout_ms}ms")),
            };
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CapSolver fallback (Turnstile only)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn extract_turnstile_sitekey(page: &Page) -> Option<String> {
    let script = r#"(() => {
        for (const sel of ['.cf-turnstile[data-sitekey]', 'div[data-turnstile-sitekey]']) {
            const el = document.querySelector(sel);
            if (el) {
                const key = el.getAttribute('data-sitekey') || el.getAttribute('data-turnstile-sitekey');
                if (key) return key;
            }
        }
        const iframe = document.querySelector('iframe[src*="challenges.cloudflare.com"]');
        if (iframe && iframe.src) return "src:" + iframe.src;
        return "";
    })()"#;

    let value: String = page
        .evaluate(script)
        .await
        .ok()?
        .into_value()
        .ok()?;
    if value.is_empty() {
        None
    } else if let Some(src) = value.strip_prefix("src:") {
        sitekey_from_iframe_src(src)
    } else {
        Some(value)
    }
}

async fn call_capsolver(
    api_key: &str,
    site_url: &str,
    sitekey: &str,
    timeout_ms: u64,
) -> Option<String> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .ok()?;

    let create: serde_json::Value = client
        .post("https://api.capsolver.com/createTask")
        .json(&serde_json::json!({
            "clientKey": api_key,
            "task": {
                "type": "AntiTurnstileTaskProxyLess",
                "websiteURL": site_url,
                "websiteKey": sitekey,
            },
        }))
        .send()
        .await
        .ok()?
        .json()
        .await
        .ok()?;

    if create["errorId"].as_i64().unwrap_or(1) != 0 {
        tracing::warn!(error = ?create["errorDescription"], "capsolver create error");
        return None;
    }
    let task_id = create["taskId"].as_str()?.to_string();

    let mut elapsed: u64 = 0;
    while elapsed < timeout_ms {
        tokio::time::sleep(Duration::from_secs(3)).await;
        elapsed += 3_000;

        let result: serde_json::Value = client
            .post("https://api.capsolver.com/getTaskResult")
            .json(&serde_json::json!({"clientKey": api_key, "taskId": task_id}))
            .send()
            .await
            .ok()?
            .json()
            .await
            .ok()?;

        match result["status"].as_str() {
            Some("ready") => return result["solution"]["token"].as_str().map(str::to_string),
            Some("failed") => {
                tracing::warn!(error = ?result["errorDescription"], "capsolver task failed");
                return None;
            }
            _ => {}
        }
    }

    tracing::warn!(timeout_ms, "capsolver timeout");
    None
}

/// Inject the solved token into the page and trigger Cloudflare's callback.
async fn inject_turnstile_token(page: &Page, token: &str) {
    let script = format!(
        r#"(() => {{
            const inputs = document.querySelectorAll('input[name="cf-turnstile-response"]');
            inputs.forEach(input => {{ input.value = '{token}'; }});

            const widgets = document.querySelectorAll('.cf-turnstile, [data-turnstile-sitekey]');
            for (const w of widgets) {{
                const cb = w.getAttribute('data-callback');
                if (cb && typeof window[cb] === 'function') {{
                    window[cb]('{token}');
                }}
            }}

            inputs.forEach(input => {{
                input.dispatchEvent(new Event('input', {{ bubbles: true }}));
                input.dispatchEvent(new Event('change', {{ bubbles: true }}));
            }});
        }})()"#
    );
    if let Err(err) = page.evaluate(script).await {
        tracing::warn!(error = %err, "turnstile token injection failed");
    }
}

/// Attempt to solve a Turnstile via the CapSolver API.
pub async fn solve_turnstile_capsolver(
    page: &Page,
    site_url: &str,
    api_key: Option<&str>,
    timeout_ms: u64,
) -> ChallengeResult {
    let Some(key) = api_key else {
        tracing::warn!("CAPSOLVER_API_KEY not configured, external solver disabled");
        return ChallengeResult {
            resolved: false,
            challenge_type: ChallengeType::Turnstile,
            method: "none".into(),
            wait_time_ms: 0,
            error: Some("CAPSOLVER_API_KEY not configured".into()),
        };
    };

    let start = Instant::now();
    let result = |resolved, method: &str, error: Option<String>| ChallengeResult {
        resolved,
        challenge_type: ChallengeType::Turnstile,
        method: method.into(),
        wait_time_ms: start.elapsed().as_millis() as u64,
        error,
    };

    let Some(sitekey) = extract_turnstile_sitekey(page).await else {
        return result(false, "none", Some("could not extract Turnstile sitekey".into()));
    };

    let Some(token) = call_capsolver(key, site_url, &sitekey, timeout_ms).await else {
        return result(false, "capsolver", Some("CapSolver failed to return token".into()));
    };

    inject_turnstile_token(page, &token).await;
    tokio::time::sleep(Duration::from_secs(2)).await;

    let current = detect_challenge(page).await;
    if current.detected {
        result(false, "capsolver", Some("token injected but challenge still present".into()))
    } else {
        result(true, "capsolver", None)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Full pipeline
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Detect → auto-resolve wait → CapSolver (Turnstile/managed only).
pub async fn resolve_challenge(
    page: &Page,
    site_url: &str,
    capsolver_api_key: Option<&str>,
) -> ChallengeResult {
    let detection = detect_challenge(page).await;
    if !detection.detected {
        return ChallengeResult {
            resolved: true,
            challenge_type: ChallengeType::None,
            method: "none".into(),
            wait_time_ms: 0,
            error: None,
        };
    }

    tracing::info!(
        challenge_type = ?detection.challenge_type,
        confidence = detection.confidence,
        selector = %detection.selector_matched,
        "challenge detected"
    );

    let auto = wait_for_auto_resolve(page, AUTO_WAIT_MS).await;
    if auto.resolved {
        tracing::info!(wait_ms = auto.wait_time_ms, "challenge auto-resolved");
        return auto;
    }

    // Managed challenges often embed Turnstile under the hood.
    if matches!(
        detection.challenge_type,
        ChallengeType::Turnstile | ChallengeType::ManagedChallenge
    ) {
        let solved =
            solve_turnstile_capsolver(page, site_url, capsolver_api_key, CAPSOLVER_TIMEOUT_MS).await;
        if solved.resolved {
            return ChallengeResult {
                resolved: true,
                challenge_type: ChallengeType::Turnstile,
                method: "capsolver".into(),
                wait_time_ms: auto.wait_time_ms + solved.wait_time_ms,
                error: None,
            };
        }
    }

    ChallengeResult {
        resolved: false,
        challenge_type: detection.challenge_type,
        method: "none".into(),
        wait_time_ms: auto.wait_time_ms,
        error: auto.error.or(Some("challenge not resolved".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn localized_titles_match() {
        assert!(title_matches_challenge("Just a moment...").is_some());
        assert!(title_matches_challenge("Um momento — verificação").is_some());
        assert!(title_matches_challenge("Sicherheitsüberprüfung läuft").is_some());
        assert!(title_matches_challenge("Example Shop — Winter Sale").is_none());
    }

    #[test]
    fn small_pages_with_two_signals_trip_the_heuristic() {
        let page = "<html>checking... cloudflare ray id: abc</html>";
        assert!(content_heuristic(page).is_some());

        let one_signal = "<html>cloudflare mentioned once</html>";
        assert!(content_heuristic(one_signal).is_none());
    }

    #[test]
    fn big_pages_never_trip_the_heuristic() {
        let page = format!("<html>cloudflare ray id {}</html>", "x".repeat(SMALL_PAGE_LIMIT));
        assert!(content_heuristic(&page).is_none());
    }

    #[test]
    fn sitekey_parses_from_iframe_query() {
        let src = "https://challenges.cloudflare.com/turnstile?sitekey=0x4AAA&theme=light";
        assert_eq!(sitekey_from_iframe_src(src).as_deref(), Some("0x4AAA"));
        assert!(sitekey_from_iframe_src("https://challenges.cloudflare.com/x").is_none());
    }
}
