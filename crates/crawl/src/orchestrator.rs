//! Crawl orchestration: four escalating stages from cheap GET to vision.
//!
//! precheck → browser fetch → challenge resolution → extraction, with a
//! ghost escalation when the extracted content classifies as blocked. A
//! total-budget deadline (minus a safety margin) can cut escalation short.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chromiumoxide::cdp::browser_protocol::network::{CookieParam, SetCookiesParams};
use chromiumoxide::page::Page;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

use wr_domain::settings::Settings;
use wr_policy::injection::analyze_hidden_injection;
use wr_providers::LlmAdapter;

use crate::challenge::{resolve_challenge, ChallengeResult};
use crate::cookies::CookieStore;
use crate::ghost::{detect_block, run_ghost_protocol, should_trigger_ghost, BlockDetection};
use crate::markdown::html_to_markdown;
use crate::pool::{BrowserPool, Lease};
use crate::precheck::http_precheck;
use crate::quality::{
    assess_content_quality, block_phrase_is_false_positive, strip_markdown_noise, ContentQuality,
};

/// Remaining-budget margin below which escalation stops.
const BUDGET_SAFETY_MARGIN: Duration = Duration::from_secs(5);

const NETWORK_IDLE_GRACE: Duration = Duration::from_millis(500);
const SELECTOR_POLL_INTERVAL: Duration = Duration::from_millis(250);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Options and result
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitStrategy {
    #[default]
    Domcontentloaded,
    Networkidle,
    Selector,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CrawlOptions {
    pub session_id: Option<String>,
    #[serde(default)]
    pub wait_strategy: WaitStrategy,
    /// Required when `wait_strategy` is `selector`.
    pub wait_selector: Option<String>,
    #[serde(default)]
    pub wait_after_load_ms: u64,
    pub javascript_payload: Option<String>,
    /// Navigation timeout override, seconds.
    pub timeout_s: Option<u64>,
    /// Total-budget deadline from the client, milliseconds.
    pub budget_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CrawlResult {
    pub success: bool,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub markdown: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_quality: Option<ContentQuality>,
    pub blocked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_reason: Option<String>,
    pub captcha_detected: bool,
    /// Hidden instruction text found in the extraction but not the visible
    /// rendering. Content is kept but must never feed back into an LLM.
    pub quarantined: bool,
    pub render_mode: String,
    pub wait_strategy: WaitStrategy,
    pub body_char_count: usize,
    pub body_word_count: usize,
    pub challenge_detected: bool,
    pub challenge_resolved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenge_method: Option<String>,
    pub challenge_wait_ms: u64,
    pub timings_ms: HashMap<String, u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CrawlResult {
    fn new(url: &str, wait_strategy: WaitStrategy) -> Self {
        Self {
            success: false,
            url: url.to_string(),
            final_url: None,
            title: None,
            html: None,
            markdown: None,
            status_code: None,
            content_quality: None,
            blocked: false,
            block_reason: None,
            captcha_detected: false,
            quarantined: false,
            render_mode: "html".into(),
            wait_strategy,
            body_char_count: 0,
            body_word_count: 0,
            challenge_detected: false,
            challenge_resolved: false,
            challenge_method: None,
            challenge_wait_ms: 0,
            timings_ms: HashMap::new(),
            error: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Crawler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Crawler {
    settings: Arc<Settings>,
    pool: Arc<BrowserPool>,
    cookies: Arc<CookieStore>,
    /// Vision provider for the ghost fallback. `None` disables ghost.
    provider: Option<Arc<dyn LlmAdapter>>,
}

impl Crawler {
    pub fn new(
        settings: Arc<Settings>,
        pool: Arc<BrowserPool>,
        cookies: Arc<CookieStore>,
        provider: Option<Arc<dyn LlmAdapter>>,
    ) -> Self {
        Self {
            settings,
            pool,
            cookies,
            provider,
        }
    }

    pub fn pool(&self) -> &Arc<BrowserPool> {
        &self.pool
    }

    /// Crawl one URL through the escalation pipeline.
    pub async fn crawl(&self, url: &str, options: &CrawlOptions) -> CrawlResult {
        let total_start = Instant::now();
        let deadline = options
            .budget_ms
            .map(|ms| Instant::now() + Duration::from_millis(ms));
        let mut result = CrawlResult::new(url, options.wait_strategy);

        // ── Stage 1: HTTP precheck ────────────────────────────────
        let mut precheck_status: Option<u16> = None;
        if self.settings.precheck.enabled {
            let stage = Instant::now();
            let pre = http_precheck(url, self.settings.precheck.timeout_s).await;
            result
                .timings_ms
                .insert("precheck".into(), stage.elapsed().as_millis() as u64);
            precheck_status = pre.status_code;

            if let Some(content) = pre.usable_content {
                return self.finish_html_only(result, url, content, pre.status_code, total_start);
            }
        }

        if budget_exhausted(deadline) {
            result.error = Some("request budget exhausted before browser fetch".into());
            result
                .timings_ms
                .insert("total".into(), total_start.elapsed().as_millis() as u64);
            return result;
        }

        // ── Stage 2: browser fetch ────────────────────────────────
        let session_id = options
            .session_id
            .clone()
            .unwrap_or_else(|| format!("crawl-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]));
        let Some(lease) = self.pool.acquire(&session_id).await else {
            result.error = Some("browser pool saturated".into());
            return result;
        };

        let browser_start = Instant::now();
        let fetched = self.fetch_with_browser(&lease, url, options, deadline).await;
        result
            .timings_ms
            .insert("browser".into(), browser_start.elapsed().as_millis() as u64);

        let fetched = match fetched {
            Ok(f) => f,
            Err(err) => {
                self.pool.release(&lease).await;
                result.error = Some(err);
                result
                    .timings_ms
                    .insert("total".into(), total_start.elapsed().as_millis() as u64);
                return result;
            }
        };
        self.pool.release(&lease).await;

        result.challenge_detected = fetched.challenge.as_ref().map_or(false, |c| c.wait_time_ms > 0 || !c.resolved);
        if let Some(challenge) = &fetched.challenge {
            result.challenge_resolved = challenge.resolved;
            result.challenge_method = Some(challenge.method.clone());
            result.challenge_wait_ms = challenge.wait_time_ms;
            result.timings_ms.insert("challenge".into(), challenge.wait_time_ms);
        }
        result.final_url = fetched.final_url;
        result.title = fetched.title;
        result.status_code = precheck_status;

        // ── Stage 4: extraction + classification ──────────────────
        let markdown_start = Instant::now();
        let markdown = html_to_markdown(&fetched.html);
        result
            .timings_ms
            .insert("markdown".into(), markdown_start.elapsed().as_millis() as u64);

        let body = strip_markdown_noise(&markdown);
        result.body_char_count = body.chars().count();
        result.body_word_count = body.split_whitespace().count();

        let mut detection = detect_block(
            &fetched.html,
            &markdown,
            result.status_code,
            result.body_char_count,
            result.body_word_count,
        );
        let phrase_guard = detection.blocked
            && detection.signal.map_or(false, |s| !matches!(s, crate::ghost::BlockSignal::Http403 | crate::ghost::BlockSignal::Http429 | crate::ghost::BlockSignal::Http503))
            && block_phrase_is_false_positive(&fetched.html, &markdown);
        if phrase_guard {
            detection = BlockDetection::default();
        }

        let mut assessment = assess_content_quality(&markdown, result.status_code, detection.blocked);
        if assessment.quality == ContentQuality::Blocked && phrase_guard {
            assessment.quality = ContentQuality::Sufficient;
            assessment.reason = "block phrase overridden by size guard".into();
        }

        // Hidden-text prompt-injection guard.
        if let Some(visible) = &fetched.visible_text {
            let analysis = analyze_hidden_injection(&body, visible);
            result.quarantined = analysis.quarantined;
            if analysis.quarantined {
                tracing::warn!(url, reason = ?analysis.quarantine_reason, "crawl result quarantined");
            }
        }

        result.blocked = detection.blocked;
        result.block_reason = detection.blocked.then(|| detection.reason.clone());
        result.captcha_detected = detection.captcha_detected;
        result.content_quality = Some(assessment.quality);
        result.html = Some(fetched.html);
        result.markdown = Some(markdown);
        result.render_mode = "html".into();

        // ── Ghost escalation ──────────────────────────────────────
        if assessment.quality == ContentQuality::Blocked
            && should_trigger_ghost(
                &detection,
                self.settings.ghost.enabled,
                self.settings.ghost.auto_trigger,
            )
            && !budget_exhausted(deadline)
        {
            if let Some(provider) = &self.provider {
                let ghost_start = Instant::now();
                let ghost = run_ghost_protocol(
                    url,
                    &self.pool,
                    provider.as_ref(),
                    options.timeout_s.unwrap_or(self.settings.crawl.timeout_s),
                    None,
                    Some(&detection),
                )
                .await;
                result
                    .timings_ms
                    .insert("ghost".into(), ghost_start.elapsed().as_millis() as u64);

                if ghost.success {
                    result.render_mode = ghost.render_mode.clone();
                    result.markdown = Some(ghost.content);
                    result.success = true;
                    result
                        .timings_ms
                        .insert("total".into(), total_start.elapsed().as_millis() as u64);
                    return result;
                }
                result.error = ghost.error;
            }
        }

        result.success = assessment.quality != ContentQuality::Blocked;
        result
            .timings_ms
            .insert("total".into(), total_start.elapsed().as_millis() as u64);
        result
    }

    /// Crawl many URLs with bounded concurrency, results in input order.
    pub async fn crawl_many(
        &self,
        urls: &[String],
        options: &CrawlOptions,
        concurrency: usize,
    ) -> Vec<CrawlResult> {
        let futures: Vec<std::pin::Pin<Box<dyn std::future::Future<Output = CrawlResult> + Send + '_>>> =
            urls.iter().map(|url| Box::pin(self.crawl(url, options)) as _).collect();
        futures_util::stream::iter(futures)
            .buffered(concurrency.max(1))
            .collect()
            .await
    }

    // ── Internals ─────────────────────────────────────────────────

    fn finish_html_only(
        &self,
        mut result: CrawlResult,
        url: &str,
        content: String,
        status_code: Option<u16>,
        total_start: Instant,
    ) -> CrawlResult {
        let markdown_start = Instant::now();
        let markdown = html_to_markdown(&content);
        result
            .timings_ms
            .insert("markdown".into(), markdown_start.elapsed().as_millis() as u64);

        let body = strip_markdown_noise(&markdown);
        result.body_char_count = body.chars().count();
        result.body_word_count = body.split_whitespace().count();
        let assessment = assess_content_quality(&markdown, status_code, false);

        result.success = true;
        result.url = url.to_string();
        result.status_code = status_code;
        result.content_quality = Some(assessment.quality);
        result.html = Some(content);
        result.markdown = Some(markdown);
        result.render_mode = "html_only".into();
        result
            .timings_ms
            .insert("total".into(), total_start.elapsed().as_millis() as u64);
        result
    }

    async fn fetch_with_browser(
        &self,
        lease: &Lease,
        url: &str,
        options: &CrawlOptions,
        deadline: Option<Instant>,
    ) -> Result<FetchedPage, String> {
        let page = &lease.page;
        let timeout_s = options.timeout_s.unwrap_or(self.settings.crawl.timeout_s);

        self.load_cookies(page, url).await;

        tokio::time::timeout(Duration::from_secs(timeout_s), page.goto(url))
            .await
            .map_err(|_| format!("navigation timeout after {timeout_s}s"))?
            .map_err(|e| format!("navigation failed: {e}"))?;
        self.pool.note_navigation(&lease.slot_id, url).await;

        match options.wait_strategy {
            WaitStrategy::Domcontentloaded => {
                let _ = page.wait_for_navigation().await;
            }
            WaitStrategy::Networkidle => {
                let _ = page.wait_for_navigation().await;
                tokio::time::sleep(NETWORK_IDLE_GRACE).await;
            }
            WaitStrategy::Selector => {
                if let Some(selector) = &options.wait_selector {
                    wait_for_selector(page, selector, Duration::from_secs(timeout_s)).await;
                }
            }
        }

        if let Some(payload) = &options.javascript_payload {
            if let Err(err) = page.evaluate(payload.as_str()).await {
                tracing::warn!(url, error = %err, "javascript payload failed");
            }
        }

        if options.wait_after_load_ms > 0 {
            tokio::time::sleep(Duration::from_millis(options.wait_after_load_ms)).await;
        }

        // ── Stage 3: challenge resolution ─────────────────────────
        let challenge = if budget_exhausted(deadline) {
            None
        } else {
            let outcome = resolve_challenge(
                page,
                url,
                self.settings.challenge.capsolver_api_key.as_deref(),
            )
            .await;
            if outcome.resolved && outcome.wait_time_ms > 0 {
                // The page often reloads right after the challenge clears.
                let _ = page.wait_for_navigation().await;
            }
            Some(outcome)
        };

        let html = page.content().await.map_err(|e| format!("content read failed: {e}"))?;
        let title = page.get_title().await.ok().flatten();
        let final_url = page.url().await.ok().flatten();
        let visible_text = page
            .evaluate("document.body ? document.body.innerText : ''")
            .await
            .ok()
            .and_then(|r| r.into_value::<String>().ok());

        self.save_cookies(page, url).await;

        Ok(FetchedPage {
            html,
            title,
            final_url,
            visible_text,
            challenge,
        })
    }

    async fn load_cookies(&self, page: &Page, url: &str) {
        let Some(domain) = host_of(url) else {
            return;
        };
        let stored = self.cookies.load(&domain, None);
        if stored.is_empty() {
            return;
        }

        let params: Vec<CookieParam> = stored
            .iter()
            .filter_map(|c| {
                CookieParam::builder()
                    .name(&c.name)
                    .value(&c.value)
                    .domain(&c.domain)
                    .path(&c.path)
                    .secure(true)
                    .http_only(true)
                    .build()
                    .ok()
            })
            .collect();
        let count = params.len();
        if let Err(err) = page.execute(SetCookiesParams::new(params)).await {
            tracing::debug!(domain, error = %err, "cookie load failed");
        } else {
            tracing::debug!(domain, count, "clearance cookies loaded");
        }
    }

    async fn save_cookies(&self, page: &Page, url: &str) {
        let Some(domain) = host_of(url) else {
            return;
        };
        match page.get_cookies().await {
            Ok(cookies) => {
                self.cookies.save(
                    &domain,
                    None,
                    cookies
                        .into_iter()
                        .map(|c| (c.name, c.value, c.domain, c.path)),
                );
            }
            Err(err) => tracing::debug!(domain, error = %err, "cookie read failed"),
        }
    }
}

struct FetchedPage {
    html: String,
    title: Option<String>,
    final_url: Option<String>,
    visible_text: Option<String>,
    challenge: Option<ChallengeResult>,
}

fn budget_exhausted(deadline: Option<Instant>) -> bool {
    deadline.map_or(false, |d| {
        Instant::now() + BUDGET_SAFETY_MARGIN >= d
    })
}

async fn wait_for_selector(page: &Page, selector: &str, timeout: Duration) {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if page.find_element(selector).await.is_ok() {
            return;
        }
        tokio::time::sleep(SELECTOR_POLL_INTERVAL).await;
    }
    tracing::warn!(selector, "wait-for-selector timed out");
}

pub(crate) fn host_of(url: &str) -> Option<String> {
    url::Url::parse(url).ok()?.host_str().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_strategy_parses_snake_case() {
        let options: CrawlOptions =
            serde_json::from_str(r#"{"wait_strategy": "networkidle"}"#).unwrap();
        assert_eq!(options.wait_strategy, WaitStrategy::Networkidle);

        let default: CrawlOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(default.wait_strategy, WaitStrategy::Domcontentloaded);
    }

    #[test]
    fn budget_margin_cuts_escalation_short() {
        assert!(!budget_exhausted(None));
        assert!(budget_exhausted(Some(Instant::now() + Duration::from_secs(2))));
        assert!(!budget_exhausted(Some(Instant::now() + Duration::from_secs(30))));
    }

    #[test]
    fn host_extraction() {
        assert_eq!(host_of("https://docs.example.com/a/b").as_deref(), Some("docs.example.com"));
        assert!(host_of("not a url").is_none());
    }
}
