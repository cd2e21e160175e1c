//! Direct crawl endpoints — the orchestrator without the agent loop.
//!
//! - `POST /api/crawl`    — full result (html + markdown + telemetry)
//! - `POST /api/markdown` — markdown-only result
//! - `POST /api/batch`    — bounded-concurrency batch, results in order

use std::sync::atomic::Ordering;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use wr_crawl::{CrawlOptions, CrawlResult};
use wr_policy::check_fetch_url;

use crate::state::AppState;

use super::ApiError;

const BATCH_MAX_URLS: usize = 50;

#[derive(Debug, Deserialize)]
pub struct CrawlRequest {
    pub url: String,
    #[serde(flatten)]
    pub options: CrawlOptions,
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub urls: Vec<String>,
    #[serde(default = "default_concurrent")]
    pub concurrent: usize,
    #[serde(flatten)]
    pub options: CrawlOptions,
}

fn default_concurrent() -> usize {
    3
}

#[derive(Debug, Serialize)]
pub struct MarkdownResponse {
    pub success: bool,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub markdown: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_quality: Option<wr_crawl::ContentQuality>,
    pub blocked: bool,
    pub render_mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// URL policy gate shared by all three endpoints: the server-level config
/// (private-range blocking) applies even outside the agent loop.
async fn gate_url(state: &AppState, url: &str) -> Result<(), ApiError> {
    let config = state.settings.agent.run_config();
    let verdict = check_fetch_url(url, &config).await;
    if !verdict.allowed {
        return Err(ApiError::bad_request(
            verdict.reason.unwrap_or_else(|| "URL not allowed".into()),
        ));
    }
    Ok(())
}

async fn crawl_one(state: &AppState, url: &str, options: &CrawlOptions) -> CrawlResult {
    let _permit = state.crawl_permits.acquire().await;
    if let Some(mesh) = &state.mesh {
        mesh.counters().active_crawls.fetch_add(1, Ordering::Relaxed);
    }
    let result = state.crawler.crawl(url, options).await;
    if let Some(mesh) = &state.mesh {
        mesh.counters().active_crawls.fetch_sub(1, Ordering::Relaxed);
    }
    result
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/crawl
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn crawl(
    State(state): State<AppState>,
    Json(request): Json<CrawlRequest>,
) -> Result<Json<CrawlResult>, ApiError> {
    gate_url(&state, &request.url).await?;
    let result = crawl_one(&state, &request.url, &request.options).await;
    Ok(Json(result))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/markdown
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn markdown(
    State(state): State<AppState>,
    Json(request): Json<CrawlRequest>,
) -> Result<Json<MarkdownResponse>, ApiError> {
    gate_url(&state, &request.url).await?;
    let result = crawl_one(&state, &request.url, &request.options).await;
    Ok(Json(MarkdownResponse {
        success: result.success,
        url: result.url,
        markdown: result.markdown,
        content_quality: result.content_quality,
        blocked: result.blocked,
        render_mode: result.render_mode,
        error: result.error,
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/batch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn batch(
    State(state): State<AppState>,
    Json(request): Json<BatchRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if request.urls.is_empty() {
        return Err(ApiError::bad_request("'urls' must be non-empty"));
    }
    if request.urls.len() > BATCH_MAX_URLS {
        return Err(ApiError::bad_request(format!(
            "'urls' exceeds the batch limit of {BATCH_MAX_URLS}"
        )));
    }
    for url in &request.urls {
        gate_url(&state, url).await?;
    }

    let concurrency = request
        .concurrent
        .clamp(1, state.settings.crawl.max_concurrent_crawls.max(1));

    if let Some(mesh) = &state.mesh {
        mesh.counters()
            .active_crawls
            .fetch_add(request.urls.len() as u32, Ordering::Relaxed);
    }
    let results = state
        .crawler
        .crawl_many(&request.urls, &request.options, concurrency)
        .await;
    if let Some(mesh) = &state.mesh {
        mesh.counters()
            .active_crawls
            .fetch_sub(request.urls.len() as u32, Ordering::Relaxed);
    }

    let succeeded = results.iter().filter(|r| r.success).count();
    Ok(Json(serde_json::json!({
        "success": true,
        "results": results,
        "summary": {
            "total": results.len(),
            "success": succeeded,
            "failed": results.len() - succeeded,
        },
    })))
}
