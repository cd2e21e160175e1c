//! Crawl tool suite registered with the agent's tool registry at startup.

use std::sync::Arc;

use serde_json::{json, Value};

use wr_agent::{Tool, ToolOutcome, ToolRegistry};
use wr_crawl::{CrawlOptions, Crawler};
use wr_domain::settings::Settings;

/// Register every built-in tool. Called once during startup.
pub fn register_tools(registry: &ToolRegistry, crawler: Arc<Crawler>, settings: Arc<Settings>) {
    registry.register(Arc::new(CrawlTool {
        crawler: crawler.clone(),
    }));
    registry.register(Arc::new(MarkdownTool {
        crawler: crawler.clone(),
    }));
    registry.register(Arc::new(BatchTool { crawler }));
    registry.register(Arc::new(CrawlerInfoTool { settings }));
}

fn arg_str(args: &Value, key: &str) -> Option<String> {
    args.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

// ── crawl ───────────────────────────────────────────────────────────────

struct CrawlTool {
    crawler: Arc<Crawler>,
}

#[async_trait::async_trait]
impl Tool for CrawlTool {
    fn definition(&self) -> wr_domain::tool::ToolDefinition {
        wr_domain::tool::ToolDefinition {
            name: "crawl".into(),
            description: "Crawl a single URL and return HTML content and markdown.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "url": { "type": "string", "description": "The URL to crawl" },
                    "wait_after_load_ms": { "type": "integer", "description": "Extra settle time after load" }
                },
                "required": ["url"]
            }),
        }
    }

    async fn execute(&self, args: Value) -> ToolOutcome {
        let Some(url) = arg_str(&args, "url") else {
            return ToolOutcome::error("missing required arg 'url'");
        };
        let options = CrawlOptions {
            wait_after_load_ms: args["wait_after_load_ms"].as_u64().unwrap_or(0),
            ..CrawlOptions::default()
        };

        let result = self.crawler.crawl(&url, &options).await;
        if result.success {
            ToolOutcome::ok(json!({
                "url": result.url,
                "title": result.title,
                "markdown": result.markdown,
                "metadata": {
                    "final_url": result.final_url,
                    "content_quality": result.content_quality,
                    "render_mode": result.render_mode,
                    "blocked": result.blocked,
                    "quarantined": result.quarantined,
                    "timings_ms": result.timings_ms,
                },
            }))
        } else {
            ToolOutcome::error(result.error.unwrap_or_else(|| "crawl failed".into()))
        }
    }
}

// ── markdown ────────────────────────────────────────────────────────────

struct MarkdownTool {
    crawler: Arc<Crawler>,
}

#[async_trait::async_trait]
impl Tool for MarkdownTool {
    fn definition(&self) -> wr_domain::tool::ToolDefinition {
        wr_domain::tool::ToolDefinition {
            name: "markdown".into(),
            description: "Crawl a URL and return only the markdown content.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "url": { "type": "string", "description": "The URL to crawl" }
                },
                "required": ["url"]
            }),
        }
    }

    async fn execute(&self, args: Value) -> ToolOutcome {
        let Some(url) = arg_str(&args, "url") else {
            return ToolOutcome::error("missing required arg 'url'");
        };
        let result = self.crawler.crawl(&url, &CrawlOptions::default()).await;
        match (result.success, result.markdown) {
            (true, Some(markdown)) => ToolOutcome::ok(json!(markdown)),
            _ => ToolOutcome::error(result.error.unwrap_or_else(|| "crawl failed".into())),
        }
    }
}

// ── batch ───────────────────────────────────────────────────────────────

struct BatchTool {
    crawler: Arc<Crawler>,
}

#[async_trait::async_trait]
impl Tool for BatchTool {
    fn definition(&self) -> wr_domain::tool::ToolDefinition {
        wr_domain::tool::ToolDefinition {
            name: "batch".into(),
            description: "Crawl multiple URLs and return per-URL markdown results.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "urls": { "type": "array", "items": { "type": "string" }, "description": "URLs to crawl" },
                    "max_concurrent": { "type": "integer", "description": "Concurrent crawls (default 3)" }
                },
                "required": ["urls"]
            }),
        }
    }

    async fn execute(&self, args: Value) -> ToolOutcome {
        let urls: Vec<String> = match args["urls"].as_array() {
            Some(items) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            None => return ToolOutcome::error("missing required arg 'urls'"),
        };
        if urls.is_empty() {
            return ToolOutcome::error("'urls' must be a non-empty list");
        }

        let concurrency = args["max_concurrent"].as_u64().unwrap_or(3) as usize;
        let results = self
            .crawler
            .crawl_many(&urls, &CrawlOptions::default(), concurrency)
            .await;

        let succeeded = results.iter().filter(|r| r.success).count();
        ToolOutcome::ok(json!({
            "results": results
                .iter()
                .map(|r| json!({
                    "url": r.url,
                    "success": r.success,
                    "markdown": r.markdown,
                    "error": r.error,
                }))
                .collect::<Vec<_>>(),
            "summary": {
                "total": results.len(),
                "success": succeeded,
                "failed": results.len() - succeeded,
            },
        }))
    }
}

// ── crawler_info ────────────────────────────────────────────────────────

struct CrawlerInfoTool {
    settings: Arc<Settings>,
}

#[async_trait::async_trait]
impl Tool for CrawlerInfoTool {
    fn definition(&self) -> wr_domain::tool::ToolDefinition {
        wr_domain::tool::ToolDefinition {
            name: "crawler_info".into(),
            description: "Get information about the crawler service capabilities.".into(),
            parameters: json!({ "type": "object", "properties": {} }),
        }
    }

    async fn execute(&self, _args: Value) -> ToolOutcome {
        ToolOutcome::ok(json!({
            "service": "wraith",
            "version": env!("CARGO_PKG_VERSION"),
            "capabilities": {
                "javascript_execution": true,
                "batch_crawling": true,
                "markdown_generation": true,
                "challenge_resolution": true,
                "ghost_protocol": self.settings.ghost.enabled,
            },
            "configuration": {
                "max_concurrent_crawls": self.settings.crawl.max_concurrent_crawls,
                "default_timeout_s": self.settings.crawl.timeout_s,
                "headless_browser": self.settings.browser.headless,
                "browser_pool_size": self.settings.browser.pool_size,
            },
        }))
    }
}
