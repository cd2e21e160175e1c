//! The crawl pipeline: cheap HTTP precheck, warm browser pool, Cloudflare
//! challenge resolution, vision-based ghost fallback, and the orchestrator
//! that escalates across them.

pub mod challenge;
pub mod cookies;
pub mod ghost;
pub mod markdown;
pub mod orchestrator;
pub mod pool;
pub mod precheck;
pub mod quality;

pub use ghost::{detect_block, should_trigger_ghost, BlockDetection, BlockSignal, GhostResult};
pub use orchestrator::{CrawlOptions, CrawlResult, Crawler, WaitStrategy};
pub use pool::{BrowserPool, Lease};
pub use quality::{assess_content_quality, ContentQuality};
