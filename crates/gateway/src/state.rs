//! Shared application state passed to all API handlers.

use std::sync::Arc;

use tokio::sync::Semaphore;

use wr_agent::ToolRegistry;
use wr_crawl::{BrowserPool, Crawler};
use wr_domain::settings::Settings;
use wr_mesh::MeshCoordinator;
use wr_providers::LlmAdapter;

use crate::storage::TraceStore;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub registry: Arc<ToolRegistry>,
    pub pool: Arc<BrowserPool>,
    pub crawler: Arc<Crawler>,
    /// LLM adapter for the agent loop and ghost vision. `None` when no
    /// provider is configured.
    pub provider: Option<Arc<dyn LlmAdapter>>,
    /// Mesh coordinator. `None` unless MESH_ENABLED.
    pub mesh: Option<Arc<MeshCoordinator>>,
    pub traces: Arc<TraceStore>,
    /// Caps concurrent crawls across /crawl, /markdown, and /batch.
    pub crawl_permits: Arc<Semaphore>,
}
