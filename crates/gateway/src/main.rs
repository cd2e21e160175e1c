use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::Context;
use clap::Parser;
use tokio::sync::Semaphore;
use tracing_subscriber::EnvFilter;

use wr_agent::ToolRegistry;
use wr_crawl::cookies::CookieStore;
use wr_crawl::{BrowserPool, Crawler};
use wr_domain::settings::Settings;
use wr_gateway::state::AppState;
use wr_gateway::storage::TraceStore;
use wr_gateway::{api, tools};
use wr_mesh::MeshCoordinator;
use wr_providers::create_adapter;

#[derive(Parser)]
#[command(name = "wraith", about = "Agentic web-crawling service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Run the HTTP server (default).
    Serve,
    /// Print the version and exit.
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let settings = Arc::new(Settings::from_env());
            run_server(settings).await
        }
        Some(Command::Version) => {
            println!("wraith {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Structured JSON tracing for the server.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,wr_gateway=debug")),
        )
        .json()
        .init();
}

async fn run_server(settings: Arc<Settings>) -> anyhow::Result<()> {
    tracing::info!("wraith starting");

    // ── Core singletons ──────────────────────────────────────────────
    let registry = Arc::new(ToolRegistry::new());

    let provider = match create_adapter(&settings.agent.provider, &settings.llm) {
        Ok(adapter) => Some(adapter),
        Err(err) => {
            tracing::warn!(error = %err, "no LLM provider available, agent/ghost disabled");
            None
        }
    };

    let pool = Arc::new(BrowserPool::new(
        settings.browser.pool_size,
        settings.browser.stream_max_lease_seconds,
        settings.browser.headless,
        settings.browser.stream_max_width,
    ));
    if let Err(err) = pool.start().await {
        tracing::error!(error = %err, "browser pool failed to start; crawls will fail until a browser is available");
    }

    let cookies = Arc::new(CookieStore::new());
    let crawler = Arc::new(Crawler::new(
        settings.clone(),
        pool.clone(),
        cookies,
        provider.clone(),
    ));

    tools::register_tools(&registry, crawler.clone(), settings.clone());
    tracing::info!(tools = ?registry.names(), "tools registered");

    // ── Mesh (optional) ──────────────────────────────────────────────
    let mesh = if settings.mesh.enabled {
        match &settings.mesh.secret {
            Some(secret) => {
                let coordinator = MeshCoordinator::new(
                    settings.mesh.clone(),
                    secret.clone(),
                    settings.crawl.max_concurrent_crawls as u32,
                    registry.names(),
                );
                coordinator
                    .counters()
                    .browser_pool_free
                    .store(pool.free_slots().await as u32, Ordering::Relaxed);
                coordinator.start().await;
                Some(coordinator)
            }
            None => {
                tracing::error!("MESH_ENABLED without MESH_SECRET; mesh stays off");
                None
            }
        }
    } else {
        None
    };

    let state = AppState {
        settings: settings.clone(),
        registry,
        pool: pool.clone(),
        crawler,
        provider,
        mesh: mesh.clone(),
        traces: Arc::new(TraceStore::new(&settings.storage.path)),
        crawl_permits: Arc::new(Semaphore::new(settings.crawl.max_concurrent_crawls)),
    };

    // ── Serve ────────────────────────────────────────────────────────
    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(addr = %addr, "listening");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // ── Teardown ─────────────────────────────────────────────────────
    if let Some(mesh) = mesh {
        mesh.stop().await;
    }
    pool.shutdown().await;
    tracing::info!("wraith stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
