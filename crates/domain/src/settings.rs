//! Environment-driven settings tree, read once at startup.
//!
//! Every tunable has a default; `Settings::from_env()` overlays the
//! documented environment variables. The agent section is snapshotted into
//! every persisted run summary, so all sections stay serde-serializable.

use serde::{Deserialize, Serialize};

use crate::run::RunConfig;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level settings
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub crawl: CrawlSettings,
    #[serde(default)]
    pub browser: BrowserSettings,
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default)]
    pub ghost: GhostSettings,
    #[serde(default)]
    pub precheck: PrecheckSettings,
    #[serde(default)]
    pub challenge: ChallengeSettings,
    #[serde(default)]
    pub mesh: MeshSettings,
    #[serde(default)]
    pub llm: LlmSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    pub path: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            path: "./storage".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlSettings {
    pub max_concurrent_crawls: usize,
    /// Navigation timeout in seconds.
    pub timeout_s: u64,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            max_concurrent_crawls: 5,
            timeout_s: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserSettings {
    pub headless: bool,
    pub pool_size: usize,
    pub stream_max_lease_seconds: u64,
    pub stream_quality: u32,
    pub stream_max_width: u32,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            pool_size: 1,
            stream_max_lease_seconds: 300,
            stream_quality: 25,
            stream_max_width: 854,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    pub enabled: bool,
    pub provider: String,
    pub max_steps: u32,
    pub max_wall_time_ms: u64,
    pub max_failures: u32,
    pub block_private_ranges: bool,
    pub redact_secrets: bool,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: "openai".into(),
            max_steps: 12,
            max_wall_time_ms: 90_000,
            max_failures: 3,
            block_private_ranges: true,
            redact_secrets: true,
        }
    }
}

impl AgentSettings {
    /// The run config seeded from server settings; per-request fields
    /// (allowed tools/domains, step/time budgets) overlay this.
    pub fn run_config(&self) -> RunConfig {
        RunConfig {
            max_steps: self.max_steps,
            max_wall_time_ms: self.max_wall_time_ms,
            max_failures: self.max_failures,
            allowed_tools: Vec::new(),
            allowed_domains: Vec::new(),
            block_private_ranges: self.block_private_ranges,
            redact_secrets: self.redact_secrets,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GhostSettings {
    pub enabled: bool,
    pub auto_trigger: bool,
}

impl Default for GhostSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            auto_trigger: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrecheckSettings {
    pub enabled: bool,
    /// Request timeout in seconds.
    pub timeout_s: u64,
}

impl Default for PrecheckSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_s: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChallengeSettings {
    /// CapSolver API key; external solving disabled when unset.
    pub capsolver_api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshSettings {
    pub enabled: bool,
    /// Shared HMAC secret; the sole cross-node credential.
    pub secret: Option<String>,
    pub node_name: String,
    pub advertise_url: String,
    pub seed_peers: Vec<String>,
    pub heartbeat_interval_s: u64,
    pub peer_timeout_s: u64,
    pub peer_remove_s: u64,
    pub prefer_local: bool,
}

impl Default for MeshSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            secret: None,
            node_name: String::new(),
            advertise_url: String::new(),
            seed_peers: Vec::new(),
            heartbeat_interval_s: 15,
            peer_timeout_s: 45,
            peer_remove_s: 120,
            prefer_local: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_base_url: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub anthropic_model: String,
    pub ollama_base_url: String,
    pub ollama_model: String,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_model: "gpt-4o-mini".into(),
            openai_base_url: None,
            anthropic_api_key: None,
            anthropic_model: "claude-sonnet-4-20250514".into(),
            ollama_base_url: "http://localhost:11434".into(),
            ollama_model: "llama3.1".into(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Environment loading
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl Settings {
    /// Overlay environment variables on the defaults. Unparseable values
    /// keep the default and log a warning rather than failing startup.
    pub fn from_env() -> Self {
        let mut s = Settings::default();

        env_str("WRAITH_HOST", &mut s.server.host);
        env_parse("WRAITH_PORT", &mut s.server.port);
        env_str("STORAGE_PATH", &mut s.storage.path);

        env_parse("MAX_CONCURRENT_CRAWLS", &mut s.crawl.max_concurrent_crawls);
        env_parse("CRAWL_TIMEOUT", &mut s.crawl.timeout_s);

        env_parse("BROWSER_HEADLESS", &mut s.browser.headless);
        env_parse("BROWSER_POOL_SIZE", &mut s.browser.pool_size);
        env_parse(
            "BROWSER_STREAM_MAX_LEASE_SECONDS",
            &mut s.browser.stream_max_lease_seconds,
        );
        env_parse("BROWSER_STREAM_QUALITY", &mut s.browser.stream_quality);
        env_parse("BROWSER_STREAM_MAX_WIDTH", &mut s.browser.stream_max_width);

        env_parse("AGENT_ENABLED", &mut s.agent.enabled);
        env_str("AGENT_PROVIDER", &mut s.agent.provider);
        env_parse("AGENT_MAX_STEPS", &mut s.agent.max_steps);
        env_parse("AGENT_MAX_WALL_TIME_MS", &mut s.agent.max_wall_time_ms);
        env_parse("AGENT_MAX_FAILURES", &mut s.agent.max_failures);
        env_parse("AGENT_BLOCK_PRIVATE_RANGES", &mut s.agent.block_private_ranges);
        env_parse("AGENT_REDACT_SECRETS", &mut s.agent.redact_secrets);

        env_parse("AGENT_GHOST_ENABLED", &mut s.ghost.enabled);
        env_parse("AGENT_GHOST_AUTO_TRIGGER", &mut s.ghost.auto_trigger);

        env_parse("HTTP_PRECHECK_ENABLED", &mut s.precheck.enabled);
        env_parse("HTTP_PRECHECK_TIMEOUT", &mut s.precheck.timeout_s);

        s.challenge.capsolver_api_key = env_opt("CAPSOLVER_API_KEY");

        env_parse("MESH_ENABLED", &mut s.mesh.enabled);
        s.mesh.secret = env_opt("MESH_SECRET");
        env_str("MESH_NODE_NAME", &mut s.mesh.node_name);
        env_str("MESH_ADVERTISE_URL", &mut s.mesh.advertise_url);
        if let Some(peers) = env_opt("MESH_SEED_PEERS") {
            s.mesh.seed_peers = peers
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect();
        }
        env_parse("MESH_HEARTBEAT_INTERVAL_S", &mut s.mesh.heartbeat_interval_s);
        env_parse("MESH_PEER_TIMEOUT_S", &mut s.mesh.peer_timeout_s);
        env_parse("MESH_PEER_REMOVE_S", &mut s.mesh.peer_remove_s);
        env_parse("MESH_PREFER_LOCAL", &mut s.mesh.prefer_local);

        s.llm.openai_api_key = env_opt("OPENAI_API_KEY");
        env_str("OPENAI_MODEL", &mut s.llm.openai_model);
        s.llm.openai_base_url = env_opt("OPENAI_BASE_URL");
        s.llm.anthropic_api_key = env_opt("ANTHROPIC_API_KEY");
        env_str("ANTHROPIC_MODEL", &mut s.llm.anthropic_model);
        env_str("OLLAMA_BASE_URL", &mut s.llm.ollama_base_url);
        env_str("OLLAMA_MODEL", &mut s.llm.ollama_model);

        s
    }
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_str(name: &str, target: &mut String) {
    if let Some(v) = env_opt(name) {
        *target = v;
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, target: &mut T) {
    if let Some(v) = env_opt(name) {
        match v.parse() {
            Ok(parsed) => *target = parsed,
            Err(_) => tracing::warn!(var = name, value = %v, "unparseable env var, keeping default"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let s = Settings::default();
        assert_eq!(s.crawl.max_concurrent_crawls, 5);
        assert_eq!(s.browser.pool_size, 1);
        assert_eq!(s.browser.stream_max_lease_seconds, 300);
        assert_eq!(s.agent.max_steps, 12);
        assert_eq!(s.agent.max_wall_time_ms, 90_000);
        assert_eq!(s.agent.max_failures, 3);
        assert!(s.agent.block_private_ranges);
        assert!(s.agent.redact_secrets);
        assert!(!s.precheck.enabled);
        assert_eq!(s.precheck.timeout_s, 15);
        assert!(!s.mesh.enabled);
        assert_eq!(s.mesh.heartbeat_interval_s, 15);
        assert_eq!(s.mesh.peer_timeout_s, 45);
        assert_eq!(s.mesh.peer_remove_s, 120);
        assert_eq!(s.browser.stream_quality, 25);
        assert_eq!(s.browser.stream_max_width, 854);
    }

    #[test]
    fn agent_settings_seed_run_config() {
        let cfg = AgentSettings::default().run_config();
        assert_eq!(cfg.max_steps, 12);
        assert!(cfg.allowed_tools.is_empty());
        assert!(cfg.block_private_ranges);
    }
}
