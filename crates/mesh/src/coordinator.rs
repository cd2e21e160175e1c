//! Coordinator: node identity, peer table, and the heartbeat loop.
//!
//! Created at startup when the mesh is enabled, stopped at shutdown. Joins
//! every seed peer concurrently (one-hop gossip — learn the peers a seed
//! knows, never join them recursively), then heartbeats all known peers on
//! an interval, marking silence as unhealthy and eventually removing it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::task::JoinHandle;

use wr_domain::settings::MeshSettings;

use crate::auth::verify_mesh_token;
use crate::client::MeshClient;
use crate::models::{NodeInfo, NodeLoad, PeerState};

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Live load counters, bumped by the crawl/agent handlers.
#[derive(Default)]
pub struct LoadCounters {
    pub active_crawls: AtomicU32,
    pub active_agent_runs: AtomicU32,
    pub browser_pool_free: AtomicU32,
}

pub struct MeshCoordinator {
    pub node_id: String,
    pub node_name: String,
    node_info: NodeInfo,
    secret: String,
    settings: MeshSettings,
    max_concurrent_crawls: u32,
    peers: RwLock<HashMap<String, PeerState>>,
    client: MeshClient,
    counters: LoadCounters,
    heartbeat_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl MeshCoordinator {
    pub fn new(settings: MeshSettings, secret: String, max_concurrent_crawls: u32, tools: Vec<String>) -> Arc<Self> {
        let node_id = uuid::Uuid::new_v4().simple().to_string()[..12].to_string();
        let node_name = if settings.node_name.is_empty() {
            hostname()
        } else {
            settings.node_name.clone()
        };

        let node_info = NodeInfo {
            node_id: node_id.clone(),
            node_name: node_name.clone(),
            advertise_url: settings.advertise_url.clone(),
            tools,
            capabilities: vec!["crawl".into(), "markdown".into(), "agent".into()],
            version: env!("CARGO_PKG_VERSION").into(),
            joined_at_ms: now_ms(),
        };

        Arc::new(Self {
            node_id,
            node_name,
            node_info,
            client: MeshClient::new(secret.clone()),
            secret,
            settings,
            max_concurrent_crawls,
            peers: RwLock::new(HashMap::new()),
            counters: LoadCounters::default(),
            heartbeat_task: parking_lot::Mutex::new(None),
        })
    }

    // ── Lifecycle ─────────────────────────────────────────────────

    /// Join seed peers and begin heartbeating.
    pub async fn start(self: &Arc<Self>) {
        tracing::info!(
            node = %self.node_name,
            id = %self.node_id,
            url = %self.settings.advertise_url,
            seeds = ?self.settings.seed_peers,
            "mesh starting"
        );

        if !self.settings.seed_peers.is_empty() {
            let results = futures_util::future::join_all(
                self.settings.seed_peers.iter().map(|url| self.join_peer(url)),
            )
            .await;
            let joined = results.iter().filter(|ok| **ok).count();
            tracing::info!(joined, total = self.settings.seed_peers.len(), "seed peers joined");
        }

        let coordinator = self.clone();
        let interval = std::time::Duration::from_secs(self.settings.heartbeat_interval_s.max(1));
        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                coordinator.send_heartbeats().await;
                coordinator.cull_stale_peers();
            }
        });
        *self.heartbeat_task.lock() = Some(task);
    }

    /// Stop heartbeating and notify healthy peers that we are leaving.
    pub async fn stop(&self) {
        if let Some(task) = self.heartbeat_task.lock().take() {
            task.abort();
        }

        let targets: Vec<String> = self
            .peers
            .read()
            .values()
            .filter(|p| p.healthy)
            .map(|p| p.info.advertise_url.clone())
            .collect();
        futures_util::future::join_all(
            targets.iter().map(|url| self.client.leave(url, &self.node_id)),
        )
        .await;
        tracing::info!("mesh coordinator stopped");
    }

    // ── Peer management ───────────────────────────────────────────

    pub fn get_peers(&self) -> Vec<PeerState> {
        self.peers.read().values().cloned().collect()
    }

    pub fn get_healthy_peers(&self) -> Vec<PeerState> {
        self.peers.read().values().filter(|p| p.healthy).cloned().collect()
    }

    pub fn known_peer_infos(&self) -> Vec<NodeInfo> {
        self.peers.read().values().map(|p| p.info.clone()).collect()
    }

    /// Add or refresh a peer. Self never enters the table.
    pub fn register_peer(&self, info: NodeInfo, load: Option<NodeLoad>) {
        if info.node_id == self.node_id {
            return;
        }
        let mut peers = self.peers.write();
        match peers.entry(info.node_id.clone()) {
            std::collections::hash_map::Entry::Occupied(mut entry) => {
                let existing = entry.get_mut();
                existing.info = info;
                existing.last_heartbeat_ms = now_ms();
                existing.missed_heartbeats = 0;
                existing.healthy = true;
                if load.is_some() {
                    existing.load = load;
                }
            }
            std::collections::hash_map::Entry::Vacant(entry) => {
                tracing::info!(
                    peer = %info.node_name,
                    id = %info.node_id,
                    url = %info.advertise_url,
                    "peer registered"
                );
                entry.insert(PeerState::new(info, load));
            }
        }
    }

    pub fn remove_peer(&self, node_id: &str) {
        if let Some(removed) = self.peers.write().remove(node_id) {
            tracing::info!(peer = %removed.info.node_name, id = node_id, "peer removed");
        }
    }

    /// Refresh a peer's load from an inbound heartbeat.
    pub fn update_peer_load(&self, node_id: &str, load: NodeLoad) {
        if let Some(peer) = self.peers.write().get_mut(node_id) {
            peer.load = Some(load);
            peer.last_heartbeat_ms = now_ms();
            peer.missed_heartbeats = 0;
            peer.healthy = true;
        }
    }

    pub fn verify_token(&self, token: &str) -> bool {
        verify_mesh_token(token, &self.secret)
    }

    pub fn node_info(&self) -> NodeInfo {
        self.node_info.clone()
    }

    // ── Load counters ─────────────────────────────────────────────

    pub fn counters(&self) -> &LoadCounters {
        &self.counters
    }

    /// Snapshot of this node's current load.
    pub fn self_load(&self) -> NodeLoad {
        NodeLoad {
            node_id: self.node_id.clone(),
            active_crawls: self.counters.active_crawls.load(Ordering::Relaxed),
            active_agent_runs: self.counters.active_agent_runs.load(Ordering::Relaxed),
            browser_pool_free: self.counters.browser_pool_free.load(Ordering::Relaxed),
            max_concurrent_crawls: self.max_concurrent_crawls,
            timestamp_ms: now_ms(),
        }
    }

    pub fn client(&self) -> &MeshClient {
        &self.client
    }

    pub fn prefer_local(&self) -> bool {
        self.settings.prefer_local
    }

    // ── Internals ─────────────────────────────────────────────────

    async fn join_peer(&self, peer_url: &str) -> bool {
        let Some(response) = self.client.join(peer_url, &self.node_info).await else {
            return false;
        };
        if !response.ok {
            return false;
        }
        self.register_peer(response.node_info, None);
        // One-hop gossip: record, don't join.
        for known in response.known_peers {
            if known.node_id != self.node_id {
                self.register_peer(known, None);
            }
        }
        true
    }

    async fn send_heartbeats(&self) {
        let load = self.self_load();
        let targets: Vec<(String, String)> = self
            .peers
            .read()
            .values()
            .map(|p| (p.info.node_id.clone(), p.info.advertise_url.clone()))
            .collect();
        if targets.is_empty() {
            return;
        }

        let responses = futures_util::future::join_all(
            targets.iter().map(|(_, url)| self.client.heartbeat(url, &load)),
        )
        .await;

        let mut peers = self.peers.write();
        for ((node_id, _), response) in targets.iter().zip(responses) {
            let Some(peer) = peers.get_mut(node_id) else {
                continue;
            };
            match response {
                Some(ack) if ack.ok => {
                    peer.last_heartbeat_ms = now_ms();
                    peer.missed_heartbeats = 0;
                    peer.healthy = true;
                }
                _ => {
                    peer.missed_heartbeats += 1;
                    let silent_s = peer.missed_heartbeats as u64 * self.settings.heartbeat_interval_s;
                    if silent_s >= self.settings.peer_timeout_s {
                        if peer.healthy {
                            tracing::warn!(
                                peer = %peer.info.node_name,
                                missed = peer.missed_heartbeats,
                                "peer marked unhealthy"
                            );
                        }
                        peer.healthy = false;
                    }
                }
            }
        }
    }

    fn cull_stale_peers(&self) {
        let cutoff_ms = (self.settings.peer_remove_s * 1000) as i64;
        let now = now_ms();
        let stale: Vec<String> = self
            .peers
            .read()
            .iter()
            .filter(|(_, p)| now - p.last_heartbeat_ms > cutoff_ms)
            .map(|(id, _)| id.clone())
            .collect();
        for node_id in stale {
            self.remove_peer(&node_id);
        }
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "wraith-node".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator() -> Arc<MeshCoordinator> {
        MeshCoordinator::new(MeshSettings::default(), "secret".into(), 5, vec![])
    }

    fn info(node_id: &str) -> NodeInfo {
        NodeInfo {
            node_id: node_id.into(),
            node_name: format!("node-{node_id}"),
            advertise_url: format!("http://{node_id}:8080"),
            tools: vec![],
            capabilities: vec![],
            version: "1.0.0".into(),
            joined_at_ms: 0,
        }
    }

    #[test]
    fn node_id_is_twelve_hex_chars() {
        let c = coordinator();
        assert_eq!(c.node_id.len(), 12);
        assert!(c.node_id.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn self_never_enters_the_peer_table() {
        let c = coordinator();
        c.register_peer(c.node_info(), None);
        assert!(c.get_peers().is_empty());
    }

    #[test]
    fn registration_and_load_updates_refresh_health() {
        let c = coordinator();
        c.register_peer(info("b"), None);
        assert_eq!(c.get_healthy_peers().len(), 1);

        let load = NodeLoad {
            node_id: "b".into(),
            active_crawls: 2,
            active_agent_runs: 0,
            browser_pool_free: 1,
            max_concurrent_crawls: 5,
            timestamp_ms: 0,
        };
        c.update_peer_load("b", load);
        let peer = &c.get_peers()[0];
        assert_eq!(peer.load.as_ref().unwrap().active_crawls, 2);
        assert_eq!(peer.missed_heartbeats, 0);
    }

    #[test]
    fn token_verification_uses_the_shared_secret() {
        let c = coordinator();
        let token = crate::auth::sign_mesh_token("secret");
        assert!(c.verify_token(&token));
        let forged = crate::auth::sign_mesh_token("wrong");
        assert!(!c.verify_token(&forged));
    }
}
