//! Routing: scoring and target selection for tool calls.
//!
//! Pure logic, no I/O. Given the current peer table, pick the best node to
//! execute on based on load and locality.

use serde::Serialize;

use crate::models::{NodeLoad, PeerState};

pub const LOCALITY_BONUS: f64 = 0.2;

/// Assumed score for peers that have not reported load yet.
const UNKNOWN_LOAD_SCORE: f64 = 0.5;

/// Where to route a tool call.
#[derive(Debug, Clone, Serialize)]
pub struct RouteDecision {
    pub target_node_id: String,
    pub target_url: String,
    pub target_name: String,
    pub score: f64,
    pub is_local: bool,
    pub reason: String,
}

/// Score 0.0–1.0 where 1.0 = fully idle.
pub fn compute_load_score(load: &NodeLoad) -> f64 {
    if load.max_concurrent_crawls == 0 {
        return 0.0;
    }
    let active = load.active_crawls + load.active_agent_runs;
    let available = load.max_concurrent_crawls.saturating_sub(active);
    f64::from(available) / f64::from(load.max_concurrent_crawls)
}

/// Pick the best node to execute a tool call on.
///
/// The local node is always a candidate, so this only returns `None` on an
/// impossible empty candidate set.
pub fn select_target(
    tool_name: &str,
    self_node_id: &str,
    self_load: &NodeLoad,
    peers: &[PeerState],
    prefer_local: bool,
) -> Option<RouteDecision> {
    struct Candidate<'a> {
        node_id: &'a str,
        url: &'a str,
        name: &'a str,
        score: f64,
        is_local: bool,
    }

    let mut candidates = Vec::with_capacity(peers.len() + 1);

    let mut self_score = compute_load_score(self_load);
    if prefer_local {
        self_score += LOCALITY_BONUS;
    }
    candidates.push(Candidate {
        node_id: self_node_id,
        url: "",
        name: "self",
        score: self_score,
        is_local: true,
    });

    for peer in peers {
        if !peer.healthy {
            continue;
        }
        // Capability check: empty tools list = every tool.
        if !peer.info.tools.is_empty() && !peer.info.tools.iter().any(|t| t == tool_name) {
            continue;
        }
        let score = peer
            .load
            .as_ref()
            .map_or(UNKNOWN_LOAD_SCORE, compute_load_score);
        candidates.push(Candidate {
            node_id: &peer.info.node_id,
            url: &peer.info.advertise_url,
            name: &peer.info.node_name,
            score,
            is_local: false,
        });
    }

    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    let best = candidates.first()?;

    Some(RouteDecision {
        target_node_id: best.node_id.to_string(),
        target_url: best.url.to_string(),
        target_name: best.name.to_string(),
        score: best.score,
        is_local: best.is_local,
        reason: if best.is_local {
            "local preferred".into()
        } else {
            format!("peer {} scored {:.2}", best.name, best.score)
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NodeInfo;

    fn load(node_id: &str, active_crawls: u32, active_agent_runs: u32) -> NodeLoad {
        NodeLoad {
            node_id: node_id.into(),
            active_crawls,
            active_agent_runs,
            browser_pool_free: 1,
            max_concurrent_crawls: 5,
            timestamp_ms: 0,
        }
    }

    fn peer(node_id: &str, tools: Vec<String>, peer_load: Option<NodeLoad>, healthy: bool) -> PeerState {
        let mut state = PeerState::new(
            NodeInfo {
                node_id: node_id.into(),
                node_name: format!("node-{node_id}"),
                advertise_url: format!("http://{node_id}:8080"),
                tools,
                capabilities: vec![],
                version: "1.0.0".into(),
                joined_at_ms: 0,
            },
            peer_load,
        );
        state.healthy = healthy;
        state
    }

    #[test]
    fn score_is_available_over_max() {
        assert_eq!(compute_load_score(&load("a", 0, 0)), 1.0);
        assert_eq!(compute_load_score(&load("a", 2, 1)), 0.4);
        assert_eq!(compute_load_score(&load("a", 5, 0)), 0.0);
        assert_eq!(compute_load_score(&load("a", 4, 3)), 0.0);
    }

    #[test]
    fn idle_local_node_wins_with_locality_bonus() {
        let peers = vec![peer("b", vec![], Some(load("b", 0, 0)), true)];
        let decision = select_target("crawl", "a", &load("a", 0, 0), &peers, true).unwrap();
        assert!(decision.is_local);
        assert!((decision.score - 1.2).abs() < 1e-9);
    }

    #[test]
    fn saturated_local_routes_to_idle_peer() {
        let peers = vec![peer("b", vec![], Some(load("b", 0, 0)), true)];
        let decision = select_target("crawl", "a", &load("a", 5, 0), &peers, true).unwrap();
        assert!(!decision.is_local);
        assert_eq!(decision.target_node_id, "b");
        assert_eq!(decision.target_url, "http://b:8080");
    }

    #[test]
    fn unhealthy_and_incapable_peers_are_skipped() {
        let peers = vec![
            peer("down", vec![], Some(load("down", 0, 0)), false),
            peer("notool", vec!["markdown".into()], Some(load("notool", 0, 0)), true),
        ];
        let decision = select_target("crawl", "a", &load("a", 5, 0), &peers, true).unwrap();
        assert!(decision.is_local);
    }

    #[test]
    fn unknown_peer_load_scores_at_half() {
        let peers = vec![peer("b", vec![], None, true)];
        let decision = select_target("crawl", "a", &load("a", 5, 0), &peers, false).unwrap();
        assert_eq!(decision.target_node_id, "b");
        assert!((decision.score - 0.5).abs() < 1e-9);
    }
}
