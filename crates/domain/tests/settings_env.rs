//! Settings behavior: documented defaults, env overlays, and the serde
//! shape used for config snapshots.
//!
//! Env-var tests run in one test function — the process environment is
//! shared across the test harness's threads.

use wr_domain::settings::Settings;

#[test]
fn default_bind_is_all_interfaces() {
    let settings = Settings::default();
    assert_eq!(settings.server.host, "0.0.0.0");
    assert_eq!(settings.server.port, 8080);
}

#[test]
fn snapshot_shape_is_stable() {
    let settings = Settings::default();
    let json = serde_json::to_value(&settings).unwrap();
    assert_eq!(json["agent"]["max_steps"], 12);
    assert_eq!(json["mesh"]["heartbeat_interval_s"], 15);
    assert_eq!(json["browser"]["pool_size"], 1);

    let back: Settings = serde_json::from_value(json).unwrap();
    assert_eq!(back.agent.max_wall_time_ms, 90_000);
}

#[test]
fn env_overlay_wins_over_defaults() {
    std::env::set_var("AGENT_MAX_STEPS", "7");
    std::env::set_var("MESH_SEED_PEERS", "http://a:8080, http://b:8080 ,");
    std::env::set_var("BROWSER_HEADLESS", "false");
    std::env::set_var("WRAITH_PORT", "not-a-port");

    let settings = Settings::from_env();
    assert_eq!(settings.agent.max_steps, 7);
    assert_eq!(
        settings.mesh.seed_peers,
        vec!["http://a:8080".to_string(), "http://b:8080".to_string()]
    );
    assert!(!settings.browser.headless);
    // Unparseable values keep the default instead of failing startup.
    assert_eq!(settings.server.port, 8080);

    std::env::remove_var("AGENT_MAX_STEPS");
    std::env::remove_var("MESH_SEED_PEERS");
    std::env::remove_var("BROWSER_HEADLESS");
    std::env::remove_var("WRAITH_PORT");
}
