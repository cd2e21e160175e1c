//! Trace persistence: run summaries as JSON files under the storage root.
//!
//! Layout: `{sha256_12(customer_id)}/{session_id}/traces/{run_id}.json`.
//! Writes are best-effort — a failed persist is logged and never fails the
//! API call that produced the run.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use wr_agent::RunSummary;
use wr_domain::Result;

const ANONYMOUS_CUSTOMER: &str = "anonymous";

/// First 12 hex chars of SHA-256 — the customer partition key.
pub fn customer_hash(customer_id: &str) -> String {
    let digest = Sha256::digest(customer_id.as_bytes());
    hex::encode(digest)[..12].to_string()
}

pub struct TraceStore {
    root: PathBuf,
}

impl TraceStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn trace_path(&self, customer_id: Option<&str>, session_id: &str, run_id: &str) -> PathBuf {
        let customer = customer_hash(customer_id.unwrap_or(ANONYMOUS_CUSTOMER));
        // run_id and session_id are server-generated hex, but never trust
        // them as path components blindly.
        let session: String = session_id.chars().filter(|c| c.is_ascii_alphanumeric() || *c == '-').collect();
        let run: String = run_id.chars().filter(|c| c.is_ascii_alphanumeric() || *c == '-').collect();
        self.root
            .join(customer)
            .join(session)
            .join("traces")
            .join(format!("{run}.json"))
    }

    /// Persist a run summary. Callers treat errors as log-only.
    pub async fn save(
        &self,
        summary: &RunSummary,
        customer_id: Option<&str>,
        session_id: &str,
    ) -> Result<PathBuf> {
        let path = self.trace_path(customer_id, session_id, &summary.run_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(summary)?;
        tokio::fs::write(&path, json).await?;
        tracing::info!(run_id = %summary.run_id, path = %path.display(), "trace persisted");
        Ok(path)
    }

    /// Load a persisted summary; `None` when it does not exist or fails to
    /// parse (a corrupt trace reads as absent, not as a server fault).
    pub async fn load(
        &self,
        run_id: &str,
        customer_id: Option<&str>,
        session_id: &str,
    ) -> Option<RunSummary> {
        let path = self.trace_path(customer_id, session_id, run_id);
        let bytes = tokio::fs::read(&path).await.ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(summary) => Some(summary),
            Err(err) => {
                tracing::error!(run_id, error = %err, "failed to parse persisted trace");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(run_id: &str) -> RunSummary {
        RunSummary {
            run_id: run_id.into(),
            task: "say hi".into(),
            success: true,
            stop_reason: "completed".into(),
            steps: 1,
            wall_time_ms: 12,
            failures: 0,
            response: Some("hi".into()),
            error: None,
            started_at: None,
            ended_at: None,
            config_snapshot: None,
            trace: vec![serde_json::json!({"event": "run_start"})],
            policy_denials: vec![],
        }
    }

    #[test]
    fn customer_hash_is_stable_12_hex() {
        let h = customer_hash("customer@example.com");
        assert_eq!(h.len(), 12);
        assert_eq!(h, customer_hash("customer@example.com"));
        assert_ne!(h, customer_hash("other@example.com"));
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = TraceStore::new(dir.path());

        let s = summary("run123");
        let path = store.save(&s, Some("cust"), "sess1").await.unwrap();
        assert!(path.ends_with("sess1/traces/run123.json"));

        let loaded = store.load("run123", Some("cust"), "sess1").await.unwrap();
        assert_eq!(loaded, s);
    }

    #[tokio::test]
    async fn missing_traces_read_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = TraceStore::new(dir.path());
        assert!(store.load("nope", None, "sess").await.is_none());
    }

    #[tokio::test]
    async fn different_customers_never_collide() {
        let dir = tempfile::tempdir().unwrap();
        let store = TraceStore::new(dir.path());
        let s = summary("run1");
        store.save(&s, Some("a"), "sess").await.unwrap();
        assert!(store.load("run1", Some("b"), "sess").await.is_none());
        assert!(store.load("run1", Some("a"), "sess").await.is_some());
    }
}
