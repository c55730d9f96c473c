//! Stop-snipe registry: a small in-memory + JSON-persisted log of confirmed
//! rug events, consulted by the executor's pre-trade risk gate before it
//! ever quotes a token. Grounded on `modules::rugpull_scanner`'s
//! zero-tolerance disqualification model (critical failures immediately
//! disqualify) and on `Librarian`'s own atomic snapshot persistence, reduced
//! here to the one thing the runtime actually needs: "have we seen this
//! token rug before, and how many times".

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RugEvent {
    pub token: String,
    pub reason: String,
    pub ts: f64,
}

#[derive(Default)]
struct RegistryState {
    blocked: HashSet<String>,
    strikes: HashMap<String, u32>,
    events: Vec<RugEvent>,
}

/// Zero-tolerance by default: a single confirmed rug event blocks the
/// token for the life of the process. Raise `strike_threshold` to require
/// repeated strikes before a token is disqualified outright.
pub struct RugRegistry {
    state: Mutex<RegistryState>,
    persistence_dir: Option<PathBuf>,
    strike_threshold: u32,
    max_events: usize,
}

impl RugRegistry {
    pub fn new_in_memory() -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            persistence_dir: None,
            strike_threshold: 1,
            max_events: 5_000,
        }
    }

    pub fn new_with_persistence(dir: impl Into<PathBuf>) -> Self {
        Self {
            persistence_dir: Some(dir.into()),
            ..Self::new_in_memory()
        }
    }

    pub fn with_strike_threshold(mut self, n: u32) -> Self {
        self.strike_threshold = n.max(1);
        self
    }

    /// Records a confirmed rug event and disqualifies the token once its
    /// strike count reaches `strike_threshold`. Idempotent in the sense
    /// that repeat calls only ever add strikes, never remove a block.
    pub async fn register_rug_event(&self, token: &str, reason: &str, ts: f64) {
        let mut state = self.state.lock().await;
        state.events.push(RugEvent {
            token: token.to_string(),
            reason: reason.to_string(),
            ts,
        });
        if state.events.len() > self.max_events {
            let excess = state.events.len() - self.max_events;
            state.events.drain(0..excess);
        }
        let strikes = state.strikes.entry(token.to_string()).or_insert(0);
        *strikes += 1;
        if *strikes >= self.strike_threshold {
            state.blocked.insert(token.to_string());
        }
        drop(state);
        self.maybe_flush().await;
    }

    pub async fn is_blocked(&self, token: &str) -> bool {
        self.state.lock().await.blocked.contains(token)
    }

    pub async fn strikes(&self, token: &str) -> u32 {
        self.state.lock().await.strikes.get(token).copied().unwrap_or(0)
    }

    pub async fn recent_events(&self, limit: usize) -> Vec<RugEvent> {
        let state = self.state.lock().await;
        state.events.iter().rev().take(limit).cloned().collect()
    }

    pub async fn blocked_count(&self) -> usize {
        self.state.lock().await.blocked.len()
    }

    async fn maybe_flush(&self) {
        let Some(dir) = &self.persistence_dir else {
            return;
        };
        if let Err(e) = self.save_snapshot_to(dir).await {
            warn!("[RugRegistry] snapshot write failed: {e}");
        }
    }

    async fn save_snapshot_to(&self, dir: &std::path::Path) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(dir).await?;
        let state = self.state.lock().await;
        let blocked: Vec<_> = state.blocked.iter().cloned().collect();
        let events = state.events.clone();
        drop(state);
        let path = dir.join("rug_registry.json");
        let tmp = dir.join("rug_registry.json.tmp");
        let body = serde_json::to_vec_pretty(&serde_json::json!({
            "blocked": blocked,
            "events": events,
        }))?;
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    pub async fn save_snapshot(&self) -> anyhow::Result<()> {
        let Some(dir) = self.persistence_dir.clone() else {
            return Ok(());
        };
        self.save_snapshot_to(&dir).await
    }

    /// Restores blocked tokens and strike counts from a prior snapshot, if
    /// one exists. A missing file is not an error: a fresh registry starts
    /// clean.
    pub async fn load_snapshot(&self) -> anyhow::Result<()> {
        let Some(dir) = &self.persistence_dir else {
            return Ok(());
        };
        let path = dir.join("rug_registry.json");
        let body = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let parsed: serde_json::Value = serde_json::from_slice(&body)?;
        let blocked: HashSet<String> = parsed
            .get("blocked")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();
        let events: Vec<RugEvent> = parsed
            .get("events")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .unwrap_or_default();
        let mut state = self.state.lock().await;
        for token in &blocked {
            state.strikes.insert(token.clone(), self.strike_threshold.max(1));
        }
        state.blocked = blocked;
        state.events = events;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn a_single_event_blocks_at_the_default_zero_tolerance_threshold() {
        let registry = RugRegistry::new_in_memory();
        assert!(!registry.is_blocked("Mint1").await);
        registry.register_rug_event("Mint1", "lp_unlock", 1.0).await;
        assert!(registry.is_blocked("Mint1").await);
        assert_eq!(registry.strikes("Mint1").await, 1);
    }

    #[tokio::test]
    async fn raising_the_strike_threshold_tolerates_earlier_events() {
        let registry = RugRegistry::new_in_memory().with_strike_threshold(3);
        registry.register_rug_event("Mint1", "vault_drain", 1.0).await;
        registry.register_rug_event("Mint1", "vault_drain", 2.0).await;
        assert!(!registry.is_blocked("Mint1").await);
        registry.register_rug_event("Mint1", "vault_drain", 3.0).await;
        assert!(registry.is_blocked("Mint1").await);
    }

    #[tokio::test]
    async fn snapshot_round_trips_blocked_tokens_across_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        let registry = RugRegistry::new_with_persistence(dir.path());
        registry.register_rug_event("Mint1", "honeypot_detected", 1.0).await;
        assert!(registry.is_blocked("Mint1").await);

        let reloaded = RugRegistry::new_with_persistence(dir.path());
        reloaded.load_snapshot().await.unwrap();
        assert!(reloaded.is_blocked("Mint1").await);
    }

    #[tokio::test]
    async fn recent_events_are_returned_newest_first() {
        let registry = RugRegistry::new_in_memory();
        registry.register_rug_event("Mint1", "lp_unlock", 1.0).await;
        registry.register_rug_event("Mint2", "vault_drain", 2.0).await;
        let recent = registry.recent_events(10).await;
        assert_eq!(recent[0].token, "Mint2");
        assert_eq!(recent[1].token, "Mint1");
    }
}
