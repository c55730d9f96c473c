//! Insight logging: a structured, bounded, disk-backed ring of "why did the
//! agent do that" lines. Grounded on
//! `original_source/tpu/special/insight_logger.py` (spec.md §10 supplement)
//! — every auto-sell exit and buy decision appends one entry, newest-last,
//! truncated to a bounded ring on disk rather than growing unbounded.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::warn;

const DEFAULT_MAX_ENTRIES: usize = 2_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insight {
    pub ts: f64,
    pub kind: String,
    pub token: String,
    pub message: String,
    pub context: serde_json::Value,
}

pub struct InsightLog {
    path: PathBuf,
    max_entries: usize,
    write_lock: Mutex<()>,
}

impl InsightLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_entries: DEFAULT_MAX_ENTRIES,
            write_lock: Mutex::new(()),
        }
    }

    pub fn with_max_entries(path: impl Into<PathBuf>, max_entries: usize) -> Self {
        Self {
            path: path.into(),
            max_entries: max_entries.max(1),
            write_lock: Mutex::new(()),
        }
    }

    /// Appends one insight, trimming the oldest entries once the ring
    /// exceeds `max_entries`. Never fails the caller: disk errors are
    /// warn-logged and swallowed (spec.md §7 — this is an observability
    /// side channel, never a control-flow dependency).
    pub async fn log(&self, kind: &str, token: &str, message: impl Into<String>, context: serde_json::Value) {
        let _guard = self.write_lock.lock().await;
        let entry = Insight {
            ts: crate::core::now_epoch(),
            kind: kind.to_string(),
            token: token.to_string(),
            message: message.into(),
            context,
        };
        if let Err(e) = self.append(entry).await {
            warn!("[InsightLog] failed to append insight: {e}");
        }
    }

    async fn append(&self, entry: Insight) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut entries = self.read_all().await.unwrap_or_default();
        entries.push(entry);
        if entries.len() > self.max_entries {
            let excess = entries.len() - self.max_entries;
            entries.drain(0..excess);
        }
        let body = serde_json::to_vec_pretty(&entries)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn read_all(&self) -> anyhow::Result<Vec<Insight>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let bytes = tokio::fs::read(&self.path).await?;
        match serde_json::from_slice(&bytes) {
            Ok(entries) => Ok(entries),
            Err(_) => {
                warn!("[InsightLog] {} was corrupt, starting a fresh ring", self.path.display());
                Ok(Vec::new())
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn recent(&self, limit: usize) -> Vec<Insight> {
        self.read_all()
            .await
            .unwrap_or_default()
            .into_iter()
            .rev()
            .take(limit)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_entries_persist_and_are_readable_back() {
        let dir = tempfile::tempdir().unwrap();
        let log = InsightLog::new(dir.path().join("insights.json"));
        log.log("buy", "TokenA", "probe buy at score 62", serde_json::json!({"score": 62})).await;
        log.log("trailing_stop_triggered", "TokenA", "exit at 1.10", serde_json::json!({})).await;
        let recent = log.recent(10).await;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].kind, "trailing_stop_triggered");
    }

    #[tokio::test]
    async fn ring_is_bounded_and_evicts_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let log = InsightLog::with_max_entries(dir.path().join("insights.json"), 3);
        for i in 0..5 {
            log.log("buy", "TokenA", format!("entry {i}"), serde_json::json!({})).await;
        }
        let all = log.recent(10).await;
        assert_eq!(all.len(), 3);
        assert_eq!(all[2].message, "entry 2");
    }

    #[tokio::test]
    async fn corrupt_log_file_falls_back_to_empty_instead_of_erroring() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("insights.json");
        tokio::fs::write(&path, b"not json").await.unwrap();
        let log = InsightLog::new(path);
        log.log("buy", "TokenA", "after corruption", serde_json::json!({})).await;
        let recent = log.recent(10).await;
        assert_eq!(recent.len(), 1);
    }
}
