//! Disk-backed, append-only JSONL(+gzip) event store with a write-ahead log
//! for crash safety, background flush/prune, and rolling in-memory stats.
//! Grounded on `original_source/tpu/librarian/feature_store.py`; the WAL,
//! shard rotation and rolling-stats shape carry over directly, reworked
//! from a dynamically-keyed dict event into a typed `FeatureRow`.

use crate::core::models::FeatureRow;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct FeatureStoreConfig {
    pub path: PathBuf,
    pub wal_path: PathBuf,
    pub gzip: bool,
    pub max_days: i64,
    pub flush_every: usize,
    pub max_file_size: usize,
    pub sync_interval_s: u64,
    pub rolling_window_s: f64,
}

impl Default for FeatureStoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("runtime/library/feature_store"),
            wal_path: PathBuf::from("runtime/library/feature_store/_wal.jsonl"),
            gzip: true,
            max_days: 30,
            flush_every: 200,
            max_file_size: 20_000,
            sync_interval_s: 5,
            rolling_window_s: 86_400.0,
        }
    }
}

/// In-memory rolling mean over the trailing `window` seconds.
#[derive(Debug, Default)]
pub struct RollingStats {
    window: f64,
    samples: std::collections::VecDeque<(f64, f64)>,
    sum: f64,
}

impl RollingStats {
    pub fn new(window_s: f64) -> Self {
        Self {
            window: window_s,
            samples: std::collections::VecDeque::new(),
            sum: 0.0,
        }
    }

    pub fn add(&mut self, value: f64, ts: f64) {
        self.samples.push_back((ts, value));
        self.sum += value;
        self.trim(ts);
    }

    fn trim(&mut self, now: f64) {
        let cutoff = now - self.window;
        while let Some(&(ts, val)) = self.samples.front() {
            if ts < cutoff {
                self.sum -= val;
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn count(&self) -> usize {
        self.samples.len()
    }

    pub fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            0.0
        } else {
            self.sum / self.samples.len() as f64
        }
    }
}

/// Reward shaping used when closing out a trade (spec.md §4.D / §3):
/// `tanh(pnl_pct/6) - min(|slip_bps|/100, 1)*0.15 + time_bonus`, clamped to
/// `[-1, 1]`.
pub fn normalize_reward(pnl_pct: f64, slip_bps: f64, hold_sec: f64) -> f64 {
    let base = (pnl_pct / 6.0).tanh();
    let slip_pen = (slip_bps.abs() / 100.0).min(1.0) * 0.15;
    let time_bonus = if pnl_pct > 0.0 && hold_sec > 0.0 {
        (3600.0 / (hold_sec + 3600.0) * 0.05).min(0.05)
    } else {
        0.0
    };
    crate::core::models::clamp(base - slip_pen + time_bonus, -1.0, 1.0)
}

struct ShardState {
    path: Option<PathBuf>,
    date_key: Option<String>,
    count: usize,
}

struct Inner {
    buffer: Vec<FeatureRow>,
    shard: ShardState,
    last_events: HashMap<String, Vec<FeatureRow>>,
    rolling: RollingStats,
}

/// One append-only store shared by every subsystem that logs an outcome:
/// the executor (`trade`), the scoring engines (`signal`/`decision`), the
/// bandit (`strategy_weight`), and the auto-sell monitor (`pnl_snapshot`).
pub struct FeatureStore {
    cfg: FeatureStoreConfig,
    inner: Mutex<Inner>,
}

const LAST_EVENTS_CAP: usize = 500;

impl FeatureStore {
    pub async fn new(cfg: FeatureStoreConfig) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&cfg.path).await?;
        if let Some(parent) = cfg.wal_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let store = Self {
            cfg: cfg.clone(),
            inner: Mutex::new(Inner {
                buffer: Vec::new(),
                shard: ShardState {
                    path: None,
                    date_key: None,
                    count: 0,
                },
                last_events: HashMap::new(),
                rolling: RollingStats::new(cfg.rolling_window_s),
            }),
        };
        store.recover_wal().await?;
        Ok(store)
    }

    async fn recover_wal(&self) -> anyhow::Result<()> {
        if !self.cfg.wal_path.exists() {
            return Ok(());
        }
        let contents = tokio::fs::read_to_string(&self.cfg.wal_path).await.unwrap_or_default();
        if contents.is_empty() {
            return Ok(());
        }
        let mut recovered = 0usize;
        let mut inner = self.inner.lock().await;
        for line in contents.lines() {
            if let Ok(row) = serde_json::from_str::<FeatureRow>(line) {
                Self::write_to_shard(&self.cfg, &mut inner.shard, &row)?;
                recovered += 1;
            }
        }
        drop(inner);
        self.truncate_wal().await?;
        if recovered > 0 {
            info!("[FeatureStore] WAL recovery: replayed {recovered} pending events");
        }
        Ok(())
    }

    async fn append_to_wal(&self, row: &FeatureRow) -> anyhow::Result<()> {
        let line = serde_json::to_string(row)? + "\n";
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.cfg.wal_path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }

    async fn truncate_wal(&self) -> anyhow::Result<()> {
        tokio::fs::write(&self.cfg.wal_path, b"").await?;
        Ok(())
    }

    fn date_key(ts: f64) -> String {
        let secs = ts as i64;
        let days = secs.div_euclid(86_400);
        let date = chrono::NaiveDate::from_num_days_from_ce_opt(719_163 + days as i32)
            .unwrap_or(chrono::NaiveDate::from_ymd_opt(1970, 1, 1).unwrap());
        date.format("%Y-%m-%d").to_string()
    }

    fn write_to_shard(cfg: &FeatureStoreConfig, shard: &mut ShardState, row: &FeatureRow) -> anyhow::Result<()> {
        let day_key = Self::date_key(row.ts);
        let needs_new = shard.date_key.as_deref() != Some(day_key.as_str())
            || shard.count >= cfg.max_file_size;
        if needs_new {
            let suffix = if cfg.gzip { "jsonl.gz" } else { "jsonl" };
            let fname = format!("features_{day_key}_{}.{suffix}", crate::core::now_epoch() as i64);
            shard.path = Some(cfg.path.join(fname));
            shard.date_key = Some(day_key);
            shard.count = 0;
        }
        let Some(path) = &shard.path else {
            return Ok(());
        };
        let line = serde_json::to_string(row)? + "\n";
        if cfg.gzip {
            let existing = if path.exists() {
                std::fs::read(path)?
            } else {
                Vec::new()
            };
            let file = std::fs::File::create(path)?;
            let mut encoder = GzEncoder::new(file, Compression::default());
            if !existing.is_empty() {
                let mut decoder = flate2::read::GzDecoder::new(existing.as_slice());
                let mut buf = Vec::new();
                std::io::Read::read_to_end(&mut decoder, &mut buf).ok();
                encoder.write_all(&buf)?;
            }
            encoder.write_all(line.as_bytes())?;
            encoder.finish()?;
        } else {
            let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
            file.write_all(line.as_bytes())?;
        }
        shard.count += 1;
        Ok(())
    }

    /// Generic event recorder; the `record_*` helpers below build the
    /// payload shape for a given kind and call through here.
    pub async fn record_event(&self, kind: &str, payload: serde_json::Value, tags: Vec<String>, ts: Option<f64>) {
        let ts = ts.unwrap_or_else(crate::core::now_epoch);
        let row = FeatureRow {
            kind: kind.to_string(),
            ts,
            payload: payload.clone(),
            tags,
        };

        if let Err(e) = self.append_to_wal(&row).await {
            warn!("[FeatureStore] WAL write failed: {e}");
        }

        let mut inner = self.inner.lock().await;
        if let Some(score) = payload.get("score").and_then(|v| v.as_f64()) {
            inner.rolling.add(score, ts);
        } else if let Some(reward) = payload.get("reward").and_then(|v| v.as_f64()) {
            inner.rolling.add(reward, ts);
        }

        let recents = inner.last_events.entry(kind.to_string()).or_default();
        recents.push(row.clone());
        if recents.len() > LAST_EVENTS_CAP {
            recents.remove(0);
        }

        inner.buffer.push(row);
        let should_flush = inner.buffer.len() >= self.cfg.flush_every;
        drop(inner);
        if should_flush {
            self.flush().await;
        }
    }

    pub async fn record_trade(&self, token: &str, side: &str, score: f64, pnl: f64, strategy: &str, wallet: &str) {
        self.record_event(
            "trade",
            serde_json::json!({
                "token": token, "side": side, "score": score, "pnl": pnl,
                "strategy": strategy, "wallet": wallet,
            }),
            Vec::new(),
            None,
        )
        .await;
    }

    pub async fn record_decision(&self, token: &str, action: &str, final_score: f64, strategy: &str) {
        self.record_event(
            "decision",
            serde_json::json!({ "token": token, "action": action, "final_score": final_score, "strategy": strategy }),
            Vec::new(),
            None,
        )
        .await;
    }

    /// Writes both a `trade` outcome row and a `strategy_weight` reward row
    /// for the bandit, mirroring the teacher's `record_outcome` convenience
    /// method.
    #[allow(clippy::too_many_arguments)]
    pub async fn record_outcome(
        &self,
        token: &str,
        side: &str,
        pnl_pct: f64,
        slip_bps: f64,
        hold_sec: f64,
        arm: &str,
        profile: &str,
        score_at_entry: f64,
    ) {
        let ts = crate::core::now_epoch();
        let reward = normalize_reward(pnl_pct, slip_bps, hold_sec);
        self.record_event(
            "trade",
            serde_json::json!({
                "token": token, "side": side, "score": score_at_entry, "pnl_pct": pnl_pct,
                "slip_bps": slip_bps, "hold_sec": hold_sec, "strategy": arm, "profile": profile,
                "outcome": "closed",
            }),
            Vec::new(),
            Some(ts),
        )
        .await;
        self.record_event(
            "strategy_weight",
            serde_json::json!({
                "strategy": arm, "weight": 1.0, "reward": reward,
                "context": { "token": token, "profile": profile, "pnl_pct": pnl_pct },
            }),
            Vec::new(),
            Some(ts),
        )
        .await;
    }

    pub async fn get_last_events(&self, kind: &str, n: usize) -> Vec<FeatureRow> {
        let inner = self.inner.lock().await;
        match inner.last_events.get(kind) {
            Some(events) => events.iter().rev().take(n).cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Recent rewards for `strategy` within `horizon_s`: consults the
    /// in-memory ring first, then falls back to the last ~6 on-disk shards
    /// for whatever slice of the horizon the ring doesn't cover (spec.md
    /// §4.D) — the case that matters is a freshly restarted process whose
    /// in-memory cache starts empty but whose shards hold the real history.
    pub async fn get_recent_rewards_by_strategy(&self, strategy: &str, horizon_s: f64) -> Vec<f64> {
        let now = crate::core::now_epoch();
        let cutoff = now - horizon_s;
        let inner = self.inner.lock().await;
        let mem_events: Vec<FeatureRow> = inner
            .last_events
            .get("strategy_weight")
            .cloned()
            .unwrap_or_default();
        drop(inner);

        let mut rewards: Vec<f64> = mem_events
            .iter()
            .filter(|e| e.ts >= cutoff && e.payload.get("strategy").and_then(|v| v.as_str()) == Some(strategy))
            .filter_map(|e| e.payload.get("reward").and_then(|v| v.as_f64()))
            .collect();

        let oldest_in_memory_ts = mem_events.iter().map(|e| e.ts).fold(f64::INFINITY, f64::min);
        if oldest_in_memory_ts > cutoff {
            let mut shard_paths = self.list_shard_paths().await;
            let take_from = shard_paths.len().saturating_sub(6);
            for path in shard_paths.split_off(take_from) {
                for row in Self::read_shard_rows(&path) {
                    if row.kind == "strategy_weight"
                        && row.ts >= cutoff
                        && row.ts < oldest_in_memory_ts
                        && row.payload.get("strategy").and_then(|v| v.as_str()) == Some(strategy)
                    {
                        if let Some(r) = row.payload.get("reward").and_then(|v| v.as_f64()) {
                            rewards.push(r);
                        }
                    }
                }
            }
        }

        rewards
    }

    /// Lists this store's shard files (oldest first by filename, which
    /// sorts correctly since each name embeds `YYYY-MM-DD` then a unix
    /// timestamp suffix).
    async fn list_shard_paths(&self) -> Vec<PathBuf> {
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.cfg.path).await {
            Ok(entries) => entries,
            Err(_) => return out,
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with("features_") && (name.ends_with(".jsonl") || name.ends_with(".jsonl.gz")) {
                out.push(entry.path());
            }
        }
        out.sort();
        out
    }

    /// Reads one shard (gzip-aware by extension, same codec `write_to_shard`
    /// writes with) back into rows. Corrupt or unreadable shards yield no
    /// rows rather than failing the whole scan.
    fn read_shard_rows(path: &Path) -> Vec<FeatureRow> {
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(_) => return Vec::new(),
        };
        let is_gz = path.extension().and_then(|e| e.to_str()) == Some("gz");
        let text = if is_gz {
            let mut decoder = flate2::read::GzDecoder::new(bytes.as_slice());
            let mut buf = String::new();
            if std::io::Read::read_to_string(&mut decoder, &mut buf).is_err() {
                return Vec::new();
            }
            buf
        } else {
            match String::from_utf8(bytes) {
                Ok(s) => s,
                Err(_) => return Vec::new(),
            }
        };
        text.lines()
            .filter_map(|line| serde_json::from_str::<FeatureRow>(line).ok())
            .collect()
    }

    pub async fn rolling_stats(&self) -> (usize, f64) {
        let inner = self.inner.lock().await;
        (inner.rolling.count(), inner.rolling.mean())
    }

    pub async fn flush(&self) {
        let mut inner = self.inner.lock().await;
        if inner.buffer.is_empty() {
            return;
        }
        let events = std::mem::take(&mut inner.buffer);
        for row in &events {
            if let Err(e) = Self::write_to_shard(&self.cfg, &mut inner.shard, row) {
                warn!("[FeatureStore] shard write failed: {e}");
            }
        }
        drop(inner);
        if let Err(e) = self.truncate_wal().await {
            warn!("[FeatureStore] WAL truncate failed: {e}");
        }
    }

    /// Deletes shards older than `max_days`, run from the same background
    /// loop that drives periodic flush (spec.md §4.D).
    pub async fn prune_old_shards(&self) -> anyhow::Result<usize> {
        let cutoff_days = crate::core::now_epoch() as i64 / 86_400 - self.cfg.max_days;
        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.cfg.path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with("features_") {
                continue;
            }
            let Some(date_part) = name.split('_').nth(1) else {
                continue;
            };
            if let Ok(date) = chrono::NaiveDate::parse_from_str(date_part, "%Y-%m-%d") {
                let days_since_ce = date.num_days_from_ce() as i64 - 719_163;
                if days_since_ce < cutoff_days {
                    tokio::fs::remove_file(entry.path()).await?;
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    pub fn shard_dir(&self) -> &Path {
        &self.cfg.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reward_shaping_saturates_and_clamps() {
        let r = normalize_reward(600.0, 0.0, 0.0);
        assert!((r - 1.0).abs() < 1e-6);
        let r_neg = normalize_reward(-600.0, 0.0, 0.0);
        assert!((r_neg + 1.0).abs() < 1e-6);
    }

    #[test]
    fn slippage_penalizes_reward() {
        let clean = normalize_reward(3.0, 0.0, 0.0);
        let slipped = normalize_reward(3.0, 200.0, 0.0);
        assert!(slipped < clean);
    }

    #[tokio::test]
    async fn record_and_flush_writes_a_shard_file() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = FeatureStoreConfig {
            path: dir.path().to_path_buf(),
            wal_path: dir.path().join("_wal.jsonl"),
            gzip: false,
            ..FeatureStoreConfig::default()
        };
        let store = FeatureStore::new(cfg).await.unwrap();
        store
            .record_event("signal", serde_json::json!({"score": 0.5}), vec![], None)
            .await;
        store.flush().await;
        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        let mut found = false;
        while let Some(e) = entries.next_entry().await.unwrap() {
            if e.file_name().to_string_lossy().starts_with("features_") {
                found = true;
            }
        }
        assert!(found);
    }

    #[tokio::test]
    async fn get_recent_rewards_filters_by_strategy_and_horizon() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = FeatureStoreConfig {
            path: dir.path().to_path_buf(),
            wal_path: dir.path().join("_wal.jsonl"),
            gzip: false,
            ..FeatureStoreConfig::default()
        };
        let store = FeatureStore::new(cfg).await.unwrap();
        store
            .record_outcome("TokenA", "buy", 3.0, 10.0, 60.0, "balanced", "snipe", 50.0)
            .await;
        store
            .record_outcome("TokenB", "buy", -2.0, 10.0, 60.0, "aggressive", "snipe", 50.0)
            .await;
        let rewards = store.get_recent_rewards_by_strategy("balanced", 86_400.0).await;
        assert_eq!(rewards.len(), 1);
    }

    #[tokio::test]
    async fn get_recent_rewards_falls_back_to_disk_shards_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = FeatureStoreConfig {
            path: dir.path().to_path_buf(),
            wal_path: dir.path().join("_wal.jsonl"),
            gzip: false,
            ..FeatureStoreConfig::default()
        };
        {
            let store = FeatureStore::new(cfg.clone()).await.unwrap();
            store
                .record_outcome("TokenA", "buy", 3.0, 10.0, 60.0, "balanced", "snipe", 50.0)
                .await;
            store.flush().await;
        }
        // Fresh store over the same directory: in-memory ring starts empty,
        // WAL was truncated by the prior flush, so the only copy of the
        // reward left is on disk.
        let restarted = FeatureStore::new(cfg).await.unwrap();
        let rewards = restarted.get_recent_rewards_by_strategy("balanced", 86_400.0).await;
        assert_eq!(rewards.len(), 1);
        assert!((rewards[0] - normalize_reward(3.0, 10.0, 60.0)).abs() < 1e-9);
    }
}
