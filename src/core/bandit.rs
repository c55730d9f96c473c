//! Contextual bandit: global strategy-arm selector plus per-band execution
//! variant mapping. Grounded on spec.md §4.G and
//! `original_source/tpu/scoring/contextual_bandit.py` (UCB1/Thompson
//! selection, Welford update, warmup-by-cold-arm).

use crate::core::feature_store::FeatureStore;
use crate::core::models::{clamp, ActionBand, BanditArm, StrategyProfile, Variant};
use crate::core::telemetry::CoreTelemetry;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BanditPolicy {
    Ucb1,
    Thompson,
}

#[derive(Debug, Clone)]
pub struct BanditConfig {
    pub policy: BanditPolicy,
    pub arms: Vec<String>,
    pub min_pulls: u64,
    pub reward_horizon_s: f64,
    pub refresh_s: u64,
    /// `None` disables the epsilon-greedy override.
    pub epsilon: Option<f64>,
    pub clip_min: f64,
    pub clip_max: f64,
    pub snapshot_path: PathBuf,
}

impl Default for BanditConfig {
    fn default() -> Self {
        Self {
            policy: BanditPolicy::Ucb1,
            arms: vec!["conservative".to_string(), "balanced".to_string(), "aggressive".to_string()],
            min_pulls: 5,
            reward_horizon_s: 3 * 3600.0,
            refresh_s: 30,
            epsilon: Some(0.05),
            clip_min: -1.0,
            clip_max: 1.0,
            snapshot_path: PathBuf::from("runtime/library/bandit/bandit_state.json"),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct BanditSnapshot {
    arms: HashMap<String, BanditArm>,
}

struct Inner {
    arms: HashMap<String, BanditArm>,
    /// Number of reward samples already folded in per arm from the Feature
    /// Store, so `sync_from_feature_store` never double-applies a reward.
    synced_counts: HashMap<String, usize>,
}

/// Global strategy-arm selector. One instance per process; arms are
/// registered once at construction (spec.md §3 bandit-arm lifecycle: "created
/// once per configured strategy").
pub struct ContextualBandit {
    cfg: BanditConfig,
    inner: Mutex<Inner>,
    telemetry: Option<std::sync::Arc<CoreTelemetry>>,
}

impl ContextualBandit {
    pub fn new(cfg: BanditConfig) -> Self {
        let arms = cfg
            .arms
            .iter()
            .map(|name| (name.clone(), BanditArm::new(name.clone())))
            .collect();
        let synced_counts = cfg.arms.iter().map(|name| (name.clone(), 0)).collect();
        Self {
            cfg,
            inner: Mutex::new(Inner { arms, synced_counts }),
            telemetry: None,
        }
    }

    /// Attaches process-wide telemetry counters; every realized reward
    /// increments the bandit-pulls gauge (spec.md §3).
    pub fn with_telemetry(mut self, telemetry: std::sync::Arc<CoreTelemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Loads a previously snapshotted state, replacing the freshly
    /// constructed arms (spec.md §4.G "replaceable on startup"). Missing or
    /// corrupt snapshots fall back silently to the cold-start arms.
    pub async fn load_snapshot(&self) {
        let Ok(bytes) = tokio::fs::read(&self.cfg.snapshot_path).await else {
            return;
        };
        match serde_json::from_slice::<BanditSnapshot>(&bytes) {
            Ok(snapshot) => {
                let mut inner = self.inner.lock().await;
                for (name, arm) in snapshot.arms {
                    inner.arms.insert(name, arm);
                }
                info!("[ContextualBandit] loaded snapshot from {}", self.cfg.snapshot_path.display());
            }
            Err(e) => {
                warn!("[ContextualBandit] snapshot corrupt, keeping cold-start arms: {e}");
            }
        }
    }

    async fn save_snapshot(&self) {
        let Some(parent) = self.cfg.snapshot_path.parent() else {
            return;
        };
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            warn!("[ContextualBandit] could not create snapshot dir: {e}");
            return;
        }
        let inner = self.inner.lock().await;
        let snapshot = BanditSnapshot {
            arms: inner.arms.clone(),
        };
        drop(inner);
        match serde_json::to_vec_pretty(&snapshot) {
            Ok(bytes) => {
                let tmp = self.cfg.snapshot_path.with_extension("json.tmp");
                if tokio::fs::write(&tmp, &bytes).await.is_ok() {
                    let _ = tokio::fs::rename(&tmp, &self.cfg.snapshot_path).await;
                }
            }
            Err(e) => warn!("[ContextualBandit] snapshot serialize failed: {e}"),
        }
    }

    /// Select an arm (spec.md §4.G). During warmup (any arm with
    /// `pulls < min_pulls`), selection is uniform random over the cold arms
    /// only — UCB1/Thompson never run until every arm has been pulled
    /// `min_pulls` times.
    pub async fn select_arm(&self) -> String {
        let inner = self.inner.lock().await;
        let cold: Vec<&String> = inner
            .arms
            .iter()
            .filter(|(_, a)| a.pulls < self.cfg.min_pulls)
            .map(|(name, _)| name)
            .collect();
        if !cold.is_empty() {
            let idx = rand::thread_rng().gen_range(0..cold.len());
            return cold[idx].clone();
        }

        if let Some(eps) = self.cfg.epsilon {
            if rand::thread_rng().gen::<f64>() < eps {
                let names: Vec<&String> = inner.arms.keys().collect();
                let idx = rand::thread_rng().gen_range(0..names.len());
                return names[idx].clone();
            }
        }

        match self.cfg.policy {
            BanditPolicy::Ucb1 => self.select_ucb1(&inner),
            BanditPolicy::Thompson => self.select_thompson(&inner),
        }
    }

    fn select_ucb1(&self, inner: &Inner) -> String {
        let total_pulls: u64 = inner.arms.values().map(|a| a.pulls).sum::<u64>().max(1);
        let ln_n = (total_pulls as f64).ln();
        inner
            .arms
            .values()
            .max_by(|a, b| {
                let score_a = a.mean_reward + (2.0 * ln_n / a.pulls.max(1) as f64).sqrt();
                let score_b = b.mean_reward + (2.0 * ln_n / b.pulls.max(1) as f64).sqrt();
                score_a.partial_cmp(&score_b).unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|a| a.name.clone())
            .unwrap_or_default()
    }

    fn select_thompson(&self, inner: &Inner) -> String {
        let mut rng = rand::thread_rng();
        inner
            .arms
            .values()
            .map(|a| {
                let spread = a.std() / ((a.pulls as f64 + 1.0).sqrt());
                let sample = a.mean_reward + spread * sample_standard_normal(&mut rng);
                (a.name.clone(), sample)
            })
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(name, _)| name)
            .unwrap_or_default()
    }

    /// Feed a realized reward into an arm, clamped to `[clip_min, clip_max]`
    /// (spec.md §3 invariant). Snapshots to JSON after every update.
    pub async fn record_reward(&self, arm: &str, reward: f64, now: f64) {
        let clamped = clamp(reward, self.cfg.clip_min, self.cfg.clip_max);
        {
            let mut inner = self.inner.lock().await;
            let entry = inner
                .arms
                .entry(arm.to_string())
                .or_insert_with(|| BanditArm::new(arm.to_string()));
            entry.update(clamped, now);
        }
        if let Some(t) = &self.telemetry {
            t.record_bandit_pull();
        }
        self.save_snapshot().await;
    }

    /// Pulls any rewards recorded since the last sync for each arm out of
    /// the Feature Store and folds them in (spec.md §4.G "Sync from Feature
    /// Store pulls any new rewards per arm since last seen count").
    pub async fn sync_from_feature_store(&self, store: &FeatureStore, now: f64) {
        let arm_names: Vec<String> = {
            let inner = self.inner.lock().await;
            inner.arms.keys().cloned().collect()
        };
        for arm in arm_names {
            let rewards = store
                .get_recent_rewards_by_strategy(&arm, self.cfg.reward_horizon_s)
                .await;
            let mut inner = self.inner.lock().await;
            let already_synced = *inner.synced_counts.get(&arm).unwrap_or(&0);
            if rewards.len() <= already_synced {
                continue;
            }
            let fresh = &rewards[already_synced..];
            let entry = inner
                .arms
                .entry(arm.clone())
                .or_insert_with(|| BanditArm::new(arm.clone()));
            let fresh_count = fresh.len();
            for reward in fresh {
                entry.update(clamp(*reward, self.cfg.clip_min, self.cfg.clip_max), now);
            }
            inner.synced_counts.insert(arm.clone(), rewards.len());
            drop(inner);
            if let Some(t) = &self.telemetry {
                for _ in 0..fresh_count {
                    t.record_bandit_pull();
                }
            }
        }
        self.save_snapshot().await;
    }

    pub async fn arm_snapshot(&self, name: &str) -> Option<BanditArm> {
        self.inner.lock().await.arms.get(name).cloned()
    }

    pub async fn all_arms(&self) -> Vec<BanditArm> {
        self.inner.lock().await.arms.values().cloned().collect()
    }

    /// Picks an execution variant for a buy-side band using `arm` as the
    /// learned strategy name. Never changes the band; only fills in size,
    /// ladder and route, each defensively capped to the profile's sizing
    /// config even though the catalog below is already in-range (spec.md
    /// §4.G variant-mapping invariant).
    pub async fn choose_variant(&self, band: ActionBand, profile: &StrategyProfile) -> Option<Variant> {
        if matches!(band, ActionBand::Ignore | ActionBand::Watch) {
            return None;
        }
        let arm = self.select_arm().await;
        let (size_frac, ladder, route): (f64, u8, &str) = match band {
            ActionBand::Probe => (0.0, 1, "aggregator"),
            ActionBand::Buy | ActionBand::Auto => (0.5, 2, "aggregator"),
            ActionBand::AggressiveBuy => (1.0, 3, "direct_amm"),
            ActionBand::Ignore | ActionBand::Watch => unreachable!(),
        };
        let size = clamp(
            profile.sizing.size_mult_min + (profile.sizing.size_mult_max - profile.sizing.size_mult_min) * size_frac,
            profile.sizing.size_mult_min,
            profile.sizing.size_mult_max,
        );
        Some(Variant {
            id: format!("{}_{}", profile.name, band),
            size,
            ladder: ladder.clamp(1, 3),
            route: route.to_string(),
            arm,
        })
    }
}

/// Box-Muller transform for a standard normal sample; `rand_distr` is not a
/// teacher dependency, so Thompson sampling draws its own Gaussian here.
fn sample_standard_normal(rng: &mut impl Rng) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}
