//! Core data entities shared across the ingestion, librarian, scoring,
//! bandit and executor subsystems. See SPEC_FULL.md §3.

use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};

/// Clamp a score (or any bounded quantity) into `[lo, hi]`.
pub fn clamp(v: f64, lo: f64, hi: f64) -> f64 {
    if v < lo {
        lo
    } else if v > hi {
        hi
    } else {
        v
    }
}

/// Validate a Solana-like base58 address: 32-44 chars, valid base58 alphabet.
/// Every mint/wallet/signature is checked with this before indexing or
/// subscription (spec.md §3 Invariants).
pub fn is_valid_base58_address(s: &str) -> bool {
    if s.len() < 32 || s.len() > 44 {
        return false;
    }
    bs58::decode(s).into_vec().is_ok()
}

/// A single decoded trade, the unit the firehose listener produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeEvent {
    pub token_mint: String,
    pub ts: f64,
    pub price: f64,
    pub amount: f64,
}

/// One OHLCV bar for a (token, interval) pair.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Bar {
    pub bucket_start: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub trades: u32,
}

impl Bar {
    pub fn new(bucket_start: i64, price: f64, volume: f64) -> Self {
        Self {
            bucket_start,
            open: price,
            high: price,
            low: price,
            close: price,
            volume,
            trades: 1,
        }
    }

    pub fn push(&mut self, price: f64, volume: f64) {
        if price > self.high {
            self.high = price;
        }
        if price < self.low {
            self.low = price;
        }
        self.close = price;
        self.volume += volume;
        self.trades += 1;
    }

    /// Invariant from spec.md §3: `low <= open,close <= high`, `volume >= 0`.
    pub fn is_consistent(&self) -> bool {
        self.low <= self.open
            && self.low <= self.close
            && self.open <= self.high
            && self.close <= self.high
            && self.volume >= 0.0
    }
}

/// A bounded FIFO ring, default capacity 500 (token/wallet event history).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundedRing<T> {
    cap: usize,
    items: VecDeque<T>,
}

impl<T> BoundedRing<T> {
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            items: VecDeque::with_capacity(cap.min(1024)),
        }
    }

    pub fn push(&mut self, item: T) {
        if self.items.len() >= self.cap {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// A token seen by the librarian, mutated by ingestion and read by scorers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    pub mint: String,
    pub tags: HashSet<String>,
    pub scanners: HashSet<String>,
    pub meta: serde_json::Map<String, serde_json::Value>,
    pub events: BoundedRing<SignalEvent>,
    pub last_ts: f64,
    pub scores: Vec<f64>,
    pub first_seen_ts: f64,
}

impl TokenRecord {
    pub fn new(mint: impl Into<String>, ts: f64) -> Self {
        Self {
            mint: mint.into(),
            tags: HashSet::new(),
            scanners: HashSet::new(),
            meta: serde_json::Map::new(),
            events: BoundedRing::new(500),
            last_ts: ts,
            scores: Vec::new(),
            first_seen_ts: ts,
        }
    }

    pub fn age_seconds(&self, now: f64) -> f64 {
        (now - self.first_seen_ts).max(0.0)
    }
}

/// A wallet seen by the librarian. Same semantics as `TokenRecord`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletRecord {
    pub address: String,
    pub tags: HashSet<String>,
    pub clusters: HashSet<String>,
    pub meta: serde_json::Map<String, serde_json::Value>,
    pub events: BoundedRing<SignalEvent>,
    pub last_ts: f64,
}

impl WalletRecord {
    pub fn new(address: impl Into<String>, ts: f64) -> Self {
        Self {
            address: address.into(),
            tags: HashSet::new(),
            clusters: HashSet::new(),
            meta: serde_json::Map::new(),
            events: BoundedRing::new(500),
            last_ts: ts,
        }
    }
}

/// A normalized signal archived by the librarian to
/// `<genre>/YYYY/MM/DD.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalEvent {
    pub kind: String,
    pub ts: f64,
    pub payload: serde_json::Value,
    pub tags: Vec<String>,
    pub genre: String,
    pub topics: Vec<String>,
    pub token: Option<String>,
    pub wallet: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PositionStatus {
    Holding,
    Closed,
}

/// An open (or recently closed) holding, owned exclusively by the executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub wallet: String,
    pub token: String,
    pub amount: f64,
    pub entry_price: f64,
    pub entry_ts: f64,
    pub strategy_id: String,
    pub status: PositionStatus,
    pub lp_accounts: HashSet<String>,
}

/// Per-position trailing state, owned exclusively by the auto-sell monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrailingState {
    pub peak: f64,
    pub anchor_price: f64,
    pub prices: BoundedRing<f64>,
    pub timestamps: BoundedRing<f64>,
    pub breakeven_lift_done: bool,
    pub started_at: f64,
}

impl TrailingState {
    pub fn new(anchor_price: f64, started_at: f64) -> Self {
        let mut prices = BoundedRing::new(500);
        let mut timestamps = BoundedRing::new(500);
        prices.push(anchor_price);
        timestamps.push(started_at);
        Self {
            peak: anchor_price,
            anchor_price,
            prices,
            timestamps,
            breakeven_lift_done: false,
            started_at,
        }
    }
}

/// A single row in the Feature Store; immutable after write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureRow {
    pub kind: String,
    pub ts: f64,
    pub payload: serde_json::Value,
    pub tags: Vec<String>,
}

/// One arm tracked by the contextual bandit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanditArm {
    pub name: String,
    pub pulls: u64,
    pub total_reward: f64,
    pub mean_reward: f64,
    pub m2: f64,
    pub last_updated: f64,
}

impl BanditArm {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pulls: 0,
            total_reward: 0.0,
            mean_reward: 0.0,
            m2: 0.0,
            last_updated: 0.0,
        }
    }

    /// Welford's online mean/variance update.
    pub fn update(&mut self, reward: f64, now: f64) {
        self.pulls += 1;
        self.total_reward += reward;
        let delta = reward - self.mean_reward;
        self.mean_reward += delta / self.pulls as f64;
        let delta2 = reward - self.mean_reward;
        self.m2 += delta * delta2;
        self.last_updated = now;
    }

    pub fn variance(&self) -> f64 {
        if self.pulls > 1 {
            self.m2 / (self.pulls as f64 - 1.0)
        } else {
            1.0
        }
    }

    pub fn std(&self) -> f64 {
        self.variance().sqrt()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Decision {
    Enter,
    Skip,
    Exit,
}

/// A single causal-layer record: what the agent decided, and (once known)
/// what happened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub id: String,
    pub ts: f64,
    pub token: String,
    pub decision: Decision,
    pub confidence: f64,
    pub fused_score: f64,
    pub signals: serde_json::Map<String, serde_json::Value>,
    pub outcome: Option<String>,
    pub pnl: Option<f64>,
    pub hold_s: Option<f64>,
}

/// Gates/weights/thresholds/dynamic/sizing configuration identified by
/// `(mode, name)`, e.g. `snipe.t0_liquidity`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyProfile {
    pub mode: String,
    pub name: String,
    pub gates: GateConfig,
    pub weights: std::collections::HashMap<String, f64>,
    pub bands: BandThresholds,
    pub dynamic: DynamicAdjustments,
    pub sizing: SizingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    pub max_honeypot_similarity: f64,
    pub require_lp_lock: bool,
    pub max_tax_bps: u32,
    pub max_spread_pct: f64,
    pub max_slippage_pct: f64,
    pub min_depth_sol: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_honeypot_similarity: 0.85,
            require_lp_lock: true,
            max_tax_bps: 1000,
            max_spread_pct: 5.0,
            max_slippage_pct: 5.0,
            min_depth_sol: 5.0,
        }
    }
}

/// Bands are ordered: `ignore_max < watch_max <= effective_buy_min <=
/// buy_max < agg_max < 100` (spec.md §3 Invariants).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BandThresholds {
    pub ignore_max: f64,
    pub watch_max: f64,
    pub buy_min: f64,
    pub buy_max: f64,
    pub agg_max: f64,
    pub probe_split: bool,
}

impl BandThresholds {
    /// Checked after every relief application (spec.md §8 band monotonicity).
    pub fn is_monotonic(&self, effective_buy_min: f64) -> bool {
        self.ignore_max < self.watch_max
            && self.watch_max <= effective_buy_min
            && effective_buy_min <= self.buy_max
            && self.buy_max < self.agg_max
            && self.agg_max < 100.0
    }
}

impl Default for BandThresholds {
    fn default() -> Self {
        Self {
            ignore_max: 20.0,
            watch_max: 40.0,
            buy_min: 50.0,
            buy_max: 75.0,
            agg_max: 90.0,
            probe_split: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DynamicAdjustments {
    pub early_window_s: f64,
    pub early_relief: f64,
    pub trusted_source_relief: f64,
    pub bundle_launch_penalty: f64,
}

impl Default for DynamicAdjustments {
    fn default() -> Self {
        Self {
            early_window_s: 60.0,
            early_relief: 8.0,
            trusted_source_relief: 5.0,
            bundle_launch_penalty: 12.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SizingConfig {
    pub size_mult_min: f64,
    pub size_mult_max: f64,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            size_mult_min: 0.25,
            size_mult_max: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ActionBand {
    Ignore,
    Watch,
    Probe,
    Buy,
    AggressiveBuy,
    Auto,
}

impl std::fmt::Display for ActionBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ActionBand::Ignore => "ignore",
            ActionBand::Watch => "watch",
            ActionBand::Probe => "probe",
            ActionBand::Buy => "buy",
            ActionBand::AggressiveBuy => "aggressive_buy",
            ActionBand::Auto => "auto",
        };
        write!(f, "{s}")
    }
}

/// A concrete execution plan attached to a buy-side band.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variant {
    pub id: String,
    pub size: f64,
    pub ladder: u8,
    pub route: String,
    pub arm: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base58_length_bounds() {
        assert!(!is_valid_base58_address("short"));
        assert!(!is_valid_base58_address(&"1".repeat(45)));
        assert!(is_valid_base58_address(
            "11111111111111111111111111111111"
        ));
    }

    #[test]
    fn bar_tracks_high_low_and_stays_consistent() {
        let mut bar = Bar::new(0, 1.0, 10.0);
        bar.push(1.5, 5.0);
        bar.push(0.8, 3.0);
        assert_eq!(bar.high, 1.5);
        assert_eq!(bar.low, 0.8);
        assert_eq!(bar.volume, 18.0);
        assert!(bar.is_consistent());
    }

    #[test]
    fn bounded_ring_evicts_oldest() {
        let mut ring: BoundedRing<i32> = BoundedRing::new(3);
        for i in 0..5 {
            ring.push(i);
        }
        let items: Vec<_> = ring.iter().copied().collect();
        assert_eq!(items, vec![2, 3, 4]);
    }

    #[test]
    fn band_thresholds_default_is_monotonic() {
        let b = BandThresholds::default();
        assert!(b.is_monotonic(b.buy_min));
    }

    #[test]
    fn bandit_arm_welford_matches_simple_mean() {
        let mut arm = BanditArm::new("balanced");
        arm.update(1.0, 0.0);
        arm.update(-1.0, 1.0);
        arm.update(0.5, 2.0);
        assert!((arm.mean_reward - (1.0 - 1.0 + 0.5) / 3.0).abs() < 1e-9);
    }
}
