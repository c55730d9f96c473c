//! Auto-Sell Monitor: one trailing-stop task per open position. Grounded on
//! spec.md §4.I and `original_source/tpu/exec/auto_sell_logic.py`
//! (dynamic trailing drop, RSI/EMA exhaustion checks, breakeven lift). This
//! is the busiest loop in the whole runtime — every position gets its own
//! task, bounded by a semaphore so a pile of simultaneous fills can't starve
//! the executor of RPC bandwidth.

use crate::core::executor::TradeExecutor;
use crate::core::feature_store::FeatureStore;
use crate::core::insights::InsightLog;
use crate::core::librarian::RugRegistry;
use crate::core::models::{clamp, Position, TrailingState};
use crate::core::rpc::PriceSource;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy)]
pub struct AutoSellConfig {
    pub tick_interval_s: f64,
    pub max_concurrent: usize,
    pub base_trailing_stop_pct: f64,
    pub trigger_pct: f64,
    pub volatility_cap_pct: f64,
    pub floor_mult: f64,
    pub breakeven_trigger_pct: f64,
    pub rsi_period: usize,
    pub rsi_overbought: f64,
    pub ema_period: usize,
    pub ema_rollover_len: usize,
    pub max_hold_s: f64,
    pub min_profit_pct: f64,
    pub max_loss_pct: f64,
    pub rug_drop_pct: f64,
    pub rug_window_s: f64,
    pub honeypot_fail_threshold: u32,
}

impl Default for AutoSellConfig {
    fn default() -> Self {
        Self {
            tick_interval_s: 2.0,
            max_concurrent: 10,
            base_trailing_stop_pct: 0.12,
            trigger_pct: 0.20,
            volatility_cap_pct: 0.25,
            floor_mult: 0.6,
            breakeven_trigger_pct: 0.05,
            rsi_period: 14,
            rsi_overbought: 70.0,
            ema_period: 10,
            ema_rollover_len: 3,
            max_hold_s: 4.0 * 3600.0,
            min_profit_pct: 0.25,
            max_loss_pct: 0.15,
            rug_drop_pct: 0.5,
            rug_window_s: 20.0,
            honeypot_fail_threshold: 3,
        }
    }
}

/// Volatility-scaled trailing drop: `pstdev(recent)/min(recent)`, clamped
/// between `base*floor_mult` and `volatility_cap_pct` (spec.md §4.I).
pub(crate) fn dynamic_drop_pct(base: f64, cap: f64, floor_mult: f64, recent: &[f64]) -> f64 {
    if recent.len() < 2 {
        return base;
    }
    let mean = recent.iter().sum::<f64>() / recent.len() as f64;
    let variance = recent.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / recent.len() as f64;
    let pstdev = variance.sqrt();
    let min_price = recent.iter().cloned().fold(f64::INFINITY, f64::min).max(1e-12);
    let vol_ratio = pstdev / min_price;
    clamp(vol_ratio, base * floor_mult, cap)
}

/// Classic RSI over the trailing `period` deltas. `None` until enough
/// samples have accumulated.
pub(crate) fn rsi(prices: &[f64], period: usize) -> Option<f64> {
    if prices.len() < period + 1 {
        return None;
    }
    let window = &prices[prices.len() - period - 1..];
    let mut gain_sum = 0.0;
    let mut loss_sum = 0.0;
    for pair in window.windows(2) {
        let diff = pair[1] - pair[0];
        if diff > 0.0 {
            gain_sum += diff;
        } else {
            loss_sum += -diff;
        }
    }
    let avg_gain = gain_sum / period as f64;
    let avg_loss = loss_sum / period as f64;
    if avg_loss == 0.0 {
        return Some(100.0);
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// EMA over the whole price series (not just the tail), so the rollover
/// check below can compare consecutive smoothed values.
pub(crate) fn ema_series(prices: &[f64], period: usize) -> Vec<f64> {
    if prices.is_empty() {
        return Vec::new();
    }
    let k = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(prices.len());
    out.push(prices[0]);
    for &p in &prices[1..] {
        let prev = *out.last().unwrap();
        out.push(k * p + (1.0 - k) * prev);
    }
    out
}

/// Folds one fresh price into the trailing state and runs every exit check
/// in spec order: rug, trailing stop, breakeven stop, RSI fade, EMA
/// rollover, time exit. Honeypot detection lives outside this function
/// since it reacts to fetch failures, not a price value. Pure and
/// deterministic so it can be unit tested without any async plumbing.
pub(crate) fn tick_state(cfg: &AutoSellConfig, state: &mut TrailingState, price: f64, now: f64) -> Option<&'static str> {
    state.prices.push(price);
    state.timestamps.push(now);
    if price > state.peak {
        state.peak = price;
    }

    let prices: Vec<f64> = state.prices.iter().copied().collect();
    let timestamps: Vec<f64> = state.timestamps.iter().copied().collect();

    let window_peak = timestamps
        .iter()
        .zip(prices.iter())
        .filter(|(t, _)| now - **t <= cfg.rug_window_s)
        .map(|(_, p)| *p)
        .fold(None, |acc: Option<f64>, p| Some(acc.map_or(p, |a: f64| a.max(p))));
    if let Some(window_peak) = window_peak {
        if window_peak > 0.0 && (window_peak - price) / window_peak >= cfg.rug_drop_pct {
            return Some("rug_detected");
        }
    }

    let change = if state.anchor_price > 0.0 {
        (price - state.anchor_price) / state.anchor_price
    } else {
        0.0
    };

    if change <= -cfg.max_loss_pct {
        return Some("stop_loss_triggered");
    }

    let drop_from_peak = if state.peak > 0.0 { (state.peak - price) / state.peak } else { 0.0 };
    let dynamic_drop = dynamic_drop_pct(cfg.base_trailing_stop_pct, cfg.volatility_cap_pct, cfg.floor_mult, &prices);
    if change >= cfg.trigger_pct && drop_from_peak >= dynamic_drop {
        return Some("trailing_stop_triggered");
    }

    if !state.breakeven_lift_done && price >= state.anchor_price * (1.0 + cfg.breakeven_trigger_pct) {
        state.anchor_price = state.anchor_price.min(price * 0.995);
        state.breakeven_lift_done = true;
    }
    if state.breakeven_lift_done && price <= state.anchor_price {
        return Some("breakeven_stop_triggered");
    }

    if prices.len() > cfg.rsi_period + 1 {
        if let (Some(rsi_now), Some(rsi_prev)) = (rsi(&prices, cfg.rsi_period), rsi(&prices[..prices.len() - 1], cfg.rsi_period)) {
            if rsi_now > cfg.rsi_overbought && rsi_now < rsi_prev {
                return Some("rsi_fade_exit");
            }
        }
    }

    let ema_vals = ema_series(&prices, cfg.ema_period);
    if ema_vals.len() >= cfg.ema_rollover_len {
        let tail = &ema_vals[ema_vals.len() - cfg.ema_rollover_len..];
        if tail.windows(2).all(|w| w[1] < w[0]) {
            return Some("ema_rollover_exit");
        }
    }

    if now - state.started_at >= cfg.max_hold_s && change >= cfg.min_profit_pct {
        return Some("time_exit");
    }

    None
}

type TrailingMap = HashMap<(String, String), TrailingState>;

/// Removes a position's trailing state even if its monitor task is
/// cancelled mid-await: the removal is spawned as a detached task on drop
/// rather than attempted synchronously, since the map is behind an async
/// mutex (spec.md §7 cancellation-safety requirement).
struct TrailingGuard {
    trailing: Arc<Mutex<TrailingMap>>,
    key: (String, String),
}

impl Drop for TrailingGuard {
    fn drop(&mut self) {
        let trailing = self.trailing.clone();
        let key = self.key.clone();
        tokio::spawn(async move {
            trailing.lock().await.remove(&key);
        });
    }
}

pub struct AutoSellMonitor {
    cfg: AutoSellConfig,
    executor: Arc<TradeExecutor>,
    price_source: Arc<dyn PriceSource>,
    feature_store: Arc<FeatureStore>,
    insights: Arc<InsightLog>,
    rug_registry: Arc<RugRegistry>,
    trailing: Arc<Mutex<TrailingMap>>,
    semaphore: Arc<Semaphore>,
}

impl AutoSellMonitor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: AutoSellConfig,
        executor: Arc<TradeExecutor>,
        price_source: Arc<dyn PriceSource>,
        feature_store: Arc<FeatureStore>,
        insights: Arc<InsightLog>,
        rug_registry: Arc<RugRegistry>,
    ) -> Arc<Self> {
        let max_concurrent = cfg.max_concurrent;
        Arc::new(Self {
            cfg,
            executor,
            price_source,
            feature_store,
            insights,
            rug_registry,
            trailing: Arc::new(Mutex::new(HashMap::new())),
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
        })
    }

    /// Drains the executor's fill channel for the lifetime of the process,
    /// spawning one trailing-stop task per position (spec.md §4.H/§4.I
    /// hand-off: "executor owns positions; auto-sell owns trailing state").
    pub async fn run_dispatcher(self: Arc<Self>, mut fills: mpsc::Receiver<Position>) {
        while let Some(position) = fills.recv().await {
            self.clone().spawn_monitor(position).await;
        }
    }

    /// Starts a trailing-stop task for a fresh position. Idempotent per
    /// `(wallet, token)`: a second call while a monitor for the same key is
    /// still running is a no-op rather than a duplicate task racing the
    /// first one to exit the position (spec.md §7).
    pub async fn spawn_monitor(self: Arc<Self>, position: Position) {
        let key = (position.wallet.clone(), position.token.clone());
        {
            let mut trailing = self.trailing.lock().await;
            if trailing.contains_key(&key) {
                warn!("[AutoSellMonitor] monitor already running for {}/{}, ignoring duplicate fill", key.0, key.1);
                return;
            }
            let state = TrailingState::new(position.entry_price, crate::core::now_epoch());
            trailing.insert(key.clone(), state);
        }
        let permit = match self.semaphore.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => {
                self.trailing.lock().await.remove(&key);
                return;
            }
        };
        tokio::spawn(async move {
            let _permit = permit;
            let _guard = TrailingGuard {
                trailing: self.trailing.clone(),
                key: key.clone(),
            };
            self.monitor_loop(&position, &key).await;
        });
    }

    async fn monitor_loop(&self, position: &Position, key: &(String, String)) {
        let mut consecutive_failures = 0u32;
        loop {
            tokio::time::sleep(std::time::Duration::from_secs_f64(self.cfg.tick_interval_s)).await;

            let price = match self.price_source.current_price(&position.token).await {
                Ok(p) => {
                    consecutive_failures = 0;
                    p
                }
                Err(e) => {
                    consecutive_failures += 1;
                    warn!(
                        "[AutoSellMonitor] price fetch failed for {} ({consecutive_failures}/{}): {e}",
                        position.token, self.cfg.honeypot_fail_threshold
                    );
                    if consecutive_failures >= self.cfg.honeypot_fail_threshold {
                        self.exit_position(position, "honeypot_detected").await;
                        return;
                    }
                    continue;
                }
            };

            let now = crate::core::now_epoch();
            let unrealized_pnl_pct = if position.entry_price > 0.0 {
                (price - position.entry_price) / position.entry_price * 100.0
            } else {
                0.0
            };
            self.feature_store
                .record_event(
                    "pnl_snapshot",
                    serde_json::json!({
                        "token": position.token, "wallet": position.wallet,
                        "price": price, "unrealized_pnl_pct": unrealized_pnl_pct,
                    }),
                    Vec::new(),
                    Some(now),
                )
                .await;

            let reason = {
                let mut trailing = self.trailing.lock().await;
                let Some(state) = trailing.get_mut(key) else {
                    return;
                };
                tick_state(&self.cfg, state, price, now)
            };
            if let Some(reason) = reason {
                self.exit_position(position, reason).await;
                return;
            }
        }
    }

    async fn exit_position(&self, position: &Position, reason: &str) {
        if matches!(reason, "rug_detected" | "honeypot_detected") {
            self.rug_registry
                .register_rug_event(&position.token, reason, crate::core::now_epoch())
                .await;
        }
        self.insights
            .log(
                "auto_sell_exit",
                &position.token,
                format!("exit reason={reason}"),
                serde_json::json!({ "wallet": position.wallet }),
            )
            .await;
        match self.executor.sell_token(&position.token, None, Some(&position.wallet), reason).await {
            Some(outcome) => info!("[AutoSellMonitor] exited {} pnl={:.4} reason={reason}", position.token, outcome.pnl),
            None => warn!("[AutoSellMonitor] exit attempt failed for {} reason={reason}", position.token),
        }
    }

    pub async fn active_count(&self) -> usize {
        self.trailing.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bandit::ContextualBandit;
    use crate::core::feature_store::FeatureStoreConfig;
    use crate::core::models::PositionStatus;
    use crate::core::rpc::mock::{MockPriceSource, MockRpc};
    use crate::core::rpc::{AggregatorClient, Quote};
    use crate::core::wallet::mock::MockWallet;
    use crate::core::wallet::{WalletRotator, WalletSigner};
    use async_trait::async_trait;

    fn cfg() -> AutoSellConfig {
        AutoSellConfig {
            tick_interval_s: 0.001,
            rug_window_s: 20.0,
            ..AutoSellConfig::default()
        }
    }

    fn fresh_state(entry: f64) -> TrailingState {
        TrailingState::new(entry, 1_000.0)
    }

    #[test]
    fn trailing_stop_triggers_after_a_large_drop_from_peak() {
        let c = cfg();
        let mut state = fresh_state(1.0);
        assert!(tick_state(&c, &mut state, 1.0, 1000.0).is_none());
        assert!(tick_state(&c, &mut state, 2.0, 1002.0).is_none());
        let reason = tick_state(&c, &mut state, 1.5, 1004.0);
        assert_eq!(reason, Some("trailing_stop_triggered"));
    }

    #[test]
    fn breakeven_lift_locks_in_profit_then_triggers_on_pullback() {
        let c = cfg();
        let mut state = fresh_state(1.0);
        assert!(tick_state(&c, &mut state, 1.06, 1001.0).is_none());
        assert!(state.breakeven_lift_done);
        assert!(state.anchor_price <= 1.06 * 0.995 + 1e-9);
        let reason = tick_state(&c, &mut state, state.anchor_price - 0.001, 1002.0);
        assert_eq!(reason, Some("breakeven_stop_triggered"));
    }

    #[test]
    fn rug_detected_on_a_fast_crash_inside_the_window() {
        let c = cfg();
        let mut state = fresh_state(1.0);
        assert!(tick_state(&c, &mut state, 1.0, 1000.0).is_none());
        let reason = tick_state(&c, &mut state, 0.3, 1001.0);
        assert_eq!(reason, Some("rug_detected"));
    }

    #[test]
    fn time_exit_fires_once_max_hold_elapses_and_min_profit_is_met() {
        let c = AutoSellConfig {
            max_hold_s: 100.0,
            rug_drop_pct: 1.1, // disable rug check for this test
            min_profit_pct: 0.1,
            ..cfg()
        };
        let mut state = fresh_state(1.0);
        let reason = tick_state(&c, &mut state, 1.2, 1000.0 + 150.0);
        assert_eq!(reason, Some("time_exit"));
    }

    #[test]
    fn time_exit_does_not_fire_without_minimum_profit() {
        let c = AutoSellConfig {
            max_hold_s: 100.0,
            rug_drop_pct: 1.1, // disable rug check for this test
            min_profit_pct: 0.1,
            ..cfg()
        };
        let mut state = fresh_state(1.0);
        let reason = tick_state(&c, &mut state, 1.0, 1000.0 + 150.0);
        assert_eq!(reason, None);
    }

    #[test]
    fn stop_loss_fires_once_change_breaches_max_loss_pct() {
        let c = cfg();
        let mut state = fresh_state(1.0);
        let reason = tick_state(&c, &mut state, 1.0 - c.max_loss_pct - 0.01, 1000.0 + 1.0);
        assert_eq!(reason, Some("stop_loss_triggered"));
    }

    #[test]
    fn dynamic_drop_is_bounded_by_floor_and_cap() {
        let flat = vec![1.0; 20];
        let d = dynamic_drop_pct(0.12, 0.25, 0.6, &flat);
        assert!((d - 0.12 * 0.6).abs() < 1e-9);

        let volatile: Vec<f64> = (0..20).map(|i| 1.0 + (i as f64 % 2.0) * 5.0).collect();
        let d2 = dynamic_drop_pct(0.12, 0.25, 0.6, &volatile);
        assert!(d2 <= 0.25 + 1e-9);
    }

    #[test]
    fn rsi_is_high_during_a_steady_uptrend() {
        let prices: Vec<f64> = (0..20).map(|i| 1.0 + i as f64 * 0.05).collect();
        let r = rsi(&prices, 14).unwrap();
        assert!(r > 90.0, "rsi was {r}");
    }

    #[test]
    fn ema_series_lags_behind_a_price_spike() {
        let mut prices = vec![1.0; 10];
        prices.push(2.0);
        let ema = ema_series(&prices, 10);
        assert!(*ema.last().unwrap() < 2.0);
        assert!(*ema.last().unwrap() > 1.0);
    }

    struct MockAggregator;

    #[async_trait]
    impl AggregatorClient for MockAggregator {
        async fn quote(&self, _input: &str, _output: &str, amount: u64) -> anyhow::Result<Quote> {
            Ok(Quote {
                out_amount: amount,
                price_impact_pct: 0.01,
            })
        }

        async fn build_swap(&self, _input: &str, _output: &str, _amount: u64, _min_out: u64) -> anyhow::Result<Vec<u8>> {
            Ok(vec![1, 2, 3])
        }
    }

    struct NullStreams;

    #[async_trait]
    impl crate::core::rpc::StreamSubscriptions for NullStreams {
        async fn request_account(&self, _address: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn stop_account(&self, _address: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn request_logs(&self, _mentions: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn stop_logs(&self, _mentions: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct SingleWallet(Arc<MockWallet>);

    #[async_trait]
    impl WalletRotator for SingleWallet {
        async fn select_wallet(&self, _strategy_id: &str) -> anyhow::Result<Arc<dyn WalletSigner>> {
            Ok(self.0.clone())
        }
    }

    async fn build_monitor(prices: Vec<f64>, cfg: AutoSellConfig) -> (Arc<AutoSellMonitor>, Arc<TradeExecutor>) {
        let dir = tempfile::tempdir().unwrap();
        let rpc = Arc::new(MockRpc::new(10_000_000_000));
        let agg = Arc::new(MockAggregator);
        let wallet = Arc::new(MockWallet {
            address: "Wallet1111111111111111111111111111".to_string(),
            balance_lamports: 10_000_000_000,
        });
        let fs_cfg = FeatureStoreConfig {
            path: dir.path().join("fs"),
            wal_path: dir.path().join("wal.jsonl"),
            gzip: false,
            ..Default::default()
        };
        let feature_store = Arc::new(FeatureStore::new(fs_cfg).await.unwrap());
        let bandit = Arc::new(ContextualBandit::new(crate::core::bandit::BanditConfig {
            snapshot_path: dir.path().join("bandit.json"),
            ..Default::default()
        }));
        let insights = Arc::new(InsightLog::new(dir.path().join("insights.json")));
        let rug_registry = Arc::new(crate::core::librarian::RugRegistry::new_in_memory());
        let executor = Arc::new(TradeExecutor::new(
            crate::core::executor::ExecutorConfig {
                cooldown_s: 0.0,
                ..Default::default()
            },
            rpc,
            agg.clone(),
            agg,
            Arc::new(SingleWallet(wallet)),
            Arc::new(NullStreams),
            feature_store.clone(),
            bandit.clone(),
            insights.clone(),
            rug_registry.clone(),
        ));
        let price_source = Arc::new(MockPriceSource::new(prices));
        let monitor = AutoSellMonitor::new(
            cfg,
            executor.clone(),
            price_source,
            feature_store,
            insights,
            rug_registry,
        );
        (monitor, executor)
    }

    #[tokio::test]
    async fn monitor_loop_cleans_up_trailing_state_once_a_crash_is_observed() {
        let (monitor, _executor) = build_monitor(vec![1.0, 1.0, 0.2], cfg()).await;
        let position = Position {
            wallet: "Wallet1111111111111111111111111111".to_string(),
            token: "Mint11111111111111111111111111111".to_string(),
            amount: 1.0,
            entry_price: 1.0,
            entry_ts: crate::core::now_epoch(),
            strategy_id: "snipe.t0_liquidity".to_string(),
            status: PositionStatus::Holding,
            lp_accounts: Default::default(),
        };

        monitor.clone().spawn_monitor(position).await;
        for _ in 0..200 {
            if monitor.active_count().await == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(monitor.active_count().await, 0);
    }

    #[tokio::test]
    async fn spawning_a_monitor_twice_for_the_same_position_is_a_no_op() {
        let (monitor, _executor) = build_monitor(vec![1.0; 50], cfg()).await;
        let position = Position {
            wallet: "Wallet1111111111111111111111111111".to_string(),
            token: "Mint33333333333333333333333333333".to_string(),
            amount: 1.0,
            entry_price: 1.0,
            entry_ts: crate::core::now_epoch(),
            strategy_id: "snipe.t0_liquidity".to_string(),
            status: PositionStatus::Holding,
            lp_accounts: Default::default(),
        };
        monitor.clone().spawn_monitor(position.clone()).await;
        monitor.clone().spawn_monitor(position).await;
        assert_eq!(monitor.active_count().await, 1);
    }

    #[tokio::test]
    async fn monitor_loop_exits_after_repeated_price_lookup_failures() {
        let dir = tempfile::tempdir().unwrap();
        let rpc = Arc::new(MockRpc::new(10_000_000_000));
        let agg = Arc::new(MockAggregator);
        let wallet = Arc::new(MockWallet {
            address: "Wallet1111111111111111111111111111".to_string(),
            balance_lamports: 10_000_000_000,
        });
        let fs_cfg = FeatureStoreConfig {
            path: dir.path().join("fs"),
            wal_path: dir.path().join("wal.jsonl"),
            gzip: false,
            ..Default::default()
        };
        let feature_store = Arc::new(FeatureStore::new(fs_cfg).await.unwrap());
        let bandit = Arc::new(ContextualBandit::new(crate::core::bandit::BanditConfig {
            snapshot_path: dir.path().join("bandit.json"),
            ..Default::default()
        }));
        let insights = Arc::new(InsightLog::new(dir.path().join("insights.json")));
        let rug_registry = Arc::new(crate::core::librarian::RugRegistry::new_in_memory());
        let executor = Arc::new(TradeExecutor::new(
            crate::core::executor::ExecutorConfig::default(),
            rpc,
            agg.clone(),
            agg,
            Arc::new(SingleWallet(wallet)),
            Arc::new(NullStreams),
            feature_store.clone(),
            bandit,
            insights.clone(),
            rug_registry.clone(),
        ));
        let price_source = Arc::new(MockPriceSource::failing());
        let monitor = AutoSellMonitor::new(cfg(), executor, price_source, feature_store, insights, rug_registry);

        let position = Position {
            wallet: "Wallet1111111111111111111111111111".to_string(),
            token: "Mint22222222222222222222222222222".to_string(),
            amount: 1.0,
            entry_price: 1.0,
            entry_ts: crate::core::now_epoch(),
            strategy_id: "snipe.t0_liquidity".to_string(),
            status: PositionStatus::Holding,
            lp_accounts: Default::default(),
        };
        monitor.clone().spawn_monitor(position).await;
        for _ in 0..200 {
            if monitor.active_count().await == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(monitor.active_count().await, 0);
    }
}
