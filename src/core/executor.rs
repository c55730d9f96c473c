//! Trade Executor: pre-trade sizing, fast-AMM vs aggregator routing,
//! impact-aware split orders, post-fill bookkeeping and the sell/PnL path.
//! Grounded on spec.md §4.H and
//! `original_source/tpu/exec/trade_executor.py` (sizing formula, split-leg
//! ratios, stream-alert-driven panic exits).

use crate::core::bandit::ContextualBandit;
use crate::core::feature_store::FeatureStore;
use crate::core::insights::InsightLog;
use crate::core::librarian::RugRegistry;
use crate::core::models::{clamp, Position, PositionStatus, StrategyProfile};
use crate::core::rpc::{AggregatorClient, Quote, RpcClient, StreamSubscriptions};
use crate::core::scoring::{score_token, ScoringContext};
use crate::core::wallet::{WalletRotator, WalletSigner};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

const LAMPORTS_PER_SOL: f64 = 1_000_000_000.0;

#[derive(Debug, Clone, Copy)]
pub struct ExecutorConfig {
    pub swap_slippage_bps: u32,
    pub max_price_impact_pct: f64,
    pub split_order_enabled: bool,
    pub split_order_threshold_sol: f64,
    pub split_pause_s: f64,
    pub size_mult_min: f64,
    pub size_mult_max: f64,
    pub max_wallet_pct: f64,
    pub min_notional_sol: f64,
    pub max_notional_sol: f64,
    pub cooldown_s: f64,
    pub max_spread_pct: f64,
    pub max_slippage_pct: f64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            swap_slippage_bps: 150,
            max_price_impact_pct: 0.12,
            split_order_enabled: true,
            split_order_threshold_sol: 1.0,
            split_pause_s: 0.75,
            size_mult_min: 0.25,
            size_mult_max: 1.0,
            max_wallet_pct: 0.2,
            min_notional_sol: 0.02,
            max_notional_sol: 5.0,
            cooldown_s: 300.0,
            max_spread_pct: 5.0,
            max_slippage_pct: 5.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegFill {
    pub signature: String,
    pub amount_sol: f64,
    pub price_impact_pct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub wallet: String,
    pub token: String,
    pub total_amount_sol: f64,
    pub fill_price: f64,
    pub strategy_id: String,
    pub legs: Vec<LegFill>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SellOutcome {
    pub wallet: String,
    pub token: String,
    pub amount: f64,
    pub pnl: f64,
    pub signature: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StreamAlertKind {
    LpUnlock,
    VaultDrain,
    HoneypotDetected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamAlert {
    pub kind: StreamAlertKind,
    pub token: String,
}

/// Split sizing ratios for impact-aware order splitting (spec.md §4.H):
/// two legs at 60/40 normally, three legs at 40/30/30 once the notional is
/// large enough that a third leg still clears `min_notional`.
fn split_ratios(notional_sol: f64, threshold_sol: f64) -> Vec<f64> {
    if notional_sol >= threshold_sol * 2.0 {
        vec![0.4, 0.3, 0.3]
    } else {
        vec![0.6, 0.4]
    }
}

pub struct TradeExecutor {
    cfg: ExecutorConfig,
    rpc: Arc<dyn RpcClient>,
    fast_amm: Arc<dyn AggregatorClient>,
    aggregator: Arc<dyn AggregatorClient>,
    wallets: Arc<dyn WalletRotator>,
    streams: Arc<dyn StreamSubscriptions>,
    feature_store: Arc<FeatureStore>,
    bandit: Arc<ContextualBandit>,
    insights: Arc<InsightLog>,
    rug_registry: Arc<RugRegistry>,
    positions: Mutex<HashMap<(String, String), Position>>,
    last_buy_at: Mutex<HashMap<String, f64>>,
    fill_tx: mpsc::Sender<Position>,
    fill_rx: Mutex<Option<mpsc::Receiver<Position>>>,
}

impl TradeExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: ExecutorConfig,
        rpc: Arc<dyn RpcClient>,
        fast_amm: Arc<dyn AggregatorClient>,
        aggregator: Arc<dyn AggregatorClient>,
        wallets: Arc<dyn WalletRotator>,
        streams: Arc<dyn StreamSubscriptions>,
        feature_store: Arc<FeatureStore>,
        bandit: Arc<ContextualBandit>,
        insights: Arc<InsightLog>,
        rug_registry: Arc<RugRegistry>,
    ) -> Self {
        let (fill_tx, fill_rx) = mpsc::channel(256);
        Self {
            cfg,
            rpc,
            fast_amm,
            aggregator,
            wallets,
            streams,
            feature_store,
            bandit,
            insights,
            rug_registry,
            positions: Mutex::new(HashMap::new()),
            last_buy_at: Mutex::new(HashMap::new()),
            fill_tx,
            fill_rx: Mutex::new(Some(fill_rx)),
        }
    }

    /// Takes ownership of the fill-notification receiver; the auto-sell
    /// monitor's dispatcher calls this once at startup so it can spawn a
    /// trailing-stop task for every fresh position.
    pub async fn take_fill_receiver(&self) -> Option<mpsc::Receiver<Position>> {
        self.fill_rx.lock().await.take()
    }

    fn passes_execution_risk_checks(&self, ctx: &ScoringContext) -> Result<(), String> {
        if ctx.spread_pct > self.cfg.max_spread_pct {
            return Err(format!("spread_too_wide_for_execution:{:.2}", ctx.spread_pct));
        }
        if ctx.slippage_pct > self.cfg.max_slippage_pct {
            return Err(format!("slippage_too_high_for_execution:{:.2}", ctx.slippage_pct));
        }
        Ok(())
    }

    fn uses_fast_amm(scanner_source: Option<&str>, strategy: &str) -> bool {
        strategy.starts_with("snipe")
            || matches!(
                scanner_source,
                Some("firehose") | Some("snipe_trigger") | Some("amm_listen") | Some("raydium_stream")
            )
    }

    /// Scores, sizes and executes a buy. Returns `None` on any gate
    /// rejection, cooldown hit, or execution failure — never raises
    /// (spec.md §7).
    pub async fn buy_token(
        &self,
        token: &str,
        base_amount_sol: f64,
        scanner_source: Option<&str>,
        ctx: &ScoringContext,
        profile: &StrategyProfile,
    ) -> Option<Fill> {
        let now = crate::core::now_epoch();
        if self.rug_registry.is_blocked(token).await {
            info!("[TradeExecutor] {token} is rug-registered, skipping");
            return None;
        }
        {
            let last_buy = self.last_buy_at.lock().await;
            if let Some(last) = last_buy.get(token) {
                if now - last < self.cfg.cooldown_s {
                    info!("[TradeExecutor] {token} in cooldown, skipping");
                    return None;
                }
            }
        }

        let verdict = score_token(ctx, profile);
        if matches!(verdict.action.as_str(), "ignore" | "watch") {
            return None;
        }
        if let Err(reason) = self.passes_execution_risk_checks(ctx) {
            warn!("[TradeExecutor] execution risk check failed for {token}: {reason}");
            return None;
        }

        let wallet = self.wallets.select_wallet(&verdict.strategy).await.ok()?;
        let balance_sol = wallet.sol_balance().await.ok()? as f64 / LAMPORTS_PER_SOL;

        let scale = clamp(
            self.cfg.size_mult_min + (self.cfg.size_mult_max - self.cfg.size_mult_min) * verdict.final_score / 100.0,
            self.cfg.size_mult_min,
            self.cfg.size_mult_max,
        );
        let target = base_amount_sol * scale;
        let notional = target
            .min(balance_sol * self.cfg.max_wallet_pct)
            .min(self.cfg.max_notional_sol);
        if notional < self.cfg.min_notional_sol {
            info!("[TradeExecutor] {token} sized below min_notional ({notional:.4} SOL), skipping");
            return None;
        }

        let client: &Arc<dyn AggregatorClient> = if Self::uses_fast_amm(scanner_source, &verdict.strategy) {
            &self.fast_amm
        } else {
            &self.aggregator
        };

        let legs_frac = if self.cfg.split_order_enabled {
            let quote = client
                .quote("So11111111111111111111111111111111111111112", token, (notional * LAMPORTS_PER_SOL) as u64)
                .await
                .ok()?;
            if quote.price_impact_pct > self.cfg.max_price_impact_pct || notional >= self.cfg.split_order_threshold_sol
            {
                split_ratios(notional, self.cfg.split_order_threshold_sol)
            } else {
                vec![1.0]
            }
        } else {
            vec![1.0]
        };

        let mut legs = Vec::new();
        let mut filled_sol = 0.0;
        for (i, frac) in legs_frac.iter().enumerate() {
            let leg_sol = notional * frac;
            let leg_lamports = (leg_sol * LAMPORTS_PER_SOL) as u64;
            let quote = match client
                .quote("So11111111111111111111111111111111111111112", token, leg_lamports)
                .await
            {
                Ok(q) => q,
                Err(e) => {
                    warn!("[TradeExecutor] quote failed on leg {i} for {token}: {e}");
                    break;
                }
            };
            let min_out = (quote.out_amount as f64 * (1.0 - self.cfg.swap_slippage_bps as f64 / 10_000.0)) as u64;
            let unsigned = match client
                .build_swap("So11111111111111111111111111111111111111112", token, leg_lamports, min_out)
                .await
            {
                Ok(tx) => tx,
                Err(e) => {
                    warn!("[TradeExecutor] swap build failed on leg {i} for {token}: {e}");
                    break;
                }
            };
            let signed = match wallet.sign(&unsigned).await {
                Ok(tx) => tx,
                Err(e) => {
                    warn!("[TradeExecutor] signing failed on leg {i} for {token}: {e}");
                    break;
                }
            };
            let signature = match self.rpc.send_raw_transaction(&signed).await {
                Ok(sig) => sig,
                Err(e) => {
                    warn!("[TradeExecutor] send failed on leg {i} for {token}: {e}");
                    break;
                }
            };
            legs.push(LegFill {
                signature,
                amount_sol: leg_sol,
                price_impact_pct: quote.price_impact_pct,
            });
            filled_sol += leg_sol;
            if legs_frac.len() > 1 && i + 1 < legs_frac.len() {
                tokio::time::sleep(std::time::Duration::from_secs_f64(self.cfg.split_pause_s)).await;
            }
        }

        if legs.is_empty() {
            return None;
        }

        let fill_price = notional / legs.len().max(1) as f64;
        let fill = Fill {
            wallet: wallet.address().to_string(),
            token: token.to_string(),
            total_amount_sol: filled_sol,
            fill_price,
            strategy_id: verdict.strategy.clone(),
            legs,
        };

        self.last_buy_at.lock().await.insert(token.to_string(), now);
        self.feature_store
            .record_trade(token, "buy", verdict.final_score, 0.0, &verdict.strategy, wallet.address())
            .await;
        self.insights
            .log(
                "buy",
                token,
                format!("filled {:.4} SOL at action={}", filled_sol, verdict.action),
                serde_json::json!({ "score": verdict.final_score, "strategy": verdict.strategy }),
            )
            .await;

        let position = Position {
            wallet: fill.wallet.clone(),
            token: token.to_string(),
            amount: filled_sol,
            entry_price: fill_price,
            entry_ts: now,
            strategy_id: fill.strategy_id.clone(),
            status: PositionStatus::Holding,
            lp_accounts: Default::default(),
        };
        self.positions
            .lock()
            .await
            .insert((position.wallet.clone(), position.token.clone()), position.clone());

        let _ = self.streams.request_account(token).await;
        let _ = self.streams.request_logs(token).await;
        if self.fill_tx.send(position).await.is_err() {
            warn!("[TradeExecutor] no auto-sell dispatcher listening for fills");
        }

        Some(fill)
    }

    /// Sells a position (or an explicit amount/wallet override), records
    /// PnL, feeds the bandit, and unsubscribes stream watches.
    pub async fn sell_token(
        &self,
        token: &str,
        amount: Option<f64>,
        wallet_override: Option<&str>,
        reason: &str,
    ) -> Option<SellOutcome> {
        let mut positions = self.positions.lock().await;
        let key = positions
            .keys()
            .find(|(w, t)| t == token && wallet_override.map(|ov| ov == w).unwrap_or(true))
            .cloned()?;
        let position = positions.get(&key)?.clone();
        drop(positions);

        let sell_amount = amount.unwrap_or(position.amount);
        let sell_lamports = (sell_amount * LAMPORTS_PER_SOL) as u64;
        let quote = self
            .aggregator
            .quote(token, "So11111111111111111111111111111111111111112", sell_lamports)
            .await
            .ok()?;
        let min_out = (quote.out_amount as f64 * (1.0 - self.cfg.swap_slippage_bps as f64 / 10_000.0)) as u64;
        let unsigned = self
            .aggregator
            .build_swap(token, "So11111111111111111111111111111111111111112", sell_lamports, min_out)
            .await
            .ok()?;
        let wallet = self.wallets.select_wallet(&position.strategy_id).await.ok()?;
        let signed = wallet.sign(&unsigned).await.ok()?;
        let signature = self.rpc.send_raw_transaction(&signed).await.ok()?;

        let price_now = quote.out_amount as f64 / LAMPORTS_PER_SOL / sell_amount.max(1e-9);
        let pnl = (price_now - position.entry_price) * sell_amount;
        let hold_s = crate::core::now_epoch() - position.entry_ts;
        let pnl_pct = if position.entry_price > 0.0 {
            (price_now - position.entry_price) / position.entry_price * 100.0
        } else {
            0.0
        };

        self.feature_store
            .record_outcome(
                token,
                "sell",
                pnl_pct,
                self.cfg.swap_slippage_bps as f64,
                hold_s,
                &position.strategy_id,
                &position.strategy_id,
                0.0,
            )
            .await;
        let reward = crate::core::feature_store::normalize_reward(pnl_pct, self.cfg.swap_slippage_bps as f64, hold_s);
        self.bandit.record_reward(&position.strategy_id, reward, crate::core::now_epoch()).await;
        self.insights
            .log(
                "sell",
                token,
                format!("exit reason={reason} pnl={pnl:.4} hold_s={hold_s:.0}"),
                serde_json::json!({ "pnl_pct": pnl_pct }),
            )
            .await;

        self.positions.lock().await.remove(&key);
        let _ = self.streams.stop_account(token).await;
        let _ = self.streams.stop_logs(token).await;

        Some(SellOutcome {
            wallet: position.wallet,
            token: token.to_string(),
            amount: sell_amount,
            pnl,
            signature,
            reason: reason.to_string(),
        })
    }

    /// Reacts to a risk stream alert by exiting every holder's full
    /// position in the affected token (spec.md §4.H).
    pub async fn handle_stream_alert(&self, alert: StreamAlert) -> Vec<SellOutcome> {
        let holders: Vec<String> = {
            let positions = self.positions.lock().await;
            positions
                .keys()
                .filter(|(_, t)| t == &alert.token)
                .map(|(w, _)| w.clone())
                .collect()
        };
        let reason = match alert.kind {
            StreamAlertKind::LpUnlock => "lp_unlock",
            StreamAlertKind::VaultDrain => "vault_drain",
            StreamAlertKind::HoneypotDetected => "honeypot_detected",
        };
        self.rug_registry
            .register_rug_event(&alert.token, reason, crate::core::now_epoch())
            .await;
        let mut outcomes = Vec::new();
        for wallet in holders {
            if let Some(outcome) = self.sell_token(&alert.token, None, Some(&wallet), reason).await {
                outcomes.push(outcome);
            }
        }
        outcomes
    }

    pub async fn open_position(&self, wallet: &str, token: &str) -> Option<Position> {
        self.positions.lock().await.get(&(wallet.to_string(), token.to_string())).cloned()
    }

    pub async fn open_position_count(&self) -> usize {
        self.positions.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::{BandThresholds, DynamicAdjustments, GateConfig, SizingConfig};
    use crate::core::rpc::mock::MockRpc;
    use crate::core::scoring::Mode;
    use crate::core::wallet::mock::MockWallet;
    use async_trait::async_trait;
    use std::collections::HashMap as Map;

    struct MockAggregator {
        price_impact_pct: f64,
        out_amount_per_lamport: f64,
    }

    #[async_trait]
    impl AggregatorClient for MockAggregator {
        async fn quote(&self, _input: &str, _output: &str, amount: u64) -> anyhow::Result<Quote> {
            Ok(Quote {
                out_amount: (amount as f64 * self.out_amount_per_lamport) as u64,
                price_impact_pct: self.price_impact_pct,
            })
        }

        async fn build_swap(&self, _input: &str, _output: &str, _amount: u64, _min_out: u64) -> anyhow::Result<Vec<u8>> {
            Ok(vec![1, 2, 3])
        }
    }

    struct NullStreams;

    #[async_trait]
    impl StreamSubscriptions for NullStreams {
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

    fn profile() -> StrategyProfile {
        StrategyProfile {
            mode: "snipe".to_string(),
            name: "t0_liquidity".to_string(),
            gates: GateConfig::default(),
            weights: Map::new(),
            bands: BandThresholds::default(),
            dynamic: DynamicAdjustments::default(),
            sizing: SizingConfig::default(),
        }
    }

    fn ctx() -> ScoringContext {
        ScoringContext {
            token: "Mint11111111111111111111111111111".to_string(),
            mode: Some(Mode::Snipe),
            scanner_source: Some("firehose".to_string()),
            age_minutes: Some(0.5),
            tax_bps: 100,
            lp_locked: true,
            honeypot_similarity: 0.05,
            spread_pct: 1.0,
            slippage_pct: 1.0,
            depth_sol: 40.0,
            blacklisted: false,
            first_minute_buyers: 30,
            wallet_quality: 0.8,
            liquidity_score: 0.8,
            social_score: 0.6,
            chart_score_0_20: 12.0,
            onchain_score: 0.7,
            memory_score: 0.6,
            flow_score: 0.7,
            forecast_expected_return: None,
            ml_price_pred: None,
            ml_rug_pred: None,
            ml_wallet_pred: None,
            trusted_source: false,
            bundle_launch_suspected: false,
            intuition_raw: None,
            trait_raw: None,
            frozen: false,
            freeze_reason: None,
        }
    }

    async fn build_executor_with_cooldown(
        price_impact_pct: f64,
        split_threshold: f64,
        balance_lamports: u64,
        cooldown_s: f64,
    ) -> TradeExecutor {
        let rpc = Arc::new(MockRpc::new(balance_lamports));
        let agg = Arc::new(MockAggregator {
            price_impact_pct,
            out_amount_per_lamport: 1.0,
        });
        let wallet = Arc::new(MockWallet {
            address: "Wallet1111111111111111111111111111".to_string(),
            balance_lamports,
        });
        let dir = tempfile::tempdir().unwrap();
        let fs_cfg = crate::core::feature_store::FeatureStoreConfig {
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
        TradeExecutor::new(
            ExecutorConfig {
                split_order_threshold_sol: split_threshold,
                cooldown_s,
                ..Default::default()
            },
            rpc,
            agg.clone(),
            agg,
            Arc::new(SingleWallet(wallet)),
            Arc::new(NullStreams),
            feature_store,
            bandit,
            insights,
            rug_registry,
        )
    }

    async fn build_executor(price_impact_pct: f64, split_threshold: f64, balance_lamports: u64) -> TradeExecutor {
        build_executor_with_cooldown(price_impact_pct, split_threshold, balance_lamports, 0.0).await
    }

    #[tokio::test]
    async fn buy_below_min_notional_is_skipped() {
        let executor = build_executor(0.01, 10.0, 1_000_000).await; // ~0.001 SOL balance
        let fill = executor.buy_token("Mint11111111111111111111111111111", 1.0, Some("firehose"), &ctx(), &profile()).await;
        assert!(fill.is_none());
    }

    #[tokio::test]
    async fn successful_buy_opens_exactly_one_position_and_notifies_fill_channel() {
        let executor = build_executor(0.01, 10.0, 10_000_000_000).await;
        let mut rx = executor.take_fill_receiver().await.unwrap();
        let fill = executor.buy_token("Mint11111111111111111111111111111", 1.0, Some("firehose"), &ctx(), &profile()).await;
        assert!(fill.is_some());
        assert_eq!(executor.open_position_count().await, 1);
        let position = rx.try_recv().expect("fill notification queued");
        assert_eq!(position.token, "Mint11111111111111111111111111111");
    }

    #[tokio::test]
    async fn high_price_impact_splits_into_multiple_legs() {
        let executor = build_executor(0.5, 10.0, 10_000_000_000).await;
        let fill = executor
            .buy_token("Mint11111111111111111111111111111", 1.0, Some("firehose"), &ctx(), &profile())
            .await
            .unwrap();
        assert!(fill.legs.len() >= 2);
    }

    #[tokio::test]
    async fn sell_closes_the_position_and_reports_pnl() {
        let executor = build_executor(0.01, 10.0, 10_000_000_000).await;
        executor
            .buy_token("Mint11111111111111111111111111111", 1.0, Some("firehose"), &ctx(), &profile())
            .await
            .unwrap();
        let outcome = executor
            .sell_token("Mint11111111111111111111111111111", None, None, "trailing_stop_triggered")
            .await
            .unwrap();
        assert_eq!(outcome.reason, "trailing_stop_triggered");
        assert_eq!(executor.open_position_count().await, 0);
    }

    #[tokio::test]
    async fn stream_alert_exits_every_holder_of_the_affected_token() {
        let executor = build_executor(0.01, 10.0, 10_000_000_000).await;
        executor
            .buy_token("Mint11111111111111111111111111111", 1.0, Some("firehose"), &ctx(), &profile())
            .await
            .unwrap();
        let outcomes = executor
            .handle_stream_alert(StreamAlert {
                kind: StreamAlertKind::HoneypotDetected,
                token: "Mint11111111111111111111111111111".to_string(),
            })
            .await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].reason, "honeypot_detected");
        assert_eq!(executor.open_position_count().await, 0);
    }

    #[test]
    fn split_ratios_pick_two_or_three_legs_by_magnitude() {
        assert_eq!(split_ratios(1.5, 1.0), vec![0.6, 0.4]);
        assert_eq!(split_ratios(2.5, 1.0), vec![0.4, 0.3, 0.3]);
    }

    #[tokio::test]
    async fn a_stream_alert_registers_the_token_so_a_later_buy_is_blocked() {
        let executor = build_executor(0.01, 10.0, 10_000_000_000).await;
        executor
            .buy_token("Mint11111111111111111111111111111", 1.0, Some("firehose"), &ctx(), &profile())
            .await
            .unwrap();
        executor
            .handle_stream_alert(StreamAlert {
                kind: StreamAlertKind::HoneypotDetected,
                token: "Mint11111111111111111111111111111".to_string(),
            })
            .await;
        let second = executor
            .buy_token("Mint11111111111111111111111111111", 1.0, Some("firehose"), &ctx(), &profile())
            .await;
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn second_buy_within_cooldown_is_skipped() {
        let executor = build_executor_with_cooldown(0.01, 10.0, 10_000_000_000, 300.0).await;
        let first = executor.buy_token("Mint11111111111111111111111111111", 1.0, Some("firehose"), &ctx(), &profile()).await;
        assert!(first.is_some());
        let second = executor.buy_token("Mint11111111111111111111111111111", 1.0, Some("firehose"), &ctx(), &profile()).await;
        assert!(second.is_none());
    }
}
