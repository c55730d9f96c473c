//! Composition root: wires the firehose listener, event router, librarian,
//! feature store, scoring router, contextual bandit, trade executor,
//! auto-sell monitor, priority scheduler and crash guardian into one running
//! process, then waits for a shutdown signal.
//!
//! RPC and aggregator clients are real HTTP adapters (spec.md §6 lists
//! these as the core's own external interface). Wallet key-file loading and
//! websocket session bootstrapping are explicit Non-goals (spec.md §1); this
//! binary only runs in paper-trading mode, where a `PaperWalletSigner`
//! simulates balance instead of holding a real key, and stream subscriptions
//! are logged rather than placed on a live session.

use anyhow::{bail, Result};
use async_trait::async_trait;
use overmind_protocol::config::AppConfig;
use overmind_protocol::core::auto_sell::{AutoSellConfig, AutoSellMonitor};
use overmind_protocol::core::bandit::{BanditConfig as CoreBanditConfig, BanditPolicy, ContextualBandit};
use overmind_protocol::core::event_router::EventRouter;
use overmind_protocol::core::executor::{ExecutorConfig, TradeExecutor};
use overmind_protocol::core::feature_store::{FeatureStore, FeatureStoreConfig as CoreFeatureStoreConfig};
use overmind_protocol::core::firehose::FirehoseListener;
use overmind_protocol::core::guardian::{CrashGuardian, ModuleRegistration};
use overmind_protocol::core::insights::InsightLog;
use overmind_protocol::core::librarian::{Librarian, RugRegistry};
use overmind_protocol::core::notifier::{LoggingNotifier, Notifier};
use overmind_protocol::core::rpc::{
    AggregatorClient, PriceSource, Quote, RpcClient, SignatureStatus, StreamSubscriptions,
};
use overmind_protocol::core::scheduler::{MarketInputs, PriorityScheduler, SystemInputs};
use overmind_protocol::core::telemetry::CoreTelemetry;
use overmind_protocol::core::wallet::{WalletRotator, WalletSigner};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// JSON-RPC client over the configured HTTP endpoint (spec.md §6 method
/// list). Commitment handling, retries and connection pooling beyond what
/// `reqwest`'s client already gives us are the out-of-scope "RPC session
/// bootstrapping" layer.
struct JsonRpcHttpClient {
    http: reqwest::Client,
    url: String,
}

impl JsonRpcHttpClient {
    fn new(url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            url,
        }
    }

    async fn call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let resp: serde_json::Value = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;
        if let Some(err) = resp.get("error") {
            bail!("rpc error calling {method}: {err}");
        }
        Ok(resp.get("result").cloned().unwrap_or(serde_json::Value::Null))
    }
}

#[async_trait]
impl RpcClient for JsonRpcHttpClient {
    async fn get_latest_blockhash(&self) -> Result<String> {
        let result = self
            .call("getLatestBlockhash", serde_json::json!([{"commitment": "confirmed"}]))
            .await?;
        result["value"]["blockhash"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("missing blockhash in response"))
    }

    async fn get_balance(&self, owner: &str) -> Result<u64> {
        let result = self.call("getBalance", serde_json::json!([owner])).await?;
        result["value"]
            .as_u64()
            .ok_or_else(|| anyhow::anyhow!("missing balance in response"))
    }

    async fn get_token_accounts_by_owner(&self, owner: &str) -> Result<Vec<String>> {
        let result = self
            .call(
                "getTokenAccountsByOwner",
                serde_json::json!([owner, {"programId": "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA"}, {"encoding": "base64"}]),
            )
            .await?;
        Ok(result["value"]
            .as_array()
            .map(|accounts| {
                accounts
                    .iter()
                    .filter_map(|a| a["pubkey"].as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_account_info(&self, address: &str) -> Result<Option<Vec<u8>>> {
        let result = self
            .call("getAccountInfo", serde_json::json!([address, {"encoding": "base64"}]))
            .await?;
        if result.is_null() || result["value"].is_null() {
            return Ok(None);
        }
        let data = result["value"]["data"][0]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("missing account data"))?;
        Ok(Some(base64::Engine::decode(
            &base64::engine::general_purpose::STANDARD,
            data,
        )?))
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<String> {
        let encoded = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, raw);
        let result = self
            .call(
                "sendRawTransaction",
                serde_json::json!([encoded, {"encoding": "base64"}]),
            )
            .await?;
        result
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("missing signature in response"))
    }

    async fn simulate_transaction(&self, raw: &[u8]) -> Result<bool> {
        let encoded = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, raw);
        let result = self
            .call(
                "simulateTransaction",
                serde_json::json!([encoded, {"encoding": "base64"}]),
            )
            .await?;
        Ok(result["value"]["err"].is_null())
    }

    async fn get_signature_statuses(&self, signatures: &[String]) -> Result<Vec<SignatureStatus>> {
        let result = self
            .call(
                "getSignatureStatuses",
                serde_json::json!([signatures, {"searchTransactionHistory": true}]),
            )
            .await?;
        Ok(result["value"]
            .as_array()
            .map(|statuses| {
                statuses
                    .iter()
                    .zip(signatures)
                    .map(|(s, sig)| SignatureStatus {
                        signature: sig.clone(),
                        confirmed: !s.is_null() && s["err"].is_null(),
                        err: s.get("err").and_then(|e| e.as_str()).map(String::from),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Quote/swap surface for an aggregator-style HTTP service (spec.md §6).
struct HttpAggregatorClient {
    http: reqwest::Client,
    quote_url: String,
    swap_url: String,
}

impl HttpAggregatorClient {
    fn new(quote_url: String, swap_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            quote_url,
            swap_url,
        }
    }
}

#[async_trait]
impl AggregatorClient for HttpAggregatorClient {
    async fn quote(&self, input_mint: &str, output_mint: &str, amount: u64) -> Result<Quote> {
        let resp: serde_json::Value = self
            .http
            .get(&self.quote_url)
            .query(&[
                ("inputMint", input_mint),
                ("outputMint", output_mint),
                ("amount", &amount.to_string()),
            ])
            .send()
            .await?
            .json()
            .await?;
        Ok(Quote {
            out_amount: resp["outAmount"]
                .as_str()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
            price_impact_pct: resp["priceImpactPct"].as_f64().unwrap_or(0.0),
        })
    }

    async fn build_swap(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
        min_out: u64,
    ) -> Result<Vec<u8>> {
        let resp: serde_json::Value = self
            .http
            .post(&self.swap_url)
            .json(&serde_json::json!({
                "inputMint": input_mint,
                "outputMint": output_mint,
                "amount": amount,
                "minOutAmount": min_out,
            }))
            .send()
            .await?
            .json()
            .await?;
        let tx = resp["swapTransaction"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("aggregator response missing swapTransaction"))?;
        Ok(base64::Engine::decode(
            &base64::engine::general_purpose::STANDARD,
            tx,
        )?)
    }
}

/// Reads a live price as SOL-per-token from the aggregator's own quote
/// endpoint (spec.md §4.I's tick loop needs a price, not a swap). Assumes
/// 6-decimal token units and 9-decimal lamports (spec.md §9 Open Question
/// 3's chosen representation), documented in DESIGN.md.
struct AggregatorPriceSource {
    aggregator: Arc<dyn AggregatorClient>,
    sol_mint: String,
}

const TOKEN_UNIT: u64 = 1_000_000;
const LAMPORTS_PER_SOL: f64 = 1_000_000_000.0;

#[async_trait]
impl PriceSource for AggregatorPriceSource {
    async fn current_price(&self, token: &str) -> Result<f64> {
        let quote = self
            .aggregator
            .quote(token, &self.sol_mint, TOKEN_UNIT)
            .await?;
        Ok(quote.out_amount as f64 / LAMPORTS_PER_SOL / (TOKEN_UNIT as f64 / TOKEN_UNIT as f64))
    }
}

/// Simulation-only signer for paper trading: never produces a real
/// signature and reports a configured balance. Live trading requires a real
/// `WalletSigner` injected by the embedding application (wallet key-file
/// loading is an explicit Non-goal, spec.md §1).
struct PaperWalletSigner {
    address: String,
    balance_lamports: std::sync::atomic::AtomicU64,
}

#[async_trait]
impl WalletSigner for PaperWalletSigner {
    fn address(&self) -> &str {
        &self.address
    }

    async fn sign(&self, unsigned_tx: &[u8]) -> Result<Vec<u8>> {
        Ok(unsigned_tx.to_vec())
    }

    async fn sol_balance(&self) -> Result<u64> {
        Ok(self.balance_lamports.load(std::sync::atomic::Ordering::SeqCst))
    }
}

struct SingleWalletRotator {
    wallet: Arc<dyn WalletSigner>,
}

#[async_trait]
impl WalletRotator for SingleWalletRotator {
    async fn select_wallet(&self, _strategy_id: &str) -> Result<Arc<dyn WalletSigner>> {
        Ok(self.wallet.clone())
    }
}

/// Logs subscribe/unsubscribe intents instead of riding a live websocket
/// session (out of scope, spec.md §1), mirroring `LoggingNotifier`'s
/// fallback-to-a-log-line pattern.
struct LoggingStreamSubscriptions;

#[async_trait]
impl StreamSubscriptions for LoggingStreamSubscriptions {
    async fn request_account(&self, address: &str) -> Result<()> {
        info!(target: "streams", "subscribe account {address}");
        Ok(())
    }
    async fn stop_account(&self, address: &str) -> Result<()> {
        info!(target: "streams", "unsubscribe account {address}");
        Ok(())
    }
    async fn request_logs(&self, mentions: &str) -> Result<()> {
        info!(target: "streams", "subscribe logs mentioning {mentions}");
        Ok(())
    }
    async fn stop_logs(&self, mentions: &str) -> Result<()> {
        info!(target: "streams", "unsubscribe logs mentioning {mentions}");
        Ok(())
    }
}

fn init_tracing(cfg: &AppConfig) {
    let filter = EnvFilter::try_new(&cfg.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if cfg.logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = AppConfig::from_env()?;
    init_tracing(&cfg);
    info!("starting core decision/execution pipeline, mode={:?}", cfg.trading.mode);

    if cfg.is_live_trading() {
        bail!(
            "live trading requires a real WalletSigner and an authenticated RPC/aggregator \
             session, neither of which this binary provides (spec.md §1 Non-goals); run with \
             AGENT_TRADING_MODE=paper, or embed this crate's core behind your own wallet/RPC \
             wiring for live trading"
        );
    }

    let telemetry = Arc::new(CoreTelemetry::new());
    let notifier: Arc<dyn Notifier> = Arc::new(LoggingNotifier);
    let librarian = Arc::new(Librarian::new_with_persistence("runtime/library"));
    let rug_registry = Arc::new(RugRegistry::new_with_persistence("runtime/data"));
    rug_registry.load_snapshot().await.ok();
    let insights = Arc::new(InsightLog::new("runtime/logs/insights.json"));

    let feature_store = Arc::new(
        FeatureStore::new(CoreFeatureStoreConfig {
            path: cfg.feature_store.path.clone().into(),
            wal_path: format!("{}/_wal.jsonl", cfg.feature_store.path).into(),
            gzip: cfg.feature_store.gzip,
            max_days: cfg.feature_store.max_days as i64,
            flush_every: cfg.feature_store.flush_every,
            max_file_size: cfg.feature_store.max_file_size_events,
            sync_interval_s: cfg.feature_store.sync_interval_sec,
            rolling_window_s: cfg.bandit.reward_horizon_sec as f64,
        })
        .await?,
    );

    let bandit_policy = match cfg.bandit.policy.to_lowercase().as_str() {
        "thompson" => BanditPolicy::Thompson,
        _ => BanditPolicy::Ucb1,
    };
    let bandit = Arc::new(
        ContextualBandit::new(CoreBanditConfig {
            policy: bandit_policy,
            arms: cfg.bandit.arms.clone(),
            min_pulls: cfg.bandit.min_pulls as u64,
            reward_horizon_s: cfg.bandit.reward_horizon_sec as f64,
            refresh_s: cfg.bandit.refresh_sec,
            epsilon: if cfg.bandit.epsilon > 0.0 {
                Some(cfg.bandit.epsilon)
            } else {
                None
            },
            clip_min: -1.0,
            clip_max: 1.0,
            snapshot_path: "runtime/library/bandit/bandit_state.json".into(),
        })
        .with_telemetry(telemetry.clone()),
    );
    bandit.load_snapshot().await;

    let rpc: Arc<dyn RpcClient> = Arc::new(JsonRpcHttpClient::new(cfg.rpc.url.clone()));
    let aggregator: Arc<dyn AggregatorClient> = Arc::new(HttpAggregatorClient::new(
        "https://quote-api.jup.ag/v6/quote".to_string(),
        "https://quote-api.jup.ag/v6/swap".to_string(),
    ));
    let price_source: Arc<dyn PriceSource> = Arc::new(AggregatorPriceSource {
        aggregator: aggregator.clone(),
        sol_mint: "So11111111111111111111111111111111111111112".to_string(),
    });
    let paper_wallet: Arc<dyn WalletSigner> = Arc::new(PaperWalletSigner {
        address: "PaperWa11et11111111111111111111111111111111".to_string(),
        balance_lamports: std::sync::atomic::AtomicU64::new(10 * LAMPORTS_PER_SOL as u64),
    });
    let wallets: Arc<dyn WalletRotator> = Arc::new(SingleWalletRotator {
        wallet: paper_wallet,
    });
    let streams: Arc<dyn StreamSubscriptions> = Arc::new(LoggingStreamSubscriptions);

    let executor = Arc::new(TradeExecutor::new(
        ExecutorConfig {
            swap_slippage_bps: cfg.execution.swap_slippage_bps,
            max_price_impact_pct: cfg.execution.max_price_impact_pct,
            split_order_enabled: cfg.execution.split_order_enabled,
            split_order_threshold_sol: cfg.execution.split_order_threshold_sol,
            split_pause_s: cfg.execution.split_order_pause_s,
            size_mult_min: cfg.sizing.size_mult_min,
            size_mult_max: cfg.sizing.size_mult_max,
            max_wallet_pct: cfg.sizing.max_wallet_risk_pct,
            min_notional_sol: cfg.sizing.min_notional_sol,
            max_notional_sol: cfg.sizing.max_notional_sol,
            cooldown_s: cfg.trading.executor_cooldown_s as f64,
            max_spread_pct: 5.0,
            max_slippage_pct: 5.0,
        },
        rpc.clone(),
        aggregator.clone(),
        aggregator.clone(),
        wallets,
        streams,
        feature_store.clone(),
        bandit.clone(),
        insights.clone(),
        rug_registry.clone(),
    ));

    let auto_sell = AutoSellMonitor::new(
        AutoSellConfig {
            tick_interval_s: 2.0,
            max_concurrent: 10,
            base_trailing_stop_pct: cfg.trailing_stop.drop_pct,
            trigger_pct: cfg.trailing_stop.trigger_pct,
            volatility_cap_pct: 0.25,
            floor_mult: 0.6,
            breakeven_trigger_pct: cfg.trailing_stop.breakeven_lift_at_pct,
            rsi_period: 14,
            rsi_overbought: 70.0,
            ema_period: 10,
            ema_rollover_len: 3,
            max_hold_s: cfg.trading.time_weighted_exit_seconds as f64,
            min_profit_pct: cfg.trading.sell_profit_percent / 100.0,
            max_loss_pct: cfg.trading.max_loss_percent / 100.0,
            rug_drop_pct: 0.5,
            rug_window_s: 20.0,
            honeypot_fail_threshold: 3,
        },
        executor.clone(),
        price_source,
        feature_store.clone(),
        insights.clone(),
        rug_registry.clone(),
    );

    let router = Arc::new(EventRouter::new(librarian.clone()));
    let firehose = Arc::new(
        FirehoseListener::new(cfg.rpc.ws_url.clone(), router.clone()).with_telemetry(telemetry.clone()),
    );

    let guardian = Arc::new(CrashGuardian::new(notifier).with_telemetry(telemetry.clone()));
    let scheduler = Arc::new(PriorityScheduler::new(vec![
        "firehose".to_string(),
        "event_router".to_string(),
        "librarian".to_string(),
        "feature_store".to_string(),
        "auto_sell".to_string(),
        "crash_guardian".to_string(),
        "priority_scheduler".to_string(),
    ]));

    // Auto-sell dispatcher: spawns one trailing-stop task per fill.
    if let Some(fills) = executor.take_fill_receiver().await {
        let monitor = auto_sell.clone();
        tokio::spawn(async move { monitor.run_dispatcher(fills).await });
    }

    // Firehose listener, supervised by the guardian.
    {
        let guardian = guardian.clone();
        let firehose = firehose.clone();
        guardian
            .register(ModuleRegistration {
                name: "firehose".to_string(),
                start_fn: Arc::new(move || {
                    let firehose = firehose.clone();
                    let guardian = guardian.clone();
                    Box::pin(async move {
                        let beat_guardian = guardian.clone();
                        firehose
                            .start(move || {
                                let beat_guardian = beat_guardian.clone();
                                tokio::spawn(async move { beat_guardian.beat("firehose").await });
                            })
                            .await
                    })
                }),
                heartbeat_timeout_s: 15.0,
                restart: true,
                critical: true,
                startup_grace_s: 5.0,
                min_sleep_s: 1.0,
            })
            .await;
    }

    // Feature store pruning loop.
    {
        let feature_store = feature_store.clone();
        let guardian = guardian.clone();
        let sync_interval = cfg.feature_store.sync_interval_sec.max(1);
        guardian
            .register(ModuleRegistration {
                name: "feature_store".to_string(),
                start_fn: Arc::new(move || {
                    let feature_store = feature_store.clone();
                    let guardian = guardian.clone();
                    Box::pin(async move {
                        loop {
                            if let Err(e) = feature_store.prune_old_shards().await {
                                warn!("feature store prune failed: {e}");
                            }
                            feature_store.flush().await;
                            guardian.beat("feature_store").await;
                            tokio::time::sleep(std::time::Duration::from_secs(sync_interval)).await;
                        }
                    })
                }),
                heartbeat_timeout_s: (sync_interval * 4) as f64,
                restart: true,
                critical: false,
                startup_grace_s: 2.0,
                min_sleep_s: 1.0,
            })
            .await;
    }

    // Bandit snapshot/sync loop.
    {
        let bandit = bandit.clone();
        let feature_store = feature_store.clone();
        let guardian = guardian.clone();
        let refresh = cfg.bandit.refresh_sec.max(1);
        guardian
            .register(ModuleRegistration {
                name: "bandit_sync".to_string(),
                start_fn: Arc::new(move || {
                    let bandit = bandit.clone();
                    let feature_store = feature_store.clone();
                    let guardian = guardian.clone();
                    Box::pin(async move {
                        loop {
                            bandit
                                .sync_from_feature_store(&feature_store, overmind_protocol::core::now_epoch())
                                .await;
                            guardian.beat("bandit_sync").await;
                            tokio::time::sleep(std::time::Duration::from_secs(refresh)).await;
                        }
                    })
                }),
                heartbeat_timeout_s: (refresh * 4) as f64,
                restart: true,
                critical: false,
                startup_grace_s: 2.0,
                min_sleep_s: 1.0,
            })
            .await;
    }

    // Priority scheduler tick loop (spec.md §4.J cadence).
    {
        let scheduler = scheduler.clone();
        let firehose = firehose.clone();
        let guardian = guardian.clone();
        let telemetry = telemetry.clone();
        guardian
            .register(ModuleRegistration {
                name: "priority_scheduler".to_string(),
                start_fn: Arc::new(move || {
                    let scheduler = scheduler.clone();
                    let firehose = firehose.clone();
                    let guardian = guardian.clone();
                    let telemetry = telemetry.clone();
                    Box::pin(async move {
                        loop {
                            let tps = firehose.current_tps().await;
                            let (profile, _throttles) = scheduler
                                .tick(
                                    MarketInputs {
                                        tps,
                                        volatility: 0.0,
                                        avg_spread_pct: 0.0,
                                        liquidity_pressure: 0.0,
                                    },
                                    SystemInputs {
                                        cpu_pct: 0.0,
                                        mem_pct: 0.0,
                                        error_rate: 0.0,
                                        loss_streak: 0,
                                        backlog: 0,
                                        queue_lag_s: 0.0,
                                    },
                                )
                                .await;
                            info!(%profile, "scheduler tick");
                            let snap = telemetry.snapshot();
                            info!(
                                packets_total = snap.packets_total,
                                decode_errors_total = snap.decode_errors_total,
                                decode_latency_ms_ewma = snap.decode_latency_ms_ewma,
                                bandit_pulls_total = snap.bandit_pulls_total,
                                guardian_restarts_total = snap.guardian_restarts_total,
                                "telemetry snapshot"
                            );
                            guardian.beat("priority_scheduler").await;
                            tokio::time::sleep(std::time::Duration::from_secs(3)).await;
                        }
                    })
                }),
                heartbeat_timeout_s: 20.0,
                restart: true,
                critical: false,
                startup_grace_s: 2.0,
                min_sleep_s: 1.0,
            })
            .await;
    }

    let watchdog_guardian = guardian.clone();
    tokio::spawn(async move { watchdog_guardian.run_watchdog().await });
    let sys_guardian = guardian.clone();
    tokio::spawn(async move { sys_guardian.run_system_checks().await });
    let rpc_guardian = guardian.clone();
    let rpc_for_health = rpc.clone();
    tokio::spawn(async move { rpc_guardian.run_rpc_health(rpc_for_health).await });

    info!("all loops registered, running until shutdown signal");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, flushing feature store and exiting");
    feature_store.flush().await;
    rug_registry.save_snapshot().await.ok();
    librarian.save_snapshot().await.ok();
    Ok(())
}
