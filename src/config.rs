// Canonical configuration for the core decision/execution pipeline.
// One struct, one env-driven loader, enumerated options only (spec.md §9:
// "config objects with dozens of keys" -> one canonical structure, unknown
// keys warned, no hidden defaults outside the documented set).

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub trading: TradingConfig,
    pub trailing_stop: TrailingStopConfig,
    pub sizing: SizingConfig,
    pub execution: ExecutionConfig,
    pub bandit: BanditConfig,
    pub feature_store: FeatureStoreConfig,
    pub rpc: RpcConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    pub mode: TradingMode,
    pub buy_amount_sol: f64,
    pub sell_profit_percent: f64,
    pub max_loss_percent: f64,
    pub time_weighted_exit_seconds: u64,
    pub executor_cooldown_s: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradingMode {
    Paper,
    Live,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrailingStopConfig {
    pub drop_pct: f64,
    pub trigger_pct: f64,
    pub dynamic_window: usize,
    pub dynamic_sensitivity: f64,
    pub breakeven_lift_at_pct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizingConfig {
    pub size_mult_min: f64,
    pub size_mult_max: f64,
    pub max_wallet_risk_pct: f64,
    pub min_notional_sol: f64,
    pub max_notional_sol: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    pub swap_slippage_bps: u32,
    pub max_price_impact_pct: f64,
    pub split_order_enabled: bool,
    pub split_order_threshold_sol: f64,
    pub split_order_pause_s: f64,
    pub confirm_retries: u32,
    pub confirm_timeout_s: u64,
    pub priority_fee_lamports: u64,
    pub compute_unit_limit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanditConfig {
    pub policy: String,
    pub arms: Vec<String>,
    pub min_pulls: u32,
    pub reward_horizon_sec: u64,
    pub refresh_sec: u64,
    pub epsilon: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureStoreConfig {
    pub path: String,
    pub gzip: bool,
    pub max_days: u32,
    pub flush_every: usize,
    pub max_file_size_events: usize,
    pub sync_interval_sec: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    pub url: String,
    pub ws_url: String,
    pub commitment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

/// Env keys this loader understands. Anything else starting with `AGENT_`
/// is warned about at startup rather than silently ignored (spec.md §9).
const KNOWN_KEYS: &[&str] = &[
    "AGENT_TRADING_MODE",
    "AGENT_BUY_AMOUNT_SOL",
    "AGENT_SELL_PROFIT_PERCENT",
    "AGENT_MAX_LOSS_PERCENT",
    "AGENT_TIME_WEIGHTED_EXIT_SECONDS",
    "AGENT_EXECUTOR_COOLDOWN_S",
    "AGENT_TRAILING_DROP_PCT",
    "AGENT_TRAILING_TRIGGER_PCT",
    "AGENT_TRAILING_DYNAMIC_WINDOW",
    "AGENT_TRAILING_DYNAMIC_SENSITIVITY",
    "AGENT_TRAILING_BREAKEVEN_LIFT_AT_PCT",
    "AGENT_SIZE_MULT_MIN",
    "AGENT_SIZE_MULT_MAX",
    "AGENT_MAX_WALLET_RISK_PCT",
    "AGENT_MIN_NOTIONAL_SOL",
    "AGENT_MAX_NOTIONAL_SOL",
    "AGENT_SWAP_SLIPPAGE_BPS",
    "AGENT_MAX_PRICE_IMPACT_PCT",
    "AGENT_SPLIT_ORDER_ENABLED",
    "AGENT_SPLIT_ORDER_THRESHOLD_SOL",
    "AGENT_SPLIT_ORDER_PAUSE_S",
    "AGENT_CONFIRM_RETRIES",
    "AGENT_CONFIRM_TIMEOUT_S",
    "AGENT_PRIORITY_FEE_LAMPORTS",
    "AGENT_COMPUTE_UNIT_LIMIT",
    "AGENT_BANDIT_POLICY",
    "AGENT_BANDIT_ARMS",
    "AGENT_BANDIT_MIN_PULLS",
    "AGENT_BANDIT_REWARD_HORIZON_SEC",
    "AGENT_BANDIT_REFRESH_SEC",
    "AGENT_BANDIT_EPSILON",
    "AGENT_FEATURE_STORE_PATH",
    "AGENT_FEATURE_STORE_GZIP",
    "AGENT_FEATURE_STORE_MAX_DAYS",
    "AGENT_FEATURE_STORE_FLUSH_EVERY",
    "AGENT_FEATURE_STORE_MAX_FILE_SIZE",
    "AGENT_FEATURE_STORE_SYNC_INTERVAL_SEC",
    "AGENT_RPC_URL",
    "AGENT_RPC_WS_URL",
    "AGENT_RPC_COMMITMENT",
    "AGENT_LOG_LEVEL",
    "AGENT_LOG_JSON",
];

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(v) => v
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid {key}: {e}")),
        Err(_) => Ok(default),
    }
}

impl AppConfig {
    /// Load from environment variables (dotenvy-loaded `.env` as a
    /// fallback, never an override of real env), validate, and return.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::warn_unknown_keys();

        let mode = match env_or("AGENT_TRADING_MODE", "paper").to_lowercase().as_str() {
            "live" => TradingMode::Live,
            _ => TradingMode::Paper,
        };

        let cfg = AppConfig {
            trading: TradingConfig {
                mode,
                buy_amount_sol: parse_env("AGENT_BUY_AMOUNT_SOL", 0.1)?,
                sell_profit_percent: parse_env("AGENT_SELL_PROFIT_PERCENT", 25.0)?,
                max_loss_percent: parse_env("AGENT_MAX_LOSS_PERCENT", 15.0)?,
                time_weighted_exit_seconds: parse_env("AGENT_TIME_WEIGHTED_EXIT_SECONDS", 1800)?,
                executor_cooldown_s: parse_env("AGENT_EXECUTOR_COOLDOWN_S", 300)?,
            },
            trailing_stop: TrailingStopConfig {
                drop_pct: parse_env("AGENT_TRAILING_DROP_PCT", 0.12)?,
                trigger_pct: parse_env("AGENT_TRAILING_TRIGGER_PCT", 0.20)?,
                dynamic_window: parse_env("AGENT_TRAILING_DYNAMIC_WINDOW", 20)?,
                dynamic_sensitivity: parse_env("AGENT_TRAILING_DYNAMIC_SENSITIVITY", 1.0)?,
                breakeven_lift_at_pct: parse_env("AGENT_TRAILING_BREAKEVEN_LIFT_AT_PCT", 0.08)?,
            },
            sizing: SizingConfig {
                size_mult_min: parse_env("AGENT_SIZE_MULT_MIN", 0.5)?,
                size_mult_max: parse_env("AGENT_SIZE_MULT_MAX", 1.5)?,
                max_wallet_risk_pct: parse_env("AGENT_MAX_WALLET_RISK_PCT", 0.10)?,
                min_notional_sol: parse_env("AGENT_MIN_NOTIONAL_SOL", 0.02)?,
                max_notional_sol: parse_env("AGENT_MAX_NOTIONAL_SOL", 5.0)?,
            },
            execution: ExecutionConfig {
                swap_slippage_bps: parse_env("AGENT_SWAP_SLIPPAGE_BPS", 150)?,
                max_price_impact_pct: parse_env("AGENT_MAX_PRICE_IMPACT_PCT", 0.12)?,
                split_order_enabled: parse_env("AGENT_SPLIT_ORDER_ENABLED", true)?,
                split_order_threshold_sol: parse_env("AGENT_SPLIT_ORDER_THRESHOLD_SOL", 1.0)?,
                split_order_pause_s: parse_env("AGENT_SPLIT_ORDER_PAUSE_S", 0.8)?,
                confirm_retries: parse_env("AGENT_CONFIRM_RETRIES", 3)?,
                confirm_timeout_s: parse_env("AGENT_CONFIRM_TIMEOUT_S", 30)?,
                priority_fee_lamports: parse_env("AGENT_PRIORITY_FEE_LAMPORTS", 100_000)?,
                compute_unit_limit: parse_env("AGENT_COMPUTE_UNIT_LIMIT", 200_000)?,
            },
            bandit: BanditConfig {
                policy: env_or("AGENT_BANDIT_POLICY", "ucb1"),
                arms: env_or(
                    "AGENT_BANDIT_ARMS",
                    "scalper,ladder,momentum,conservative",
                )
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
                min_pulls: parse_env("AGENT_BANDIT_MIN_PULLS", 5)?,
                reward_horizon_sec: parse_env("AGENT_BANDIT_REWARD_HORIZON_SEC", 86_400)?,
                refresh_sec: parse_env("AGENT_BANDIT_REFRESH_SEC", 30)?,
                epsilon: parse_env("AGENT_BANDIT_EPSILON", 0.0)?,
            },
            feature_store: FeatureStoreConfig {
                path: env_or("AGENT_FEATURE_STORE_PATH", "runtime/library/feature_store"),
                gzip: parse_env("AGENT_FEATURE_STORE_GZIP", false)?,
                max_days: parse_env("AGENT_FEATURE_STORE_MAX_DAYS", 30)?,
                flush_every: parse_env("AGENT_FEATURE_STORE_FLUSH_EVERY", 200)?,
                max_file_size_events: parse_env("AGENT_FEATURE_STORE_MAX_FILE_SIZE", 20_000)?,
                sync_interval_sec: parse_env("AGENT_FEATURE_STORE_SYNC_INTERVAL_SEC", 5)?,
            },
            rpc: RpcConfig {
                url: env_or("AGENT_RPC_URL", "http://127.0.0.1:8899"),
                ws_url: env_or("AGENT_RPC_WS_URL", "ws://127.0.0.1:8900"),
                commitment: env_or("AGENT_RPC_COMMITMENT", "confirmed"),
            },
            logging: LoggingConfig {
                level: env_or("AGENT_LOG_LEVEL", "info"),
                json: parse_env("AGENT_LOG_JSON", false)?,
            },
        };

        cfg.validate()?;
        Ok(cfg)
    }

    fn warn_unknown_keys() {
        for (key, _) in env::vars() {
            if key.starts_with("AGENT_") && !KNOWN_KEYS.contains(&key.as_str()) {
                warn!(key, "unrecognized AGENT_ config key, ignoring");
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.trading.buy_amount_sol <= 0.0 {
            anyhow::bail!("buy_amount_sol must be positive");
        }
        if self.sizing.size_mult_min > self.sizing.size_mult_max {
            anyhow::bail!("size_mult_min must not exceed size_mult_max");
        }
        if self.sizing.min_notional_sol > self.sizing.max_notional_sol {
            anyhow::bail!("min_notional_sol must not exceed max_notional_sol");
        }
        if self.bandit.arms.is_empty() {
            anyhow::bail!("bandit.arms must not be empty");
        }
        if self.feature_store.flush_every == 0 {
            anyhow::bail!("feature_store.flush_every must be positive");
        }
        Ok(())
    }

    pub fn is_live_trading(&self) -> bool {
        matches!(self.trading.mode, TradingMode::Live)
    }
}
