//! Priority Scheduler: market-heat / system-stress estimation and the
//! per-module throttle table every loop paces itself against. Grounded on
//! spec.md §4.J and `original_source/tpu/runtime/priority_scheduler.py`;
//! formulas match `SPEC_FULL.md` §4.J exactly (the Open Question on
//! "volatility pressure" resolves here — see `DESIGN.md`).

use crate::core::models::clamp;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;

const EWMA_ALPHA: f64 = 0.3;
const STRESS_SAFE: f64 = 0.9;
const STRESS_RECOVERY: f64 = 0.75;
const HEAT_FRENZY: f64 = 0.65;
const HEAT_CHOP: f64 = 0.35;

/// Modules that always run at full throttle regardless of stress — the
/// supervisory and risk-exit loops must never be slowed down by the very
/// conditions they exist to react to (spec.md §5 backpressure rule).
const ALWAYS_FULL_THROTTLE: &[&str] = &[
    "crash_guardian",
    "priority_scheduler",
    "strategy_auditor",
    "self_tuner",
    "auto_sell",
];

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MarketInputs {
    pub tps: f64,
    pub volatility: f64,
    pub avg_spread_pct: f64,
    pub liquidity_pressure: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SystemInputs {
    pub cpu_pct: f64,
    pub mem_pct: f64,
    pub error_rate: f64,
    pub loss_streak: u32,
    pub backlog: f64,
    pub queue_lag_s: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuntimeProfile {
    Safe,
    Recovery,
    LaunchFrenzy,
    ChopZone,
    Balanced,
}

impl std::fmt::Display for RuntimeProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RuntimeProfile::Safe => "safe_mode",
            RuntimeProfile::Recovery => "recovery",
            RuntimeProfile::LaunchFrenzy => "launch_frenzy",
            RuntimeProfile::ChopZone => "chop_zone",
            RuntimeProfile::Balanced => "balanced",
        };
        write!(f, "{s}")
    }
}

fn sigmoid_tps(tps: f64) -> f64 {
    1.0 - (-tps / 500.0).exp()
}

/// `market_heat` per SPEC_FULL §4.J.
pub fn market_heat(inputs: &MarketInputs) -> f64 {
    let spread01 = clamp(inputs.avg_spread_pct / 100.0, 0.0, 1.0);
    let raw = 0.5 * clamp(inputs.volatility, 0.0, 1.0)
        + 0.4 * sigmoid_tps(inputs.tps.max(0.0))
        + 0.1 * (1.0 - spread01);
    let attenuated = raw * (1.0 - 0.3 * clamp(inputs.liquidity_pressure, 0.0, 1.0));
    clamp(attenuated, 0.0, 1.0)
}

/// `system_stress` per SPEC_FULL §4.J.
pub fn system_stress(inputs: &SystemInputs) -> f64 {
    let resource = clamp(inputs.cpu_pct, 0.0, 1.0).max(clamp(inputs.mem_pct, 0.0, 1.0));
    let reliability = clamp(inputs.error_rate, 0.0, 1.0).max((inputs.loss_streak as f64 / 5.0).min(1.0));
    let congestion = (inputs.backlog / 100.0 + inputs.queue_lag_s / 5.0).min(1.0);
    clamp(resource.max(reliability).max(congestion), 0.0, 1.0)
}

fn ewma(prev: f64, sample: f64) -> f64 {
    EWMA_ALPHA * sample + (1.0 - EWMA_ALPHA) * prev
}

fn choose_profile(stress: f64, heat: f64) -> RuntimeProfile {
    if stress >= STRESS_SAFE {
        RuntimeProfile::Safe
    } else if stress >= STRESS_RECOVERY {
        RuntimeProfile::Recovery
    } else if heat > HEAT_FRENZY {
        RuntimeProfile::LaunchFrenzy
    } else if heat < HEAT_CHOP {
        RuntimeProfile::ChopZone
    } else {
        RuntimeProfile::Balanced
    }
}

/// Per-profile base throttle, before module-weight and stress attenuation.
fn base_throttle(profile: RuntimeProfile, module: &str) -> f64 {
    match profile {
        RuntimeProfile::Safe => match module {
            "executor" => 0.1,
            "firehose" => 0.3,
            "event_router" => 0.3,
            "librarian" => 0.4,
            "scoring" => 0.3,
            "bandit" => 0.3,
            "feature_store" => 0.5,
            "social" => 0.1,
            _ => 0.3,
        },
        RuntimeProfile::Recovery => match module {
            "executor" => 0.4,
            "firehose" => 0.6,
            "event_router" => 0.6,
            "librarian" => 0.7,
            "scoring" => 0.6,
            "bandit" => 0.6,
            "feature_store" => 0.8,
            "social" => 0.4,
            _ => 0.6,
        },
        RuntimeProfile::LaunchFrenzy => match module {
            "social" => 0.6,
            "feature_store" => 0.9,
            _ => 1.0,
        },
        RuntimeProfile::ChopZone => match module {
            "executor" => 0.6,
            "firehose" => 0.8,
            "social" => 0.5,
            _ => 0.7,
        },
        RuntimeProfile::Balanced => 1.0,
    }
}

fn stress_attenuation(stress: f64) -> f64 {
    (1.0 - 0.7 * (stress - HEAT_CHOP).max(0.0)).max(0.2)
}

pub struct PriorityScheduler {
    state: Mutex<(f64, f64)>, // (market_heat_ewma, system_stress_ewma)
    modules: Vec<String>,
}

impl PriorityScheduler {
    pub fn new(modules: Vec<String>) -> Self {
        Self {
            state: Mutex::new((0.0, 0.0)),
            modules,
        }
    }

    /// One scheduling tick: folds a fresh sample into the EWMA-smoothed
    /// heat/stress, chooses a runtime profile, and produces the throttle
    /// table every registered module should pace itself against.
    pub async fn tick(&self, market: MarketInputs, system: SystemInputs) -> (RuntimeProfile, HashMap<String, f64>) {
        let heat_sample = market_heat(&market);
        let stress_sample = system_stress(&system);
        let (heat, stress) = {
            let mut state = self.state.lock().await;
            state.0 = ewma(state.0, heat_sample);
            state.1 = ewma(state.1, stress_sample);
            *state
        };
        let profile = choose_profile(stress, heat);
        let attenuation = stress_attenuation(stress);

        let mut table = HashMap::new();
        for module in &self.modules {
            let throttle = if ALWAYS_FULL_THROTTLE.contains(&module.as_str()) {
                1.0
            } else {
                clamp(base_throttle(profile, module) * attenuation, 0.0, 1.0)
            };
            table.insert(module.clone(), throttle);
        }
        (profile, table)
    }

    pub async fn current_smoothed(&self) -> (f64, f64) {
        *self.state.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calm_market() -> MarketInputs {
        MarketInputs {
            tps: 10.0,
            volatility: 0.1,
            avg_spread_pct: 0.5,
            liquidity_pressure: 0.1,
        }
    }

    fn calm_system() -> SystemInputs {
        SystemInputs {
            cpu_pct: 0.2,
            mem_pct: 0.3,
            error_rate: 0.0,
            loss_streak: 0,
            backlog: 0.0,
            queue_lag_s: 0.0,
        }
    }

    #[tokio::test]
    async fn calm_inputs_select_balanced_or_chop_and_full_throttle_for_exempt_modules() {
        let scheduler = PriorityScheduler::new(vec!["executor".to_string(), "auto_sell".to_string()]);
        let (profile, table) = scheduler.tick(calm_market(), calm_system()).await;
        assert!(matches!(profile, RuntimeProfile::Balanced | RuntimeProfile::ChopZone));
        assert_eq!(table["auto_sell"], 1.0);
    }

    #[tokio::test]
    async fn high_stress_selects_safe_mode_and_throttles_non_exempt_modules() {
        let scheduler = PriorityScheduler::new(vec!["executor".to_string(), "crash_guardian".to_string()]);
        let stressed = SystemInputs {
            cpu_pct: 0.95,
            mem_pct: 0.95,
            error_rate: 0.5,
            loss_streak: 5,
            backlog: 50.0,
            queue_lag_s: 3.0,
        };
        // Drive the EWMA up over a few ticks since it smooths the sample.
        let mut profile = RuntimeProfile::Balanced;
        let mut table = HashMap::new();
        for _ in 0..20 {
            let (p, t) = scheduler.tick(calm_market(), stressed).await;
            profile = p;
            table = t;
        }
        assert_eq!(profile, RuntimeProfile::Safe);
        assert_eq!(table["crash_guardian"], 1.0);
        assert!(table["executor"] < 0.5);
    }

    #[test]
    fn market_heat_and_system_stress_stay_in_unit_interval() {
        let extreme_market = MarketInputs {
            tps: 10_000.0,
            volatility: 5.0,
            avg_spread_pct: -5.0,
            liquidity_pressure: 5.0,
        };
        let h = market_heat(&extreme_market);
        assert!((0.0..=1.0).contains(&h));

        let extreme_system = SystemInputs {
            cpu_pct: 5.0,
            mem_pct: 5.0,
            error_rate: 5.0,
            loss_streak: 100,
            backlog: 1000.0,
            queue_lag_s: 100.0,
        };
        let s = system_stress(&extreme_system);
        assert!((0.0..=1.0).contains(&s));
    }
}
