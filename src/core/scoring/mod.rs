//! Scoring router and the snipe/trade engines it dispatches to. Grounded on
//! spec.md §4.E/§4.F and `original_source/tpu/scoring/scoring_engine.py`
//! (mode routing, ML/chart/forecast overlays).

pub mod profile;
pub mod snipe;
pub mod trade;

use crate::core::models::{clamp, ActionBand, StrategyProfile, Variant};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    Snipe,
    Trade,
}

/// Everything a gate/bucket computation needs about one candidate token.
/// Built by the caller from the librarian's `build_context` plus live
/// market data; deliberately flat so engines can be pure functions of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringContext {
    pub token: String,
    pub mode: Option<Mode>,
    pub scanner_source: Option<String>,
    pub age_minutes: Option<f64>,
    pub tax_bps: u32,
    pub lp_locked: bool,
    pub honeypot_similarity: f64,
    pub spread_pct: f64,
    pub slippage_pct: f64,
    pub depth_sol: f64,
    pub blacklisted: bool,
    pub first_minute_buyers: u32,
    pub wallet_quality: f64,
    pub liquidity_score: f64,
    pub social_score: f64,
    pub chart_score_0_20: f64,
    pub onchain_score: f64,
    pub memory_score: f64,
    pub flow_score: f64,
    pub forecast_expected_return: Option<f64>,
    pub ml_price_pred: Option<f64>,
    pub ml_rug_pred: Option<f64>,
    pub ml_wallet_pred: Option<f64>,
    pub trusted_source: bool,
    pub bundle_launch_suspected: bool,
    /// Raw intuition/model-gut signal in `[-1,1]`; scaled to a soft ±5
    /// addition (spec.md §4.F step 3).
    pub intuition_raw: Option<f64>,
    /// Raw trait-match signal in `[-1,1]`; scaled to a soft ±5 addition.
    pub trait_raw: Option<f64>,
    /// Micro-strategy or global freeze flag (spec.md §4.F step 6): when set,
    /// the verdict is forced to `ignore` regardless of score.
    pub frozen: bool,
    pub freeze_reason: Option<String>,
}

/// The result an engine (or the router, after overlays) hands back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub action: String,
    pub final_score: f64,
    pub reasoning: Vec<String>,
    pub strategy: String,
    pub breakdown: serde_json::Map<String, serde_json::Value>,
    pub variant: Option<Variant>,
}

impl Verdict {
    fn ignored(reason: impl Into<String>) -> Self {
        Self {
            action: "ignore".to_string(),
            final_score: 0.0,
            reasoning: vec![reason.into()],
            strategy: String::new(),
            breakdown: serde_json::Map::new(),
            variant: None,
        }
    }
}

/// Picks `snipe` vs `trade` (spec.md §4.E): explicit mode field first, then
/// known snipe-producing sources, then sub-10-minute freshness, else trade.
pub fn decide_mode(ctx: &ScoringContext) -> Mode {
    if let Some(mode) = ctx.mode {
        return mode;
    }
    if let Some(src) = &ctx.scanner_source {
        if matches!(
            src.as_str(),
            "firehose" | "snipe_trigger" | "amm_listen" | "raydium_stream"
        ) {
            return Mode::Snipe;
        }
    }
    if let Some(age) = ctx.age_minutes {
        if age < 10.0 {
            return Mode::Snipe;
        }
    }
    Mode::Trade
}

/// Routes to the matching engine, then applies the chart/forecast/ML
/// overlays shared by both modes.
pub fn score_token(ctx: &ScoringContext, profile: &StrategyProfile) -> Verdict {
    let mode = decide_mode(ctx);
    let mut verdict = match mode {
        Mode::Snipe => snipe::evaluate_snipe(ctx, profile),
        Mode::Trade => trade::evaluate_trade(ctx, profile),
    };

    let chart01 = clamp(ctx.chart_score_0_20, 0.0, 20.0) / 20.0;
    let overlay_cap = if mode == Mode::Trade { 8.0 } else { 5.0 };
    let chart_boost = chart01 * overlay_cap;
    verdict.final_score = clamp(verdict.final_score + chart_boost, 0.0, 100.0);
    verdict.reasoning.push(format!(
        "chart_overlay:+{chart_boost:.2} (norm={chart01:.2}, cap={overlay_cap:.1})"
    ));

    if let Some(expected_return) = ctx.forecast_expected_return {
        if expected_return != 0.0 {
            let fweight = if mode == Mode::Trade { 0.05 } else { 0.08 };
            let boost = expected_return * 100.0 * fweight;
            verdict.final_score = clamp(verdict.final_score + boost, 0.0, 100.0);
            verdict
                .reasoning
                .push(format!("forecast_overlay:+{:.2}%x{fweight:.2}", expected_return * 100.0));
        }
    }

    let mut ml_boost = 0.0;
    if let Some(p) = ctx.ml_price_pred {
        ml_boost += p * 2.0;
    }
    if let Some(p) = ctx.ml_rug_pred {
        ml_boost -= p * 3.0;
    }
    if let Some(p) = ctx.ml_wallet_pred {
        ml_boost += p * 1.5;
    }
    if ml_boost != 0.0 {
        verdict.final_score = clamp(verdict.final_score + ml_boost, 0.0, 100.0);
        verdict.reasoning.push(format!("ml_blend:{ml_boost:.2}"));
    }

    verdict
}

/// Shared hard-gate evaluation (spec.md §4.F step 1). Any failure short
/// circuits to an `ignore` verdict carrying the `gate:reason` string.
pub(crate) fn apply_hard_gates(ctx: &ScoringContext, profile: &StrategyProfile) -> Result<(), Verdict> {
    let gates = &profile.gates;
    if ctx.blacklisted {
        return Err(Verdict::ignored("blacklisted:true"));
    }
    if ctx.honeypot_similarity >= gates.max_honeypot_similarity {
        return Err(Verdict::ignored(format!(
            "honeypot_similarity_too_high:{:.2}",
            ctx.honeypot_similarity
        )));
    }
    if gates.require_lp_lock && !ctx.lp_locked {
        return Err(Verdict::ignored("lp_not_locked:true"));
    }
    if ctx.tax_bps as f64 > gates.max_tax_bps as f64 {
        return Err(Verdict::ignored(format!("tax_too_high:{}", ctx.tax_bps)));
    }
    if ctx.spread_pct > gates.max_spread_pct {
        return Err(Verdict::ignored(format!("spread_too_wide:{:.2}", ctx.spread_pct)));
    }
    if ctx.slippage_pct > gates.max_slippage_pct {
        return Err(Verdict::ignored(format!("slippage_too_high:{:.2}", ctx.slippage_pct)));
    }
    if ctx.depth_sol < gates.min_depth_sol {
        return Err(Verdict::ignored(format!("depth_too_thin:{:.2}", ctx.depth_sol)));
    }
    Ok(())
}

/// Weighted bucket sum, scaled to 0..100 assuming each bucket input is
/// already normalized to 0..1 and weights sum to roughly 1.0 (not enforced;
/// a profile with weights summing above 1 simply scores hotter).
pub(crate) fn weighted_bucket_score(buckets: &[(&str, f64, f64)]) -> (f64, serde_json::Map<String, serde_json::Value>) {
    let mut total = 0.0;
    let mut breakdown = serde_json::Map::new();
    for (name, value, weight) in buckets {
        let contribution = value * weight;
        total += contribution;
        breakdown.insert(
            name.to_string(),
            serde_json::json!({ "value": value, "weight": weight, "contribution": contribution }),
        );
    }
    (clamp(total * 100.0, 0.0, 100.0), breakdown)
}

/// Applies early/trusted-source relief and bundle-launch penalty to the
/// profile's `buy_min`, then maps the (possibly relieved) score into an
/// action band. The relieved floor never crosses `buy_max` (spec.md §4.F
/// tie-break rule).
pub(crate) fn map_to_band(score: f64, ctx: &ScoringContext, profile: &StrategyProfile) -> (ActionBand, f64) {
    let bands = &profile.bands;
    let dyn_adj = &profile.dynamic;
    let mut effective_buy_min = bands.buy_min;

    if let Some(age) = ctx.age_minutes {
        if age * 60.0 <= dyn_adj.early_window_s {
            effective_buy_min -= dyn_adj.early_relief;
        }
    }
    if ctx.trusted_source {
        effective_buy_min -= dyn_adj.trusted_source_relief;
    }
    if ctx.bundle_launch_suspected {
        effective_buy_min += dyn_adj.bundle_launch_penalty;
    }
    effective_buy_min = clamp(effective_buy_min, bands.watch_max, bands.buy_max);

    let band = if score <= bands.ignore_max {
        ActionBand::Ignore
    } else if score <= bands.watch_max {
        ActionBand::Watch
    } else if score < effective_buy_min {
        ActionBand::Watch
    } else if score <= bands.buy_max {
        if bands.probe_split && score < (effective_buy_min + bands.buy_max) / 2.0 {
            ActionBand::Probe
        } else {
            ActionBand::Buy
        }
    } else if score <= bands.agg_max {
        ActionBand::AggressiveBuy
    } else {
        ActionBand::AggressiveBuy
    };

    (band, effective_buy_min)
}

/// Soft additions (spec.md §4.F step 3): intuition and trait signals each
/// scaled into a ±5 addition, plus a wallet-quality bonus derived the same
/// way. Every addition is individually clamped before being summed so one
/// noisy signal cannot dominate the others.
pub(crate) fn soft_additions(ctx: &ScoringContext) -> (f64, Vec<String>) {
    let mut total = 0.0;
    let mut reasons = Vec::new();

    if let Some(raw) = ctx.intuition_raw {
        let add = clamp(raw * 5.0, -5.0, 5.0);
        total += add;
        reasons.push(format!("intuition:{add:+.2}"));
    }
    if let Some(raw) = ctx.trait_raw {
        let add = clamp(raw * 5.0, -5.0, 5.0);
        total += add;
        reasons.push(format!("traits:{add:+.2}"));
    }
    let wallet_bonus = clamp((ctx.wallet_quality - 0.5) * 10.0, -5.0, 5.0);
    total += wallet_bonus;
    reasons.push(format!("wallet_bonus:{wallet_bonus:+.2}"));

    (total, reasons)
}

/// Self/memory reweight (spec.md §4.F step 5): a small nudge from the
/// librarian's recalled memory score, independent of whichever bucket
/// already folds `memory_score` in. Clamped so the running score stays in
/// `[0,100]` once applied.
pub(crate) fn memory_reweight(score: f64, ctx: &ScoringContext) -> (f64, String) {
    let nudge = clamp((ctx.memory_score - 0.5) * 10.0, -6.0, 6.0);
    (clamp(score + nudge, 0.0, 100.0), format!("memory_reweight:{nudge:+.2}"))
}

/// Renders the action string for a mapped band (spec.md §4.F step 7:
/// `action ∈ {ignore, watch, probe, snipe|buy, aggressive_buy, auto}`).
/// `ActionBand::Buy` renders as `"snipe"` in snipe mode and `"buy"`
/// otherwise; every other band's label is mode-independent.
fn action_label(band: ActionBand, profile: &StrategyProfile) -> String {
    if band == ActionBand::Buy && profile.mode == "snipe" {
        "snipe".to_string()
    } else {
        band.to_string()
    }
}

/// Shared tail of both engines: soft additions, memory reweight, the
/// micro-strategy/global freeze check, band mapping and variant attach
/// (spec.md §4.F steps 3, 5, 6, 7, 8).
pub(crate) fn finalize(
    bucket_score: f64,
    ctx: &ScoringContext,
    profile: &StrategyProfile,
    mut breakdown: serde_json::Map<String, serde_json::Value>,
    mut reasoning: Vec<String>,
) -> Verdict {
    let (soft_total, soft_reasons) = soft_additions(ctx);
    reasoning.extend(soft_reasons);
    let with_soft = clamp(bucket_score + soft_total, 0.0, 100.0);

    let (with_memory, memory_reason) = memory_reweight(with_soft, ctx);
    reasoning.push(memory_reason);

    if ctx.frozen {
        reasoning.push(format!(
            "frozen:{}",
            ctx.freeze_reason.as_deref().unwrap_or("strategy_or_global_freeze")
        ));
        return Verdict {
            action: ActionBand::Ignore.to_string(),
            final_score: 0.0,
            reasoning,
            strategy: format!("{}.{}", profile.mode, profile.name),
            breakdown,
            variant: None,
        };
    }

    let (band, effective_buy_min) = map_to_band(with_memory, ctx, profile);
    reasoning.push(format!("band:{band} (effective_buy_min={effective_buy_min:.2})"));
    breakdown.insert("effective_buy_min".to_string(), serde_json::json!(effective_buy_min));

    let variant = default_variant_for_band(band, profile);

    Verdict {
        action: action_label(band, profile),
        final_score: with_memory,
        reasoning,
        strategy: format!("{}.{}", profile.mode, profile.name),
        breakdown,
        variant,
    }
}

/// Safe default execution variant for a buy-side band, used when the
/// contextual bandit is unavailable (spec.md §4.F step 8, §4.G). The
/// bandit, when wired in, calls `core::bandit::ContextualBandit::choose_variant`
/// to override this with a learned arm; this function never changes the
/// band itself, only fills in execution detail.
pub(crate) fn default_variant_for_band(band: ActionBand, profile: &StrategyProfile) -> Option<Variant> {
    match band {
        ActionBand::Probe => Some(Variant {
            id: "default_probe".to_string(),
            size: profile.sizing.size_mult_min,
            ladder: 1,
            route: "aggregator".to_string(),
            arm: "default".to_string(),
        }),
        ActionBand::Buy | ActionBand::Auto => Some(Variant {
            id: "default_buy".to_string(),
            size: (profile.sizing.size_mult_min + profile.sizing.size_mult_max) / 2.0,
            ladder: 2,
            route: "aggregator".to_string(),
            arm: "default".to_string(),
        }),
        ActionBand::AggressiveBuy => Some(Variant {
            id: "default_aggressive".to_string(),
            size: profile.sizing.size_mult_max,
            ladder: 3,
            route: "direct_amm".to_string(),
            arm: "default".to_string(),
        }),
        ActionBand::Ignore | ActionBand::Watch => None,
    }
}
