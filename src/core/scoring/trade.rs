//! Trade engine: scores established tokens against a `trade.*` profile.
//! Grounded on spec.md §4.F and
//! `original_source/tpu/scoring/trade_scoring.py` (bucket names, onchain
//! flow weighting).

use super::{apply_hard_gates, finalize, weighted_bucket_score, ScoringContext, Verdict};
use crate::core::models::StrategyProfile;

const BUCKETS: [&str; 5] = ["chart", "onchain", "social", "memory", "flow"];
const DEFAULT_WEIGHT: f64 = 0.2;

fn weight(profile: &StrategyProfile, bucket: &str) -> f64 {
    profile.weights.get(bucket).copied().unwrap_or(DEFAULT_WEIGHT)
}

pub fn evaluate_trade(ctx: &ScoringContext, profile: &StrategyProfile) -> Verdict {
    if let Err(verdict) = apply_hard_gates(ctx, profile) {
        return verdict;
    }

    let buckets = [
        (BUCKETS[0], ctx.chart_score_0_20 / 20.0, weight(profile, BUCKETS[0])),
        (BUCKETS[1], ctx.onchain_score, weight(profile, BUCKETS[1])),
        (BUCKETS[2], ctx.social_score, weight(profile, BUCKETS[2])),
        (BUCKETS[3], ctx.memory_score, weight(profile, BUCKETS[3])),
        (BUCKETS[4], ctx.flow_score, weight(profile, BUCKETS[4])),
    ];
    let (score, breakdown) = weighted_bucket_score(&buckets);
    let reasoning = vec![format!("trade_buckets:{:.2}", score)];

    finalize(score, ctx, profile, breakdown, reasoning)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::GateConfig;
    use std::collections::HashMap;

    fn profile() -> StrategyProfile {
        StrategyProfile {
            mode: "trade".to_string(),
            name: "momentum".to_string(),
            gates: GateConfig::default(),
            weights: HashMap::new(),
            bands: Default::default(),
            dynamic: Default::default(),
            sizing: Default::default(),
        }
    }

    fn ctx() -> ScoringContext {
        ScoringContext {
            token: "T2".to_string(),
            mode: Some(super::super::Mode::Trade),
            scanner_source: Some("chart_scan".to_string()),
            age_minutes: Some(600.0),
            tax_bps: 100,
            lp_locked: true,
            honeypot_similarity: 0.05,
            spread_pct: 1.0,
            slippage_pct: 0.5,
            depth_sol: 100.0,
            blacklisted: false,
            first_minute_buyers: 0,
            wallet_quality: 0.6,
            liquidity_score: 0.7,
            social_score: 0.6,
            chart_score_0_20: 14.0,
            onchain_score: 0.75,
            memory_score: 0.6,
            flow_score: 0.65,
            forecast_expected_return: Some(0.1),
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

    #[test]
    fn strong_onchain_and_chart_context_reaches_a_buy_band() {
        let verdict = evaluate_trade(&ctx(), &profile());
        assert!(matches!(verdict.action.as_str(), "probe" | "buy" | "aggressive_buy"));
    }

    #[test]
    fn weak_context_stays_in_watch_or_ignore() {
        let mut c = ctx();
        c.onchain_score = 0.1;
        c.chart_score_0_20 = 2.0;
        c.social_score = 0.1;
        c.memory_score = 0.1;
        c.flow_score = 0.1;
        c.forecast_expected_return = None;
        let verdict = evaluate_trade(&c, &profile());
        assert!(matches!(verdict.action.as_str(), "ignore" | "watch"));
    }

    #[test]
    fn gate_failure_never_runs_bucket_math() {
        let mut c = ctx();
        c.lp_locked = false;
        let verdict = evaluate_trade(&c, &profile());
        assert_eq!(verdict.action, "ignore");
        assert!(verdict.reasoning.iter().any(|r| r == "lp_not_locked:true"));
    }
}
