//! Snipe engine: scores very-fresh mints/LP adds against a `snipe.*`
//! profile. Grounded on spec.md §4.F and
//! `original_source/tpu/scoring/snipe_scoring.py` (bucket names, dynamic
//! relief ordering).

use super::{apply_hard_gates, finalize, weighted_bucket_score, ScoringContext, Verdict};
use crate::core::models::StrategyProfile;

const BUCKETS: [&str; 5] = ["t0_flow", "wallet", "liquidity", "social", "chart"];
const DEFAULT_WEIGHT: f64 = 0.2;

fn weight(profile: &StrategyProfile, bucket: &str) -> f64 {
    profile.weights.get(bucket).copied().unwrap_or(DEFAULT_WEIGHT)
}

/// `t0_flow`: early-buyer pressure, normalized against a rough "healthy
/// launch" reference of 30 first-minute buyers.
fn t0_flow_bucket(ctx: &ScoringContext) -> f64 {
    (ctx.first_minute_buyers as f64 / 30.0).min(1.0)
}

pub fn evaluate_snipe(ctx: &ScoringContext, profile: &StrategyProfile) -> Verdict {
    if let Err(verdict) = apply_hard_gates(ctx, profile) {
        return verdict;
    }

    let buckets = [
        (BUCKETS[0], t0_flow_bucket(ctx), weight(profile, BUCKETS[0])),
        (BUCKETS[1], ctx.wallet_quality, weight(profile, BUCKETS[1])),
        (BUCKETS[2], ctx.liquidity_score, weight(profile, BUCKETS[2])),
        (BUCKETS[3], ctx.social_score, weight(profile, BUCKETS[3])),
        (BUCKETS[4], ctx.chart_score_0_20 / 20.0, weight(profile, BUCKETS[4])),
    ];
    let (score, breakdown) = weighted_bucket_score(&buckets);
    let reasoning = vec![format!("snipe_buckets:{:.2}", score)];

    finalize(score, ctx, profile, breakdown, reasoning)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::GateConfig;
    use std::collections::HashMap;

    fn profile() -> StrategyProfile {
        StrategyProfile {
            mode: "snipe".to_string(),
            name: "t0_liquidity".to_string(),
            gates: GateConfig::default(),
            weights: HashMap::new(),
            bands: Default::default(),
            dynamic: Default::default(),
            sizing: Default::default(),
        }
    }

    fn ctx() -> ScoringContext {
        ScoringContext {
            token: "T1".to_string(),
            mode: Some(super::super::Mode::Snipe),
            scanner_source: Some("firehose".to_string()),
            age_minutes: Some(0.5),
            tax_bps: 200,
            lp_locked: true,
            honeypot_similarity: 0.1,
            spread_pct: 2.0,
            slippage_pct: 1.0,
            depth_sol: 40.0,
            blacklisted: false,
            first_minute_buyers: 25,
            wallet_quality: 0.8,
            liquidity_score: 0.8,
            social_score: 0.5,
            chart_score_0_20: 10.0,
            onchain_score: 0.7,
            memory_score: 0.5,
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

    #[test]
    fn healthy_early_launch_clears_watch_into_probe_or_buy() {
        let verdict = evaluate_snipe(&ctx(), &profile());
        assert!(matches!(verdict.action.as_str(), "probe" | "snipe" | "aggressive_buy"));
    }

    #[test]
    fn bundle_launch_penalty_raises_the_effective_buy_floor() {
        let mut c = ctx();
        c.wallet_quality = 0.55;
        c.liquidity_score = 0.55;
        c.social_score = 0.4;
        let clean = evaluate_snipe(&c, &profile());
        c.bundle_launch_suspected = true;
        let penalized = evaluate_snipe(&c, &profile());
        // Penalty only shifts the band threshold, never the underlying
        // score, so the score itself is unchanged while the effective buy
        // floor moves up (making the same score less likely to clear it).
        assert_eq!(penalized.final_score, clean.final_score);
        let clean_floor = clean.breakdown["effective_buy_min"].as_f64().unwrap();
        let penalized_floor = penalized.breakdown["effective_buy_min"].as_f64().unwrap();
        assert!(penalized_floor >= clean_floor);
    }

    #[test]
    fn aggressive_gate_failure_short_circuits_before_buckets() {
        let mut c = ctx();
        c.honeypot_similarity = 0.99;
        let verdict = evaluate_snipe(&c, &profile());
        assert_eq!(verdict.action, "ignore");
        assert_eq!(verdict.final_score, 0.0);
    }
}
