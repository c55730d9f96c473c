//! Strategy profile catalog. Grounded on
//! `original_source/tpu/scoring/strategy_profiles.py`: a fixed set of named
//! `(mode, name)` profiles, each carrying its own gates/weights/bands/
//! dynamic/sizing, looked up by the scoring router (optionally after the
//! bandit has picked among the names for a mode).

use crate::core::models::{
    BandThresholds, DynamicAdjustments, GateConfig, SizingConfig, StrategyProfile,
};
use std::collections::HashMap;

/// Immutable registry of built-in profiles, identified by `"<mode>.<name>"`
/// (spec.md §3 `StrategyProfile`, e.g. `snipe.t0_liquidity`).
pub struct ProfileCatalog {
    profiles: HashMap<String, StrategyProfile>,
}

impl ProfileCatalog {
    pub fn get(&self, mode: &str, name: &str) -> Option<&StrategyProfile> {
        self.profiles.get(&format!("{mode}.{name}"))
    }

    /// Names registered for a given mode, in a stable order — this is the
    /// arm set the bandit chooses among when asked to pick a profile.
    pub fn names_for_mode(&self, mode: &str) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .profiles
            .values()
            .filter(|p| p.mode == mode)
            .map(|p| p.name.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    pub fn default_for_mode(&self, mode: &str) -> Option<&StrategyProfile> {
        match mode {
            "snipe" => self.get("snipe", "t0_liquidity"),
            "trade" => self.get("trade", "momentum"),
            _ => None,
        }
    }
}

impl Default for ProfileCatalog {
    fn default() -> Self {
        let mut profiles = HashMap::new();

        profiles.insert(
            "snipe.t0_liquidity".to_string(),
            StrategyProfile {
                mode: "snipe".to_string(),
                name: "t0_liquidity".to_string(),
                gates: GateConfig {
                    max_honeypot_similarity: 0.85,
                    require_lp_lock: true,
                    max_tax_bps: 1000,
                    max_spread_pct: 5.0,
                    max_slippage_pct: 5.0,
                    min_depth_sol: 5.0,
                },
                weights: weights(&[
                    ("t0_flow", 0.30),
                    ("wallet", 0.20),
                    ("liquidity", 0.25),
                    ("social", 0.10),
                    ("chart", 0.15),
                ]),
                bands: BandThresholds {
                    ignore_max: 20.0,
                    watch_max: 40.0,
                    buy_min: 50.0,
                    buy_max: 75.0,
                    agg_max: 90.0,
                    probe_split: true,
                },
                dynamic: DynamicAdjustments {
                    early_window_s: 60.0,
                    early_relief: 8.0,
                    trusted_source_relief: 5.0,
                    bundle_launch_penalty: 12.0,
                },
                sizing: SizingConfig {
                    size_mult_min: 0.25,
                    size_mult_max: 1.0,
                },
            },
        );

        profiles.insert(
            "snipe.aggressive_frenzy".to_string(),
            StrategyProfile {
                mode: "snipe".to_string(),
                name: "aggressive_frenzy".to_string(),
                gates: GateConfig {
                    max_honeypot_similarity: 0.8,
                    require_lp_lock: true,
                    max_tax_bps: 700,
                    max_spread_pct: 4.0,
                    max_slippage_pct: 4.0,
                    min_depth_sol: 8.0,
                },
                weights: weights(&[
                    ("t0_flow", 0.35),
                    ("wallet", 0.25),
                    ("liquidity", 0.20),
                    ("social", 0.10),
                    ("chart", 0.10),
                ]),
                bands: BandThresholds {
                    ignore_max: 25.0,
                    watch_max: 45.0,
                    buy_min: 55.0,
                    buy_max: 78.0,
                    agg_max: 88.0,
                    probe_split: false,
                },
                dynamic: DynamicAdjustments {
                    early_window_s: 30.0,
                    early_relief: 10.0,
                    trusted_source_relief: 6.0,
                    bundle_launch_penalty: 15.0,
                },
                sizing: SizingConfig {
                    size_mult_min: 0.4,
                    size_mult_max: 1.0,
                },
            },
        );

        profiles.insert(
            "trade.momentum".to_string(),
            StrategyProfile {
                mode: "trade".to_string(),
                name: "momentum".to_string(),
                gates: GateConfig {
                    max_honeypot_similarity: 0.9,
                    require_lp_lock: true,
                    max_tax_bps: 1200,
                    max_spread_pct: 6.0,
                    max_slippage_pct: 6.0,
                    min_depth_sol: 10.0,
                },
                weights: weights(&[
                    ("chart", 0.30),
                    ("onchain", 0.25),
                    ("social", 0.15),
                    ("memory", 0.15),
                    ("flow", 0.15),
                ]),
                bands: BandThresholds {
                    ignore_max: 15.0,
                    watch_max: 35.0,
                    buy_min: 48.0,
                    buy_max: 72.0,
                    agg_max: 85.0,
                    probe_split: true,
                },
                dynamic: DynamicAdjustments {
                    early_window_s: 120.0,
                    early_relief: 4.0,
                    trusted_source_relief: 4.0,
                    bundle_launch_penalty: 10.0,
                },
                sizing: SizingConfig {
                    size_mult_min: 0.2,
                    size_mult_max: 0.9,
                },
            },
        );

        profiles.insert(
            "trade.mean_reversion".to_string(),
            StrategyProfile {
                mode: "trade".to_string(),
                name: "mean_reversion".to_string(),
                gates: GateConfig {
                    max_honeypot_similarity: 0.9,
                    require_lp_lock: true,
                    max_tax_bps: 1200,
                    max_spread_pct: 6.0,
                    max_slippage_pct: 6.0,
                    min_depth_sol: 10.0,
                },
                weights: weights(&[
                    ("chart", 0.20),
                    ("onchain", 0.20),
                    ("social", 0.10),
                    ("memory", 0.30),
                    ("flow", 0.20),
                ]),
                bands: BandThresholds {
                    ignore_max: 15.0,
                    watch_max: 35.0,
                    buy_min: 48.0,
                    buy_max: 72.0,
                    agg_max: 85.0,
                    probe_split: true,
                },
                dynamic: DynamicAdjustments {
                    early_window_s: 120.0,
                    early_relief: 4.0,
                    trusted_source_relief: 4.0,
                    bundle_launch_penalty: 10.0,
                },
                sizing: SizingConfig {
                    size_mult_min: 0.2,
                    size_mult_max: 0.9,
                },
            },
        );

        Self { profiles }
    }
}

fn weights(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_default_profile_has_monotonic_bands() {
        let catalog = ProfileCatalog::default();
        for profile in catalog.profiles.values() {
            assert!(
                profile.bands.is_monotonic(profile.bands.buy_min),
                "bands not monotonic for {}.{}",
                profile.mode,
                profile.name
            );
        }
    }

    #[test]
    fn names_for_mode_are_sorted_and_non_empty() {
        let catalog = ProfileCatalog::default();
        let names = catalog.names_for_mode("snipe");
        assert!(!names.is_empty());
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted);
    }

    #[test]
    fn default_for_mode_resolves_to_a_registered_profile() {
        let catalog = ProfileCatalog::default();
        assert!(catalog.default_for_mode("snipe").is_some());
        assert!(catalog.default_for_mode("trade").is_some());
        assert!(catalog.default_for_mode("unknown").is_none());
    }

    proptest::proptest! {
        // spec.md §8: ignore_max < watch_max <= effective_buy_min <= buy_max
        // < agg_max < 100 for every profile, after any combination of
        // early/trusted relief and bundle-launch penalty.
        #[test]
        fn bands_stay_monotonic_after_any_relief_combination(
            age_minutes in 0.0f64..200.0,
            trusted_source in proptest::bool::ANY,
            bundle_launch_suspected in proptest::bool::ANY,
            profile_idx in 0usize..4,
        ) {
            let catalog = ProfileCatalog::default();
            let profile = catalog.profiles.values().nth(profile_idx).unwrap();
            let ctx = crate::core::scoring::ScoringContext {
                token: "T".to_string(),
                mode: None,
                scanner_source: None,
                age_minutes: Some(age_minutes),
                tax_bps: 0,
                lp_locked: true,
                honeypot_similarity: 0.0,
                spread_pct: 0.0,
                slippage_pct: 0.0,
                depth_sol: 100.0,
                blacklisted: false,
                first_minute_buyers: 0,
                wallet_quality: 0.0,
                liquidity_score: 0.0,
                social_score: 0.0,
                chart_score_0_20: 0.0,
                onchain_score: 0.0,
                memory_score: 0.0,
                flow_score: 0.0,
                forecast_expected_return: None,
                ml_price_pred: None,
                ml_rug_pred: None,
                ml_wallet_pred: None,
                trusted_source,
                bundle_launch_suspected,
                intuition_raw: None,
                trait_raw: None,
                frozen: false,
                freeze_reason: None,
            };
            let (_, effective_buy_min) = crate::core::scoring::map_to_band(50.0, &ctx, profile);
            proptest::prop_assert!(profile.bands.is_monotonic(effective_buy_min));
        }
    }
}
