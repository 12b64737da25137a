//! Analysis context
//!
//! Flattens a `MarketSnapshot` into the structured view the reasoner's gate
//! and LLM prompt both consume: current prices, activity counters, pool
//! health, security flags, and a set of independently-computed boolean
//! anomaly indicators plus a short window of recent price changes.

use std::collections::HashSet;

use serde::Serialize;

use super::{MarketSnapshot, PriceData};

/// Independently-computed boolean anomaly indicators. Each one is a pure
/// function of the context's own fields — no indicator depends on another.
#[derive(Debug, Clone, Copy, Serialize, Default)]
pub struct AnomalyIndicators {
    pub price_deviation_above_threshold: bool,
    pub multiple_oracle_updates_same_block: bool,
    pub multiple_swaps_same_block: bool,
    pub same_block_price_recovery_pattern: bool,
    pub liquidation_after_price_drop: bool,
}

/// Structured view of one snapshot, as handed to `Reasoner::quick_check`
/// and serialized into the LLM prompt by `Reasoner::analyze`.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisContext {
    pub block_number: u64,

    pub oracle_price: f64,
    pub oracle_twap: f64,
    pub amm_spot_price: f64,
    pub price_deviation_pct: f64,

    pub oracle_updates_this_block: u64,
    pub amm_swaps_this_block: u64,
    pub large_swap_count: usize,
    pub liquidation_count: usize,

    pub amm_base_reserve: f64,
    pub amm_quote_reserve: f64,
    pub vault_total_collateral: f64,
    pub vault_total_loans: f64,

    pub amm_paused: bool,
    pub vault_paused: bool,
    pub liquidations_blocked: bool,

    pub indicators: AnomalyIndicators,
    pub recent_price_changes: Vec<f64>,
    /// `"liq_<user>_<block>"` identity keys for this tick's recent
    /// liquidations, used by the reasoner's per-event dedup cache.
    pub recent_liquidation_keys: Vec<String>,
}

/// `(max - min) / max > 0.10` over the three most recent history points
/// (index 0 is the newest sample), only when those three points span at
/// most two distinct blocks.
fn same_block_price_recovery_pattern(history: &[PriceData]) -> bool {
    if history.len() < 3 {
        return false;
    }
    let last3 = &history[..3];
    let distinct_blocks: HashSet<u64> = last3.iter().map(|p| p.block_number).collect();
    if distinct_blocks.len() > 2 {
        return false;
    }

    let max = last3.iter().fold(f64::MIN, |acc, p| acc.max(p.price_usd));
    let min = last3.iter().fold(f64::MAX, |acc, p| acc.min(p.price_usd));
    if max <= 0.0 {
        return false;
    }
    (max - min) / max > 0.10
}

/// Percent change between each of the most recent up-to-4 consecutive
/// history pairs. `history[0]` is the newest sample, so each pair compares
/// a sample against the one immediately preceding it in time.
fn recent_price_changes(history: &[PriceData]) -> Vec<f64> {
    let take = history.len().min(5);
    if take < 2 {
        return Vec::new();
    }
    history[..take]
        .windows(2)
        .map(|pair| {
            let (recent, older) = (pair[0].price_usd, pair[1].price_usd);
            if older > 0.0 {
                (recent - older) / older * 100.0
            } else {
                0.0
            }
        })
        .collect()
}

/// Build the analysis context for a snapshot given the configured price
/// deviation threshold (a fraction of 1, e.g. 0.03 for 3%).
pub fn build_with_threshold(snapshot: &MarketSnapshot, price_deviation_threshold: f64) -> AnalysisContext {
    let large_swap_count = snapshot.recent_large_swaps.len();
    let liquidation_count = snapshot.recent_liquidations.len();
    let changes = recent_price_changes(&snapshot.price_history);
    let recent_liquidation_keys = snapshot
        .recent_liquidations
        .iter()
        .map(|liq| format!("liq_{}_{}", liq.user, liq.block_number))
        .collect();

    let indicators = AnomalyIndicators {
        price_deviation_above_threshold: snapshot.price_deviation_pct
            > price_deviation_threshold * 100.0,
        multiple_oracle_updates_same_block: snapshot.oracle_updates_this_block > 1,
        multiple_swaps_same_block: snapshot.amm_swaps_this_block > 2,
        same_block_price_recovery_pattern: same_block_price_recovery_pattern(&snapshot.price_history),
        liquidation_after_price_drop: liquidation_count > 0
            && changes.iter().any(|&c| c < -5.0),
    };

    AnalysisContext {
        block_number: snapshot.block_number,
        oracle_price: snapshot.oracle_price,
        oracle_twap: snapshot.oracle_twap,
        amm_spot_price: snapshot.amm_spot_price,
        price_deviation_pct: snapshot.price_deviation_pct,
        oracle_updates_this_block: snapshot.oracle_updates_this_block,
        amm_swaps_this_block: snapshot.amm_swaps_this_block,
        large_swap_count,
        liquidation_count,
        amm_base_reserve: snapshot.amm_base_reserve,
        amm_quote_reserve: snapshot.amm_quote_reserve,
        vault_total_collateral: snapshot.vault_total_collateral,
        vault_total_loans: snapshot.vault_total_loans,
        amm_paused: snapshot.amm_paused,
        vault_paused: snapshot.vault_paused,
        liquidations_blocked: snapshot.liquidations_blocked,
        indicators,
        recent_price_changes: changes,
        recent_liquidation_keys,
    }
}

/// Convenience entry point using the default 3% deviation threshold. Most
/// call sites go through `Observer::context`, which supplies the configured
/// threshold explicitly via `build_with_threshold`.
pub fn build(snapshot: &MarketSnapshot) -> AnalysisContext {
    build_with_threshold(snapshot, 0.03)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn snapshot_with_history(history: Vec<PriceData>) -> MarketSnapshot {
        MarketSnapshot {
            timestamp: Utc::now(),
            block_number: 100,
            oracle_price: 2000.0,
            oracle_twap: 2000.0,
            oracle_updates_this_block: 1,
            amm_spot_price: 1995.0,
            amm_base_reserve: 500.0,
            amm_quote_reserve: 1_000_000.0,
            amm_swaps_this_block: 1,
            price_deviation_pct: 0.25,
            vault_total_collateral: 500.0,
            vault_total_loans: 1_000_000.0,
            amm_paused: false,
            vault_paused: false,
            liquidations_blocked: false,
            recent_liquidations: Vec::new(),
            recent_large_swaps: Vec::new(),
            price_history: history,
        }
    }

    #[test]
    fn recovery_pattern_requires_three_points_in_two_blocks() {
        let history = vec![
            PriceData { price_usd: 2000.0, timestamp_epoch_s: 1, block_number: 10 },
            PriceData { price_usd: 1700.0, timestamp_epoch_s: 2, block_number: 10 },
            PriceData { price_usd: 1990.0, timestamp_epoch_s: 3, block_number: 11 },
        ];
        assert!(same_block_price_recovery_pattern(&history));
    }

    #[test]
    fn recovery_pattern_false_when_spread_over_three_blocks() {
        let history = vec![
            PriceData { price_usd: 2000.0, timestamp_epoch_s: 1, block_number: 10 },
            PriceData { price_usd: 1700.0, timestamp_epoch_s: 2, block_number: 11 },
            PriceData { price_usd: 1990.0, timestamp_epoch_s: 3, block_number: 12 },
        ];
        assert!(!same_block_price_recovery_pattern(&history));
    }

    #[test]
    fn price_deviation_indicator_respects_threshold() {
        let ctx = build_with_threshold(&snapshot_with_history(Vec::new()), 0.03);
        assert!(ctx.indicators.price_deviation_above_threshold);

        let ctx = build_with_threshold(&snapshot_with_history(Vec::new()), 0.50);
        assert!(!ctx.indicators.price_deviation_above_threshold);
    }

    #[test]
    fn recent_price_changes_caps_at_four_pairs() {
        let history = (0..10)
            .map(|i| PriceData {
                price_usd: 1000.0 + i as f64,
                timestamp_epoch_s: i,
                block_number: i,
            })
            .collect();
        let ctx = build(&snapshot_with_history(history));
        assert_eq!(ctx.recent_price_changes.len(), 4);
    }
}
