//! Observer
//!
//! Assembles one typed `MarketSnapshot` per tick from parallel chain reads,
//! matching the read order enumerated in `observer.py`'s `get_market_snapshot`.
//! Keeps a bounded ring of the most recent 100 snapshots for diagnostics,
//! the same cap applied to the rolling windows in `risk.rs`.

pub mod context;

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chain::{ChainGateway, LiquidationEvent, SwapEvent};
use crate::errors::ChainError;

pub use context::AnalysisContext;

/// A single 8-decimal-normalized oracle price sample.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PriceData {
    pub price_usd: f64,
    pub timestamp_epoch_s: u64,
    pub block_number: u64,
}

/// Swap amount, in base-asset units, above which a swap counts as "large".
const LARGE_SWAP_THRESHOLD_BASE_UNITS: f64 = 10.0;
/// Blocks of event history fetched per tick.
const EVENT_LOOKBACK_BLOCKS: u64 = 10;
/// Snapshot ring capacity (spec §3 lifecycle invariant).
const SNAPSHOT_RING_CAPACITY: usize = 100;

/// The complete observation taken at one tick.
#[derive(Debug, Clone, Serialize)]
pub struct MarketSnapshot {
    pub timestamp: DateTime<Utc>,
    pub block_number: u64,

    pub oracle_price: f64,
    pub oracle_twap: f64,
    pub oracle_updates_this_block: u64,

    pub amm_spot_price: f64,
    pub amm_base_reserve: f64,
    pub amm_quote_reserve: f64,
    pub amm_swaps_this_block: u64,

    pub price_deviation_pct: f64,

    pub vault_total_collateral: f64,
    pub vault_total_loans: f64,

    pub amm_paused: bool,
    pub vault_paused: bool,
    pub liquidations_blocked: bool,

    #[serde(skip)]
    pub recent_liquidations: Vec<LiquidationEvent>,
    #[serde(skip)]
    pub recent_large_swaps: Vec<SwapEvent>,
    /// Newest sample first, matching the oracle's `getPriceHistory` return
    /// order.
    #[serde(skip)]
    pub price_history: Vec<PriceData>,
}

impl MarketSnapshot {
    /// `|oracle_price - amm_spot_price| / oracle_price * 100`, or 0 when the
    /// oracle price itself is 0 (division-by-zero guard doubles as the
    /// "no price yet" sentinel).
    fn deviation_pct(oracle_price: f64, amm_spot_price: f64) -> f64 {
        if oracle_price > 0.0 {
            ((oracle_price - amm_spot_price).abs() / oracle_price) * 100.0
        } else {
            0.0
        }
    }
}

/// Produces `MarketSnapshot`s from the chain gateway and retains the most
/// recent 100 for diagnostics.
pub struct Observer {
    chain: Arc<ChainGateway>,
    history_window: usize,
    price_deviation_threshold: f64,
    ring: VecDeque<MarketSnapshot>,
}

impl Observer {
    pub fn new(chain: Arc<ChainGateway>, history_window: usize, price_deviation_threshold: f64) -> Self {
        Self {
            chain,
            history_window,
            price_deviation_threshold,
            ring: VecDeque::with_capacity(SNAPSHOT_RING_CAPACITY),
        }
    }

    /// Assemble one snapshot. Essential reads (`getPrice`, `getReserves`)
    /// abort the tick on failure; everything else degrades to a default.
    pub async fn observe(&mut self) -> Result<MarketSnapshot, ChainError> {
        let block_number = self.chain.block_number().await?;

        let price = self.chain.get_price().await?;
        let twap = self.chain.get_twap().await?;
        let updates_this_block = self.chain.updates_this_block().await;

        let (base_reserve, quote_reserve, amm_spot_price) = self.chain.get_reserves().await?;
        let amm_paused = self.chain.amm_paused().await;
        let (amm_swaps_this_block, _) = self.chain.get_block_swap_stats().await;

        let vault_total_collateral = self.chain.total_collateral().await.unwrap_or(0.0);
        let vault_total_loans = self.chain.total_loans().await.unwrap_or(0.0);
        let vault_paused = self.chain.vault_paused().await.unwrap_or(false);
        let liquidations_blocked = self.chain.liquidations_blocked().await.unwrap_or(false);

        let price_deviation_pct = MarketSnapshot::deviation_pct(price.price_usd, amm_spot_price);

        let price_history = self.chain.get_price_history(self.history_window).await;
        let recent_liquidations = self.chain.get_recent_liquidations(EVENT_LOOKBACK_BLOCKS).await;
        let recent_large_swaps = self
            .chain
            .get_recent_swaps(EVENT_LOOKBACK_BLOCKS)
            .await
            .into_iter()
            .filter(|s| s.amount_in > LARGE_SWAP_THRESHOLD_BASE_UNITS)
            .collect();

        let snapshot = MarketSnapshot {
            timestamp: Utc::now(),
            block_number,
            oracle_price: price.price_usd,
            oracle_twap: twap,
            oracle_updates_this_block: updates_this_block,
            amm_spot_price,
            amm_base_reserve: base_reserve,
            amm_quote_reserve: quote_reserve,
            amm_swaps_this_block,
            price_deviation_pct,
            vault_total_collateral,
            vault_total_loans,
            amm_paused,
            vault_paused,
            liquidations_blocked,
            recent_liquidations,
            recent_large_swaps,
            price_history,
        };

        if self.ring.len() == SNAPSHOT_RING_CAPACITY {
            self.ring.pop_front();
        }
        self.ring.push_back(snapshot.clone());

        Ok(snapshot)
    }

    /// Flatten a snapshot into the structured context the reasoner consumes.
    pub fn context(&self, snapshot: &MarketSnapshot) -> AnalysisContext {
        context::build_with_threshold(snapshot, self.price_deviation_threshold)
    }

    pub fn snapshot_ring(&self) -> &VecDeque<MarketSnapshot> {
        &self.ring
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deviation_is_zero_when_oracle_price_is_zero() {
        assert_eq!(MarketSnapshot::deviation_pct(0.0, 1400.0), 0.0);
    }

    #[test]
    fn deviation_is_zero_when_prices_match() {
        assert_eq!(MarketSnapshot::deviation_pct(2000.0, 2000.0), 0.0);
    }

    #[test]
    fn deviation_matches_expected_percent() {
        let dev = MarketSnapshot::deviation_pct(2000.0, 1400.0);
        assert!((dev - 30.0).abs() < 1e-9);
    }
}
