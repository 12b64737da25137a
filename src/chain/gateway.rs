//! Chain Gateway
//!
//! Thin, synchronous-looking façade over the node RPC: checksum-address
//! normalization, typed reads, typed event queries, and typed
//! state-mutating calls with EIP-1559 fee computation and nonce-sequenced
//! signing. Mirrors the read/write split in `observer.py` (read-only
//! `Web3`) and `actor.py` (signing `Web3` via
//! `SignAndSendRawMiddlewareBuilder`), reimplemented on `alloy`'s
//! provider/signer stack the way `danipolo-liquidator-rust` wires its own
//! EVM access in `examples/other_examples`.

use std::str::FromStr;
use std::time::Duration;

use alloy::network::{Ethereum, EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::{BlockNumberOrTag, Filter, TransactionRequest};
use alloy::signers::local::PrivateKeySigner;
use alloy::transports::http::{Client, Http};
use tokio::time::timeout;

use crate::chain::abi::{
    IAmmPool, ILendingVault, IPriceOracle, BASE_ASSET_DECIMALS, PRICE_DECIMALS,
    QUOTE_ASSET_DECIMALS,
};
use crate::config::AgentConfig;
use crate::errors::ChainError;
use crate::observer::PriceData;

/// Priority fee offered on every mutating call (EIP-1559 tip).
const PRIORITY_FEE_GWEI: u128 = 1_500_000_000; // 1.5 gwei
/// Bound on waiting for a transaction receipt.
const RECEIPT_TIMEOUT: Duration = Duration::from_secs(120);
/// Substring coerced by the Actor into the idempotent "already done" sentinel.
pub const ALREADY_PAUSED_SENTINEL: &str = "Already paused";

/// A single AMM swap observed in a block range.
#[derive(Debug, Clone)]
pub struct SwapEvent {
    pub sender: Address,
    pub amount_in: f64,
    pub amount_out: f64,
    pub is_weth_to_usdc: bool,
    pub effective_price: f64,
    pub block_number: u64,
}

/// A single vault liquidation observed in a block range.
#[derive(Debug, Clone)]
pub struct LiquidationEvent {
    pub liquidator: Address,
    pub user: Address,
    pub debt_repaid: f64,
    pub collateral_seized: f64,
    pub oracle_price: f64,
    pub block_number: u64,
    pub timestamp: u64,
}

type HttpProvider = alloy::providers::fillers::FillProvider<
    alloy::providers::fillers::JoinFill<
        alloy::providers::Identity,
        alloy::providers::fillers::JoinFill<
            alloy::providers::fillers::GasFiller,
            alloy::providers::fillers::JoinFill<
                alloy::providers::fillers::NonceFiller,
                alloy::providers::fillers::ChainIdFiller,
            >,
        >,
    >,
    alloy::providers::fillers::WalletFiller<EthereumWallet>,
    alloy::providers::RootProvider<Http<Client>>,
    Http<Client>,
    Ethereum,
>;

/// Read/write façade over the protected protocol's three contracts.
///
/// Holds the agent's signing key. The Actor is the sole caller of the
/// mutating methods below — no other component is ever handed a reference
/// that exposes them.
pub struct ChainGateway {
    provider: HttpProvider,
    pub agent_address: Address,
    oracle_address: Address,
    amm_address: Address,
    vault_address: Address,
}

fn parse_address(raw: &str, field: &str) -> Result<Address, ChainError> {
    Address::from_str(raw).map_err(|e| ChainError::Read(format!("invalid {field} address: {e}")))
}

fn u256_to_f64(value: U256, decimals: f64) -> f64 {
    value.to_string().parse::<f64>().unwrap_or(0.0) / decimals
}

impl ChainGateway {
    pub async fn new(config: &AgentConfig) -> Result<Self, ChainError> {
        let signer = PrivateKeySigner::from_str(&config.agent_private_key)
            .map_err(|e| ChainError::Read(format!("invalid agent private key: {e}")))?;
        let agent_address = signer.address();
        let wallet = EthereumWallet::from(signer);

        let url = config
            .sepolia_rpc_url
            .parse()
            .map_err(|e| ChainError::Read(format!("invalid RPC url: {e}")))?;

        let provider = ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(wallet)
            .on_http(url);

        // First handshake: fatal if the node is unreachable (spec §6 exit codes).
        provider
            .get_block_number()
            .await
            .map_err(|e| ChainError::Read(format!("node unreachable: {e}")))?;

        Ok(Self {
            provider,
            agent_address,
            oracle_address: parse_address(&config.oracle_address, "oracle")?,
            amm_address: parse_address(&config.amm_pool_address, "amm_pool")?,
            vault_address: parse_address(&config.lending_vault_address, "lending_vault")?,
        })
    }

    fn oracle(&self) -> IPriceOracle::IPriceOracleInstance<Http<Client>, &HttpProvider> {
        IPriceOracle::new(self.oracle_address, &self.provider)
    }

    fn amm(&self) -> IAmmPool::IAmmPoolInstance<Http<Client>, &HttpProvider> {
        IAmmPool::new(self.amm_address, &self.provider)
    }

    fn vault(&self) -> ILendingVault::ILendingVaultInstance<Http<Client>, &HttpProvider> {
        ILendingVault::new(self.vault_address, &self.provider)
    }

    /// The current block height, sampled once per tick per spec §4.2 step 1.
    pub async fn block_number(&self) -> Result<u64, ChainError> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| ChainError::Read(e.to_string()))
    }

    /// Essential read: oracle price + metadata. Failure aborts the tick.
    pub async fn get_price(&self) -> Result<PriceData, ChainError> {
        let IPriceOracle::getPriceReturn {
            price,
            timestamp,
            blockNumber,
        } = self
            .oracle()
            .getPrice()
            .call()
            .await
            .map_err(|e| ChainError::Read(format!("getPrice: {e}")))?;

        Ok(PriceData {
            price_usd: u256_to_f64(price, PRICE_DECIMALS),
            timestamp_epoch_s: timestamp.to::<u64>(),
            block_number: blockNumber.to::<u64>(),
        })
    }

    /// TWAP, falling back to the current spot price if no samples exist yet.
    pub async fn get_twap(&self) -> Result<f64, ChainError> {
        match self.oracle().getTWAP().call().await {
            Ok(IPriceOracle::getTWAPReturn { twap, sampleCount }) => {
                if sampleCount.is_zero() {
                    Ok(self.get_price().await?.price_usd)
                } else {
                    Ok(u256_to_f64(twap, PRICE_DECIMALS))
                }
            }
            Err(_) => self.get_price().await.map(|p| p.price_usd),
        }
    }

    /// Up to `count` historical price points. Soft-fails to empty — the
    /// oracle simply hasn't accumulated `count` samples yet on a fresh
    /// deployment, which is expected rather than exceptional.
    pub async fn get_price_history(&self, count: usize) -> Vec<PriceData> {
        let result = self
            .oracle()
            .getPriceHistory(U256::from(count))
            .call()
            .await;

        let Ok(IPriceOracle::getPriceHistoryReturn {
            prices,
            timestamps,
            blocks,
        }) = result
        else {
            return Vec::new();
        };

        prices
            .iter()
            .zip(timestamps.iter())
            .zip(blocks.iter())
            .filter(|((_, ts), _)| !ts.is_zero())
            .map(|((price, ts), block)| PriceData {
                price_usd: u256_to_f64(*price, PRICE_DECIMALS),
                timestamp_epoch_s: ts.to::<u64>(),
                block_number: block.to::<u64>(),
            })
            .collect()
    }

    /// Essential read: AMM reserves + spot price. Failure aborts the tick.
    pub async fn get_reserves(&self) -> Result<(f64, f64, f64), ChainError> {
        let IAmmPool::getReservesReturn {
            wethReserve,
            usdcReserve,
            spotPrice,
        } = self
            .amm()
            .getReserves()
            .call()
            .await
            .map_err(|e| ChainError::Read(format!("getReserves: {e}")))?;

        Ok((
            u256_to_f64(wethReserve, BASE_ASSET_DECIMALS),
            u256_to_f64(usdcReserve, QUOTE_ASSET_DECIMALS),
            u256_to_f64(spotPrice, PRICE_DECIMALS),
        ))
    }

    pub async fn get_block_swap_stats(&self) -> (u64, u64) {
        self.amm()
            .getBlockSwapStats()
            .call()
            .await
            .map(|r| (r.swaps.to::<u64>(), r.blockNumber.to::<u64>()))
            .unwrap_or((0, 0))
    }

    pub async fn amm_paused(&self) -> bool {
        self.amm().paused().call().await.map(|r| r._0).unwrap_or(false)
    }

    pub async fn vault_paused(&self) -> Result<bool, ChainError> {
        self.vault()
            .paused()
            .call()
            .await
            .map(|r| r._0)
            .map_err(|e| ChainError::Read(format!("vault.paused: {e}")))
    }

    pub async fn liquidations_blocked(&self) -> Result<bool, ChainError> {
        self.vault()
            .liquidationsBlocked()
            .call()
            .await
            .map(|r| r._0)
            .map_err(|e| ChainError::Read(format!("liquidationsBlocked: {e}")))
    }

    pub async fn updates_this_block(&self) -> u64 {
        self.oracle()
            .updatesThisBlock()
            .call()
            .await
            .map(|r| r._0.to::<u64>())
            .unwrap_or(0)
    }

    pub async fn total_collateral(&self) -> Result<f64, ChainError> {
        self.vault()
            .totalCollateral()
            .call()
            .await
            .map(|r| u256_to_f64(r._0, BASE_ASSET_DECIMALS))
            .map_err(|e| ChainError::Read(format!("totalCollateral: {e}")))
    }

    pub async fn total_loans(&self) -> Result<f64, ChainError> {
        self.vault()
            .totalLoans()
            .call()
            .await
            .map(|r| u256_to_f64(r._0, QUOTE_ASSET_DECIMALS))
            .map_err(|e| ChainError::Read(format!("totalLoans: {e}")))
    }

    pub async fn liquidations_this_block(&self) -> u64 {
        self.vault()
            .liquidationsThisBlock()
            .call()
            .await
            .map(|r| r._0.to::<u64>())
            .unwrap_or(0)
    }

    /// Liquidation events over the last `blocks_back` blocks. Soft-fails to
    /// empty on rate-limiting or an empty range.
    pub async fn get_recent_liquidations(&self, blocks_back: u64) -> Vec<LiquidationEvent> {
        let Ok(current) = self.block_number().await else {
            return Vec::new();
        };
        let from_block = current.saturating_sub(blocks_back);

        let filter = Filter::new()
            .address(self.vault_address)
            .event_signature(ILendingVault::Liquidation::SIGNATURE_HASH)
            .from_block(BlockNumberOrTag::Number(from_block))
            .to_block(BlockNumberOrTag::Number(current));

        let Ok(logs) = self.provider.get_logs(&filter).await else {
            return Vec::new();
        };

        logs.into_iter()
            .filter_map(|log| {
                let decoded = log.log_decode::<ILendingVault::Liquidation>().ok()?;
                let ev = decoded.inner.data;
                Some(LiquidationEvent {
                    liquidator: ev.liquidator,
                    user: ev.user,
                    debt_repaid: u256_to_f64(ev.debtRepaid, QUOTE_ASSET_DECIMALS),
                    collateral_seized: u256_to_f64(ev.collateralSeized, BASE_ASSET_DECIMALS),
                    oracle_price: u256_to_f64(ev.oraclePrice, PRICE_DECIMALS),
                    block_number: ev.blockNumber.to::<u64>(),
                    timestamp: ev.timestamp.to::<u64>(),
                })
            })
            .collect()
    }

    /// Swap events over the last `blocks_back` blocks. Soft-fails to empty.
    pub async fn get_recent_swaps(&self, blocks_back: u64) -> Vec<SwapEvent> {
        let Ok(current) = self.block_number().await else {
            return Vec::new();
        };
        let from_block = current.saturating_sub(blocks_back);

        let filter = Filter::new()
            .address(self.amm_address)
            .event_signature(IAmmPool::Swap::SIGNATURE_HASH)
            .from_block(BlockNumberOrTag::Number(from_block))
            .to_block(BlockNumberOrTag::Number(current));

        let Ok(logs) = self.provider.get_logs(&filter).await else {
            return Vec::new();
        };

        logs.into_iter()
            .filter_map(|log| {
                let decoded = log.log_decode::<IAmmPool::Swap>().ok()?;
                let ev = decoded.inner.data;
                let (amount_in, amount_out) = if ev.isWethToUsdc {
                    (
                        u256_to_f64(ev.amountIn, BASE_ASSET_DECIMALS),
                        u256_to_f64(ev.amountOut, QUOTE_ASSET_DECIMALS),
                    )
                } else {
                    (
                        u256_to_f64(ev.amountIn, QUOTE_ASSET_DECIMALS),
                        u256_to_f64(ev.amountOut, BASE_ASSET_DECIMALS),
                    )
                };
                Some(SwapEvent {
                    sender: ev.sender,
                    amount_in,
                    amount_out,
                    is_weth_to_usdc: ev.isWethToUsdc,
                    effective_price: u256_to_f64(ev.effectivePrice, BASE_ASSET_DECIMALS),
                    block_number: ev.blockNumber.to::<u64>(),
                })
            })
            .collect()
    }

    /// EIP-1559 fee parameters for the next mutating call: `maxPriorityFee`
    /// fixed at 1.5 gwei, `maxFee = 2 * base_fee + maxPriorityFee`.
    pub async fn gas_params(&self) -> Result<(u128, u128), ChainError> {
        let base_fee = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Latest, false)
            .await
            .map_err(|e| ChainError::Read(format!("get_block: {e}")))?
            .and_then(|b| b.header.base_fee_per_gas)
            .unwrap_or(1_000_000_000); // 1 gwei fallback

        Ok(compute_gas_params(base_fee as u128))
    }

    async fn send_and_wait(&self, tx: TransactionRequest, gas_limit: u64) -> Result<String, ChainError> {
        let (priority_fee, max_fee) = {
            let (priority, max) = self.gas_params().await?;
            (priority, max)
        };

        let tx = tx
            .with_from(self.agent_address)
            .with_gas_limit(gas_limit)
            .with_max_priority_fee_per_gas(priority_fee)
            .with_max_fee_per_gas(max_fee);

        let pending = self
            .provider
            .send_transaction(tx.clone())
            .await
            .map_err(|e| ChainError::Submission(e.to_string()))?;

        let tx_hash = format!("{:#x}", pending.tx_hash());

        let receipt = timeout(RECEIPT_TIMEOUT, pending.get_receipt())
            .await
            .map_err(|_| ChainError::Timeout {
                tx_hash: tx_hash.clone(),
                timeout_secs: RECEIPT_TIMEOUT.as_secs(),
            })?
            .map_err(|e| ChainError::Submission(e.to_string()))?;

        if !receipt.status() {
            // The receipt alone carries no revert reason; replay the same
            // call statically to recover the revert string the way
            // `actor.py` inspects `e.args` from a raised `ContractLogicError`.
            let reason = self
                .provider
                .call(&tx)
                .await
                .err()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "transaction reverted".to_string());

            return Err(ChainError::Reverted { tx_hash, reason });
        }

        Ok(tx_hash)
    }

    pub async fn pause_vault(&self, reason: &str) -> Result<String, ChainError> {
        let call = self.vault().pause(reason.to_string());
        self.send_and_wait(call.into_transaction_request(), 150_000)
            .await
    }

    pub async fn block_liquidations(&self) -> Result<String, ChainError> {
        let call = self.vault().blockLiquidations();
        self.send_and_wait(call.into_transaction_request(), 100_000)
            .await
    }

    #[allow(dead_code)] // operator-invoked recovery path, never called by the automated loop
    pub async fn unblock_liquidations(&self) -> Result<String, ChainError> {
        let call = self.vault().unblockLiquidations();
        self.send_and_wait(call.into_transaction_request(), 100_000)
            .await
    }

    pub async fn flag_oracle(&self, reason: &str) -> Result<String, ChainError> {
        let call = self.oracle().flagManipulation(reason.to_string());
        self.send_and_wait(call.into_transaction_request(), 100_000)
            .await
    }

    pub async fn pause_amm(&self) -> Result<String, ChainError> {
        let call = self.amm().pause();
        self.send_and_wait(call.into_transaction_request(), 100_000)
            .await
    }

    /// Resume AMM operations after manual security review. Never invoked by
    /// the automated agent loop (spec §9 Open Question resolution) — this
    /// is an operator-triggered recovery path only.
    #[allow(dead_code)]
    pub async fn unpause_amm(&self) -> Result<String, ChainError> {
        let call = self.amm().unpause();
        self.send_and_wait(call.into_transaction_request(), 100_000)
            .await
    }
}

/// Pure EIP-1559 fee computation, unit-tested independently of any network
/// access: `maxPriorityFee = 1.5 gwei`, `maxFee = 2 * base_fee + maxPriorityFee`.
pub fn compute_gas_params(base_fee: u128) -> (u128, u128) {
    let max_fee = base_fee.saturating_mul(2).saturating_add(PRIORITY_FEE_GWEI);
    (PRIORITY_FEE_GWEI, max_fee)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gas_params_follow_the_2x_base_fee_plus_priority_formula() {
        let (priority, max_fee) = compute_gas_params(10_000_000_000); // 10 gwei base
        assert_eq!(priority, 1_500_000_000);
        assert_eq!(max_fee, 21_500_000_000);
    }

    #[test]
    fn gas_params_saturate_rather_than_overflow_at_extreme_base_fee() {
        let (_, max_fee) = compute_gas_params(u128::MAX);
        assert_eq!(max_fee, u128::MAX);
    }
}
