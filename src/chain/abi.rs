//! Minimal contract interfaces for the protected protocol.
//!
//! `abis.py` ships empty in the reference deployment, so the call surface
//! below is reconstructed from how `observer.py` / `actor.py` invoke it.
//! Bindings are generated with `alloy::sol!` rather than hand-written
//! encoders, matching how the pack's `danipolo-liquidator-rust` example
//! wires contract calls.

use alloy::sol;

sol! {
    #[sol(rpc)]
    interface IPriceOracle {
        function getPrice() external view returns (uint256 price, uint256 timestamp, uint256 blockNumber);
        function getTWAP() external view returns (uint256 twap, uint256 sampleCount);
        function getPriceHistory(uint256 count) external view returns (uint256[] memory prices, uint256[] memory timestamps, uint256[] memory blocks);
        function updatesThisBlock() external view returns (uint256);
        function flagManipulation(string calldata reason) external;
    }
}

sol! {
    #[sol(rpc)]
    interface IAmmPool {
        function getReserves() external view returns (uint256 wethReserve, uint256 usdcReserve, uint256 spotPrice);
        function getSpotPrice() external view returns (uint256);
        function getBlockSwapStats() external view returns (uint256 swaps, uint256 blockNumber);
        function paused() external view returns (bool);
        function pause() external;
        function unpause() external;

        event Swap(address indexed sender, uint256 amountIn, uint256 amountOut, bool isWethToUsdc, uint256 effectivePrice, uint256 blockNumber);
    }
}

sol! {
    #[sol(rpc)]
    interface ILendingVault {
        function totalCollateral() external view returns (uint256);
        function totalLoans() external view returns (uint256);
        function paused() external view returns (bool);
        function liquidationsBlocked() external view returns (bool);
        function liquidationsThisBlock() external view returns (uint256);
        function pause(string calldata reason) external;
        function unpause() external;
        function blockLiquidations() external;
        function unblockLiquidations() external;

        event Liquidation(address indexed liquidator, address indexed user, uint256 debtRepaid, uint256 collateralSeized, uint256 oraclePrice, uint256 blockNumber, uint256 timestamp);
    }
}

/// 8-decimal fixed point used for all USD-normalized prices on the oracle
/// and AMM.
pub const PRICE_DECIMALS: f64 = 1e8;
/// 18-decimal fixed point used for the base asset (WETH) reserves and
/// vault collateral.
pub const BASE_ASSET_DECIMALS: f64 = 1e18;
/// 6-decimal fixed point used for the quote asset (USDC) reserves and
/// vault loans.
pub const QUOTE_ASSET_DECIMALS: f64 = 1e6;
