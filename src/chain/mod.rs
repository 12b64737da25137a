//! On-chain access layer: contract bindings and the read/write gateway.

pub mod abi;
pub mod gateway;

pub use gateway::{ChainGateway, LiquidationEvent, SwapEvent, ALREADY_PAUSED_SENTINEL};
