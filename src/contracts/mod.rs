// Contracts Module - liquidity manager ABI subset read by the node

pub mod i_liquidity_manager;

pub use i_liquidity_manager::{ConfigSetFilter, ILiquidityManager, LiquidityTransferredFilter};
