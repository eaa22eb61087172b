//! Price source abstraction.
//!
//! The price table is a shared, globally mutable resource: a write through
//! [`PriceSource::set_asset_price`] is visible to every later read by any
//! holder of the handle. Nothing in this layer caches prices.
//!
//! - [`RpcPriceOracle`]: deployed `PriceOracle` contract (plus AaveOracle
//!   source lookups for wiring verification)
//! - [`InMemoryPriceOracle`]: deterministic table for tests and dry runs
//!
//! # Example
//!
//! ```rust,ignore
//! use scenario_chain::oracle::PriceSource;
//!
//! let price = oracle.get_asset_price(usdc).await?;
//! oracle.set_asset_price(admin, usdc, price * U256::from(112) / U256::from(100)).await?;
//! ```

mod aave_oracle;
mod memory;

pub use aave_oracle::RpcPriceOracle;
pub use memory::InMemoryPriceOracle;

use crate::error::ProtocolResult;
use crate::protocol::TxReceipt;
use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use std::fmt::Debug;

/// Read/write access to asset prices.
///
/// Prices are fixed-point integers in the quote currency's smallest unit.
#[async_trait]
pub trait PriceSource: Send + Sync + Debug {
    /// Current price of `asset`.
    async fn get_asset_price(&self, asset: Address) -> ProtocolResult<U256>;

    /// Overwrite the price of `asset` (administrative/test only).
    async fn set_asset_price(
        &self,
        caller: Address,
        asset: Address,
        price: U256,
    ) -> ProtocolResult<TxReceipt>;
}
