//! Asset registry keyed by symbol.
//!
//! Built from the pool's reserve list: each reserve address is resolved to
//! its symbol and decimals through the protocol itself, so lookups never
//! depend on the position of a reserve in the list.

use alloy::primitives::Address;
use indexmap::IndexMap;
use scenario_chain::{LendingPool, ProtocolResult, TokenLedger};
use serde::Serialize;
use tracing::debug;

/// A listed reserve asset. Immutable once resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Asset {
    /// Asset symbol (e.g., "USDC", "WETH")
    pub symbol: String,
    /// Token contract address
    pub address: Address,
    /// Token decimals as reported by the reserve configuration
    pub decimals: u8,
}

/// Symbol-keyed registry, insertion order = reserve list order.
#[derive(Debug, Clone, Default)]
pub struct AssetRegistry {
    assets: IndexMap<String, Asset>,
}

impl AssetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve every listed reserve to an [`Asset`].
    pub async fn discover(pool: &dyn LendingPool, ledger: &dyn TokenLedger) -> ProtocolResult<Self> {
        let mut registry = Self::new();
        for address in pool.reserves_list().await? {
            let symbol = ledger.symbol(address).await?;
            let decimals = pool.reserve_configuration(address).await?.decimals;
            debug!(symbol = %symbol, address = %address, decimals, "Discovered reserve");
            registry.insert(Asset {
                symbol,
                address,
                decimals,
            });
        }
        Ok(registry)
    }

    /// Insert or replace the asset registered under its symbol.
    pub fn insert(&mut self, asset: Asset) {
        self.assets.insert(asset.symbol.clone(), asset);
    }

    pub fn get(&self, symbol: &str) -> Option<&Asset> {
        self.assets.get(symbol)
    }

    pub fn by_address(&self, address: Address) -> Option<&Asset> {
        self.assets.values().find(|a| a.address == address)
    }

    /// Symbol -> address map in registry order.
    pub fn addresses(&self) -> IndexMap<String, Address> {
        self.assets
            .iter()
            .map(|(symbol, asset)| (symbol.clone(), asset.address))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Asset> {
        self.assets.values()
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scenario_chain::{InMemoryLendingPool, InMemoryPriceOracle, ReserveConfiguration};
    use std::sync::Arc;

    fn config(decimals: u8) -> ReserveConfiguration {
        ReserveConfiguration {
            decimals,
            ltv_bps: 8_000,
            liquidation_threshold_bps: 8_500,
            liquidation_bonus_bps: 10_500,
            usage_as_collateral_enabled: true,
            borrowing_enabled: true,
            stable_borrow_rate_enabled: true,
            is_active: true,
            is_frozen: false,
        }
    }

    #[tokio::test]
    async fn test_discover_resolves_by_symbol() {
        let pool = InMemoryLendingPool::new(Address::ZERO, Arc::new(InMemoryPriceOracle::new()));
        let weth = Address::with_last_byte(2);
        let usdc = Address::with_last_byte(1);
        pool.list_reserve(weth, "WETH", config(18));
        pool.list_reserve(usdc, "USDC", config(6));

        let registry = AssetRegistry::discover(&pool, &pool).await.unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("USDC").unwrap().address, usdc);
        assert_eq!(registry.get("USDC").unwrap().decimals, 6);
        assert_eq!(registry.by_address(weth).unwrap().symbol, "WETH");

        let order: Vec<_> = registry.addresses().into_keys().collect();
        assert_eq!(order, vec!["WETH".to_string(), "USDC".to_string()]);
    }

    #[test]
    fn test_unknown_symbol() {
        assert!(AssetRegistry::new().get("DAI").is_none());
    }
}
