//! In-memory price table.

use super::PriceSource;
use crate::error::{Operation, ProtocolError, ProtocolResult};
use crate::protocol::TxReceipt;
use alloy::primitives::{keccak256, Address, U256};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Deterministic price source backed by a concurrent map.
///
/// Reads go straight to the map; there is no cache layer to go stale.
pub struct InMemoryPriceOracle {
    /// Price by asset address
    prices: DashMap<Address, U256>,
    /// Counter used to derive synthetic transaction hashes
    writes: AtomicU64,
}

impl std::fmt::Debug for InMemoryPriceOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryPriceOracle")
            .field("asset_count", &self.prices.len())
            .field("writes", &self.writes.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for InMemoryPriceOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPriceOracle {
    pub fn new() -> Self {
        Self {
            prices: DashMap::new(),
            writes: AtomicU64::new(0),
        }
    }

    /// Initialize from positionally paired asset/feed lists and the current
    /// answer of each feed.
    ///
    /// Feeds without an answer leave their asset unpriced.
    pub fn from_sources(
        assets: &[Address],
        sources: &[Address],
        answers: &std::collections::HashMap<Address, U256>,
    ) -> Self {
        let oracle = Self::new();
        for (asset, source) in assets.iter().zip(sources) {
            match answers.get(source) {
                Some(answer) => {
                    oracle.prices.insert(*asset, *answer);
                }
                None => debug!(asset = %asset, source = %source, "Feed has no answer, asset left unpriced"),
            }
        }
        oracle
    }

    /// Seed a price without producing a receipt.
    pub fn insert(&self, asset: Address, price: U256) {
        self.prices.insert(asset, price);
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

#[async_trait]
impl PriceSource for InMemoryPriceOracle {
    async fn get_asset_price(&self, asset: Address) -> ProtocolResult<U256> {
        self.prices
            .get(&asset)
            .map(|p| *p)
            .ok_or_else(|| ProtocolError::Transport(anyhow::anyhow!("no price for asset {}", asset)))
    }

    async fn set_asset_price(
        &self,
        _caller: Address,
        asset: Address,
        price: U256,
    ) -> ProtocolResult<TxReceipt> {
        let nonce = self.writes.fetch_add(1, Ordering::SeqCst);
        let previous = self.prices.insert(asset, price);

        debug!(asset = %asset, ?previous, price = %price, "Price updated");

        let mut seed = [0u8; 28];
        seed[..20].copy_from_slice(asset.as_slice());
        seed[20..].copy_from_slice(&nonce.to_be_bytes());

        Ok(TxReceipt {
            operation: Operation::SetAssetPrice,
            hash: keccak256(seed),
            gas_used: 0,
            gas_price: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_consecutive_reads_are_identical() {
        let oracle = InMemoryPriceOracle::new();
        let asset = Address::with_last_byte(1);
        oracle.insert(asset, U256::from(5_848_466_240_000_000u64));

        let first = oracle.get_asset_price(asset).await.unwrap();
        let second = oracle.get_asset_price(asset).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_write_is_visible_to_other_handles() {
        let oracle = std::sync::Arc::new(InMemoryPriceOracle::new());
        let reader = oracle.clone();
        let asset = Address::with_last_byte(2);
        oracle.insert(asset, U256::from(100u64));

        oracle
            .set_asset_price(Address::ZERO, asset, U256::from(112u64))
            .await
            .unwrap();

        assert_eq!(reader.get_asset_price(asset).await.unwrap(), U256::from(112u64));
    }

    #[tokio::test]
    async fn test_missing_price_is_an_error() {
        let oracle = InMemoryPriceOracle::new();
        assert!(oracle.get_asset_price(Address::with_last_byte(3)).await.is_err());
    }

    #[test]
    fn test_from_sources_skips_unanswered_feeds() {
        let assets = [Address::with_last_byte(1), Address::with_last_byte(2)];
        let sources = [Address::with_last_byte(11), Address::with_last_byte(12)];
        let answers = HashMap::from([(sources[0], U256::from(7u64))]);

        let oracle = InMemoryPriceOracle::from_sources(&assets, &sources, &answers);
        assert_eq!(oracle.len(), 1);
    }
}
