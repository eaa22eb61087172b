//! Deployed price oracle.
//!
//! Test markets register a settable `PriceOracle` with the addresses
//! provider. Prices are read from and written to that contract. When the
//! `AaveOracle` address is known it is also queried for the registered
//! source of each asset.

use super::PriceSource;
use crate::contracts::{IAaveOracle, IPriceOracle};
use crate::error::{Operation, ProtocolError, ProtocolResult};
use crate::protocol::TxReceipt;
use crate::provider::ProviderManager;
use alloy::primitives::{Address, U256};
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// Price source backed by the market's `PriceOracle` contract.
#[derive(Debug, Clone)]
pub struct RpcPriceOracle {
    /// Settable oracle the pool reads through
    price_oracle: Address,
    /// AaveOracle (asset -> source registry), if deployed
    aave_oracle: Option<Address>,
    provider: Arc<ProviderManager>,
}

impl RpcPriceOracle {
    pub fn new(price_oracle: Address, provider: Arc<ProviderManager>) -> Self {
        Self {
            price_oracle,
            aave_oracle: None,
            provider,
        }
    }

    pub fn with_aave_oracle(mut self, aave_oracle: Address) -> Self {
        self.aave_oracle = Some(aave_oracle);
        self
    }

    pub fn address(&self) -> Address {
        self.price_oracle
    }

    /// Source registered for `asset` in the AaveOracle, `None` when no
    /// AaveOracle is configured.
    pub async fn source_of_asset(&self, asset: Address) -> ProtocolResult<Option<Address>> {
        let Some(aave_oracle) = self.aave_oracle else {
            return Ok(None);
        };
        let provider = self.provider.read_provider()?;
        let oracle = IAaveOracle::new(aave_oracle, provider);
        let source = oracle
            .getSourceOfAsset(asset)
            .call()
            .await
            .map_err(|e| ProtocolError::Transport(anyhow::Error::new(e)))?
            ._0;

        debug!(asset = %asset, source = %source, "Fetched registered price source");
        Ok(Some(source))
    }
}

#[async_trait]
impl PriceSource for RpcPriceOracle {
    async fn get_asset_price(&self, asset: Address) -> ProtocolResult<U256> {
        let provider = self.provider.read_provider()?;
        let oracle = IPriceOracle::new(self.price_oracle, provider);
        let price = oracle
            .getAssetPrice(asset)
            .call()
            .await
            .map_err(|e| ProtocolError::Transport(anyhow::Error::new(e)))?
            ._0;
        Ok(price)
    }

    async fn set_asset_price(
        &self,
        caller: Address,
        asset: Address,
        price: U256,
    ) -> ProtocolResult<TxReceipt> {
        let call = IPriceOracle::setAssetPriceCall { asset, price };
        let receipt = self
            .provider
            .send(Operation::SetAssetPrice, caller, self.price_oracle, call.abi_encode())
            .await?;

        info!(asset = %asset, price = %price, tx_hash = %receipt.hash, "Asset price set");
        Ok(receipt)
    }
}
