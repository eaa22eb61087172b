//! Provider management for the RPC backend.
//! Uses Alloy providers for type-safe RPC interactions.

use crate::error::{Operation, ProtocolError, ProtocolResult};
use crate::protocol::TxReceipt;
use crate::signer::ParticipantSigners;
use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use anyhow::Result;
use tracing::{debug, info, warn};

/// Provider manager holding the RPC endpoint and participant wallet.
#[derive(Clone, Debug)]
pub struct ProviderManager {
    /// HTTP RPC URL
    rpc_url: String,
    /// Participant signing keys
    signers: ParticipantSigners,
}

impl ProviderManager {
    /// Create a provider manager and verify the endpoint answers.
    pub async fn new(rpc_url: &str, signers: ParticipantSigners) -> Result<Self> {
        info!(rpc = rpc_url, participants = signers.addresses().len(), "Initializing provider manager");

        let provider = ProviderBuilder::new().on_http(rpc_url.parse()?);
        let block = provider.get_block_number().await?;
        info!(block = block, "Provider connection verified");

        Ok(Self {
            rpc_url: rpc_url.to_string(),
            signers,
        })
    }

    pub fn signers(&self) -> &ParticipantSigners {
        &self.signers
    }

    /// Read-only provider.
    pub fn read_provider(&self) -> Result<impl Provider> {
        Ok(ProviderBuilder::new().on_http(self.rpc_url.parse()?))
    }

    /// Provider that signs with the participant wallet.
    pub fn wallet_provider(&self) -> Result<impl Provider> {
        Ok(ProviderBuilder::new()
            .wallet(self.signers.wallet().clone())
            .on_http(self.rpc_url.parse()?))
    }

    pub async fn chain_id(&self) -> Result<u64> {
        Ok(self.read_provider()?.get_chain_id().await?)
    }

    /// Send a transaction as `caller` and block until its receipt arrives.
    ///
    /// A node-side rejection (estimation revert) and a failed receipt status
    /// both surface as [`ProtocolError::Reverted`].
    pub async fn send(
        &self,
        operation: Operation,
        caller: Address,
        to: Address,
        calldata: Vec<u8>,
    ) -> ProtocolResult<TxReceipt> {
        if !self.signers.contains(&caller) {
            return Err(ProtocolError::MissingSigner(caller));
        }

        let tx = TransactionRequest::default()
            .with_from(caller)
            .with_to(to)
            .with_input(Bytes::from(calldata));

        debug!(operation = %operation, from = %caller, to = %to, "Sending transaction");

        let provider = self.wallet_provider()?;
        let pending = provider.send_transaction(tx).await.map_err(|e| {
            match e.as_error_resp() {
                Some(payload) => ProtocolError::reverted(operation, payload.message.to_string()),
                None => ProtocolError::Transport(e.into()),
            }
        })?;
        let tx_hash = *pending.tx_hash();

        let receipt = pending
            .get_receipt()
            .await
            .map_err(|e| ProtocolError::Transport(e.into()))?;

        if !receipt.status() {
            warn!(operation = %operation, tx_hash = %tx_hash, "Transaction reverted");
            return Err(ProtocolError::reverted(
                operation,
                format!("transaction {} reverted", tx_hash),
            ));
        }

        info!(
            operation = %operation,
            tx_hash = %tx_hash,
            block = receipt.block_number.unwrap_or(0),
            gas_used = receipt.gas_used,
            "Transaction confirmed"
        );

        Ok(TxReceipt {
            operation,
            hash: tx_hash,
            gas_used: receipt.gas_used,
            gas_price: receipt.effective_gas_price,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires a local node
    async fn test_provider_creation() {
        let signers = ParticipantSigners::from_keys([
            "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
        ])
        .unwrap();
        let provider = ProviderManager::new("http://127.0.0.1:8545", signers).await;

        assert!(provider.is_ok());
    }
}
