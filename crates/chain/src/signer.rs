//! Participant signing keys.
//!
//! Every simulated participant that sends transactions in RPC mode needs a
//! local key. All keys live in one `EthereumWallet`; a transaction picks its
//! signer through its `from` field.

use alloy::network::EthereumWallet;
use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use anyhow::{Context, Result};
use tracing::{debug, info};

/// Wallet holding one signer per participant.
#[derive(Clone)]
pub struct ParticipantSigners {
    wallet: EthereumWallet,
    addresses: Vec<Address>,
}

impl std::fmt::Debug for ParticipantSigners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParticipantSigners")
            .field("addresses", &self.addresses)
            .finish()
    }
}

impl ParticipantSigners {
    /// Build from hex private keys (with or without `0x` prefix), in
    /// participant order.
    pub fn from_keys<I, S>(keys: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut wallet: Option<EthereumWallet> = None;
        let mut addresses = Vec::new();

        for (index, key) in keys.into_iter().enumerate() {
            let key_str = key.as_ref().trim().trim_start_matches("0x");
            let signer: PrivateKeySigner = key_str
                .parse()
                .with_context(|| format!("invalid private key at position {}", index))?;
            let address = signer.address();
            debug!(index, address = %address, "Registered participant signer");

            match wallet.as_mut() {
                Some(w) => w.register_signer(signer),
                None => wallet = Some(EthereumWallet::from(signer)),
            }
            addresses.push(address);
        }

        let wallet = wallet.ok_or_else(|| anyhow::anyhow!("no participant keys configured"))?;
        info!(count = addresses.len(), "Participant signers loaded");

        Ok(Self { wallet, addresses })
    }

    pub fn wallet(&self) -> &EthereumWallet {
        &self.wallet
    }

    /// Signer addresses in the order the keys were supplied.
    pub fn addresses(&self) -> &[Address] {
        &self.addresses
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.addresses.contains(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Well-known development keys (hardhat accounts #0 and #1).
    const KEY_0: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const KEY_1: &str = "59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";

    #[test]
    fn test_keys_keep_order() {
        let signers = ParticipantSigners::from_keys([KEY_0, KEY_1]).unwrap();
        let expected_0: Address = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".parse().unwrap();
        let expected_1: Address = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8".parse().unwrap();

        assert_eq!(signers.addresses(), &[expected_0, expected_1]);
        assert!(signers.contains(&expected_1));
    }

    #[test]
    fn test_empty_key_list_is_rejected() {
        assert!(ParticipantSigners::from_keys(Vec::<String>::new()).is_err());
    }

    #[test]
    fn test_invalid_key_is_rejected() {
        assert!(ParticipantSigners::from_keys(["not-a-key"]).is_err());
    }
}
