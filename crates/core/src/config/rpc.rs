//! Live deployment settings.
//!
//! Every string may contain `${VAR}` references, expanded on access.

use alloy::primitives::Address;
use anyhow::{bail, Context, Result};
use indexmap::IndexMap;
use scenario_chain::AaveV2Contracts;
use serde::{Deserialize, Serialize};

use super::env::{expand_env, has_placeholder};
use crate::wiring::{FeedKey, QuoteCurrency};

/// Number of scenario participants that sign transactions.
pub const PARTICIPANT_COUNT: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_url")]
    pub url: String,

    #[serde(default)]
    pub lending_pool: String,

    #[serde(default)]
    pub data_provider: String,

    #[serde(default)]
    pub configurator: String,

    #[serde(default)]
    pub addresses_provider: String,

    /// Settable fallback oracle the scenario shocks
    #[serde(default)]
    pub price_oracle: String,

    /// AaveOracle used to verify the feed wiring
    #[serde(default)]
    pub aave_oracle: Option<String>,

    /// Deployed mock flash loan receiver
    #[serde(default)]
    pub flash_loan_receiver: String,

    /// Private keys in order: first user, second user, depositor,
    /// borrower, liquidator
    #[serde(default = "default_participant_keys")]
    pub participant_keys: Vec<String>,

    /// Emergency admin key when it is not one of the participants
    #[serde(default)]
    pub admin_key: Option<String>,

    /// Deployed feeds, used to rebuild the expected wiring
    #[serde(default)]
    pub feeds: Vec<FeedEntry>,
}

/// One deployed price feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedEntry {
    pub symbol: String,
    pub quote: QuoteCurrency,
    pub address: String,
}

fn default_url() -> String {
    "${RPC_URL}".to_string()
}

fn default_participant_keys() -> Vec<String> {
    ["USER1_KEY", "USER2_KEY", "DEPOSITOR_KEY", "BORROWER_KEY", "LIQUIDATOR_KEY"]
        .iter()
        .map(|var| format!("${{{}}}", var))
        .collect()
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            lending_pool: String::new(),
            data_provider: String::new(),
            configurator: String::new(),
            addresses_provider: String::new(),
            price_oracle: String::new(),
            aave_oracle: None,
            flash_loan_receiver: String::new(),
            participant_keys: default_participant_keys(),
            admin_key: None,
            feeds: Vec::new(),
        }
    }
}

/// Expand and require a fully resolved value.
fn resolve_value(field: &str, raw: &str) -> Result<String> {
    let value = expand_env(raw)?;
    if value.trim().is_empty() {
        bail!("rpc.{} is not set", field);
    }
    if has_placeholder(&value) {
        bail!("rpc.{} references an unset environment variable: {}", field, value);
    }
    Ok(value)
}

fn parse_address(field: &str, raw: &str) -> Result<Address> {
    resolve_value(field, raw)?
        .trim()
        .parse()
        .with_context(|| format!("rpc.{} is not an address", field))
}

impl RpcConfig {
    pub fn url(&self) -> Result<String> {
        resolve_value("url", &self.url)
    }

    pub fn contracts(&self) -> Result<AaveV2Contracts> {
        Ok(AaveV2Contracts {
            lending_pool: parse_address("lending_pool", &self.lending_pool)?,
            data_provider: parse_address("data_provider", &self.data_provider)?,
            configurator: parse_address("configurator", &self.configurator)?,
            addresses_provider: parse_address("addresses_provider", &self.addresses_provider)?,
        })
    }

    pub fn price_oracle(&self) -> Result<Address> {
        parse_address("price_oracle", &self.price_oracle)
    }

    /// `None` when absent or expanded to an empty value.
    pub fn aave_oracle(&self) -> Result<Option<Address>> {
        match self.aave_oracle.as_deref() {
            Some(raw) if !expand_env(raw)?.trim().is_empty() => parse_address("aave_oracle", raw).map(Some),
            _ => Ok(None),
        }
    }

    pub fn flash_loan_receiver(&self) -> Result<Address> {
        parse_address("flash_loan_receiver", &self.flash_loan_receiver)
    }

    /// Participant keys followed by the admin key, if any.
    pub fn signing_keys(&self) -> Result<Vec<String>> {
        if self.participant_keys.len() < PARTICIPANT_COUNT {
            bail!(
                "rpc.participant_keys needs {} keys, got {}",
                PARTICIPANT_COUNT,
                self.participant_keys.len()
            );
        }
        let mut keys = self
            .participant_keys
            .iter()
            .enumerate()
            .map(|(i, raw)| resolve_value(&format!("participant_keys[{}]", i), raw))
            .collect::<Result<Vec<_>>>()?;
        if let Some(raw) = &self.admin_key {
            keys.push(resolve_value("admin_key", raw)?);
        }
        Ok(keys)
    }

    pub fn feed_universe(&self) -> Result<IndexMap<FeedKey, Address>> {
        self.feeds
            .iter()
            .map(|feed| {
                let address = parse_address(&format!("feeds.{}", feed.symbol), &feed.address)?;
                Ok((FeedKey::new(feed.symbol.clone(), feed.quote), address))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_addresses_parse() {
        std::env::set_var("SCENARIO_TEST_POOL", "0x00000000000000000000000000000000000000aa");
        let config = RpcConfig {
            lending_pool: "${SCENARIO_TEST_POOL}".to_string(),
            data_provider: "0x00000000000000000000000000000000000000bb".to_string(),
            configurator: "0x00000000000000000000000000000000000000cc".to_string(),
            addresses_provider: "0x00000000000000000000000000000000000000dd".to_string(),
            ..Default::default()
        };

        let contracts = config.contracts().unwrap();
        assert_eq!(contracts.lending_pool, Address::with_last_byte(0xaa));
        assert_eq!(contracts.addresses_provider, Address::with_last_byte(0xdd));
    }

    #[test]
    fn test_missing_address_is_an_error() {
        let config = RpcConfig::default();
        let err = config.price_oracle().unwrap_err();
        assert!(err.to_string().contains("rpc.price_oracle is not set"));
        assert!(config.aave_oracle().unwrap().is_none());
    }

    #[test]
    fn test_empty_aave_oracle_is_absent() {
        std::env::set_var("SCENARIO_TEST_EMPTY_ORACLE", "");
        let config = RpcConfig {
            aave_oracle: Some("${SCENARIO_TEST_EMPTY_ORACLE}".to_string()),
            ..Default::default()
        };
        assert!(config.aave_oracle().unwrap().is_none());
    }

    #[test]
    fn test_unset_key_variable_is_reported() {
        let config = RpcConfig {
            participant_keys: vec!["${SCENARIO_TEST_NO_SUCH_KEY}".to_string(); PARTICIPANT_COUNT],
            ..Default::default()
        };
        let err = config.signing_keys().unwrap_err();
        assert!(err.to_string().contains("unset environment variable"));
    }

    #[test]
    fn test_too_few_keys() {
        let config = RpcConfig {
            participant_keys: vec!["0x01".to_string()],
            ..Default::default()
        };
        assert!(config.signing_keys().is_err());
    }

    #[test]
    fn test_feed_universe_keys() {
        let config = RpcConfig {
            feeds: vec![FeedEntry {
                symbol: "USDC".to_string(),
                quote: QuoteCurrency::Eth,
                address: "0x0000000000000000000000000000000000000011".to_string(),
            }],
            ..Default::default()
        };
        let feeds = config.feed_universe().unwrap();
        assert_eq!(
            feeds.get(&FeedKey::new("USDC", QuoteCurrency::Eth)),
            Some(&Address::with_last_byte(0x11))
        );
    }
}
