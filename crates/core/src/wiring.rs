//! Oracle wiring resolver.
//!
//! Pairs every tracked asset with the price feed quoted in the market's
//! quote currency and produces the two parallel lists the oracle is
//! initialized with.
//!
//! Rules:
//! - the quote currency's own entry (e.g. the "USD" placeholder) is dropped
//!   before pairing
//! - an asset without a feed in the quote currency is skipped, not fatal
//! - an asset address is emitted at most once
//! - output order follows the asset map, never the feed map
//!
//! # Example
//!
//! ```rust,ignore
//! let wiring = resolve(&assets, &feeds, QuoteCurrency::Eth);
//! let oracle = InMemoryPriceOracle::from_sources(&wiring.assets, &wiring.sources, &answers);
//! ```

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use indexmap::IndexMap;
use scenario_chain::{ProtocolResult, RpcPriceOracle};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, info, warn};

use crate::u256_math::pow10;

/// Unit of account price feeds are denominated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum QuoteCurrency {
    #[default]
    #[serde(rename = "ETH", alias = "eth")]
    Eth,
    #[serde(rename = "USD", alias = "usd")]
    Usd,
}

impl QuoteCurrency {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Eth => "ETH",
            Self::Usd => "USD",
        }
    }

    /// Smallest-unit scale of a price quoted in this currency.
    pub fn unit(&self) -> U256 {
        match self {
            Self::Eth => pow10(18),
            Self::Usd => pow10(8),
        }
    }

    /// Symbol of the asset whose address represents the quote currency in
    /// oracle initialization.
    pub fn base_asset_symbol(&self) -> &'static str {
        match self {
            Self::Eth => "WETH",
            Self::Usd => "USD",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "ETH" => Some(Self::Eth),
            "USD" => Some(Self::Usd),
            _ => None,
        }
    }
}

impl fmt::Display for QuoteCurrency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Feed universe key: one feed per asset per quote currency.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FeedKey {
    pub symbol: String,
    pub quote: QuoteCurrency,
}

impl FeedKey {
    pub fn new(symbol: impl Into<String>, quote: QuoteCurrency) -> Self {
        Self {
            symbol: symbol.into(),
            quote,
        }
    }
}

/// Result of one resolution pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OracleWiring {
    pub quote: QuoteCurrency,
    /// Asset addresses, position `i` pairs with `sources[i]`
    pub assets: Vec<Address>,
    /// Feed addresses
    pub sources: Vec<Address>,
    /// Symbols of the emitted assets, same order
    pub symbols: Vec<String>,
    /// Symbols skipped for lack of a feed in the quote currency
    pub skipped: Vec<String>,
}

/// Constructor arguments of the AaveOracle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleInitArgs {
    pub assets: Vec<Address>,
    pub sources: Vec<Address>,
    pub fallback_oracle: Address,
    pub base_currency: Address,
    pub base_currency_unit: U256,
}

impl OracleWiring {
    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    /// Positional (asset, source) pairs.
    pub fn pairs(&self) -> impl Iterator<Item = (Address, Address)> + '_ {
        self.assets.iter().copied().zip(self.sources.iter().copied())
    }

    pub fn source_of(&self, asset: Address) -> Option<Address> {
        self.pairs().find(|(a, _)| *a == asset).map(|(_, s)| s)
    }

    /// Oracle constructor arguments. The base currency address is the
    /// quote currency's own entry in the asset universe, zero when absent.
    pub fn init_args(
        &self,
        asset_universe: &IndexMap<String, Address>,
        fallback_oracle: Address,
    ) -> OracleInitArgs {
        let base_currency = asset_universe
            .get(self.quote.base_asset_symbol())
            .copied()
            .unwrap_or(Address::ZERO);

        OracleInitArgs {
            assets: self.assets.clone(),
            sources: self.sources.clone(),
            fallback_oracle,
            base_currency,
            base_currency_unit: self.quote.unit(),
        }
    }
}

/// Pair assets with their feeds in `quote`.
pub fn resolve(
    assets: &IndexMap<String, Address>,
    feeds: &IndexMap<FeedKey, Address>,
    quote: QuoteCurrency,
) -> OracleWiring {
    let mut wiring = OracleWiring {
        quote,
        ..Default::default()
    };
    let mut seen = HashSet::with_capacity(assets.len());

    for (symbol, address) in assets {
        if symbol.eq_ignore_ascii_case(quote.symbol()) {
            debug!(symbol = %symbol, "Skipping quote currency entry");
            continue;
        }
        if !seen.insert(*address) {
            debug!(symbol = %symbol, address = %address, "Asset already wired, skipping duplicate");
            continue;
        }

        match feeds.get(&FeedKey::new(symbol.clone(), quote)) {
            Some(source) => {
                wiring.assets.push(*address);
                wiring.sources.push(*source);
                wiring.symbols.push(symbol.clone());
            }
            None => {
                warn!(symbol = %symbol, quote = %quote, "No price feed in quote currency, asset left out of oracle");
                wiring.skipped.push(symbol.clone());
            }
        }
    }

    info!(
        quote = %quote,
        wired = wiring.len(),
        skipped = wiring.skipped.len(),
        "Oracle wiring resolved"
    );
    wiring
}

/// Registered price source lookup on a deployed oracle.
#[async_trait]
pub trait SourceRegistry: Send + Sync {
    /// Source registered for `asset`, `None` if the registry is unavailable.
    async fn registered_source(&self, asset: Address) -> ProtocolResult<Option<Address>>;
}

#[async_trait]
impl SourceRegistry for RpcPriceOracle {
    async fn registered_source(&self, asset: Address) -> ProtocolResult<Option<Address>> {
        self.source_of_asset(asset).await
    }
}

/// Outcome of comparing a wiring with a deployed oracle, per asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceCheck {
    Match,
    /// Deployed oracle has a different source
    Mismatch { expected: Address, actual: Address },
    /// Deployed oracle has no source for the asset
    Unregistered,
}

/// Compare every wired pair with the sources the deployed oracle reports.
///
/// Returns an empty list when the registry is unavailable.
pub async fn verify_wiring(
    wiring: &OracleWiring,
    registry: &dyn SourceRegistry,
) -> ProtocolResult<Vec<(String, SourceCheck)>> {
    let mut results = Vec::with_capacity(wiring.len());

    for ((asset, expected), symbol) in wiring.pairs().zip(&wiring.symbols) {
        let check = match registry.registered_source(asset).await? {
            None => return Ok(Vec::new()),
            Some(actual) if actual.is_zero() => SourceCheck::Unregistered,
            Some(actual) if actual == expected => SourceCheck::Match,
            Some(actual) => SourceCheck::Mismatch { expected, actual },
        };
        results.push((symbol.clone(), check));
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn addr(b: u8) -> Address {
        Address::with_last_byte(b)
    }

    fn universe() -> (IndexMap<String, Address>, IndexMap<FeedKey, Address>) {
        let assets = IndexMap::from([
            ("USDC".to_string(), addr(1)),
            ("USD".to_string(), addr(0xee)),
            ("WETH".to_string(), addr(2)),
            ("USDT".to_string(), addr(3)),
            ("DAI".to_string(), addr(4)),
        ]);
        // feed map deliberately in a different order
        let feeds = IndexMap::from([
            (FeedKey::new("USDT", QuoteCurrency::Eth), addr(13)),
            (FeedKey::new("WETH", QuoteCurrency::Eth), addr(12)),
            (FeedKey::new("USDC", QuoteCurrency::Eth), addr(11)),
            (FeedKey::new("DAI", QuoteCurrency::Usd), addr(24)),
            (FeedKey::new("USD", QuoteCurrency::Usd), addr(25)),
        ]);
        (assets, feeds)
    }

    #[test]
    fn test_output_follows_asset_order() {
        let (assets, feeds) = universe();
        let wiring = resolve(&assets, &feeds, QuoteCurrency::Eth);

        assert_eq!(wiring.assets, vec![addr(1), addr(2), addr(3)]);
        assert_eq!(wiring.sources, vec![addr(11), addr(12), addr(13)]);
        assert_eq!(wiring.symbols, vec!["USDC", "WETH", "USDT"]);
        assert_eq!(wiring.assets.len(), wiring.sources.len());
    }

    #[test]
    fn test_missing_feed_is_skipped() {
        let (assets, feeds) = universe();
        let wiring = resolve(&assets, &feeds, QuoteCurrency::Eth);

        // DAI only has a USD feed; USD has no ETH feed either
        assert!(wiring.skipped.contains(&"DAI".to_string()));
        assert!(!wiring.assets.contains(&addr(4)));
    }

    #[test]
    fn test_quote_currency_entry_is_never_emitted() {
        let (assets, feeds) = universe();
        let wiring = resolve(&assets, &feeds, QuoteCurrency::Usd);

        assert!(!wiring.assets.contains(&addr(0xee)));
        assert!(!wiring.skipped.contains(&"USD".to_string()));
        assert_eq!(wiring.assets, vec![addr(4)]);
        assert_eq!(wiring.sources, vec![addr(24)]);
    }

    #[test]
    fn test_duplicate_address_emitted_once() {
        let assets = IndexMap::from([("USDC".to_string(), addr(1)), ("USDC.e".to_string(), addr(1))]);
        let feeds = IndexMap::from([
            (FeedKey::new("USDC", QuoteCurrency::Eth), addr(11)),
            (FeedKey::new("USDC.e", QuoteCurrency::Eth), addr(21)),
        ]);
        let wiring = resolve(&assets, &feeds, QuoteCurrency::Eth);

        assert_eq!(wiring.assets, vec![addr(1)]);
        assert_eq!(wiring.sources, vec![addr(11)]);
    }

    #[test]
    fn test_init_args_use_quote_entry_as_base_currency() {
        let (assets, feeds) = universe();

        let eth = resolve(&assets, &feeds, QuoteCurrency::Eth).init_args(&assets, addr(0xf0));
        assert_eq!(eth.base_currency, addr(2));
        assert_eq!(eth.base_currency_unit, pow10(18));
        assert_eq!(eth.fallback_oracle, addr(0xf0));

        let usd = resolve(&assets, &feeds, QuoteCurrency::Usd).init_args(&assets, addr(0xf0));
        assert_eq!(usd.base_currency, addr(0xee));
        assert_eq!(usd.base_currency_unit, pow10(8));
    }

    #[derive(Debug)]
    struct FixedRegistry(HashMap<Address, Address>);

    #[async_trait]
    impl SourceRegistry for FixedRegistry {
        async fn registered_source(&self, asset: Address) -> ProtocolResult<Option<Address>> {
            Ok(Some(self.0.get(&asset).copied().unwrap_or(Address::ZERO)))
        }
    }

    #[tokio::test]
    async fn test_verify_wiring_reports_each_pair() {
        let (assets, feeds) = universe();
        let wiring = resolve(&assets, &feeds, QuoteCurrency::Eth);
        let registry = FixedRegistry(HashMap::from([(addr(1), addr(11)), (addr(2), addr(99))]));

        let results = verify_wiring(&wiring, &registry).await.unwrap();
        assert_eq!(results[0], ("USDC".to_string(), SourceCheck::Match));
        assert_eq!(
            results[1],
            (
                "WETH".to_string(),
                SourceCheck::Mismatch {
                    expected: addr(12),
                    actual: addr(99)
                }
            )
        );
        assert_eq!(results[2], ("USDT".to_string(), SourceCheck::Unregistered));
    }

    #[test]
    fn test_quote_currency_parsing() {
        assert_eq!(QuoteCurrency::from_str("eth"), Some(QuoteCurrency::Eth));
        assert_eq!(QuoteCurrency::from_str("USD"), Some(QuoteCurrency::Usd));
        assert_eq!(QuoteCurrency::from_str("EUR"), None);
    }

    const SYMBOLS: [&str; 8] = ["USDC", "USDT", "WETH", "DAI", "WBTC", "LINK", "USD", "ETH"];

    fn quote_of(usd: bool) -> QuoteCurrency {
        if usd {
            QuoteCurrency::Usd
        } else {
            QuoteCurrency::Eth
        }
    }

    proptest! {
        #[test]
        fn test_resolution_pairs_positionally(
            asset_entries in prop::collection::vec((0usize..SYMBOLS.len(), 1u8..12), 0..12),
            feed_entries in prop::collection::vec((0usize..SYMBOLS.len(), any::<bool>()), 0..16),
            usd in any::<bool>(),
        ) {
            let quote = quote_of(usd);
            let assets: IndexMap<String, Address> = asset_entries
                .iter()
                .map(|(i, b)| (SYMBOLS[*i].to_string(), addr(*b)))
                .collect();
            let feeds: IndexMap<FeedKey, Address> = feed_entries
                .iter()
                .map(|(i, usd)| (FeedKey::new(SYMBOLS[*i], quote_of(*usd)), addr(100 + (*i as u8) * 2 + *usd as u8)))
                .collect();

            let wiring = resolve(&assets, &feeds, quote);

            prop_assert_eq!(wiring.assets.len(), wiring.sources.len());
            prop_assert_eq!(wiring.assets.len(), wiring.symbols.len());

            for ((asset, source), symbol) in wiring.pairs().zip(&wiring.symbols) {
                prop_assert!(!symbol.eq_ignore_ascii_case(quote.symbol()));
                prop_assert_eq!(assets.get(symbol), Some(&asset));
                prop_assert_eq!(feeds.get(&FeedKey::new(symbol.clone(), quote)), Some(&source));
            }

            let distinct: HashSet<Address> = wiring.assets.iter().copied().collect();
            prop_assert_eq!(distinct.len(), wiring.assets.len());

            // Output order follows the asset universe
            let mut last = None;
            for symbol in &wiring.symbols {
                let index = assets.get_index_of(symbol);
                prop_assert!(index > last);
                last = index;
            }
        }
    }
}
