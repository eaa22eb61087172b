//! Simulated market definition for the in-memory backend.
//!
//! Feeds carry their initial answers. The oracle is seeded only through the
//! resolved (asset, feed) pairs, so an asset the resolver skips stays
//! unpriced exactly as it would on a partial deployment.

use alloy::primitives::{keccak256, Address, U256};
use anyhow::{Context, Result};
use indexmap::IndexMap;
use scenario_chain::{
    InMemoryLendingPool, InMemoryPriceOracle, MockFlashLoanReceiver, PriceSource,
    ReserveConfiguration,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::wiring::{resolve, FeedKey, OracleWiring, QuoteCurrency};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    #[serde(default)]
    pub flash_loan_premium_bps: u64,

    /// Deploy the pool paused, as the emergency admin leaves it
    #[serde(default = "default_start_paused")]
    pub start_paused: bool,

    #[serde(default = "default_reserves")]
    pub reserves: Vec<ReserveEntry>,

    #[serde(default = "default_feeds")]
    pub feeds: Vec<FeedAnswer>,
}

fn default_start_paused() -> bool {
    true
}

/// One listed reserve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReserveEntry {
    pub symbol: String,
    pub decimals: u8,
    pub ltv_bps: u64,
    pub liquidation_threshold_bps: u64,
    pub liquidation_bonus_bps: u64,
    #[serde(default = "default_true")]
    pub borrowing_enabled: bool,
    #[serde(default = "default_true")]
    pub stable_borrow_enabled: bool,
}

fn default_true() -> bool {
    true
}

/// A mock feed and its current answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedAnswer {
    pub symbol: String,
    pub quote: QuoteCurrency,
    /// Integer price in the quote currency's smallest unit
    pub answer: String,
}

fn reserve(symbol: &str, decimals: u8, ltv_bps: u64, threshold_bps: u64) -> ReserveEntry {
    ReserveEntry {
        symbol: symbol.to_string(),
        decimals,
        ltv_bps,
        liquidation_threshold_bps: threshold_bps,
        liquidation_bonus_bps: 10_500,
        borrowing_enabled: true,
        stable_borrow_enabled: true,
    }
}

fn default_reserves() -> Vec<ReserveEntry> {
    vec![
        reserve("USDC", 6, 8_000, 8_500),
        reserve("USDT", 6, 8_000, 8_500),
        reserve("WETH", 18, 8_000, 8_250),
    ]
}

fn feed(symbol: &str, quote: QuoteCurrency, answer: &str) -> FeedAnswer {
    FeedAnswer {
        symbol: symbol.to_string(),
        quote,
        answer: answer.to_string(),
    }
}

fn default_feeds() -> Vec<FeedAnswer> {
    vec![
        feed("USDC", QuoteCurrency::Eth, "5848466240000000"),
        feed("USDT", QuoteCurrency::Eth, "5848466240000000"),
        feed("WETH", QuoteCurrency::Eth, "1000000000000000000"),
        feed("USDC", QuoteCurrency::Usd, "100000000"),
        feed("USDT", QuoteCurrency::Usd, "100000000"),
        feed("WETH", QuoteCurrency::Usd, "170984000000"),
    ]
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            flash_loan_premium_bps: 0,
            start_paused: default_start_paused(),
            reserves: default_reserves(),
            feeds: default_feeds(),
        }
    }
}

/// Deterministic address for a named simulated contract.
pub fn simulated_address(label: &str) -> Address {
    Address::from_word(keccak256(format!("aave-scenario:{}", label)))
}

/// In-memory backend ready to run a scenario.
#[derive(Debug)]
pub struct SimulatedMarket {
    pub pool: Arc<InMemoryLendingPool>,
    pub oracle: Arc<InMemoryPriceOracle>,
    pub wiring: OracleWiring,
    /// Asset universe handed to the resolver
    pub assets: IndexMap<String, Address>,
    pub flash_receiver: Address,
    pub receiver: Arc<MockFlashLoanReceiver>,
}

impl MarketConfig {
    /// List the reserves, resolve the oracle wiring in `quote` and seed
    /// the oracle from it.
    pub fn build(&self, emergency_admin: Address, quote: QuoteCurrency) -> Result<SimulatedMarket> {
        let mut assets: IndexMap<String, Address> = self
            .reserves
            .iter()
            .map(|r| (r.symbol.clone(), simulated_address(&format!("token:{}", r.symbol))))
            .collect();
        if quote == QuoteCurrency::Usd {
            assets.insert(quote.symbol().to_string(), simulated_address("quote:USD"));
        }

        let mut feeds = IndexMap::with_capacity(self.feeds.len());
        let mut answers = HashMap::with_capacity(self.feeds.len());
        for entry in &self.feeds {
            let address = simulated_address(&format!("feed:{}/{}", entry.symbol, entry.quote));
            let answer: U256 = entry
                .answer
                .parse()
                .with_context(|| format!("market feed {}/{} has a malformed answer", entry.symbol, entry.quote))?;
            feeds.insert(FeedKey::new(entry.symbol.clone(), entry.quote), address);
            answers.insert(address, answer);
        }

        let wiring = resolve(&assets, &feeds, quote);
        let init = wiring.init_args(&assets, Address::ZERO);
        debug!(
            assets = init.assets.len(),
            base_currency = %init.base_currency,
            base_unit = %init.base_currency_unit,
            "Oracle initialization arguments"
        );
        let oracle = Arc::new(InMemoryPriceOracle::from_sources(
            &init.assets,
            &init.sources,
            &answers,
        ));

        let price_source: Arc<dyn PriceSource> = oracle.clone();
        let pool = Arc::new(
            InMemoryLendingPool::new(emergency_admin, price_source)
                .with_flash_loan_premium_bps(self.flash_loan_premium_bps)
                .with_paused(self.start_paused),
        );

        for entry in &self.reserves {
            let address = assets
                .get(&entry.symbol)
                .copied()
                .with_context(|| format!("reserve {} missing from asset universe", entry.symbol))?;
            pool.list_reserve(
                address,
                entry.symbol.clone(),
                ReserveConfiguration {
                    decimals: entry.decimals,
                    ltv_bps: entry.ltv_bps,
                    liquidation_threshold_bps: entry.liquidation_threshold_bps,
                    liquidation_bonus_bps: entry.liquidation_bonus_bps,
                    usage_as_collateral_enabled: entry.liquidation_threshold_bps > 0,
                    borrowing_enabled: entry.borrowing_enabled,
                    stable_borrow_rate_enabled: entry.stable_borrow_enabled,
                    is_active: true,
                    is_frozen: false,
                },
            );
        }

        let flash_receiver = simulated_address("MockFlashLoanReceiver");
        let receiver = Arc::new(MockFlashLoanReceiver::new());
        pool.register_receiver(flash_receiver, receiver.clone());

        info!(
            reserves = self.reserves.len(),
            priced = oracle.len(),
            premium_bps = self.flash_loan_premium_bps,
            paused = self.start_paused,
            "Simulated market built"
        );

        Ok(SimulatedMarket {
            pool,
            oracle,
            wiring,
            assets,
            flash_receiver,
            receiver,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scenario_chain::LendingPool;

    #[tokio::test]
    async fn test_default_market_is_priced_and_paused() {
        let admin = Address::with_last_byte(0xad);
        let market = MarketConfig::default().build(admin, QuoteCurrency::Eth).unwrap();

        assert_eq!(market.wiring.len(), 3);
        assert_eq!(market.oracle.len(), 3);
        assert!(market.pool.paused().await.unwrap());
        assert_eq!(market.pool.emergency_admin().await.unwrap(), admin);

        let weth = market.assets["WETH"];
        assert_eq!(
            market.oracle.get_asset_price(weth).await.unwrap(),
            U256::from(1_000_000_000_000_000_000u64)
        );
    }

    #[tokio::test]
    async fn test_usd_quote_drops_placeholder() {
        let market = MarketConfig::default()
            .build(Address::ZERO, QuoteCurrency::Usd)
            .unwrap();

        assert!(market.assets.contains_key("USD"));
        assert!(!market.wiring.assets.contains(&market.assets["USD"]));
        assert_eq!(market.wiring.len(), 3);
    }

    #[tokio::test]
    async fn test_asset_without_feed_stays_unpriced() {
        let mut config = MarketConfig::default();
        config.feeds.retain(|f| f.symbol != "USDT");

        let market = config.build(Address::ZERO, QuoteCurrency::Eth).unwrap();
        assert_eq!(market.wiring.skipped, vec!["USDT".to_string()]);
        assert!(market.oracle.get_asset_price(market.assets["USDT"]).await.is_err());
    }

    #[test]
    fn test_malformed_answer() {
        let mut config = MarketConfig::default();
        config.feeds[0].answer = "one".to_string();
        assert!(config.build(Address::ZERO, QuoteCurrency::Eth).is_err());
    }
}
