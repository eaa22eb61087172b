//! Configuration system for the scenario runner.
//!
//! This module provides:
//! - Scenario configuration (profiles, asset roles, amounts, tolerances)
//! - Live deployment settings (RPC endpoint, contract addresses, keys)
//! - Simulated market definition for the in-memory backend
//! - `${VAR}` environment expansion

mod env;
mod market;
mod rpc;
mod settings;

pub use env::expand_env;
pub use market::{simulated_address, FeedAnswer, MarketConfig, ReserveEntry, SimulatedMarket};
pub use rpc::{FeedEntry, RpcConfig, PARTICIPANT_COUNT};
pub use settings::{
    config, init_config, AmountsConfig, BackendConfig, BackendKind, FlashLoanConfig,
    LiquidationConfig, ScenarioConfig, ScenarioSection, ToleranceConfig,
};
