//! Scenario configuration with profile support.
//!
//! Amounts are whole-token decimal strings ("10", "0.5") converted with the
//! decimals queried from the protocol, never with a hardcoded scale.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use super::market::MarketConfig;
use super::rpc::RpcConfig;
use crate::wiring::QuoteCurrency;

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    /// Profile name (for logging/identification)
    #[serde(default = "default_profile_name")]
    pub profile: String,

    #[serde(default)]
    pub scenario: ScenarioSection,

    #[serde(default)]
    pub amounts: AmountsConfig,

    #[serde(default)]
    pub flash_loan: FlashLoanConfig,

    #[serde(default)]
    pub liquidation: LiquidationConfig,

    #[serde(default)]
    pub tolerance: ToleranceConfig,

    #[serde(default)]
    pub backend: BackendConfig,

    /// Live deployment (only read when `backend.kind = "rpc"`)
    #[serde(default)]
    pub rpc: RpcConfig,

    /// Simulated market (only read when `backend.kind = "memory"`)
    #[serde(default)]
    pub market: MarketConfig,
}

fn default_profile_name() -> String {
    "default".to_string()
}

/// Which assets play which role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioSection {
    /// Unit of account of the price feeds
    #[serde(default)]
    pub quote_currency: QuoteCurrency,

    #[serde(default)]
    pub referral_code: u16,

    /// Deposited by the first user
    #[serde(default = "default_first_asset")]
    pub first_asset: String,

    /// Deposited by the second user, borrowed and flash-loaned by the first
    #[serde(default = "default_second_asset")]
    pub second_asset: String,

    /// Rate mode of the first user's borrow
    #[serde(default = "default_borrow_rate_mode")]
    pub borrow_rate_mode: String,

    /// Deposited by the borrower in the liquidation phase
    #[serde(default = "default_collateral_asset")]
    pub collateral_asset: String,

    /// Borrowed in the liquidation phase, its price gets shocked
    #[serde(default = "default_debt_asset")]
    pub debt_asset: String,

    #[serde(default = "default_report_path")]
    pub report_path: String,
}

fn default_first_asset() -> String {
    "USDC".to_string()
}
fn default_second_asset() -> String {
    "USDT".to_string()
}
fn default_borrow_rate_mode() -> String {
    "variable".to_string()
}
fn default_collateral_asset() -> String {
    "WETH".to_string()
}
fn default_debt_asset() -> String {
    "USDC".to_string()
}
fn default_report_path() -> String {
    "report.json".to_string()
}

impl Default for ScenarioSection {
    fn default() -> Self {
        Self {
            quote_currency: QuoteCurrency::default(),
            referral_code: 0,
            first_asset: default_first_asset(),
            second_asset: default_second_asset(),
            borrow_rate_mode: default_borrow_rate_mode(),
            collateral_asset: default_collateral_asset(),
            debt_asset: default_debt_asset(),
            report_path: default_report_path(),
        }
    }
}

/// Whole-token amounts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmountsConfig {
    /// Minted and deposited by each of the two users
    #[serde(default = "default_deposit")]
    pub deposit: String,

    #[serde(default = "default_borrow")]
    pub borrow: String,

    /// May exceed the debt; the protocol caps it
    #[serde(default = "default_repay")]
    pub repay: String,

    #[serde(default = "default_liquidity")]
    pub depositor_liquidity: String,

    #[serde(default = "default_liquidator_funds")]
    pub liquidator_funds: String,

    #[serde(default = "default_borrower_collateral")]
    pub borrower_collateral: String,
}

fn default_deposit() -> String {
    "10".to_string()
}
fn default_borrow() -> String {
    "5".to_string()
}
fn default_repay() -> String {
    "5".to_string()
}
fn default_liquidity() -> String {
    "1000".to_string()
}
fn default_liquidator_funds() -> String {
    "1000".to_string()
}
fn default_borrower_collateral() -> String {
    "1".to_string()
}

impl Default for AmountsConfig {
    fn default() -> Self {
        Self {
            deposit: default_deposit(),
            borrow: default_borrow(),
            repay: default_repay(),
            depositor_liquidity: default_liquidity(),
            liquidator_funds: default_liquidator_funds(),
            borrower_collateral: default_borrower_collateral(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlashLoanConfig {
    /// Opaque bytes handed to the receiver (hex)
    #[serde(default = "default_flash_params")]
    pub params: String,

    /// "none" repays within the call
    #[serde(default = "default_flash_mode")]
    pub mode: String,
}

fn default_flash_params() -> String {
    "0x10".to_string()
}
fn default_flash_mode() -> String {
    "none".to_string()
}

impl Default for FlashLoanConfig {
    fn default() -> Self {
        Self {
            params: default_flash_params(),
            mode: default_flash_mode(),
        }
    }
}

/// Liquidation phase parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationConfig {
    /// Debt asset price multiplier in bps (11200 = ×1.12)
    #[serde(default = "default_price_shock")]
    pub price_shock_bps: u64,

    /// Share of the borrow capacity used by the borrower
    #[serde(default = "default_utilization")]
    pub borrow_utilization_bps: u64,

    /// Share of the debt repaid by the liquidator
    #[serde(default = "default_close_factor")]
    pub close_factor_bps: u64,

    #[serde(default = "default_liquidation_rate_mode")]
    pub borrow_rate_mode: String,

    /// Receive the collateral's receipt token instead of the underlying
    #[serde(default)]
    pub receive_a_token: bool,
}

fn default_price_shock() -> u64 {
    11_200
}
fn default_utilization() -> u64 {
    9_502
}
fn default_close_factor() -> u64 {
    5_000
}
fn default_liquidation_rate_mode() -> String {
    "stable".to_string()
}

impl Default for LiquidationConfig {
    fn default() -> Self {
        Self {
            price_shock_bps: default_price_shock(),
            borrow_utilization_bps: default_utilization(),
            close_factor_bps: default_close_factor(),
            borrow_rate_mode: default_liquidation_rate_mode(),
            receive_a_token: false,
        }
    }
}

/// Allowed |expected - actual| per check family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToleranceConfig {
    /// Token units
    #[serde(default)]
    pub amount: u64,

    /// Quote-currency units (capacity and value cross-checks)
    #[serde(default = "default_value_tolerance")]
    pub value: u64,

    /// Collateral units of the seize check
    #[serde(default)]
    pub seized: u64,

    /// WAD units
    #[serde(default = "default_hf_tolerance")]
    pub health_factor: u64,
}

fn default_value_tolerance() -> u64 {
    1_000
}
fn default_hf_tolerance() -> u64 {
    1_000_000_000_000
}

impl Default for ToleranceConfig {
    fn default() -> Self {
        Self {
            amount: 0,
            value: default_value_tolerance(),
            seized: 0,
            health_factor: default_hf_tolerance(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process simulated market
    #[default]
    Memory,
    /// Live deployment over JSON-RPC
    Rpc,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            profile: default_profile_name(),
            scenario: ScenarioSection::default(),
            amounts: AmountsConfig::default(),
            flash_loan: FlashLoanConfig::default(),
            liquidation: LiquidationConfig::default(),
            tolerance: ToleranceConfig::default(),
            backend: BackendConfig::default(),
            rpc: RpcConfig::default(),
            market: MarketConfig::default(),
        }
    }
}

impl ScenarioConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path))?;
        let config: Self =
            toml::from_str(&content).with_context(|| format!("failed to parse config file {}", path))?;
        Ok(config)
    }

    /// Nonzero flash loan premium and a non-default report location.
    pub fn testing() -> Self {
        Self {
            profile: "testing".to_string(),
            scenario: ScenarioSection {
                report_path: "target/report.json".to_string(),
                ..Default::default()
            },
            market: MarketConfig {
                flash_loan_premium_bps: 9,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Profile from `SCENARIO_PROFILE`: a profile name or a TOML file path.
    pub fn from_env() -> anyhow::Result<Self> {
        let profile = std::env::var("SCENARIO_PROFILE").unwrap_or_else(|_| "default".to_string());
        Self::from_profile(&profile)
    }

    /// A path ending in `.toml` must load. Unknown names fall back to defaults.
    pub fn from_profile(profile: &str) -> anyhow::Result<Self> {
        match profile.to_lowercase().as_str() {
            "testing" | "test" => Ok(Self::testing()),
            "default" => Ok(Self::default()),
            path if path.ends_with(".toml") => Self::from_file(profile),
            other => {
                tracing::warn!(profile = other, "Unknown profile, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Log the current configuration.
    pub fn log_config(&self) {
        tracing::info!(profile = %self.profile, backend = ?self.backend.kind, "Scenario configuration loaded");
        tracing::info!(
            quote = %self.scenario.quote_currency,
            first = %self.scenario.first_asset,
            second = %self.scenario.second_asset,
            collateral = %self.scenario.collateral_asset,
            debt = %self.scenario.debt_asset,
            "Asset roles"
        );
        tracing::info!(
            deposit = %self.amounts.deposit,
            borrow = %self.amounts.borrow,
            repay = %self.amounts.repay,
            borrower_collateral = %self.amounts.borrower_collateral,
            "Amounts"
        );
        tracing::info!(
            price_shock_bps = self.liquidation.price_shock_bps,
            utilization_bps = self.liquidation.borrow_utilization_bps,
            close_factor_bps = self.liquidation.close_factor_bps,
            rate_mode = %self.liquidation.borrow_rate_mode,
            "Liquidation parameters"
        );
        tracing::debug!(
            amount = self.tolerance.amount,
            value = self.tolerance.value,
            seized = self.tolerance.seized,
            health_factor = self.tolerance.health_factor,
            "Tolerances"
        );
    }
}

static GLOBAL_CONFIG: OnceLock<ScenarioConfig> = OnceLock::new();

/// Initialize global configuration.
pub fn init_config(config: ScenarioConfig) {
    let _ = GLOBAL_CONFIG.set(config);
}

/// Get the global configuration, initializing from environment if needed.
pub fn config() -> &'static ScenarioConfig {
    GLOBAL_CONFIG.get_or_init(ScenarioConfig::from_env)
}
