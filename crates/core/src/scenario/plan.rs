//! Run parameters resolved against the live asset registry.

use alloy::primitives::{Bytes, U256};
use scenario_chain::{RateMode, CLOSE_FACTOR_BPS};

use crate::assets::{Asset, AssetRegistry};
use crate::config::ScenarioConfig;
use crate::error::{ScenarioError, ScenarioResult};
use crate::u256_math::parse_units;

/// Allowed |expected - actual| per check family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tolerances {
    pub amount: U256,
    pub value: U256,
    pub seized: U256,
    pub health_factor: U256,
}

/// Everything a run needs, in token units.
#[derive(Debug, Clone)]
pub struct ScenarioPlan {
    pub first: Asset,
    pub second: Asset,
    pub collateral: Asset,
    pub debt: Asset,

    /// First user's deposit, in `first` units
    pub first_deposit: U256,
    /// Second user's deposit, in `second` units
    pub second_deposit: U256,
    pub borrow: U256,
    pub repay: U256,
    pub borrow_rate_mode: RateMode,
    pub referral_code: u16,

    pub flash_params: Bytes,
    pub flash_mode: RateMode,

    pub depositor_liquidity: U256,
    pub liquidator_funds: U256,
    pub borrower_collateral: U256,
    pub price_shock_bps: u64,
    pub borrow_utilization_bps: u64,
    pub close_factor_bps: u64,
    pub liquidation_rate_mode: RateMode,
    pub receive_a_token: bool,

    pub tolerance: Tolerances,
}

fn asset(registry: &AssetRegistry, role: &str, symbol: &str) -> ScenarioResult<Asset> {
    registry.get(symbol).cloned().ok_or_else(|| {
        ScenarioError::Config(format!("{} asset {} is not a listed reserve", role, symbol))
    })
}

fn units(field: &str, value: &str, asset: &Asset) -> ScenarioResult<U256> {
    let amount = parse_units(value, asset.decimals).map_err(|e| {
        ScenarioError::Config(format!("amounts.{} = {:?} ({}): {}", field, value, asset.symbol, e))
    })?;
    if amount.is_zero() {
        return Err(ScenarioError::Config(format!("amounts.{} must be positive", field)));
    }
    Ok(amount)
}

fn rate_mode(field: &str, value: &str) -> ScenarioResult<RateMode> {
    RateMode::from_str(value)
        .ok_or_else(|| ScenarioError::Config(format!("{} = {:?} is not a rate mode", field, value)))
}

fn debt_mode(field: &str, value: &str) -> ScenarioResult<RateMode> {
    match rate_mode(field, value)? {
        RateMode::None => Err(ScenarioError::Config(format!("{} must open debt (stable or variable)", field))),
        mode => Ok(mode),
    }
}

impl ScenarioPlan {
    pub fn from_config(config: &ScenarioConfig, registry: &AssetRegistry) -> ScenarioResult<Self> {
        let roles = &config.scenario;
        let first = asset(registry, "first", &roles.first_asset)?;
        let second = asset(registry, "second", &roles.second_asset)?;
        let collateral = asset(registry, "collateral", &roles.collateral_asset)?;
        let debt = asset(registry, "debt", &roles.debt_asset)?;

        if first.address == second.address {
            return Err(ScenarioError::Config("first and second assets must differ".to_string()));
        }
        if collateral.address == debt.address {
            return Err(ScenarioError::Config("collateral and debt assets must differ".to_string()));
        }

        let liquidation = &config.liquidation;
        if liquidation.close_factor_bps == 0 || liquidation.close_factor_bps > CLOSE_FACTOR_BPS {
            return Err(ScenarioError::Config(format!(
                "liquidation.close_factor_bps must be in 1..={}",
                CLOSE_FACTOR_BPS
            )));
        }
        if liquidation.borrow_utilization_bps == 0 || liquidation.price_shock_bps == 0 {
            return Err(ScenarioError::Config(
                "liquidation utilization and price shock must be positive".to_string(),
            ));
        }

        let flash_params: Bytes = config.flash_loan.params.parse().map_err(|e| {
            ScenarioError::Config(format!("flash_loan.params is not hex: {}", e))
        })?;

        let amounts = &config.amounts;
        let tolerance = &config.tolerance;

        Ok(Self {
            first_deposit: units("deposit", &amounts.deposit, &first)?,
            second_deposit: units("deposit", &amounts.deposit, &second)?,
            borrow: units("borrow", &amounts.borrow, &second)?,
            repay: units("repay", &amounts.repay, &second)?,
            borrow_rate_mode: debt_mode("scenario.borrow_rate_mode", &roles.borrow_rate_mode)?,
            referral_code: roles.referral_code,
            flash_params,
            flash_mode: rate_mode("flash_loan.mode", &config.flash_loan.mode)?,
            depositor_liquidity: units("depositor_liquidity", &amounts.depositor_liquidity, &debt)?,
            liquidator_funds: units("liquidator_funds", &amounts.liquidator_funds, &debt)?,
            borrower_collateral: units("borrower_collateral", &amounts.borrower_collateral, &collateral)?,
            price_shock_bps: liquidation.price_shock_bps,
            borrow_utilization_bps: liquidation.borrow_utilization_bps,
            close_factor_bps: liquidation.close_factor_bps,
            liquidation_rate_mode: debt_mode("liquidation.borrow_rate_mode", &liquidation.borrow_rate_mode)?,
            receive_a_token: liquidation.receive_a_token,
            tolerance: Tolerances {
                amount: U256::from(tolerance.amount),
                value: U256::from(tolerance.value),
                seized: U256::from(tolerance.seized),
                health_factor: U256::from(tolerance.health_factor),
            },
            first,
            second,
            collateral,
            debt,
        })
    }

    /// Distinct assets touched by the run, in role order.
    pub fn assets(&self) -> Vec<&Asset> {
        let mut assets: Vec<&Asset> = Vec::with_capacity(4);
        for asset in [&self.first, &self.second, &self.collateral, &self.debt] {
            if !assets.iter().any(|a| a.address == asset.address) {
                assets.push(asset);
            }
        }
        assets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::Address;

    fn registry() -> AssetRegistry {
        let mut registry = AssetRegistry::new();
        for (i, (symbol, decimals)) in [("USDC", 6u8), ("USDT", 6), ("WETH", 18)].into_iter().enumerate() {
            registry.insert(Asset {
                symbol: symbol.to_string(),
                address: Address::with_last_byte(i as u8 + 1),
                decimals,
            });
        }
        registry
    }

    #[test]
    fn test_amounts_use_each_assets_decimals() {
        let plan = ScenarioPlan::from_config(&ScenarioConfig::default(), &registry()).unwrap();

        assert_eq!(plan.first_deposit, U256::from(10_000_000u64));
        assert_eq!(plan.borrow, U256::from(5_000_000u64));
        assert_eq!(plan.borrower_collateral, U256::from(1_000_000_000_000_000_000u64));
        assert_eq!(plan.borrow_rate_mode, RateMode::Variable);
        assert_eq!(plan.liquidation_rate_mode, RateMode::Stable);
        assert_eq!(plan.flash_mode, RateMode::None);
        assert_eq!(plan.flash_params, Bytes::from(vec![0x10u8]));
        assert_eq!(plan.assets().len(), 3);
    }

    #[test]
    fn test_unknown_symbol_is_a_config_error() {
        let mut config = ScenarioConfig::default();
        config.scenario.collateral_asset = "WBTC".to_string();

        let err = ScenarioPlan::from_config(&config, &registry()).unwrap_err();
        assert!(matches!(err, ScenarioError::Config(_)));
        assert!(err.to_string().contains("WBTC"));
    }

    #[test]
    fn test_close_factor_above_protocol_maximum() {
        let mut config = ScenarioConfig::default();
        config.liquidation.close_factor_bps = 6_000;
        assert!(ScenarioPlan::from_config(&config, &registry()).is_err());
    }

    #[test]
    fn test_liquidation_borrow_must_open_debt() {
        let mut config = ScenarioConfig::default();
        config.liquidation.borrow_rate_mode = "none".to_string();
        assert!(ScenarioPlan::from_config(&config, &registry()).is_err());
    }

    #[test]
    fn test_excess_precision_rejected() {
        let mut config = ScenarioConfig::default();
        config.amounts.deposit = "0.0000001".to_string();
        assert!(ScenarioPlan::from_config(&config, &registry()).is_err());
    }
}
