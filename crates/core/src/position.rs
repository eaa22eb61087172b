//! Derived position views.
//!
//! Nothing here is stored between steps. [`Position`] mirrors what the
//! protocol reports; [`RecomputedPosition`] rebuilds the same figures from
//! per-reserve balances, fresh oracle prices and reserve parameters so the
//! two can be cross-checked.

use alloy::primitives::{Address, U256};
use scenario_chain::{LendingPool, PriceSource, ProtocolResult, UserAccountData};
use serde::Serialize;
use smallvec::SmallVec;
use tracing::debug;

use crate::assets::AssetRegistry;
use crate::u256_math::{self, WAD};

/// Protocol-reported account view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Position {
    pub user: Address,
    /// Collateral value (quote currency units)
    pub total_collateral: U256,
    /// Debt value (quote currency units)
    pub total_debt: U256,
    /// Remaining borrow capacity (quote currency units)
    pub available_borrows: U256,
    /// Weighted liquidation threshold in basis points
    pub liquidation_threshold_bps: u64,
    /// Weighted loan-to-value in basis points
    pub ltv_bps: u64,
    /// WAD-scaled health factor
    pub health_factor: U256,
}

impl Position {
    pub fn from_account(user: Address, data: UserAccountData) -> Self {
        Self {
            user,
            total_collateral: data.total_collateral,
            total_debt: data.total_debt,
            available_borrows: data.available_borrows,
            liquidation_threshold_bps: data.current_liquidation_threshold_bps,
            ltv_bps: data.ltv_bps,
            health_factor: data.health_factor,
        }
    }

    pub async fn fetch(pool: &dyn LendingPool, user: Address) -> ProtocolResult<Self> {
        Ok(Self::from_account(user, pool.user_account_data(user).await?))
    }

    pub fn is_liquidatable(&self) -> bool {
        u256_math::is_liquidatable_wad(self.health_factor)
    }

    /// Health factor as f64 (display only).
    pub fn health_factor_f64(&self) -> f64 {
        u256_math::wad_to_f64(self.health_factor)
    }
}

/// One reserve's contribution to a position.
#[derive(Debug, Clone, Serialize)]
pub struct PositionLeg {
    pub symbol: String,
    pub price: U256,
    pub decimals: u8,
    /// Receipt-token balance counted as collateral
    pub collateral: U256,
    /// Stable plus variable debt
    pub debt: U256,
    pub liquidation_threshold_bps: u64,
    pub ltv_bps: u64,
}

impl PositionLeg {
    pub fn collateral_value(&self) -> U256 {
        u256_math::asset_value(self.collateral, self.price, self.decimals)
    }

    pub fn debt_value(&self) -> U256 {
        u256_math::asset_value(self.debt, self.price, self.decimals)
    }
}

/// Position rebuilt from balances, prices and reserve parameters.
#[derive(Debug, Clone, Serialize)]
pub struct RecomputedPosition {
    pub user: Address,
    pub legs: SmallVec<[PositionLeg; 4]>,
    pub collateral_value: U256,
    /// Σ collateral value × liquidation threshold / 10000
    pub adjusted_collateral: U256,
    /// Σ collateral value × LTV / 10000
    pub borrow_limit: U256,
    pub debt_value: U256,
}

impl RecomputedPosition {
    /// Read every reserve the user touches. Prices are read from `oracle`
    /// on every call.
    pub async fn compute(
        pool: &dyn LendingPool,
        oracle: &dyn PriceSource,
        registry: &AssetRegistry,
        user: Address,
    ) -> ProtocolResult<Self> {
        let mut legs = SmallVec::new();

        for asset in registry.iter() {
            let data = pool.user_reserve_data(asset.address, user).await?;
            if data.current_a_token_balance.is_zero() && data.total_debt().is_zero() {
                continue;
            }
            let config = pool.reserve_configuration(asset.address).await?;
            let price = oracle.get_asset_price(asset.address).await?;
            let collateral = if config.usage_as_collateral_enabled {
                data.current_a_token_balance
            } else {
                U256::ZERO
            };

            legs.push(PositionLeg {
                symbol: asset.symbol.clone(),
                price,
                decimals: asset.decimals,
                collateral,
                debt: data.total_debt(),
                liquidation_threshold_bps: config.liquidation_threshold_bps,
                ltv_bps: config.ltv_bps,
            });
        }

        Ok(Self::from_legs(user, legs))
    }

    pub fn from_legs(user: Address, legs: SmallVec<[PositionLeg; 4]>) -> Self {
        let mut collateral_value = U256::ZERO;
        let mut adjusted_collateral = U256::ZERO;
        let mut borrow_limit = U256::ZERO;
        let mut debt_value = U256::ZERO;

        for leg in &legs {
            let value = leg.collateral_value();
            collateral_value += value;
            adjusted_collateral += u256_math::mul_bps(value, leg.liquidation_threshold_bps);
            borrow_limit += u256_math::mul_bps(value, leg.ltv_bps);
            debt_value += leg.debt_value();
        }

        debug!(
            user = %user,
            collateral = %collateral_value,
            debt = %debt_value,
            "Recomputed position"
        );

        Self {
            user,
            legs,
            collateral_value,
            adjusted_collateral,
            borrow_limit,
            debt_value,
        }
    }

    /// `collateral × threshold / debt`, WAD-scaled.
    pub fn health_factor(&self) -> U256 {
        u256_math::calculate_hf_wad(self.adjusted_collateral, self.debt_value)
    }

    pub fn available_borrows(&self) -> U256 {
        self.borrow_limit.saturating_sub(self.debt_value)
    }

    pub fn is_liquidatable(&self) -> bool {
        self.health_factor() < WAD
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    fn weth_leg(collateral: U256) -> PositionLeg {
        PositionLeg {
            symbol: "WETH".to_string(),
            price: WAD,
            decimals: 18,
            collateral,
            debt: U256::ZERO,
            liquidation_threshold_bps: 8_250,
            ltv_bps: 8_000,
        }
    }

    fn usdc_debt_leg(debt: U256, price: U256) -> PositionLeg {
        PositionLeg {
            symbol: "USDC".to_string(),
            price,
            decimals: 6,
            collateral: U256::ZERO,
            debt,
            liquidation_threshold_bps: 8_500,
            ltv_bps: 8_000,
        }
    }

    #[test]
    fn test_health_factor_from_legs() {
        // 1 WETH collateral, 1500 USDC debt at 0.0005 ETH
        let position = RecomputedPosition::from_legs(
            Address::ZERO,
            smallvec![
                weth_leg(WAD),
                usdc_debt_leg(U256::from(1_500_000_000u64), U256::from(500_000_000_000_000u64)),
            ],
        );

        assert_eq!(position.debt_value, U256::from(750_000_000_000_000_000u64));
        assert_eq!(position.health_factor(), U256::from(1_100_000_000_000_000_000u64));
        assert_eq!(position.available_borrows(), U256::from(50_000_000_000_000_000u64));
        assert!(!position.is_liquidatable());
    }

    #[test]
    fn test_price_shock_breaks_health_factor() {
        let shocked = u256_math::mul_bps(U256::from(500_000_000_000_000u64), 11_200);
        let position = RecomputedPosition::from_legs(
            Address::ZERO,
            smallvec![weth_leg(WAD), usdc_debt_leg(U256::from(1_500_000_000u64), shocked)],
        );

        assert!(position.is_liquidatable());
        assert!(position.adjusted_collateral < position.debt_value);
    }

    #[test]
    fn test_no_debt_is_never_liquidatable() {
        let position = RecomputedPosition::from_legs(Address::ZERO, smallvec![weth_leg(WAD)]);
        assert_eq!(position.health_factor(), U256::MAX);
        assert!(!position.is_liquidatable());
    }

    #[test]
    fn test_position_from_account_data() {
        let data = UserAccountData {
            health_factor: WAD / U256::from(2u64),
            ..Default::default()
        };
        let position = Position::from_account(Address::ZERO, data);
        assert!(position.is_liquidatable());
        assert!((position.health_factor_f64() - 0.5).abs() < 1e-9);
    }
}
