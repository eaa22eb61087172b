//! Protocol abstraction layer for the lending pool under test.
//!
//! The scenario never talks to contracts directly. It goes through two
//! traits so the same script runs against a live deployment or the
//! in-memory simulation:
//!
//! - [`LendingPool`]: pool operations plus reserve and account queries
//! - [`TokenLedger`]: the test tokens (mint, approve, balances)
//!
//! # Example
//!
//! ```rust,ignore
//! use scenario_chain::protocol::{LendingPool, RateMode};
//!
//! let receipt = pool.deposit(user, usdc, amount, user, 0).await?;
//! let account = pool.user_account_data(user).await?;
//! if account.health_factor < WAD {
//!     pool.liquidation_call(liquidator, weth, usdc, user, amount, false).await?;
//! }
//! ```

mod aave_v2;
pub mod memory;

pub use aave_v2::{AaveV2Contracts, AaveV2Pool};

use crate::error::{Operation, ProtocolResult};
use alloy::primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use serde::Serialize;
use smallvec::SmallVec;
use std::fmt::{self, Debug};

/// Interest rate mode of a borrow position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
pub enum RateMode {
    /// No debt is opened (flash loan repaid in the same call).
    #[default]
    None,
    Stable,
    Variable,
}

impl RateMode {
    pub fn as_u8(&self) -> u8 {
        match self {
            Self::None => 0,
            Self::Stable => 1,
            Self::Variable => 2,
        }
    }

    /// Parse from config string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "none" | "0" => Some(Self::None),
            "stable" | "1" => Some(Self::Stable),
            "variable" | "2" => Some(Self::Variable),
            _ => None,
        }
    }
}

impl fmt::Display for RateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::Stable => f.write_str("stable"),
            Self::Variable => f.write_str("variable"),
        }
    }
}

/// Confirmation of a state-changing call.
#[derive(Debug, Clone, Serialize)]
pub struct TxReceipt {
    pub operation: Operation,
    pub hash: B256,
    pub gas_used: u64,
    pub gas_price: u128,
}

/// Account-level view returned by `getUserAccountData`.
///
/// Values are denominated in the quote currency's smallest unit.
/// `health_factor` is WAD-scaled (1e18 = parity), `U256::MAX` without debt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserAccountData {
    pub total_collateral: U256,
    pub total_debt: U256,
    pub available_borrows: U256,
    /// Weighted liquidation threshold in basis points
    pub current_liquidation_threshold_bps: u64,
    /// Weighted loan-to-value in basis points
    pub ltv_bps: u64,
    pub health_factor: U256,
}

/// Reserve-level liquidity and debt snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReserveData {
    pub available_liquidity: U256,
    pub total_stable_debt: U256,
    pub total_variable_debt: U256,
}

/// Static reserve parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReserveConfiguration {
    pub decimals: u8,
    pub ltv_bps: u64,
    pub liquidation_threshold_bps: u64,
    /// Liquidation bonus as a percentage of the seized value in bps,
    /// e.g. 10500 = 105% (5% bonus).
    pub liquidation_bonus_bps: u64,
    pub usage_as_collateral_enabled: bool,
    pub borrowing_enabled: bool,
    pub stable_borrow_rate_enabled: bool,
    pub is_active: bool,
    pub is_frozen: bool,
}

/// A user's balances in one reserve.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserReserveData {
    pub current_a_token_balance: U256,
    pub current_stable_debt: U256,
    pub current_variable_debt: U256,
}

impl UserReserveData {
    /// Outstanding debt for the given rate mode.
    pub fn debt(&self, mode: RateMode) -> U256 {
        match mode {
            RateMode::Stable => self.current_stable_debt,
            RateMode::Variable => self.current_variable_debt,
            RateMode::None => U256::ZERO,
        }
    }

    pub fn total_debt(&self) -> U256 {
        self.current_stable_debt + self.current_variable_debt
    }
}

/// Token addresses attached to a reserve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReserveTokens {
    pub a_token: Address,
    pub stable_debt_token: Address,
    pub variable_debt_token: Address,
}

/// Arguments of a `flashLoan` call.
#[derive(Debug, Clone)]
pub struct FlashLoanRequest {
    pub receiver: Address,
    pub assets: SmallVec<[Address; 2]>,
    pub amounts: SmallVec<[U256; 2]>,
    pub modes: SmallVec<[RateMode; 2]>,
    pub on_behalf_of: Address,
    pub params: Bytes,
    pub referral_code: u16,
}

impl FlashLoanRequest {
    /// Single-asset flash loan that is repaid within the call.
    pub fn single(receiver: Address, asset: Address, amount: U256, params: Bytes) -> Self {
        Self {
            receiver,
            assets: SmallVec::from_elem(asset, 1),
            amounts: SmallVec::from_elem(amount, 1),
            modes: SmallVec::from_elem(RateMode::None, 1),
            on_behalf_of: receiver,
            params,
            referral_code: 0,
        }
    }

    pub fn with_mode(mut self, mode: RateMode) -> Self {
        self.modes = SmallVec::from_elem(mode, self.assets.len());
        self
    }

    pub fn with_referral_code(mut self, referral_code: u16) -> Self {
        self.referral_code = referral_code;
        self
    }
}

/// Lending pool operations and queries.
///
/// `caller` is the acting participant (the transaction sender). All amounts
/// are in the asset's smallest unit.
#[async_trait]
pub trait LendingPool: Send + Sync + Debug {
    /// Pool contract address (spender for token approvals).
    fn address(&self) -> Address;

    async fn deposit(
        &self,
        caller: Address,
        asset: Address,
        amount: U256,
        on_behalf_of: Address,
        referral_code: u16,
    ) -> ProtocolResult<TxReceipt>;

    /// `U256::MAX` withdraws the full receipt-token balance.
    async fn withdraw(
        &self,
        caller: Address,
        asset: Address,
        amount: U256,
        to: Address,
    ) -> ProtocolResult<TxReceipt>;

    async fn borrow(
        &self,
        caller: Address,
        asset: Address,
        amount: U256,
        rate_mode: RateMode,
        referral_code: u16,
        on_behalf_of: Address,
    ) -> ProtocolResult<TxReceipt>;

    /// Repays `min(amount, outstanding debt)`.
    async fn repay(
        &self,
        caller: Address,
        asset: Address,
        amount: U256,
        rate_mode: RateMode,
        on_behalf_of: Address,
    ) -> ProtocolResult<TxReceipt>;

    /// Atomic: either the receiver returns every amount plus premium, or
    /// nothing is applied.
    async fn flash_loan(
        &self,
        caller: Address,
        request: FlashLoanRequest,
    ) -> ProtocolResult<TxReceipt>;

    async fn liquidation_call(
        &self,
        caller: Address,
        collateral_asset: Address,
        debt_asset: Address,
        user: Address,
        debt_to_cover: U256,
        receive_a_token: bool,
    ) -> ProtocolResult<TxReceipt>;

    async fn set_pool_pause(&self, caller: Address, paused: bool) -> ProtocolResult<TxReceipt>;

    async fn paused(&self) -> ProtocolResult<bool>;

    async fn emergency_admin(&self) -> ProtocolResult<Address>;

    /// Flash loan premium in basis points of the borrowed amount.
    async fn flash_loan_premium_bps(&self) -> ProtocolResult<u64>;

    async fn reserves_list(&self) -> ProtocolResult<Vec<Address>>;

    async fn user_account_data(&self, user: Address) -> ProtocolResult<UserAccountData>;

    async fn reserve_data(&self, asset: Address) -> ProtocolResult<ReserveData>;

    async fn reserve_configuration(&self, asset: Address) -> ProtocolResult<ReserveConfiguration>;

    async fn user_reserve_data(
        &self,
        asset: Address,
        user: Address,
    ) -> ProtocolResult<UserReserveData>;

    async fn reserve_tokens(&self, asset: Address) -> ProtocolResult<ReserveTokens>;
}

/// Mintable test tokens and their balances.
#[async_trait]
pub trait TokenLedger: Send + Sync + Debug {
    /// Mint `amount` of `token` to `caller`.
    async fn mint(&self, caller: Address, token: Address, amount: U256) -> ProtocolResult<TxReceipt>;

    async fn approve(
        &self,
        caller: Address,
        token: Address,
        spender: Address,
        amount: U256,
    ) -> ProtocolResult<TxReceipt>;

    /// Balance of any token, receipt tokens included.
    async fn balance_of(&self, token: Address, holder: Address) -> ProtocolResult<U256>;

    async fn symbol(&self, token: Address) -> ProtocolResult<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_mode_parsing() {
        assert_eq!(RateMode::from_str("stable"), Some(RateMode::Stable));
        assert_eq!(RateMode::from_str("Variable"), Some(RateMode::Variable));
        assert_eq!(RateMode::from_str("0"), Some(RateMode::None));
        assert_eq!(RateMode::from_str("fixed"), None);
        assert_eq!(RateMode::Stable.as_u8(), 1);
    }

    #[test]
    fn test_user_reserve_debt_by_mode() {
        let data = UserReserveData {
            current_a_token_balance: U256::ZERO,
            current_stable_debt: U256::from(7u64),
            current_variable_debt: U256::from(3u64),
        };
        assert_eq!(data.debt(RateMode::Stable), U256::from(7u64));
        assert_eq!(data.debt(RateMode::Variable), U256::from(3u64));
        assert_eq!(data.debt(RateMode::None), U256::ZERO);
        assert_eq!(data.total_debt(), U256::from(10u64));
    }

    #[test]
    fn test_single_flash_loan_request() {
        let receiver = Address::with_last_byte(9);
        let asset = Address::with_last_byte(1);
        let request = FlashLoanRequest::single(receiver, asset, U256::from(100u64), Bytes::new())
            .with_referral_code(7);

        assert_eq!(request.assets.len(), 1);
        assert_eq!(request.modes[0], RateMode::None);
        assert_eq!(request.on_behalf_of, receiver);
        assert_eq!(request.referral_code, 7);
    }
}
