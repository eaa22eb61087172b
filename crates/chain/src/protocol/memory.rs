//! In-memory lending pool.
//!
//! Models the Aave v2 pool rules the scenario exercises:
//! - deposits mint receipt balances 1:1, liquidity sits with the aToken
//! - borrows are bounded by collateral × LTV and the reserve's liquidity
//! - flash loans are atomic and charge the configured premium
//! - liquidations require HF < 1, repay at most 50% of the debt and seize
//!   collateral at oracle price plus the liquidation bonus
//!
//! Every state-changing call runs against a draft copy of the pool state
//! that is only committed when the call succeeds, so a revert leaves no
//! trace. Oracle prices are read before the state lock is taken.

use super::{
    FlashLoanRequest, LendingPool, RateMode, ReserveConfiguration, ReserveData, ReserveTokens,
    TokenLedger, TxReceipt, UserAccountData, UserReserveData,
};
use crate::error::{Operation, ProtocolError, ProtocolResult};
use crate::oracle::PriceSource;
use alloy::primitives::{keccak256, Address, Bytes, U256};
use async_trait::async_trait;
use dashmap::DashMap;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

const WAD: U256 = U256::from_limbs([1_000_000_000_000_000_000, 0, 0, 0]);
const BPS: u64 = 10_000;

/// Share of a position's debt a single liquidation may repay, in bps.
pub const CLOSE_FACTOR_BPS: u64 = 5_000;

/// Revert reasons, worded after the protocol's error codes.
pub mod reason {
    pub const POOL_PAUSED: &str = "pool is paused";
    pub const INVALID_AMOUNT: &str = "amount must be greater than 0";
    pub const RESERVE_INACTIVE: &str = "reserve is not active";
    pub const RESERVE_FROZEN: &str = "reserve is frozen";
    pub const BORROWING_NOT_ENABLED: &str = "borrowing is not enabled";
    pub const STABLE_BORROWING_NOT_ENABLED: &str = "stable borrowing is not enabled";
    pub const COLLATERAL_SAME_AS_BORROWING_CURRENCY: &str =
        "collateral is the same currency that is being borrowed";
    pub const INVALID_INTEREST_RATE_MODE: &str = "invalid interest rate mode selected";
    pub const COLLATERAL_BALANCE_IS_ZERO: &str = "collateral balance is 0";
    pub const COLLATERAL_CANNOT_COVER_NEW_BORROW: &str =
        "there is not enough collateral to cover a new borrow";
    pub const CREDIT_DELEGATION_UNSUPPORTED: &str = "borrowing on behalf of another user is not supported";
    pub const NOT_ENOUGH_LIQUIDITY: &str = "not enough liquidity in the reserve";
    pub const NOT_ENOUGH_AVAILABLE_USER_BALANCE: &str = "user cannot withdraw more than the available balance";
    pub const TRANSFER_NOT_ALLOWED: &str = "withdrawal would drop health factor below 1";
    pub const NO_DEBT_OF_SELECTED_TYPE: &str = "user has no debt of the selected type";
    pub const NO_EXPLICIT_AMOUNT_TO_REPAY_ON_BEHALF: &str =
        "an explicit amount is required to repay on behalf of another user";
    pub const INCONSISTENT_FLASHLOAN_PARAMS: &str = "inconsistent flash loan parameters";
    pub const INVALID_FLASH_LOAN_EXECUTOR_RETURN: &str = "invalid flash loan executor return";
    pub const RECEIVER_NOT_REGISTERED: &str = "flash loan receiver is not a contract";
    pub const HEALTH_FACTOR_NOT_BELOW_THRESHOLD: &str = "health factor is not below the threshold";
    pub const COLLATERAL_CANNOT_BE_LIQUIDATED: &str = "the collateral chosen cannot be liquidated";
    pub const CURRENCY_NOT_BORROWED_BY_USER: &str = "user did not borrow the specified currency";
    pub const NOT_ENOUGH_LIQUIDITY_TO_LIQUIDATE: &str = "not enough liquidity to liquidate";
    pub const PRICE_IS_ZERO: &str = "asset price is zero";
    pub const CALLER_NOT_EMERGENCY_ADMIN: &str = "caller is not the emergency admin";
    pub const RESERVE_NOT_LISTED: &str = "reserve is not listed";
    pub const TRANSFER_EXCEEDS_BALANCE: &str = "transfer amount exceeds balance";
    pub const TRANSFER_EXCEEDS_ALLOWANCE: &str = "transfer amount exceeds allowance";
}

fn pow10(decimals: u8) -> U256 {
    U256::from(10u64).pow(U256::from(decimals))
}

fn derive_address(tag: &str, seed: Address) -> Address {
    let mut buf = Vec::with_capacity(tag.len() + 20);
    buf.extend_from_slice(tag.as_bytes());
    buf.extend_from_slice(seed.as_slice());
    Address::from_slice(&keccak256(&buf)[12..])
}

fn credit(map: &mut HashMap<Address, U256>, user: Address, amount: U256) {
    *map.entry(user).or_default() += amount;
}

fn debit(
    map: &mut HashMap<Address, U256>,
    user: Address,
    amount: U256,
) -> Result<(), &'static str> {
    let balance = map.get(&user).copied().unwrap_or_default();
    if balance < amount {
        return Err(reason::TRANSFER_EXCEEDS_BALANCE);
    }
    if balance == amount {
        map.remove(&user);
    } else {
        map.insert(user, balance - amount);
    }
    Ok(())
}

/// Underlying token balances and allowances.
///
/// Reserve liquidity is the balance held by the reserve's aToken address.
#[derive(Debug, Clone, Default)]
pub struct TokenBook {
    /// (token, holder) -> balance
    balances: HashMap<(Address, Address), U256>,
    /// (token, owner, spender) -> allowance
    allowances: HashMap<(Address, Address, Address), U256>,
}

impl TokenBook {
    pub fn balance(&self, token: Address, holder: Address) -> U256 {
        self.balances
            .get(&(token, holder))
            .copied()
            .unwrap_or_default()
    }

    pub fn allowance(&self, token: Address, owner: Address, spender: Address) -> U256 {
        self.allowances
            .get(&(token, owner, spender))
            .copied()
            .unwrap_or_default()
    }

    pub fn mint(&mut self, token: Address, to: Address, amount: U256) {
        *self.balances.entry((token, to)).or_default() += amount;
    }

    pub fn approve(&mut self, token: Address, owner: Address, spender: Address, amount: U256) {
        self.allowances.insert((token, owner, spender), amount);
    }

    pub fn transfer(
        &mut self,
        token: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), &'static str> {
        let from_balance = self.balance(token, from);
        if from_balance < amount {
            return Err(reason::TRANSFER_EXCEEDS_BALANCE);
        }
        self.balances.insert((token, from), from_balance - amount);
        *self.balances.entry((token, to)).or_default() += amount;
        Ok(())
    }

    /// `spender` moves `amount` out of `from`. An allowance of `U256::MAX`
    /// is never decreased.
    pub fn transfer_from(
        &mut self,
        token: Address,
        spender: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), &'static str> {
        let allowance = self.allowance(token, from, spender);
        if allowance < amount {
            return Err(reason::TRANSFER_EXCEEDS_ALLOWANCE);
        }
        self.transfer(token, from, to, amount)?;
        if allowance != U256::MAX {
            self.allowances
                .insert((token, from, spender), allowance - amount);
        }
        Ok(())
    }
}

/// Arguments handed to a flash loan receiver.
#[derive(Debug)]
pub struct FlashLoanCallback<'a> {
    pub pool: Address,
    pub receiver: Address,
    pub assets: &'a [Address],
    pub amounts: &'a [U256],
    pub premiums: &'a [U256],
    pub initiator: Address,
    pub params: &'a Bytes,
}

/// Contract-side logic run between the flash loan transfer and repayment.
///
/// Returning `false` reverts the whole flash loan.
pub trait FlashLoanReceiver: Send + Sync + Debug {
    fn execute_operation(&self, tokens: &mut TokenBook, call: &FlashLoanCallback<'_>) -> bool;
}

/// Receiver that covers the premium by minting it, then approves the pool
/// for amount plus premium.
#[derive(Debug, Default)]
pub struct MockFlashLoanReceiver {
    fail_execution: AtomicBool,
}

impl MockFlashLoanReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next executions return `false`.
    pub fn set_fail_execution(&self, fail: bool) {
        self.fail_execution.store(fail, Ordering::SeqCst);
    }
}

impl FlashLoanReceiver for MockFlashLoanReceiver {
    fn execute_operation(&self, tokens: &mut TokenBook, call: &FlashLoanCallback<'_>) -> bool {
        if self.fail_execution.load(Ordering::SeqCst) {
            return false;
        }

        for ((asset, amount), premium) in call.assets.iter().zip(call.amounts).zip(call.premiums) {
            tokens.mint(*asset, call.receiver, *premium);
            tokens.approve(*asset, call.receiver, call.pool, *amount + *premium);
        }
        true
    }
}

#[derive(Debug, Clone)]
struct Reserve {
    symbol: String,
    config: ReserveConfiguration,
    tokens: ReserveTokens,
    /// aToken balances
    supplied: HashMap<Address, U256>,
    stable_debt: HashMap<Address, U256>,
    variable_debt: HashMap<Address, U256>,
}

impl Reserve {
    fn supplied_by(&self, user: Address) -> U256 {
        self.supplied.get(&user).copied().unwrap_or_default()
    }

    fn user_data(&self, user: Address) -> UserReserveData {
        UserReserveData {
            current_a_token_balance: self.supplied_by(user),
            current_stable_debt: self.stable_debt.get(&user).copied().unwrap_or_default(),
            current_variable_debt: self.variable_debt.get(&user).copied().unwrap_or_default(),
        }
    }

    fn debt_book(&mut self, mode: RateMode) -> Result<&mut HashMap<Address, U256>, &'static str> {
        match mode {
            RateMode::Stable => Ok(&mut self.stable_debt),
            RateMode::Variable => Ok(&mut self.variable_debt),
            RateMode::None => Err(reason::INVALID_INTEREST_RATE_MODE),
        }
    }

    fn ensure_usable(&self) -> Result<(), &'static str> {
        if !self.config.is_active {
            return Err(reason::RESERVE_INACTIVE);
        }
        if self.config.is_frozen {
            return Err(reason::RESERVE_FROZEN);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
struct PoolState {
    reserves: IndexMap<Address, Reserve>,
    tokens: TokenBook,
    paused: bool,
}

impl PoolState {
    fn reserve(&self, asset: Address) -> Result<&Reserve, &'static str> {
        self.reserves.get(&asset).ok_or(reason::RESERVE_NOT_LISTED)
    }

    fn reserve_mut(&mut self, asset: Address) -> Result<&mut Reserve, &'static str> {
        self.reserves.get_mut(&asset).ok_or(reason::RESERVE_NOT_LISTED)
    }

    fn ensure_unpaused(&self) -> Result<(), &'static str> {
        if self.paused {
            return Err(reason::POOL_PAUSED);
        }
        Ok(())
    }

    fn available_liquidity(&self, asset: Address) -> Result<U256, &'static str> {
        let a_token = self.reserve(asset)?.tokens.a_token;
        Ok(self.tokens.balance(asset, a_token))
    }

    /// Aggregate account view at the given prices.
    fn account_data(&self, user: Address, prices: &HashMap<Address, U256>) -> UserAccountData {
        let mut total_collateral = U256::ZERO;
        let mut total_debt = U256::ZERO;
        let mut weighted_ltv = U256::ZERO;
        let mut weighted_threshold = U256::ZERO;

        for (asset, reserve) in &self.reserves {
            let price = prices.get(asset).copied().unwrap_or_default();
            let unit = pow10(reserve.config.decimals);
            let data = reserve.user_data(user);

            if !data.current_a_token_balance.is_zero() && reserve.config.usage_as_collateral_enabled {
                let value = data.current_a_token_balance * price / unit;
                total_collateral += value;
                weighted_ltv += value * U256::from(reserve.config.ltv_bps);
                weighted_threshold += value * U256::from(reserve.config.liquidation_threshold_bps);
            }

            let debt = data.total_debt();
            if !debt.is_zero() {
                total_debt += debt * price / unit;
            }
        }

        let (ltv, threshold) = if total_collateral.is_zero() {
            (U256::ZERO, U256::ZERO)
        } else {
            (weighted_ltv / total_collateral, weighted_threshold / total_collateral)
        };

        let max_borrow = total_collateral * ltv / U256::from(BPS);
        let health_factor = if total_debt.is_zero() {
            U256::MAX
        } else {
            total_collateral * threshold / U256::from(BPS) * WAD / total_debt
        };

        UserAccountData {
            total_collateral,
            total_debt,
            available_borrows: max_borrow.saturating_sub(total_debt),
            current_liquidation_threshold_bps: threshold.saturating_to::<u64>(),
            ltv_bps: ltv.saturating_to::<u64>(),
            health_factor,
        }
    }

    /// Fail unless the user's debt stays within collateral × LTV.
    fn ensure_borrow_covered(
        &self,
        user: Address,
        prices: &HashMap<Address, U256>,
    ) -> Result<(), &'static str> {
        let account = self.account_data(user, prices);
        if account.total_collateral.is_zero() {
            return Err(reason::COLLATERAL_BALANCE_IS_ZERO);
        }
        let max_borrow = account.total_collateral * U256::from(account.ltv_bps) / U256::from(BPS);
        if account.total_debt > max_borrow {
            return Err(reason::COLLATERAL_CANNOT_COVER_NEW_BORROW);
        }
        Ok(())
    }
}

/// Collateral seized for `debt_to_cover` and the debt actually repaid,
/// capped by the user's collateral balance.
fn collateral_to_seize(
    collateral_price: U256,
    collateral_decimals: u8,
    debt_price: U256,
    debt_decimals: u8,
    bonus_bps: u64,
    debt_to_cover: U256,
    user_collateral: U256,
) -> Result<(U256, U256), &'static str> {
    if collateral_price.is_zero() || debt_price.is_zero() || bonus_bps == 0 {
        return Err(reason::PRICE_IS_ZERO);
    }
    let bonus = U256::from(bonus_bps);
    let bps = U256::from(BPS);

    let max_collateral = debt_price * debt_to_cover * pow10(collateral_decimals) * bonus
        / (collateral_price * pow10(debt_decimals) * bps);

    if max_collateral > user_collateral {
        let debt_needed = collateral_price * user_collateral * pow10(debt_decimals) * bps
            / (debt_price * pow10(collateral_decimals) * bonus);
        Ok((user_collateral, debt_needed))
    } else {
        Ok((max_collateral, debt_to_cover))
    }
}

/// Lending pool simulated in process memory.
pub struct InMemoryLendingPool {
    address: Address,
    emergency_admin: Address,
    flash_loan_premium_bps: u64,
    oracle: Arc<dyn PriceSource>,
    receivers: DashMap<Address, Arc<dyn FlashLoanReceiver>>,
    state: Mutex<PoolState>,
    nonce: AtomicU64,
}

impl Debug for InMemoryLendingPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("InMemoryLendingPool")
            .field("address", &self.address)
            .field("emergency_admin", &self.emergency_admin)
            .field("flash_loan_premium_bps", &self.flash_loan_premium_bps)
            .field("reserves", &state.reserves.len())
            .field("paused", &state.paused)
            .finish()
    }
}

impl InMemoryLendingPool {
    pub fn new(emergency_admin: Address, oracle: Arc<dyn PriceSource>) -> Self {
        Self {
            address: derive_address("LendingPool", emergency_admin),
            emergency_admin,
            flash_loan_premium_bps: 0,
            oracle,
            receivers: DashMap::new(),
            state: Mutex::new(PoolState::default()),
            nonce: AtomicU64::new(0),
        }
    }

    pub fn with_flash_loan_premium_bps(mut self, premium_bps: u64) -> Self {
        self.flash_loan_premium_bps = premium_bps;
        self
    }

    pub fn with_paused(mut self, paused: bool) -> Self {
        self.state.get_mut().paused = paused;
        self
    }

    /// List `asset` as a reserve and return its derived token addresses.
    pub fn list_reserve(
        &self,
        asset: Address,
        symbol: impl Into<String>,
        config: ReserveConfiguration,
    ) -> ReserveTokens {
        let tokens = ReserveTokens {
            a_token: derive_address("aToken", asset),
            stable_debt_token: derive_address("stableDebtToken", asset),
            variable_debt_token: derive_address("variableDebtToken", asset),
        };
        let symbol = symbol.into();
        info!(asset = %asset, symbol = %symbol, a_token = %tokens.a_token, "Reserve listed");

        self.state.lock().reserves.insert(
            asset,
            Reserve {
                symbol,
                config,
                tokens,
                supplied: HashMap::new(),
                stable_debt: HashMap::new(),
                variable_debt: HashMap::new(),
            },
        );
        tokens
    }

    /// Attach receiver logic to an address usable as a flash loan target.
    pub fn register_receiver(&self, address: Address, receiver: Arc<dyn FlashLoanReceiver>) {
        self.receivers.insert(address, receiver);
    }

    fn receipt(&self, operation: Operation) -> TxReceipt {
        let nonce = self.nonce.fetch_add(1, Ordering::SeqCst);
        let mut seed = operation.as_str().as_bytes().to_vec();
        seed.extend_from_slice(&nonce.to_be_bytes());
        TxReceipt {
            operation,
            hash: keccak256(&seed),
            gas_used: 0,
            gas_price: 0,
        }
    }

    fn ensure_listed(&self, asset: Address) -> ProtocolResult<()> {
        if self.state.lock().reserves.contains_key(&asset) {
            Ok(())
        } else {
            Err(ProtocolError::UnknownReserve(asset))
        }
    }

    /// Prices of the listed reserves. A reserve without a price is left
    /// out and valued at zero, like the fallback oracle answers for an
    /// unset asset.
    async fn price_snapshot(&self) -> ProtocolResult<HashMap<Address, U256>> {
        let assets: Vec<Address> = self.state.lock().reserves.keys().copied().collect();
        let mut prices = HashMap::with_capacity(assets.len());
        for asset in assets {
            match self.oracle.get_asset_price(asset).await {
                Ok(price) => {
                    prices.insert(asset, price);
                }
                Err(e) => debug!(asset = %asset, error = %e, "Reserve has no price"),
            }
        }
        Ok(prices)
    }

    /// Run `apply` on a draft of the state and commit it only on success.
    fn transact<T>(
        &self,
        operation: Operation,
        apply: impl FnOnce(&mut PoolState) -> Result<T, &'static str>,
    ) -> ProtocolResult<(T, TxReceipt)> {
        let mut state = self.state.lock();
        let mut draft = state.clone();
        match apply(&mut draft) {
            Ok(value) => {
                *state = draft;
                drop(state);
                Ok((value, self.receipt(operation)))
            }
            Err(reason) => {
                warn!(operation = %operation, reason, "Operation reverted");
                Err(ProtocolError::reverted(operation, reason))
            }
        }
    }
}

#[async_trait]
impl LendingPool for InMemoryLendingPool {
    fn address(&self) -> Address {
        self.address
    }

    async fn deposit(
        &self,
        caller: Address,
        asset: Address,
        amount: U256,
        on_behalf_of: Address,
        _referral_code: u16,
    ) -> ProtocolResult<TxReceipt> {
        self.ensure_listed(asset)?;
        let pool = self.address;

        let ((), receipt) = self.transact(Operation::Deposit, |state| {
            state.ensure_unpaused()?;
            if amount.is_zero() {
                return Err(reason::INVALID_AMOUNT);
            }
            let reserve = state.reserve(asset)?;
            reserve.ensure_usable()?;
            let a_token = reserve.tokens.a_token;

            state.tokens.transfer_from(asset, pool, caller, a_token, amount)?;
            credit(&mut state.reserve_mut(asset)?.supplied, on_behalf_of, amount);
            Ok(())
        })?;

        debug!(user = %on_behalf_of, asset = %asset, amount = %amount, "Deposit applied");
        Ok(receipt)
    }

    async fn withdraw(
        &self,
        caller: Address,
        asset: Address,
        amount: U256,
        to: Address,
    ) -> ProtocolResult<TxReceipt> {
        self.ensure_listed(asset)?;
        let prices = self.price_snapshot().await?;

        let (withdrawn, receipt) = self.transact(Operation::Withdraw, |state| {
            state.ensure_unpaused()?;
            let reserve = state.reserve(asset)?;
            if !reserve.config.is_active {
                return Err(reason::RESERVE_INACTIVE);
            }
            let balance = reserve.supplied_by(caller);
            let a_token = reserve.tokens.a_token;
            let to_withdraw = if amount == U256::MAX { balance } else { amount };

            if to_withdraw.is_zero() {
                return Err(reason::INVALID_AMOUNT);
            }
            if to_withdraw > balance {
                return Err(reason::NOT_ENOUGH_AVAILABLE_USER_BALANCE);
            }
            if state.tokens.balance(asset, a_token) < to_withdraw {
                return Err(reason::NOT_ENOUGH_LIQUIDITY);
            }

            debit(&mut state.reserve_mut(asset)?.supplied, caller, to_withdraw)?;
            if state.account_data(caller, &prices).health_factor < WAD {
                return Err(reason::TRANSFER_NOT_ALLOWED);
            }
            state.tokens.transfer(asset, a_token, to, to_withdraw)?;
            Ok(to_withdraw)
        })?;

        debug!(user = %caller, asset = %asset, amount = %withdrawn, "Withdraw applied");
        Ok(receipt)
    }

    async fn borrow(
        &self,
        caller: Address,
        asset: Address,
        amount: U256,
        rate_mode: RateMode,
        _referral_code: u16,
        on_behalf_of: Address,
    ) -> ProtocolResult<TxReceipt> {
        self.ensure_listed(asset)?;
        let prices = self.price_snapshot().await?;

        let ((), receipt) = self.transact(Operation::Borrow, |state| {
            state.ensure_unpaused()?;
            if on_behalf_of != caller {
                return Err(reason::CREDIT_DELEGATION_UNSUPPORTED);
            }
            if amount.is_zero() {
                return Err(reason::INVALID_AMOUNT);
            }
            let reserve = state.reserve(asset)?;
            reserve.ensure_usable()?;
            if !reserve.config.borrowing_enabled {
                return Err(reason::BORROWING_NOT_ENABLED);
            }
            if prices.get(&asset).map_or(true, |price| price.is_zero()) {
                return Err(reason::PRICE_IS_ZERO);
            }
            if rate_mode == RateMode::Stable {
                if !reserve.config.stable_borrow_rate_enabled {
                    return Err(reason::STABLE_BORROWING_NOT_ENABLED);
                }
                let own_collateral = reserve.supplied_by(caller);
                if reserve.config.usage_as_collateral_enabled
                    && !own_collateral.is_zero()
                    && amount <= own_collateral
                {
                    return Err(reason::COLLATERAL_SAME_AS_BORROWING_CURRENCY);
                }
            }
            let a_token = reserve.tokens.a_token;
            if state.tokens.balance(asset, a_token) < amount {
                return Err(reason::NOT_ENOUGH_LIQUIDITY);
            }

            credit(state.reserve_mut(asset)?.debt_book(rate_mode)?, caller, amount);
            state.ensure_borrow_covered(caller, &prices)?;
            state.tokens.transfer(asset, a_token, caller, amount)?;
            Ok(())
        })?;

        debug!(user = %caller, asset = %asset, amount = %amount, mode = %rate_mode, "Borrow applied");
        Ok(receipt)
    }

    async fn repay(
        &self,
        caller: Address,
        asset: Address,
        amount: U256,
        rate_mode: RateMode,
        on_behalf_of: Address,
    ) -> ProtocolResult<TxReceipt> {
        self.ensure_listed(asset)?;
        let pool = self.address;

        let (repaid, receipt) = self.transact(Operation::Repay, |state| {
            state.ensure_unpaused()?;
            if amount.is_zero() {
                return Err(reason::INVALID_AMOUNT);
            }
            if amount == U256::MAX && on_behalf_of != caller {
                return Err(reason::NO_EXPLICIT_AMOUNT_TO_REPAY_ON_BEHALF);
            }
            let reserve = state.reserve(asset)?;
            if !reserve.config.is_active {
                return Err(reason::RESERVE_INACTIVE);
            }
            let debt = reserve.user_data(on_behalf_of).debt(rate_mode);
            if debt.is_zero() {
                return Err(reason::NO_DEBT_OF_SELECTED_TYPE);
            }
            let a_token = reserve.tokens.a_token;
            let payback = amount.min(debt);

            state.tokens.transfer_from(asset, pool, caller, a_token, payback)?;
            debit(state.reserve_mut(asset)?.debt_book(rate_mode)?, on_behalf_of, payback)?;
            Ok(payback)
        })?;

        debug!(user = %on_behalf_of, asset = %asset, amount = %repaid, mode = %rate_mode, "Repay applied");
        Ok(receipt)
    }

    async fn flash_loan(
        &self,
        caller: Address,
        request: FlashLoanRequest,
    ) -> ProtocolResult<TxReceipt> {
        for asset in &request.assets {
            self.ensure_listed(*asset)?;
        }
        let receiver = self
            .receivers
            .get(&request.receiver)
            .map(|r| Arc::clone(r.value()))
            .ok_or_else(|| ProtocolError::reverted(Operation::FlashLoan, reason::RECEIVER_NOT_REGISTERED))?;
        let prices = self.price_snapshot().await?;
        let pool = self.address;
        let premium_bps = U256::from(self.flash_loan_premium_bps);

        let (premiums, receipt) = self.transact(Operation::FlashLoan, |state| {
            state.ensure_unpaused()?;
            if request.assets.len() != request.amounts.len()
                || request.assets.len() != request.modes.len()
            {
                return Err(reason::INCONSISTENT_FLASHLOAN_PARAMS);
            }

            let mut premiums = Vec::with_capacity(request.assets.len());
            for (asset, amount) in request.assets.iter().zip(&request.amounts) {
                let a_token = state.reserve(*asset)?.tokens.a_token;
                if state.tokens.balance(*asset, a_token) < *amount {
                    return Err(reason::NOT_ENOUGH_LIQUIDITY);
                }
                state.tokens.transfer(*asset, a_token, request.receiver, *amount)?;
                premiums.push(*amount * premium_bps / U256::from(BPS));
            }

            let callback = FlashLoanCallback {
                pool,
                receiver: request.receiver,
                assets: &request.assets,
                amounts: &request.amounts,
                premiums: &premiums,
                initiator: caller,
                params: &request.params,
            };
            if !receiver.execute_operation(&mut state.tokens, &callback) {
                return Err(reason::INVALID_FLASH_LOAN_EXECUTOR_RETURN);
            }

            for (i, asset) in request.assets.iter().enumerate() {
                let amount = request.amounts[i];
                let a_token = state.reserve(*asset)?.tokens.a_token;

                match request.modes[i] {
                    RateMode::None => {
                        state.tokens.transfer_from(
                            *asset,
                            pool,
                            request.receiver,
                            a_token,
                            amount + premiums[i],
                        )?;
                    }
                    mode => {
                        if request.on_behalf_of != caller {
                            return Err(reason::CREDIT_DELEGATION_UNSUPPORTED);
                        }
                        credit(state.reserve_mut(*asset)?.debt_book(mode)?, caller, amount);
                        state.ensure_borrow_covered(caller, &prices)?;
                    }
                }
            }
            Ok(premiums)
        })?;

        info!(
            initiator = %caller,
            receiver = %request.receiver,
            assets = request.assets.len(),
            premiums = ?premiums,
            "Flash loan executed"
        );
        Ok(receipt)
    }

    async fn liquidation_call(
        &self,
        caller: Address,
        collateral_asset: Address,
        debt_asset: Address,
        user: Address,
        debt_to_cover: U256,
        receive_a_token: bool,
    ) -> ProtocolResult<TxReceipt> {
        self.ensure_listed(collateral_asset)?;
        self.ensure_listed(debt_asset)?;
        let prices = self.price_snapshot().await?;
        let pool = self.address;

        let ((repaid, seized), receipt) = self.transact(Operation::LiquidationCall, |state| {
            state.ensure_unpaused()?;
            if state.account_data(user, &prices).health_factor >= WAD {
                return Err(reason::HEALTH_FACTOR_NOT_BELOW_THRESHOLD);
            }

            let collateral = state.reserve(collateral_asset)?;
            let user_collateral = collateral.supplied_by(user);
            if user_collateral.is_zero() || !collateral.config.usage_as_collateral_enabled {
                return Err(reason::COLLATERAL_CANNOT_BE_LIQUIDATED);
            }
            let collateral_decimals = collateral.config.decimals;
            let bonus_bps = collateral.config.liquidation_bonus_bps;
            let collateral_a_token = collateral.tokens.a_token;

            let debt_reserve = state.reserve(debt_asset)?;
            let user_debt = debt_reserve.user_data(user);
            if user_debt.total_debt().is_zero() {
                return Err(reason::CURRENCY_NOT_BORROWED_BY_USER);
            }
            let debt_decimals = debt_reserve.config.decimals;
            let debt_a_token = debt_reserve.tokens.a_token;

            let max_liquidatable = user_debt.total_debt() * U256::from(CLOSE_FACTOR_BPS) / U256::from(BPS);
            let actual_debt = debt_to_cover.min(max_liquidatable);

            let collateral_price = prices.get(&collateral_asset).copied().unwrap_or_default();
            let debt_price = prices.get(&debt_asset).copied().unwrap_or_default();
            let (seized, debt_needed) = collateral_to_seize(
                collateral_price,
                collateral_decimals,
                debt_price,
                debt_decimals,
                bonus_bps,
                actual_debt,
                user_collateral,
            )?;

            if !receive_a_token && state.tokens.balance(collateral_asset, collateral_a_token) < seized {
                return Err(reason::NOT_ENOUGH_LIQUIDITY_TO_LIQUIDATE);
            }

            state
                .tokens
                .transfer_from(debt_asset, pool, caller, debt_a_token, debt_needed)?;

            let debt_reserve = state.reserve_mut(debt_asset)?;
            if user_debt.current_variable_debt >= debt_needed {
                debit(&mut debt_reserve.variable_debt, user, debt_needed)?;
            } else {
                debit(&mut debt_reserve.variable_debt, user, user_debt.current_variable_debt)?;
                debit(
                    &mut debt_reserve.stable_debt,
                    user,
                    debt_needed - user_debt.current_variable_debt,
                )?;
            }

            let collateral = state.reserve_mut(collateral_asset)?;
            debit(&mut collateral.supplied, user, seized)?;
            if receive_a_token {
                credit(&mut collateral.supplied, caller, seized);
            } else {
                state
                    .tokens
                    .transfer(collateral_asset, collateral_a_token, caller, seized)?;
            }
            Ok((debt_needed, seized))
        })?;

        info!(
            liquidator = %caller,
            user = %user,
            debt_repaid = %repaid,
            collateral_seized = %seized,
            receive_a_token,
            "Liquidation applied"
        );
        Ok(receipt)
    }

    async fn set_pool_pause(&self, caller: Address, paused: bool) -> ProtocolResult<TxReceipt> {
        if caller != self.emergency_admin {
            warn!(caller = %caller, "Pause toggle rejected");
            return Err(ProtocolError::reverted(
                Operation::SetPoolPause,
                reason::CALLER_NOT_EMERGENCY_ADMIN,
            ));
        }
        let ((), receipt) = self.transact(Operation::SetPoolPause, |state| {
            state.paused = paused;
            Ok(())
        })?;
        info!(paused, "Pool pause state set");
        Ok(receipt)
    }

    async fn paused(&self) -> ProtocolResult<bool> {
        Ok(self.state.lock().paused)
    }

    async fn emergency_admin(&self) -> ProtocolResult<Address> {
        Ok(self.emergency_admin)
    }

    async fn flash_loan_premium_bps(&self) -> ProtocolResult<u64> {
        Ok(self.flash_loan_premium_bps)
    }

    async fn reserves_list(&self) -> ProtocolResult<Vec<Address>> {
        Ok(self.state.lock().reserves.keys().copied().collect())
    }

    async fn user_account_data(&self, user: Address) -> ProtocolResult<UserAccountData> {
        let prices = self.price_snapshot().await?;
        Ok(self.state.lock().account_data(user, &prices))
    }

    async fn reserve_data(&self, asset: Address) -> ProtocolResult<ReserveData> {
        let state = self.state.lock();
        let reserve = state
            .reserves
            .get(&asset)
            .ok_or(ProtocolError::UnknownReserve(asset))?;

        Ok(ReserveData {
            available_liquidity: state.tokens.balance(asset, reserve.tokens.a_token),
            total_stable_debt: reserve.stable_debt.values().fold(U256::ZERO, |acc, v| acc + *v),
            total_variable_debt: reserve.variable_debt.values().fold(U256::ZERO, |acc, v| acc + *v),
        })
    }

    async fn reserve_configuration(&self, asset: Address) -> ProtocolResult<ReserveConfiguration> {
        self.state
            .lock()
            .reserves
            .get(&asset)
            .map(|r| r.config.clone())
            .ok_or(ProtocolError::UnknownReserve(asset))
    }

    async fn user_reserve_data(
        &self,
        asset: Address,
        user: Address,
    ) -> ProtocolResult<UserReserveData> {
        self.state
            .lock()
            .reserves
            .get(&asset)
            .map(|r| r.user_data(user))
            .ok_or(ProtocolError::UnknownReserve(asset))
    }

    async fn reserve_tokens(&self, asset: Address) -> ProtocolResult<ReserveTokens> {
        self.state
            .lock()
            .reserves
            .get(&asset)
            .map(|r| r.tokens)
            .ok_or(ProtocolError::UnknownReserve(asset))
    }
}

#[async_trait]
impl TokenLedger for InMemoryLendingPool {
    async fn mint(&self, caller: Address, token: Address, amount: U256) -> ProtocolResult<TxReceipt> {
        self.ensure_listed(token)?;
        let ((), receipt) = self.transact(Operation::Mint, |state| {
            state.tokens.mint(token, caller, amount);
            Ok(())
        })?;
        debug!(to = %caller, token = %token, amount = %amount, "Minted");
        Ok(receipt)
    }

    async fn approve(
        &self,
        caller: Address,
        token: Address,
        spender: Address,
        amount: U256,
    ) -> ProtocolResult<TxReceipt> {
        let ((), receipt) = self.transact(Operation::Approve, |state| {
            state.tokens.approve(token, caller, spender, amount);
            Ok(())
        })?;
        Ok(receipt)
    }

    async fn balance_of(&self, token: Address, holder: Address) -> ProtocolResult<U256> {
        let state = self.state.lock();
        if state.reserves.contains_key(&token) {
            return Ok(state.tokens.balance(token, holder));
        }
        for reserve in state.reserves.values() {
            let data = reserve.user_data(holder);
            if token == reserve.tokens.a_token {
                return Ok(data.current_a_token_balance);
            }
            if token == reserve.tokens.stable_debt_token {
                return Ok(data.current_stable_debt);
            }
            if token == reserve.tokens.variable_debt_token {
                return Ok(data.current_variable_debt);
            }
        }
        Ok(state.tokens.balance(token, holder))
    }

    async fn symbol(&self, token: Address) -> ProtocolResult<String> {
        let state = self.state.lock();
        for (asset, reserve) in &state.reserves {
            if token == *asset {
                return Ok(reserve.symbol.clone());
            }
            if token == reserve.tokens.a_token {
                return Ok(format!("a{}", reserve.symbol));
            }
            if token == reserve.tokens.stable_debt_token {
                return Ok(format!("stableDebt{}", reserve.symbol));
            }
            if token == reserve.tokens.variable_debt_token {
                return Ok(format!("variableDebt{}", reserve.symbol));
            }
        }
        Err(ProtocolError::UnknownReserve(token))
    }
}
