//! Aave v2 deployment reached over JSON-RPC.
//!
//! Implements [`LendingPool`] and [`TokenLedger`] on top of the LendingPool,
//! AaveProtocolDataProvider, LendingPoolConfigurator and MintableERC20
//! contracts.

use super::{
    FlashLoanRequest, LendingPool, RateMode, ReserveConfiguration, ReserveData, ReserveTokens,
    TokenLedger, TxReceipt, UserAccountData, UserReserveData,
};
use crate::contracts::{
    ILendingPool, ILendingPoolAddressesProvider, ILendingPoolConfigurator, IMintableERC20,
    IProtocolDataProvider,
};
use crate::error::{Operation, ProtocolError, ProtocolResult};
use crate::provider::ProviderManager;
use alloy::primitives::{Address, U256};
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Addresses of the deployed protocol contracts.
#[derive(Debug, Clone, Copy)]
pub struct AaveV2Contracts {
    pub lending_pool: Address,
    pub data_provider: Address,
    pub configurator: Address,
    pub addresses_provider: Address,
}

/// Aave v2 pool handle.
#[derive(Debug, Clone)]
pub struct AaveV2Pool {
    contracts: AaveV2Contracts,
    provider: Arc<ProviderManager>,
}

fn transport<E>(e: E) -> ProtocolError
where
    E: std::error::Error + Send + Sync + 'static,
{
    ProtocolError::Transport(anyhow::Error::new(e))
}

impl AaveV2Pool {
    pub fn new(contracts: AaveV2Contracts, provider: Arc<ProviderManager>) -> Self {
        Self { contracts, provider }
    }

    pub fn contracts(&self) -> &AaveV2Contracts {
        &self.contracts
    }

    async fn send_pool(&self, operation: Operation, caller: Address, call: impl SolCall) -> ProtocolResult<TxReceipt> {
        self.provider
            .send(operation, caller, self.contracts.lending_pool, call.abi_encode())
            .await
    }
}

#[async_trait]
impl LendingPool for AaveV2Pool {
    fn address(&self) -> Address {
        self.contracts.lending_pool
    }

    async fn deposit(
        &self,
        caller: Address,
        asset: Address,
        amount: U256,
        on_behalf_of: Address,
        referral_code: u16,
    ) -> ProtocolResult<TxReceipt> {
        let call = ILendingPool::depositCall {
            asset,
            amount,
            onBehalfOf: on_behalf_of,
            referralCode: referral_code,
        };
        self.send_pool(Operation::Deposit, caller, call).await
    }

    async fn withdraw(
        &self,
        caller: Address,
        asset: Address,
        amount: U256,
        to: Address,
    ) -> ProtocolResult<TxReceipt> {
        let call = ILendingPool::withdrawCall { asset, amount, to };
        self.send_pool(Operation::Withdraw, caller, call).await
    }

    async fn borrow(
        &self,
        caller: Address,
        asset: Address,
        amount: U256,
        rate_mode: RateMode,
        referral_code: u16,
        on_behalf_of: Address,
    ) -> ProtocolResult<TxReceipt> {
        let call = ILendingPool::borrowCall {
            asset,
            amount,
            interestRateMode: U256::from(rate_mode.as_u8()),
            referralCode: referral_code,
            onBehalfOf: on_behalf_of,
        };
        self.send_pool(Operation::Borrow, caller, call).await
    }

    async fn repay(
        &self,
        caller: Address,
        asset: Address,
        amount: U256,
        rate_mode: RateMode,
        on_behalf_of: Address,
    ) -> ProtocolResult<TxReceipt> {
        let call = ILendingPool::repayCall {
            asset,
            amount,
            rateMode: U256::from(rate_mode.as_u8()),
            onBehalfOf: on_behalf_of,
        };
        self.send_pool(Operation::Repay, caller, call).await
    }

    async fn flash_loan(
        &self,
        caller: Address,
        request: FlashLoanRequest,
    ) -> ProtocolResult<TxReceipt> {
        let call = ILendingPool::flashLoanCall {
            receiverAddress: request.receiver,
            assets: request.assets.to_vec(),
            amounts: request.amounts.to_vec(),
            modes: request
                .modes
                .iter()
                .map(|m| U256::from(m.as_u8()))
                .collect(),
            onBehalfOf: request.on_behalf_of,
            params: request.params,
            referralCode: request.referral_code,
        };
        self.send_pool(Operation::FlashLoan, caller, call).await
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
        let call = ILendingPool::liquidationCallCall {
            collateralAsset: collateral_asset,
            debtAsset: debt_asset,
            user,
            debtToCover: debt_to_cover,
            receiveAToken: receive_a_token,
        };
        self.send_pool(Operation::LiquidationCall, caller, call).await
    }

    async fn set_pool_pause(&self, caller: Address, paused: bool) -> ProtocolResult<TxReceipt> {
        let call = ILendingPoolConfigurator::setPoolPauseCall { val: paused };
        self.provider
            .send(Operation::SetPoolPause, caller, self.contracts.configurator, call.abi_encode())
            .await
    }

    async fn paused(&self) -> ProtocolResult<bool> {
        let provider = self.provider.read_provider()?;
        let pool = ILendingPool::new(self.contracts.lending_pool, provider);
        Ok(pool.paused().call().await.map_err(transport)?._0)
    }

    async fn emergency_admin(&self) -> ProtocolResult<Address> {
        let provider = self.provider.read_provider()?;
        let addresses = ILendingPoolAddressesProvider::new(self.contracts.addresses_provider, provider);
        Ok(addresses.getEmergencyAdmin().call().await.map_err(transport)?._0)
    }

    async fn flash_loan_premium_bps(&self) -> ProtocolResult<u64> {
        let provider = self.provider.read_provider()?;
        let pool = ILendingPool::new(self.contracts.lending_pool, provider);
        let premium = pool.FLASHLOAN_PREMIUM_TOTAL().call().await.map_err(transport)?._0;
        Ok(premium.saturating_to::<u64>())
    }

    async fn reserves_list(&self) -> ProtocolResult<Vec<Address>> {
        let provider = self.provider.read_provider()?;
        let pool = ILendingPool::new(self.contracts.lending_pool, provider);
        Ok(pool.getReservesList().call().await.map_err(transport)?._0)
    }

    async fn user_account_data(&self, user: Address) -> ProtocolResult<UserAccountData> {
        let provider = self.provider.read_provider()?;
        let pool = ILendingPool::new(self.contracts.lending_pool, provider);
        let data = pool.getUserAccountData(user).call().await.map_err(transport)?;

        debug!(user = %user, health_factor = %data.healthFactor, "Fetched account data");

        Ok(UserAccountData {
            total_collateral: data.totalCollateralETH,
            total_debt: data.totalDebtETH,
            available_borrows: data.availableBorrowsETH,
            current_liquidation_threshold_bps: data.currentLiquidationThreshold.saturating_to::<u64>(),
            ltv_bps: data.ltv.saturating_to::<u64>(),
            health_factor: data.healthFactor,
        })
    }

    async fn reserve_data(&self, asset: Address) -> ProtocolResult<ReserveData> {
        let provider = self.provider.read_provider()?;
        let data_provider = IProtocolDataProvider::new(self.contracts.data_provider, provider);
        let data = data_provider.getReserveData(asset).call().await.map_err(transport)?;

        Ok(ReserveData {
            available_liquidity: data.availableLiquidity,
            total_stable_debt: data.totalStableDebt,
            total_variable_debt: data.totalVariableDebt,
        })
    }

    async fn reserve_configuration(&self, asset: Address) -> ProtocolResult<ReserveConfiguration> {
        let provider = self.provider.read_provider()?;
        let data_provider = IProtocolDataProvider::new(self.contracts.data_provider, provider);
        let data = data_provider
            .getReserveConfigurationData(asset)
            .call()
            .await
            .map_err(transport)?;

        if !data.isActive && data.decimals.is_zero() {
            return Err(ProtocolError::UnknownReserve(asset));
        }

        Ok(ReserveConfiguration {
            decimals: data.decimals.saturating_to::<u8>(),
            ltv_bps: data.ltv.saturating_to::<u64>(),
            liquidation_threshold_bps: data.liquidationThreshold.saturating_to::<u64>(),
            liquidation_bonus_bps: data.liquidationBonus.saturating_to::<u64>(),
            usage_as_collateral_enabled: data.usageAsCollateralEnabled,
            borrowing_enabled: data.borrowingEnabled,
            stable_borrow_rate_enabled: data.stableBorrowRateEnabled,
            is_active: data.isActive,
            is_frozen: data.isFrozen,
        })
    }

    async fn user_reserve_data(
        &self,
        asset: Address,
        user: Address,
    ) -> ProtocolResult<UserReserveData> {
        let provider = self.provider.read_provider()?;
        let data_provider = IProtocolDataProvider::new(self.contracts.data_provider, provider);
        let data = data_provider
            .getUserReserveData(asset, user)
            .call()
            .await
            .map_err(transport)?;

        Ok(UserReserveData {
            current_a_token_balance: data.currentATokenBalance,
            current_stable_debt: data.currentStableDebt,
            current_variable_debt: data.currentVariableDebt,
        })
    }

    async fn reserve_tokens(&self, asset: Address) -> ProtocolResult<ReserveTokens> {
        let provider = self.provider.read_provider()?;
        let data_provider = IProtocolDataProvider::new(self.contracts.data_provider, provider);
        let data = data_provider
            .getReserveTokensAddresses(asset)
            .call()
            .await
            .map_err(transport)?;

        if data.aTokenAddress.is_zero() {
            return Err(ProtocolError::UnknownReserve(asset));
        }

        Ok(ReserveTokens {
            a_token: data.aTokenAddress,
            stable_debt_token: data.stableDebtTokenAddress,
            variable_debt_token: data.variableDebtTokenAddress,
        })
    }
}

#[async_trait]
impl TokenLedger for AaveV2Pool {
    async fn mint(&self, caller: Address, token: Address, amount: U256) -> ProtocolResult<TxReceipt> {
        let call = IMintableERC20::mintCall { value: amount };
        self.provider
            .send(Operation::Mint, caller, token, call.abi_encode())
            .await
    }

    async fn approve(
        &self,
        caller: Address,
        token: Address,
        spender: Address,
        amount: U256,
    ) -> ProtocolResult<TxReceipt> {
        let call = IMintableERC20::approveCall { spender, amount };
        self.provider
            .send(Operation::Approve, caller, token, call.abi_encode())
            .await
    }

    async fn balance_of(&self, token: Address, holder: Address) -> ProtocolResult<U256> {
        let provider = self.provider.read_provider()?;
        let erc20 = IMintableERC20::new(token, provider);
        Ok(erc20.balanceOf(holder).call().await.map_err(transport)?._0)
    }

    async fn symbol(&self, token: Address) -> ProtocolResult<String> {
        let provider = self.provider.read_provider()?;
        let erc20 = IMintableERC20::new(token, provider);
        Ok(erc20.symbol().call().await.map_err(transport)?._0)
    }
}
