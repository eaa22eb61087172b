//! One method per scenario state.

use alloy::primitives::{Address, U256};
use scenario_chain::{FlashLoanRequest, RateMode};
use tracing::{info, instrument, warn};

use super::{Scenario, State};
use crate::assets::Asset;
use crate::error::{AtStep, ScenarioError, ScenarioResult};
use crate::position::{Position, RecomputedPosition};
use crate::u256_math::{self, format_units, WAD};

impl Scenario {
    /// (role, participant, asset, amount) of the two opening deposits.
    fn opening_deposits(&self) -> [(&'static str, Address, Asset, U256); 2] {
        [
            (
                "first_user",
                self.participants.first_user,
                self.plan.first.clone(),
                self.plan.first_deposit,
            ),
            (
                "second_user",
                self.participants.second_user,
                self.plan.second.clone(),
                self.plan.second_deposit,
            ),
        ]
    }

    async fn debt_of(&self, step: State, asset: Address, user: Address, mode: RateMode) -> ScenarioResult<U256> {
        Ok(self.pool.user_reserve_data(asset, user).await.at(step)?.debt(mode))
    }

    async fn liquidity_of(&self, step: State, asset: Address) -> ScenarioResult<U256> {
        Ok(self.pool.reserve_data(asset).await.at(step)?.available_liquidity)
    }

    async fn recompute(&self, step: State, user: Address) -> ScenarioResult<RecomputedPosition> {
        RecomputedPosition::compute(self.pool.as_ref(), self.oracle.as_ref(), &self.registry, user)
            .await
            .at(step)
    }

    /// Protocol-reported borrow capacity against the recomputed one.
    async fn cross_check_capacity(&mut self, step: State, role: &str, user: Address) -> ScenarioResult<Position> {
        let account = Position::fetch(self.pool.as_ref(), user).await.at(step)?;
        let recomputed = self.recompute(step, user).await?;
        self.report.check_amount(
            step,
            format!("{} available borrows", role),
            recomputed.available_borrows(),
            account.available_borrows,
            self.plan.tolerance.value,
        );
        Ok(account)
    }

    #[instrument(skip(self))]
    pub(super) async fn unpause(&mut self) -> ScenarioResult<State> {
        let step = State::Unpause;
        let admin = self.participants.admin;

        let was_paused = self.pool.paused().await.at(step)?;
        let receipt = self.pool.set_pool_pause(admin, false).await.at(step)?;
        self.record(step, admin, &receipt);

        if self.pool.paused().await.at(step)? {
            return Err(ScenarioError::precondition(step, "pool still reports paused"));
        }
        info!(was_paused, admin = %admin, "Pool unpaused");
        Ok(State::FundAndApprove)
    }

    #[instrument(skip(self))]
    pub(super) async fn fund_and_approve(&mut self) -> ScenarioResult<State> {
        let step = State::FundAndApprove;
        let spender = self.pool.address();

        for (role, user, asset, amount) in self.opening_deposits() {
            let before = self.balance(step, asset.address, user).await?;

            let receipt = self.ledger.mint(user, asset.address, amount).await.at(step)?;
            self.record(step, user, &receipt);
            let receipt = self.ledger.approve(user, asset.address, spender, amount).await.at(step)?;
            self.record(step, user, &receipt);

            let after = self.balance(step, asset.address, user).await?;
            self.report.check_amount(
                step,
                format!("{} {} minted", role, asset.symbol),
                before + amount,
                after,
                self.plan.tolerance.amount,
            );
            if after < amount {
                return Err(ScenarioError::precondition(
                    step,
                    format!("{} holds {} {}, cannot deposit {}", role, format_units(after, asset.decimals), asset.symbol, format_units(amount, asset.decimals)),
                ));
            }
            info!(participant = role, symbol = %asset.symbol, amount = %format_units(amount, asset.decimals), "Funded and approved");
        }
        Ok(State::Deposit)
    }

    #[instrument(skip(self))]
    pub(super) async fn deposit(&mut self) -> ScenarioResult<State> {
        let step = State::Deposit;
        let tolerance = self.plan.tolerance.amount;

        for (index, (role, user, asset, amount)) in self.opening_deposits().into_iter().enumerate() {
            let a_token = self.a_token(step, asset.address).await?;
            let before = self.balance(step, asset.address, user).await?;
            let receipt_before = self.balance(step, a_token, user).await?;
            if index == 0 {
                self.memo.first_pre_deposit = before;
            } else {
                self.memo.second_pre_deposit = before;
            }

            let receipt = self
                .pool
                .deposit(user, asset.address, amount, user, self.plan.referral_code)
                .await
                .at(step)?;
            self.record(step, user, &receipt);

            let after = self.balance(step, asset.address, user).await?;
            let receipt_after = self.balance(step, a_token, user).await?;
            self.report.check_amount(
                step,
                format!("{} {} debited", role, asset.symbol),
                before.saturating_sub(amount),
                after,
                tolerance,
            );
            self.report.check_amount(
                step,
                format!("{} a{} credited", role, asset.symbol),
                receipt_before + amount,
                receipt_after,
                tolerance,
            );
        }
        Ok(State::Borrow)
    }

    #[instrument(skip(self))]
    pub(super) async fn borrow(&mut self) -> ScenarioResult<State> {
        let step = State::Borrow;
        let user = self.participants.first_user;
        let asset = self.plan.second.clone();
        let amount = self.plan.borrow;
        let mode = self.plan.borrow_rate_mode;
        let tolerance = self.plan.tolerance.amount;

        let account = self.cross_check_capacity(step, "first_user", user).await?;
        let price = self.oracle.get_asset_price(asset.address).await.at(step)?;
        let value = u256_math::asset_value(amount, price, asset.decimals);
        if value > account.available_borrows {
            return Err(ScenarioError::precondition(
                step,
                format!("borrowing {} {} needs {} of capacity, {} available", format_units(amount, asset.decimals), asset.symbol, value, account.available_borrows),
            ));
        }

        let balance_before = self.balance(step, asset.address, user).await?;
        let liquidity_before = self.liquidity_of(step, asset.address).await?;
        let debt_before = self.debt_of(step, asset.address, user, mode).await?;
        self.memo.pre_borrow_balance = balance_before;

        let receipt = self
            .pool
            .borrow(user, asset.address, amount, mode, self.plan.referral_code, user)
            .await
            .at(step)?;
        self.record(step, user, &receipt);

        let balance_after = self.balance(step, asset.address, user).await?;
        let liquidity_after = self.liquidity_of(step, asset.address).await?;
        let debt_after = self.debt_of(step, asset.address, user, mode).await?;
        self.report.check_amount(step, "borrowed amount received", balance_before + amount, balance_after, tolerance);
        self.report.check_amount(
            step,
            "available liquidity reduced by borrow",
            liquidity_before.saturating_sub(amount),
            liquidity_after,
            tolerance,
        );
        self.report.check_amount(step, "debt opened", debt_before + amount, debt_after, tolerance);

        let position = Position::fetch(self.pool.as_ref(), user).await.at(step)?;
        info!(
            symbol = %asset.symbol,
            amount = %format_units(amount, asset.decimals),
            mode = %mode,
            health_factor = position.health_factor_f64(),
            "Borrowed"
        );
        Ok(State::Repay)
    }

    #[instrument(skip(self))]
    pub(super) async fn repay(&mut self) -> ScenarioResult<State> {
        let step = State::Repay;
        let user = self.participants.first_user;
        let asset = self.plan.second.clone();
        let amount = self.plan.repay;
        let mode = self.plan.borrow_rate_mode;
        let tolerance = self.plan.tolerance.amount;

        let debt_before = self.debt_of(step, asset.address, user, mode).await?;
        if debt_before.is_zero() {
            return Err(ScenarioError::precondition(step, format!("no {} debt to repay", mode)));
        }
        let payback = amount.min(debt_before);

        let receipt = self
            .ledger
            .approve(user, asset.address, self.pool.address(), amount)
            .await
            .at(step)?;
        self.record(step, user, &receipt);

        let balance_before = self.balance(step, asset.address, user).await?;
        let receipt = self
            .pool
            .repay(user, asset.address, amount, mode, user)
            .await
            .at(step)?;
        self.record(step, user, &receipt);

        let debt_after = self.debt_of(step, asset.address, user, mode).await?;
        let balance_after = self.balance(step, asset.address, user).await?;
        self.report.check_amount(step, "debt reduced by capped repayment", debt_before - payback, debt_after, tolerance);
        self.report.check_amount(
            step,
            "repayment debited",
            balance_before.saturating_sub(payback),
            balance_after,
            tolerance,
        );
        if debt_after.is_zero() {
            self.report.check_amount(
                step,
                format!("first_user {} back to pre-borrow balance", asset.symbol),
                self.memo.pre_borrow_balance,
                balance_after,
                tolerance,
            );
        }

        info!(
            symbol = %asset.symbol,
            repaid = %format_units(payback, asset.decimals),
            remaining = %format_units(debt_after, asset.decimals),
            "Repaid"
        );
        Ok(State::FlashLoan)
    }

    #[instrument(skip(self))]
    pub(super) async fn flash_loan(&mut self) -> ScenarioResult<State> {
        let step = State::FlashLoan;
        let initiator = self.participants.first_user;
        let asset = self.plan.second.clone();
        let mode = self.plan.flash_mode;

        let before = self.liquidity_of(step, asset.address).await?;
        if before.is_zero() {
            return Err(ScenarioError::precondition(step, format!("{} reserve has no liquidity to flash-borrow", asset.symbol)));
        }
        let premium_bps = self.pool.flash_loan_premium_bps().await.at(step)?;
        let premium = u256_math::mul_bps(before, premium_bps);

        let request = FlashLoanRequest::single(self.flash_receiver, asset.address, before, self.plan.flash_params.clone())
            .with_mode(mode)
            .with_referral_code(self.plan.referral_code);
        let receipt = self.pool.flash_loan(initiator, request).await.at(step)?;
        self.record(step, initiator, &receipt);

        let after = self.liquidity_of(step, asset.address).await?;
        let expected = match mode {
            RateMode::None => before + premium,
            // borrowed funds stay with the receiver as debt
            RateMode::Stable | RateMode::Variable => U256::ZERO,
        };
        self.report.check_amount(
            step,
            "available liquidity after flash loan",
            expected,
            after,
            self.plan.tolerance.amount,
        );

        info!(
            symbol = %asset.symbol,
            amount = %format_units(before, asset.decimals),
            premium = %format_units(premium, asset.decimals),
            "Flash loan returned"
        );
        Ok(State::Withdraw)
    }

    #[instrument(skip(self))]
    pub(super) async fn withdraw(&mut self) -> ScenarioResult<State> {
        let step = State::Withdraw;
        let tolerance = self.plan.tolerance.amount;

        for (index, (role, user, asset, _)) in self.opening_deposits().into_iter().enumerate() {
            let a_token = self.a_token(step, asset.address).await?;
            let receipt_before = self.balance(step, a_token, user).await?;
            if receipt_before.is_zero() {
                return Err(ScenarioError::precondition(step, format!("{} has no a{} to withdraw", role, asset.symbol)));
            }
            let before = self.balance(step, asset.address, user).await?;

            let receipt = self
                .pool
                .withdraw(user, asset.address, U256::MAX, user)
                .await
                .at(step)?;
            self.record(step, user, &receipt);

            let receipt_after = self.balance(step, a_token, user).await?;
            let after = self.balance(step, asset.address, user).await?;
            self.report.check_amount(step, format!("{} a{} burned", role, asset.symbol), U256::ZERO, receipt_after, tolerance);
            self.report.check_amount(
                step,
                format!("{} {} withdrawn", role, asset.symbol),
                before + receipt_before,
                after,
                tolerance,
            );

            // only the second reserve was borrowed from and flash-loaned
            if index == 0 {
                self.report.check_amount(
                    step,
                    format!("{} {} round trip", role, asset.symbol),
                    self.memo.first_pre_deposit,
                    after,
                    tolerance,
                );
            } else {
                self.report.check_that(
                    step,
                    format!("{} {} principal preserved", role, asset.symbol),
                    after >= self.memo.second_pre_deposit,
                    after.to_string(),
                );
            }
        }
        Ok(State::OpenRiskyPosition)
    }

    #[instrument(skip(self))]
    pub(super) async fn open_risky_position(&mut self) -> ScenarioResult<State> {
        let step = State::OpenRiskyPosition;
        let spender = self.pool.address();
        let debt = self.plan.debt.clone();
        let collateral = self.plan.collateral.clone();
        let borrower = self.participants.borrower;
        let depositor = self.participants.depositor;
        let mode = self.plan.liquidation_rate_mode;

        let fundings = [
            (depositor, debt.address, self.plan.depositor_liquidity),
            (self.participants.liquidator, debt.address, self.plan.liquidator_funds),
            (borrower, collateral.address, self.plan.borrower_collateral),
        ];
        for (user, token, amount) in fundings {
            let receipt = self.ledger.mint(user, token, amount).await.at(step)?;
            self.record(step, user, &receipt);
            let receipt = self.ledger.approve(user, token, spender, amount).await.at(step)?;
            self.record(step, user, &receipt);
        }

        for (user, token, amount) in [
            (depositor, debt.address, self.plan.depositor_liquidity),
            (borrower, collateral.address, self.plan.borrower_collateral),
        ] {
            let receipt = self
                .pool
                .deposit(user, token, amount, user, self.plan.referral_code)
                .await
                .at(step)?;
            self.record(step, user, &receipt);
        }

        let account = self.cross_check_capacity(step, "borrower", borrower).await?;
        let price = self.oracle.get_asset_price(debt.address).await.at(step)?;
        let amount = u256_math::borrow_amount_for_capacity(
            account.available_borrows,
            price,
            debt.decimals,
            self.plan.borrow_utilization_bps,
        );
        if amount.is_zero() {
            return Err(ScenarioError::precondition(step, "borrower has no borrow capacity"));
        }

        let debt_before = self.debt_of(step, debt.address, borrower, mode).await?;
        let receipt = self
            .pool
            .borrow(borrower, debt.address, amount, mode, self.plan.referral_code, borrower)
            .await
            .at(step)?;
        self.record(step, borrower, &receipt);

        let debt_after = self.debt_of(step, debt.address, borrower, mode).await?;
        self.report.check_amount(step, "borrower debt opened", debt_before + amount, debt_after, self.plan.tolerance.amount);

        let position = Position::fetch(self.pool.as_ref(), borrower).await.at(step)?;
        info!(
            symbol = %debt.symbol,
            amount = %format_units(amount, debt.decimals),
            mode = %mode,
            health_factor = position.health_factor_f64(),
            "Risky position opened"
        );
        Ok(State::PriceShock)
    }

    #[instrument(skip(self))]
    pub(super) async fn price_shock(&mut self) -> ScenarioResult<State> {
        let step = State::PriceShock;
        let borrower = self.participants.borrower;
        let admin = self.participants.admin;
        let debt = self.plan.debt.clone();

        let before = self.recompute(step, borrower).await?;
        let hf_before = before.health_factor();
        self.report.check_that(step, "health factor healthy before shock", hf_before >= WAD, hf_before.to_string());
        if before.is_liquidatable() {
            return Err(ScenarioError::precondition(
                step,
                format!("position already liquidatable before the shock (hf {:.4})", u256_math::wad_to_f64(hf_before)),
            ));
        }

        let price = self.oracle.get_asset_price(debt.address).await.at(step)?;
        let shocked = u256_math::mul_bps(price, self.plan.price_shock_bps);
        let receipt = self.oracle.set_asset_price(admin, debt.address, shocked).await.at(step)?;
        self.record(step, admin, &receipt);

        let reread = self.oracle.get_asset_price(debt.address).await.at(step)?;
        self.report.check_amount(step, "shocked price visible", shocked, reread, U256::ZERO);

        let after = self.recompute(step, borrower).await?;
        let protocol = Position::fetch(self.pool.as_ref(), borrower).await.at(step)?;
        self.report.check_that(
            step,
            "collateral x threshold below debt after shock",
            after.adjusted_collateral < after.debt_value,
            format!("{} < {}", after.adjusted_collateral, after.debt_value),
        );
        self.report.check_amount(
            step,
            "health factor matches recomputation",
            after.health_factor(),
            protocol.health_factor,
            self.plan.tolerance.health_factor,
        );
        self.report.check_that(
            step,
            "protocol reports position liquidatable",
            protocol.is_liquidatable(),
            protocol.health_factor.to_string(),
        );

        let hf_after = u256_math::wad_to_f64(after.health_factor());
        if !after.is_liquidatable() {
            return Err(ScenarioError::precondition(
                step,
                format!("health factor {:.4} not below 1 after the price shock", hf_after),
            ));
        }

        info!(
            symbol = %debt.symbol,
            old_price = %price,
            new_price = %shocked,
            hf_before = u256_math::wad_to_f64(hf_before),
            hf_after,
            "Price shocked"
        );
        Ok(State::Liquidation)
    }

    #[instrument(skip(self))]
    pub(super) async fn liquidation(&mut self) -> ScenarioResult<State> {
        let step = State::Liquidation;
        let borrower = self.participants.borrower;
        let liquidator = self.participants.liquidator;
        let debt = self.plan.debt.clone();
        let collateral = self.plan.collateral.clone();
        let mode = self.plan.liquidation_rate_mode;
        let receive_a_token = self.plan.receive_a_token;
        let tolerance = self.plan.tolerance;

        let outstanding = self.debt_of(step, debt.address, borrower, mode).await?;
        let debt_to_cover = u256_math::mul_bps(outstanding, self.plan.close_factor_bps);
        if debt_to_cover.is_zero() {
            return Err(ScenarioError::precondition(step, format!("borrower has no {} debt", mode)));
        }
        if debt_to_cover > self.plan.liquidator_funds {
            return Err(ScenarioError::precondition(
                step,
                format!("liquidator allowance {} below debt to cover {}", self.plan.liquidator_funds, debt_to_cover),
            ));
        }
        let liquidator_debt_before = self.balance(step, debt.address, liquidator).await?;
        if liquidator_debt_before < debt_to_cover {
            return Err(ScenarioError::precondition(
                step,
                format!("liquidator holds {} {}, needs {}", format_units(liquidator_debt_before, debt.decimals), debt.symbol, format_units(debt_to_cover, debt.decimals)),
            ));
        }

        // prices and bonus are re-read right before the call
        let debt_price = self.oracle.get_asset_price(debt.address).await.at(step)?;
        let collateral_price = self.oracle.get_asset_price(collateral.address).await.at(step)?;
        let bonus_bps = self
            .pool
            .reserve_configuration(collateral.address)
            .await
            .at(step)?
            .liquidation_bonus_bps;
        let borrower_collateral = self
            .pool
            .user_reserve_data(collateral.address, borrower)
            .await
            .at(step)?
            .current_a_token_balance;

        let uncapped = u256_math::expected_seized_collateral(
            debt_price,
            debt_to_cover,
            debt.decimals,
            collateral_price,
            collateral.decimals,
            bonus_bps,
        );
        let capped = uncapped > borrower_collateral;
        let expected_seized = uncapped.min(borrower_collateral);

        let seized_token = if receive_a_token {
            self.a_token(step, collateral.address).await?
        } else {
            collateral.address
        };
        let seized_before = self.balance(step, seized_token, liquidator).await?;

        let receipt = self
            .pool
            .liquidation_call(liquidator, collateral.address, debt.address, borrower, debt_to_cover, receive_a_token)
            .await
            .at(step)?;
        self.record(step, liquidator, &receipt);

        let seized = self
            .balance(step, seized_token, liquidator)
            .await?
            .saturating_sub(seized_before);
        self.report.check_amount(step, "seized collateral", expected_seized, seized, tolerance.seized);

        let borrower_collateral_after = self
            .pool
            .user_reserve_data(collateral.address, borrower)
            .await
            .at(step)?
            .current_a_token_balance;
        self.report.check_amount(
            step,
            "borrower collateral reduced by seized amount",
            borrower_collateral.saturating_sub(seized),
            borrower_collateral_after,
            tolerance.amount,
        );

        if capped {
            warn!(
                expected = %uncapped,
                available = %borrower_collateral,
                "Seize capped by borrower collateral, debt repaid is below debt to cover"
            );
        } else {
            let liquidator_debt_after = self.balance(step, debt.address, liquidator).await?;
            let outstanding_after = self.debt_of(step, debt.address, borrower, mode).await?;
            self.report.check_amount(
                step,
                "liquidator paid debt to cover",
                liquidator_debt_before - debt_to_cover,
                liquidator_debt_after,
                tolerance.amount,
            );
            self.report.check_amount(
                step,
                "borrower debt reduced",
                outstanding - debt_to_cover,
                outstanding_after,
                tolerance.amount,
            );
        }

        let position = Position::fetch(self.pool.as_ref(), borrower).await.at(step)?;
        info!(
            repaid = %format_units(debt_to_cover, debt.decimals),
            debt_symbol = %debt.symbol,
            seized = %format_units(seized, collateral.decimals),
            collateral_symbol = %collateral.symbol,
            receive_a_token,
            health_factor = position.health_factor_f64(),
            "Liquidated"
        );
        Ok(State::Completed)
    }
}
