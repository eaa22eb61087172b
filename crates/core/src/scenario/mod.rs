//! Scenario state machine.
//!
//! A fixed script of lending operations across several participants:
//!
//! `Unpause → FundAndApprove → Deposit → Borrow → Repay → FlashLoan →
//! Withdraw → OpenRiskyPosition → PriceShock → Liquidation → Completed`
//!
//! Each state is one method returning the next state. Any failed call or
//! violated precondition aborts the run with the state attached; there is
//! no retry and no branching. Outcome mismatches do not abort: they are
//! recorded as failed checks in the [`ScenarioReport`].
//!
//! # Example
//!
//! ```rust,ignore
//! let mut scenario = Scenario::prepare(pool, ledger, oracle, &config, participants, receiver).await?;
//! let outcome = scenario.run().await;
//! scenario.report().write_to(&config.scenario.report_path)?;
//! ```

mod plan;
mod steps;

pub use plan::{ScenarioPlan, Tolerances};

use alloy::primitives::{Address, U256};
use scenario_chain::{LendingPool, PriceSource, TokenLedger, TxReceipt};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::assets::AssetRegistry;
use crate::config::{simulated_address, ScenarioConfig, PARTICIPANT_COUNT};
use crate::error::{AtStep, ScenarioError, ScenarioResult};
use crate::report::ScenarioReport;
use crate::u256_math::format_units;

/// Scenario states in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    Unpause,
    FundAndApprove,
    Deposit,
    Borrow,
    Repay,
    FlashLoan,
    Withdraw,
    OpenRiskyPosition,
    PriceShock,
    Liquidation,
    Completed,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unpause => "unpause",
            Self::FundAndApprove => "fund_and_approve",
            Self::Deposit => "deposit",
            Self::Borrow => "borrow",
            Self::Repay => "repay",
            Self::FlashLoan => "flash_loan",
            Self::Withdraw => "withdraw",
            Self::OpenRiskyPosition => "open_risky_position",
            Self::PriceShock => "price_shock",
            Self::Liquidation => "liquidation",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Acting accounts. The admin is the pool's emergency admin and also sets
/// oracle prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Participants {
    pub admin: Address,
    pub first_user: Address,
    pub second_user: Address,
    pub depositor: Address,
    pub borrower: Address,
    pub liquidator: Address,
}

impl Participants {
    /// Signer addresses in key order: first user, second user, depositor,
    /// borrower, liquidator.
    pub fn from_signers(addresses: &[Address], admin: Address) -> ScenarioResult<Self> {
        if addresses.len() < PARTICIPANT_COUNT {
            return Err(ScenarioError::Config(format!(
                "{} participant signers required, got {}",
                PARTICIPANT_COUNT,
                addresses.len()
            )));
        }
        Ok(Self {
            admin,
            first_user: addresses[0],
            second_user: addresses[1],
            depositor: addresses[2],
            borrower: addresses[3],
            liquidator: addresses[4],
        })
    }

    /// Deterministic accounts for the in-memory backend.
    pub fn simulated() -> Self {
        Self {
            admin: simulated_address("participant:admin"),
            first_user: simulated_address("participant:user1"),
            second_user: simulated_address("participant:user2"),
            depositor: simulated_address("participant:depositor"),
            borrower: simulated_address("participant:borrower"),
            liquidator: simulated_address("participant:liquidator"),
        }
    }

    pub fn named(&self) -> [(&'static str, Address); 6] {
        [
            ("admin", self.admin),
            ("first_user", self.first_user),
            ("second_user", self.second_user),
            ("depositor", self.depositor),
            ("borrower", self.borrower),
            ("liquidator", self.liquidator),
        ]
    }
}

/// Balances carried between states.
#[derive(Debug, Default)]
struct RunMemo {
    first_pre_deposit: U256,
    second_pre_deposit: U256,
    pre_borrow_balance: U256,
}

/// One scenario run against injected collaborators.
pub struct Scenario {
    pool: Arc<dyn LendingPool>,
    ledger: Arc<dyn TokenLedger>,
    oracle: Arc<dyn PriceSource>,
    registry: AssetRegistry,
    plan: ScenarioPlan,
    participants: Participants,
    flash_receiver: Address,
    report: ScenarioReport,
    memo: RunMemo,
}

impl fmt::Debug for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scenario")
            .field("pool", &self.pool.address())
            .field("assets", &self.registry.len())
            .field("participants", &self.participants)
            .field("reached", &self.report.reached)
            .finish()
    }
}

impl Scenario {
    pub fn new(
        pool: Arc<dyn LendingPool>,
        ledger: Arc<dyn TokenLedger>,
        oracle: Arc<dyn PriceSource>,
        registry: AssetRegistry,
        plan: ScenarioPlan,
        participants: Participants,
        flash_receiver: Address,
    ) -> Self {
        Self {
            pool,
            ledger,
            oracle,
            registry,
            plan,
            participants,
            flash_receiver,
            report: ScenarioReport::new(),
            memo: RunMemo::default(),
        }
    }

    /// Discover the listed reserves and resolve `config` against them.
    pub async fn prepare(
        pool: Arc<dyn LendingPool>,
        ledger: Arc<dyn TokenLedger>,
        oracle: Arc<dyn PriceSource>,
        config: &ScenarioConfig,
        participants: Participants,
        flash_receiver: Address,
    ) -> ScenarioResult<Self> {
        let registry = AssetRegistry::discover(pool.as_ref(), ledger.as_ref())
            .await
            .at(State::Unpause)?;
        let plan = ScenarioPlan::from_config(config, &registry)?;
        info!(
            reserves = registry.len(),
            first = %plan.first.symbol,
            second = %plan.second.symbol,
            collateral = %plan.collateral.symbol,
            debt = %plan.debt.symbol,
            "Scenario prepared"
        );
        Ok(Self::new(pool, ledger, oracle, registry, plan, participants, flash_receiver))
    }

    pub fn plan(&self) -> &ScenarioPlan {
        &self.plan
    }

    pub fn registry(&self) -> &AssetRegistry {
        &self.registry
    }

    pub fn participants(&self) -> &Participants {
        &self.participants
    }

    pub fn report(&self) -> &ScenarioReport {
        &self.report
    }

    pub fn report_mut(&mut self) -> &mut ScenarioReport {
        &mut self.report
    }

    pub fn into_report(self) -> ScenarioReport {
        self.report
    }

    /// Drive every state to completion or to the first failure. The report
    /// is finished either way.
    pub async fn run(&mut self) -> ScenarioResult<()> {
        let mut state = State::Unpause;
        info!(pool = %self.pool.address(), "Scenario started");

        loop {
            if state == State::Completed {
                self.report.finish(state, None);
                info!(
                    actions = self.report.actions.len(),
                    checks = self.report.checks.len(),
                    failed = self.report.failed_checks().count(),
                    "Scenario completed"
                );
                return Ok(());
            }

            match self.step(state).await {
                Ok(next) => {
                    debug!(from = %state, to = %next, "State complete");
                    if let Err(e) = self.log_balances(state).await {
                        warn!(step = %state, error = %e, "Balance report unavailable");
                    }
                    state = next;
                }
                Err(e) => {
                    error!(step = %state, error = %e, "Scenario aborted");
                    self.report.finish(state, Some(e.to_string()));
                    return Err(e);
                }
            }
        }
    }

    async fn step(&mut self, state: State) -> ScenarioResult<State> {
        match state {
            State::Unpause => self.unpause().await,
            State::FundAndApprove => self.fund_and_approve().await,
            State::Deposit => self.deposit().await,
            State::Borrow => self.borrow().await,
            State::Repay => self.repay().await,
            State::FlashLoan => self.flash_loan().await,
            State::Withdraw => self.withdraw().await,
            State::OpenRiskyPosition => self.open_risky_position().await,
            State::PriceShock => self.price_shock().await,
            State::Liquidation => self.liquidation().await,
            State::Completed => Ok(State::Completed),
        }
    }

    fn record(&mut self, step: State, participant: Address, receipt: &TxReceipt) {
        debug!(
            step = %step,
            operation = %receipt.operation,
            tx = %receipt.hash,
            gas_used = receipt.gas_used,
            "Transaction confirmed"
        );
        self.report.record_action(step, participant, receipt);
    }

    async fn balance(&self, step: State, token: Address, holder: Address) -> ScenarioResult<U256> {
        self.ledger.balance_of(token, holder).await.at(step)
    }

    async fn a_token(&self, step: State, asset: Address) -> ScenarioResult<Address> {
        Ok(self.pool.reserve_tokens(asset).await.at(step)?.a_token)
    }

    /// Participant balances and pool liquidity, in whole tokens.
    async fn log_balances(&self, step: State) -> ScenarioResult<()> {
        for asset in self.plan.assets() {
            for (role, address) in self.participants.named() {
                let balance = self.balance(step, asset.address, address).await?;
                if !balance.is_zero() {
                    debug!(
                        step = %step,
                        participant = role,
                        symbol = %asset.symbol,
                        balance = %format_units(balance, asset.decimals),
                        "Balance"
                    );
                }
            }
            let reserve = self.pool.reserve_data(asset.address).await.at(step)?;
            info!(
                step = %step,
                symbol = %asset.symbol,
                liquidity = %format_units(reserve.available_liquidity, asset.decimals),
                stable_debt = %format_units(reserve.total_stable_debt, asset.decimals),
                variable_debt = %format_units(reserve.total_variable_debt, asset.decimals),
                "Pool reserve"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulatedMarket;
    use crate::u256_math::WAD;
    use scenario_chain::{Operation, ProtocolError, RateMode};

    async fn simulated(config: &ScenarioConfig) -> (Scenario, SimulatedMarket) {
        let participants = Participants::simulated();
        let market = config
            .market
            .build(participants.admin, config.scenario.quote_currency)
            .unwrap();
        let scenario = Scenario::prepare(
            market.pool.clone(),
            market.pool.clone(),
            market.oracle.clone(),
            config,
            participants,
            market.flash_receiver,
        )
        .await
        .unwrap();
        (scenario, market)
    }

    fn check<'a>(report: &'a ScenarioReport, name: &str) -> &'a crate::report::Check {
        report
            .checks
            .iter()
            .find(|c| c.name == name)
            .unwrap_or_else(|| panic!("no check named {:?}", name))
    }

    #[test]
    fn test_state_names() {
        assert_eq!(State::FundAndApprove.to_string(), "fund_and_approve");
        assert_eq!(serde_json::to_string(&State::PriceShock).unwrap(), "\"price_shock\"");
    }

    #[test]
    fn test_participants_need_five_signers() {
        let addresses: Vec<Address> = (1..=4).map(Address::with_last_byte).collect();
        assert!(Participants::from_signers(&addresses, Address::ZERO).is_err());

        let addresses: Vec<Address> = (1..=5).map(Address::with_last_byte).collect();
        let participants = Participants::from_signers(&addresses, Address::ZERO).unwrap();
        assert_eq!(participants.liquidator, Address::with_last_byte(5));
    }

    #[tokio::test]
    async fn test_full_run_is_correct() {
        let config = ScenarioConfig::default();
        let (mut scenario, _market) = simulated(&config).await;

        scenario.run().await.unwrap();
        let report = scenario.report();

        assert!(report.completed);
        assert_eq!(report.reached, State::Completed);
        assert!(
            report.is_correct(),
            "failed checks: {:?}",
            report.failed_checks().collect::<Vec<_>>()
        );
        let last = report.actions.last().unwrap();
        assert_eq!(last.name, Operation::LiquidationCall.as_str());
        assert_eq!(last.participant, scenario.participants().liquidator);
    }

    #[tokio::test]
    async fn test_seized_collateral_matches_formula_exactly() {
        let config = ScenarioConfig::default();
        let (mut scenario, _market) = simulated(&config).await;
        scenario.run().await.unwrap();

        let seized = check(scenario.report(), "seized collateral");
        assert!(seized.passed);
        assert_eq!(seized.expected, seized.actual);
        assert_ne!(seized.actual, "0");
    }

    #[tokio::test]
    async fn test_price_shock_breaks_health_factor() {
        let config = ScenarioConfig::default();
        let (mut scenario, market) = simulated(&config).await;
        scenario.run().await.unwrap();

        assert!(check(scenario.report(), "collateral x threshold below debt after shock").passed);

        // liquidation repaid half the debt; the shocked price is still in place
        let usdc = market.assets["USDC"];
        let price = market.oracle.get_asset_price(usdc).await.unwrap();
        assert_eq!(price, U256::from(6_550_282_188_800_000u64));
        let borrower = scenario.participants().borrower;
        let account = market.pool.user_account_data(borrower).await.unwrap();
        assert!(account.health_factor > U256::ZERO && account.health_factor != U256::MAX);
    }

    #[tokio::test]
    async fn test_flash_loan_with_premium_is_net_zero_plus_premium() {
        let config = ScenarioConfig::testing();
        let (mut scenario, market) = simulated(&config).await;
        scenario.run().await.unwrap();

        let liquidity = check(scenario.report(), "available liquidity after flash loan");
        assert!(liquidity.passed);

        // 10 USDT borrowed, 9 bps premium left in the reserve after withdrawals
        let usdt = market.assets["USDT"];
        let reserve = market.pool.reserve_data(usdt).await.unwrap();
        assert_eq!(reserve.available_liquidity, U256::from(9_000u64));
    }

    #[tokio::test]
    async fn test_failed_receiver_aborts_without_effects() {
        let config = ScenarioConfig::default();
        let (mut scenario, market) = simulated(&config).await;
        market.receiver.set_fail_execution(true);

        let err = scenario.run().await.unwrap_err();
        assert_eq!(err.step(), Some(State::FlashLoan));
        assert!(matches!(
            err,
            ScenarioError::Protocol {
                source: ProtocolError::Reverted {
                    operation: Operation::FlashLoan,
                    ..
                },
                ..
            }
        ));

        let report = scenario.report();
        assert!(!report.completed);
        assert_eq!(report.reached, State::FlashLoan);
        assert!(report.error.as_deref().unwrap_or_default().contains("flash_loan"));

        let usdt = market.assets["USDT"];
        let reserve = market.pool.reserve_data(usdt).await.unwrap();
        assert_eq!(reserve.available_liquidity, U256::from(10_000_000u64));
        assert_eq!(
            market.pool.balance_of(usdt, market.flash_receiver).await.unwrap(),
            U256::ZERO
        );
    }

    #[tokio::test]
    async fn test_weak_shock_fails_loudly_before_liquidation() {
        let mut config = ScenarioConfig::default();
        config.liquidation.price_shock_bps = 10_100;
        let (mut scenario, _market) = simulated(&config).await;

        let err = scenario.run().await.unwrap_err();
        assert_eq!(err.step(), Some(State::PriceShock));
        assert!(matches!(err, ScenarioError::Precondition { .. }));
        assert!(scenario
            .report()
            .actions
            .iter()
            .all(|a| a.name != Operation::LiquidationCall.as_str()));
    }

    #[tokio::test]
    async fn test_wrong_admin_cannot_unpause() {
        let config = ScenarioConfig::default();
        let participants = Participants::simulated();
        let market = config
            .market
            .build(Address::with_last_byte(0x77), config.scenario.quote_currency)
            .unwrap();
        let mut scenario = Scenario::prepare(
            market.pool.clone(),
            market.pool.clone(),
            market.oracle.clone(),
            &config,
            participants,
            market.flash_receiver,
        )
        .await
        .unwrap();

        let err = scenario.run().await.unwrap_err();
        assert_eq!(err.step(), Some(State::Unpause));
        assert!(scenario.report().actions.is_empty());
    }

    #[tokio::test]
    async fn test_deposit_withdraw_round_trip() {
        let config = ScenarioConfig::default();
        let (mut scenario, market) = simulated(&config).await;
        scenario.run().await.unwrap();

        assert!(check(scenario.report(), "first_user USDC round trip").passed);
        let first_user = scenario.participants().first_user;
        let usdc = market.assets["USDC"];
        assert_eq!(
            market.pool.balance_of(usdc, first_user).await.unwrap(),
            U256::from(10_000_000u64)
        );
    }

    #[tokio::test]
    async fn test_repay_above_debt_is_capped() {
        let mut config = ScenarioConfig::default();
        config.amounts.repay = "7".to_string();
        let (mut scenario, market) = simulated(&config).await;
        scenario.run().await.unwrap();

        assert!(scenario.report().is_correct());
        let first_user = scenario.participants().first_user;
        let usdt = market.assets["USDT"];
        let data = market.pool.user_reserve_data(usdt, first_user).await.unwrap();
        assert_eq!(data.debt(RateMode::Variable), U256::ZERO);
    }

    #[tokio::test]
    async fn test_receive_a_token_liquidation() {
        let mut config = ScenarioConfig::default();
        config.liquidation.receive_a_token = true;
        let (mut scenario, market) = simulated(&config).await;
        scenario.run().await.unwrap();

        assert!(scenario.report().is_correct());
        let weth = market.assets["WETH"];
        let liquidator = scenario.participants().liquidator;
        let a_weth = market.pool.reserve_tokens(weth).await.unwrap().a_token;
        assert!(!market.pool.balance_of(a_weth, liquidator).await.unwrap().is_zero());
        assert!(market.pool.balance_of(weth, liquidator).await.unwrap().is_zero());
    }

    #[tokio::test]
    async fn test_usd_quoted_market() {
        let mut config = ScenarioConfig::default();
        config.scenario.quote_currency = crate::wiring::QuoteCurrency::Usd;
        config.amounts.depositor_liquidity = "2000".to_string();
        let (mut scenario, _market) = simulated(&config).await;

        scenario.run().await.unwrap();
        assert!(scenario.report().is_correct());
    }

    #[tokio::test]
    async fn test_health_factor_before_shock_is_healthy() {
        let config = ScenarioConfig::default();
        let (mut scenario, market) = simulated(&config).await;
        scenario.run().await.unwrap();

        let hf = check(scenario.report(), "health factor healthy before shock");
        assert!(hf.passed);
        let before: U256 = hf.actual.parse().unwrap();
        assert!(before >= WAD);
        assert!(market.oracle.len() >= 3);
    }

    #[tokio::test]
    async fn test_reserve_without_feed_does_not_block_the_run() {
        let mut config = ScenarioConfig::default();
        config.market.reserves.push(crate::config::ReserveEntry {
            symbol: "DAI".to_string(),
            decimals: 18,
            ltv_bps: 7_500,
            liquidation_threshold_bps: 8_000,
            liquidation_bonus_bps: 10_500,
            borrowing_enabled: true,
            stable_borrow_enabled: true,
        });
        let (mut scenario, market) = simulated(&config).await;
        assert_eq!(market.wiring.skipped, vec!["DAI".to_string()]);

        scenario.run().await.unwrap();
        assert!(
            scenario.report().is_correct(),
            "failed checks: {:?}",
            scenario.report().failed_checks().collect::<Vec<_>>()
        );
    }
}
