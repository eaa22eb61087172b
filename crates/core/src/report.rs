//! Run report: every transaction sent and every check evaluated.
//!
//! `completed` answers "did the scenario run"; [`ScenarioReport::is_correct`]
//! answers "were its outcomes right".

use alloy::primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use scenario_chain::TxReceipt;
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::scenario::State;
use crate::u256_math::abs_diff;
use crate::wiring::SourceCheck;

/// One confirmed transaction.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub step: State,
    /// Operation name, e.g. "liquidationCall"
    pub name: String,
    pub participant: Address,
    pub tx: B256,
    pub used_gas: u64,
    pub gas_price: u128,
}

/// One expected-versus-actual comparison.
#[derive(Debug, Clone, Serialize)]
pub struct Check {
    pub step: State,
    pub name: String,
    pub expected: String,
    pub actual: String,
    pub tolerance: String,
    pub passed: bool,
}

/// Deployed oracle source versus the resolved wiring, per asset.
#[derive(Debug, Clone, Serialize)]
pub struct WiringEntry {
    pub symbol: String,
    /// "match", "mismatch" or "unregistered"
    pub status: &'static str,
    pub expected: Option<Address>,
    pub actual: Option<Address>,
}

impl WiringEntry {
    fn from_check(symbol: &str, check: &SourceCheck) -> Self {
        let (status, expected, actual) = match check {
            SourceCheck::Match => ("match", None, None),
            SourceCheck::Mismatch { expected, actual } => ("mismatch", Some(*expected), Some(*actual)),
            SourceCheck::Unregistered => ("unregistered", None, None),
        };
        Self {
            symbol: symbol.to_string(),
            status,
            expected,
            actual,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub actions: Vec<Action>,
    pub checks: Vec<Check>,
    /// Empty when no deployed oracle was verified
    pub wiring: Vec<WiringEntry>,
    /// Last state reached
    pub reached: State,
    pub completed: bool,
    /// Abort reason when the run did not complete
    pub error: Option<String>,
}

impl Default for ScenarioReport {
    fn default() -> Self {
        Self::new()
    }
}

impl ScenarioReport {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            actions: Vec::new(),
            checks: Vec::new(),
            wiring: Vec::new(),
            reached: State::Unpause,
            completed: false,
            error: None,
        }
    }

    pub fn record_action(&mut self, step: State, participant: Address, receipt: &TxReceipt) {
        self.actions.push(Action {
            step,
            name: receipt.operation.as_str().to_string(),
            participant,
            tx: receipt.hash,
            used_gas: receipt.gas_used,
            gas_price: receipt.gas_price,
        });
    }

    /// `|expected - actual| <= tolerance`. Returns whether the check passed.
    pub fn check_amount(
        &mut self,
        step: State,
        name: impl Into<String>,
        expected: U256,
        actual: U256,
        tolerance: U256,
    ) -> bool {
        let passed = abs_diff(expected, actual) <= tolerance;
        self.push(Check {
            step,
            name: name.into(),
            expected: expected.to_string(),
            actual: actual.to_string(),
            tolerance: tolerance.to_string(),
            passed,
        })
    }

    /// Boolean condition with a human-readable observation.
    pub fn check_that(
        &mut self,
        step: State,
        name: impl Into<String>,
        condition: bool,
        observed: impl Into<String>,
    ) -> bool {
        self.push(Check {
            step,
            name: name.into(),
            expected: "true".to_string(),
            actual: observed.into(),
            tolerance: "0".to_string(),
            passed: condition,
        })
    }

    fn push(&mut self, check: Check) -> bool {
        let passed = check.passed;
        if passed {
            info!(step = %check.step, check = %check.name, actual = %check.actual, "Check passed");
        } else {
            warn!(
                step = %check.step,
                check = %check.name,
                expected = %check.expected,
                actual = %check.actual,
                tolerance = %check.tolerance,
                "Check failed"
            );
        }
        self.checks.push(check);
        passed
    }

    /// Record a wiring verification. Unregistered sources are a
    /// configuration gap; only mismatches make the run incorrect.
    pub fn record_wiring(&mut self, results: &[(String, SourceCheck)]) {
        for (symbol, check) in results {
            match check {
                SourceCheck::Match => debug!(symbol = %symbol, "Oracle source matches wiring"),
                SourceCheck::Mismatch { expected, actual } => {
                    warn!(symbol = %symbol, expected = %expected, actual = %actual, "Oracle source mismatch")
                }
                SourceCheck::Unregistered => warn!(symbol = %symbol, "Oracle has no source registered"),
            }
            self.wiring.push(WiringEntry::from_check(symbol, check));
        }
    }

    pub fn finish(&mut self, reached: State, error: Option<String>) {
        self.reached = reached;
        self.completed = error.is_none() && reached == State::Completed;
        self.error = error;
        self.finished_at = Some(Utc::now());
    }

    /// Every check passed (an aborted run is never correct).
    pub fn is_correct(&self) -> bool {
        self.completed
            && self.checks.iter().all(|c| c.passed)
            && self.wiring.iter().all(|w| w.status != "mismatch")
    }

    pub fn failed_checks(&self) -> impl Iterator<Item = &Check> {
        self.checks.iter().filter(|c| !c.passed)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn write_to(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json_pretty()?)?;
        info!(path = %path.display(), actions = self.actions.len(), checks = self.checks.len(), "Report written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scenario_chain::Operation;

    #[test]
    fn test_amount_check_respects_tolerance() {
        let mut report = ScenarioReport::new();
        assert!(report.check_amount(State::Deposit, "exact", U256::from(5u64), U256::from(5u64), U256::ZERO));
        assert!(report.check_amount(State::Borrow, "close", U256::from(100u64), U256::from(99u64), U256::from(1u64)));
        assert!(!report.check_amount(State::Borrow, "far", U256::from(100u64), U256::from(97u64), U256::from(1u64)));
        assert_eq!(report.failed_checks().count(), 1);
    }

    #[test]
    fn test_completed_run_with_failed_check_is_not_correct() {
        let mut report = ScenarioReport::new();
        report.check_that(State::Liquidation, "seized", false, "0");
        report.finish(State::Completed, None);

        assert!(report.completed);
        assert!(!report.is_correct());
    }

    #[test]
    fn test_aborted_run_is_not_correct() {
        let mut report = ScenarioReport::new();
        report.finish(State::Borrow, Some("borrow reverted".to_string()));
        assert!(!report.completed);
        assert!(!report.is_correct());
    }

    #[test]
    fn test_wiring_mismatch_makes_run_incorrect() {
        let mut report = ScenarioReport::new();
        report.record_wiring(&[
            ("USDC".to_string(), SourceCheck::Match),
            ("DAI".to_string(), SourceCheck::Unregistered),
        ]);
        report.finish(State::Completed, None);
        assert!(report.is_correct());

        report.record_wiring(&[(
            "WETH".to_string(),
            SourceCheck::Mismatch {
                expected: Address::with_last_byte(1),
                actual: Address::with_last_byte(2),
            },
        )]);
        assert!(!report.is_correct());
        assert_eq!(report.wiring.len(), 3);
    }

    #[test]
    fn test_json_shape() {
        let mut report = ScenarioReport::new();
        let receipt = TxReceipt {
            operation: Operation::LiquidationCall,
            hash: B256::ZERO,
            gas_used: 21_000,
            gas_price: 1,
        };
        report.record_action(State::Liquidation, Address::ZERO, &receipt);
        report.finish(State::Completed, None);

        let json: serde_json::Value = serde_json::from_str(&report.to_json_pretty().unwrap()).unwrap();
        assert_eq!(json["actions"][0]["name"], "liquidationCall");
        assert_eq!(json["actions"][0]["usedGas"], 21_000);
        assert_eq!(json["actions"][0]["step"], "liquidation");
        assert_eq!(json["completed"], true);
    }
}
