//! Scenario error taxonomy.
//!
//! Every variant aborts the run. Correctness mismatches are not errors:
//! they are recorded as failed checks in the report.

use crate::scenario::State;
use scenario_chain::ProtocolError;

#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    /// A protocol call failed (revert or transport). Not retried.
    #[error("{step}: {source}")]
    Protocol {
        step: State,
        #[source]
        source: ProtocolError,
    },

    /// A state's entry or exit condition does not hold.
    #[error("{step}: precondition violated: {reason}")]
    Precondition { step: State, reason: String },

    /// The configuration cannot drive a run (unknown symbol, bad amount).
    #[error("configuration error: {0}")]
    Config(String),
}

impl ScenarioError {
    pub fn precondition(step: State, reason: impl Into<String>) -> Self {
        Self::Precondition {
            step,
            reason: reason.into(),
        }
    }

    /// State the run aborted in, if the failure happened inside one.
    pub fn step(&self) -> Option<State> {
        match self {
            Self::Protocol { step, .. } | Self::Precondition { step, .. } => Some(*step),
            Self::Config(_) => None,
        }
    }
}

pub type ScenarioResult<T> = std::result::Result<T, ScenarioError>;

/// Attach the running state to protocol failures.
pub(crate) trait AtStep<T> {
    fn at(self, step: State) -> ScenarioResult<T>;
}

impl<T> AtStep<T> for Result<T, ProtocolError> {
    fn at(self, step: State) -> ScenarioResult<T> {
        self.map_err(|source| ScenarioError::Protocol { step, source })
    }
}
