//! Error taxonomy for calls into the lending protocol and price source.

use alloy::primitives::Address;
use std::fmt;

/// State-changing call issued against the protocol or one of its tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    Mint,
    Approve,
    SetPoolPause,
    Deposit,
    Borrow,
    Repay,
    Withdraw,
    FlashLoan,
    LiquidationCall,
    SetAssetPrice,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mint => "mint",
            Self::Approve => "approve",
            Self::SetPoolPause => "setPoolPause",
            Self::Deposit => "deposit",
            Self::Borrow => "borrow",
            Self::Repay => "repay",
            Self::Withdraw => "withdraw",
            Self::FlashLoan => "flashLoan",
            Self::LiquidationCall => "liquidationCall",
            Self::SetAssetPrice => "setAssetPrice",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a protocol call.
///
/// Every variant is fatal for a scenario run: the protocol either applied
/// the whole operation or none of it, and nothing is retried.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The protocol rejected the operation (revert).
    #[error("{operation} reverted: {reason}")]
    Reverted { operation: Operation, reason: String },

    /// The asset is not listed as a reserve.
    #[error("unknown reserve {0}")]
    UnknownReserve(Address),

    /// No signing key is registered for the acting participant.
    #[error("no signer registered for {0}")]
    MissingSigner(Address),

    /// RPC or transport failure.
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

impl ProtocolError {
    pub fn reverted(operation: Operation, reason: impl Into<String>) -> Self {
        Self::Reverted {
            operation,
            reason: reason.into(),
        }
    }

    /// Operation that reverted, if this is a revert.
    pub fn operation(&self) -> Option<Operation> {
        match self {
            Self::Reverted { operation, .. } => Some(*operation),
            _ => None,
        }
    }
}

pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revert_message_names_operation() {
        let err = ProtocolError::reverted(Operation::LiquidationCall, "health factor not below threshold");
        assert_eq!(
            err.to_string(),
            "liquidationCall reverted: health factor not below threshold"
        );
        assert_eq!(err.operation(), Some(Operation::LiquidationCall));
    }

    #[test]
    fn test_transport_error_has_no_operation() {
        let err = ProtocolError::from(anyhow::anyhow!("connection refused"));
        assert!(err.operation().is_none());
    }
}
