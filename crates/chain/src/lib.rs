//! Chain interaction layer for the lending pool scenario.
//!
//! This crate provides:
//! - The [`LendingPool`], [`TokenLedger`] and [`PriceSource`] collaborator traits
//! - An Aave v2 implementation over JSON-RPC (alloy bindings, provider, signers)
//! - An in-memory implementation for deterministic runs and tests
//! - The protocol error taxonomy shared by both backends

pub mod contracts;
pub mod error;
pub mod oracle;
pub mod protocol;
mod provider;
mod signer;

pub use error::{Operation, ProtocolError, ProtocolResult};
pub use oracle::{InMemoryPriceOracle, PriceSource, RpcPriceOracle};
pub use protocol::memory::{
    FlashLoanCallback, FlashLoanReceiver, InMemoryLendingPool, MockFlashLoanReceiver, TokenBook,
    CLOSE_FACTOR_BPS,
};
pub use protocol::{
    AaveV2Contracts, AaveV2Pool, FlashLoanRequest, LendingPool, RateMode, ReserveConfiguration,
    ReserveData, ReserveTokens, TokenLedger, TxReceipt, UserAccountData, UserReserveData,
};
pub use provider::ProviderManager;
pub use signer::ParticipantSigners;
