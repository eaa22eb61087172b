//! Contract bindings for the Aave v2 deployment driven by the scenario.
//!
//! Interfaces are declared inline with `sol!` and cover only the functions
//! the scenario calls.
//!
//! # Example
//!
//! ```rust,ignore
//! use scenario_chain::contracts::ILendingPool;
//!
//! let pool = ILendingPool::new(address, provider);
//! let account = pool.getUserAccountData(user).call().await?;
//! ```

mod aave_v2;
mod erc20;

pub use aave_v2::{
    IAaveOracle, IFlashLoanReceiver, ILendingPool, ILendingPoolAddressesProvider,
    ILendingPoolConfigurator, IPriceOracle, IProtocolDataProvider,
};
pub use erc20::IMintableERC20;
