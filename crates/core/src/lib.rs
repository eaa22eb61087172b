//! Scenario core logic.
//!
//! This crate provides:
//! - Symbol-keyed asset registry built from the pool's reserve list
//! - Oracle wiring resolver (asset ↔ price feed pairing per quote currency)
//! - Fixed-point math for values, health factors and liquidation seizure
//! - Protocol-reported and independently recomputed positions
//! - The scenario state machine and its run report
//! - Configuration profiles and the simulated market definition

mod assets;
pub mod config;
mod error;
mod position;
mod report;
pub mod scenario;
pub mod u256_math;
pub mod wiring;

pub use assets::{Asset, AssetRegistry};
pub use config::{config, init_config, BackendKind, ScenarioConfig, SimulatedMarket};
pub use error::{ScenarioError, ScenarioResult};
pub use position::{Position, PositionLeg, RecomputedPosition};
pub use report::{Action, Check, ScenarioReport, WiringEntry};
pub use scenario::{Participants, Scenario, ScenarioPlan, State};
pub use wiring::{resolve, verify_wiring, FeedKey, OracleInitArgs, OracleWiring, QuoteCurrency, SourceCheck, SourceRegistry};
