//! Aave Lending Pool Scenario Runner
//!
//! Drives a fixed borrowing and liquidation script against an Aave v2 style
//! lending pool and cross-checks every outcome:
//! - Oracle wiring resolution (asset ↔ feed per quote currency)
//! - Deposit, borrow, repay, flash loan and withdraw round trip
//! - Price shock, health factor recomputation and liquidation seizure
//!
//! Runs against an in-memory market (default) or a live deployment.

use std::sync::Arc;

use anyhow::{bail, Result};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use scenario_chain::{
    AaveV2Pool, LendingPool, ParticipantSigners, ProviderManager, RpcPriceOracle,
};
use scenario_core::{
    init_config, resolve, verify_wiring, BackendKind, Participants, Scenario, ScenarioConfig,
};

/// Environment variable naming the configuration file.
const CONFIG_ENV: &str = "SCENARIO_CONFIG";

/// Exit code of a run that completed with failed checks.
const EXIT_INCORRECT: i32 = 2;

#[tokio::main]
async fn main() -> Result<()> {
    print_banner();

    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,scenario_core=debug,scenario_chain=debug")),
        )
        .init();

    // First CLI argument or SCENARIO_CONFIG names a TOML file,
    // otherwise SCENARIO_PROFILE selects a built-in profile
    let config = load_config()?;
    config.log_config();
    init_config(config.clone());

    let mut scenario = match config.backend.kind {
        BackendKind::Memory => memory_scenario(&config).await?,
        BackendKind::Rpc => rpc_scenario(&config).await?,
    };

    let outcome = scenario.run().await;
    let report = scenario.report();
    report.write_to(&config.scenario.report_path)?;

    for check in report.failed_checks() {
        warn!(
            step = %check.step,
            check = %check.name,
            expected = %check.expected,
            actual = %check.actual,
            "Mismatch"
        );
    }

    if let Err(e) = outcome {
        error!(error = %e, "Scenario did not complete");
        return Err(e.into());
    }
    if !report.is_correct() {
        error!(
            failed = report.failed_checks().count(),
            "Scenario completed with incorrect outcomes"
        );
        std::process::exit(EXIT_INCORRECT);
    }

    info!(
        actions = report.actions.len(),
        checks = report.checks.len(),
        "Scenario completed, all checks passed"
    );
    Ok(())
}

fn load_config() -> Result<ScenarioConfig> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var(CONFIG_ENV).ok());

    match path {
        Some(path) => {
            info!(path = %path, "Loading configuration file");
            ScenarioConfig::from_file(&path)
        }
        None => ScenarioConfig::from_env(),
    }
}

async fn memory_scenario(config: &ScenarioConfig) -> Result<Scenario> {
    let participants = Participants::simulated();
    let market = config
        .market
        .build(participants.admin, config.scenario.quote_currency)?;

    if !market.wiring.skipped.is_empty() {
        warn!(skipped = ?market.wiring.skipped, "Assets without a price feed");
    }

    let scenario = Scenario::prepare(
        market.pool.clone(),
        market.pool.clone(),
        market.oracle.clone(),
        config,
        participants,
        market.flash_receiver,
    )
    .await?;
    Ok(scenario)
}

async fn rpc_scenario(config: &ScenarioConfig) -> Result<Scenario> {
    let rpc = &config.rpc;

    let signers = ParticipantSigners::from_keys(rpc.signing_keys()?)?;
    let provider = Arc::new(ProviderManager::new(&rpc.url()?, signers).await?);
    let contracts = rpc.contracts()?;
    let pool = Arc::new(AaveV2Pool::new(contracts, provider.clone()));

    let mut oracle = RpcPriceOracle::new(rpc.price_oracle()?, provider.clone());
    if let Some(aave_oracle) = rpc.aave_oracle()? {
        oracle = oracle.with_aave_oracle(aave_oracle);
    }
    let oracle = Arc::new(oracle);

    info!(
        chain_id = provider.chain_id().await?,
        lending_pool = %contracts.lending_pool,
        price_oracle = %oracle.address(),
        "Deployment contracts configured"
    );

    let admin = pool.emergency_admin().await?;
    if !provider.signers().contains(&admin) {
        bail!("no key configured for the emergency admin {}", admin);
    }
    let participants = Participants::from_signers(provider.signers().addresses(), admin)?;

    let mut scenario = Scenario::prepare(
        pool.clone(),
        pool.clone(),
        oracle.clone(),
        config,
        participants,
        rpc.flash_loan_receiver()?,
    )
    .await?;

    let feeds = rpc.feed_universe()?;
    if feeds.is_empty() {
        info!("No feeds configured, oracle wiring not verified");
    } else {
        let universe = scenario.registry().addresses();
        let wiring = resolve(&universe, &feeds, config.scenario.quote_currency);
        let results = verify_wiring(&wiring, oracle.as_ref()).await?;
        if results.is_empty() {
            warn!("Deployed oracle does not expose its sources, wiring not verified");
        }
        scenario.report_mut().record_wiring(&results);
    }

    Ok(scenario)
}

fn print_banner() {
    println!(r#"
    ╔═╗┌─┐┬  ┬┌─┐  ╔═╗┌─┐┌─┐┌┐┌┌─┐┬─┐┬┌─┐
    ╠═╣├─┤└┐┌┘├┤   ╚═╗│  ├┤ │││├─┤├┬┘││ │
    ╩ ╩┴ ┴ └┘ └─┘  ╚═╝└─┘└─┘┘└┘┴ ┴┴└─┴└─┘
    Lending Pool Scenario Runner v0.1.0
    "#);
}
