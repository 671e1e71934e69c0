//! `run_simulation <scenario-config-path> <results-output-path>`
//!
//! Loads a scenario configuration, runs the experiment driver to
//! completion, and persists the resulting `FullResults` as a bincode blob.
//! Exit codes: 0 success, 2 configuration error, 1 any other failure.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use om_bandit_sim::config::ScenarioConfig;
use om_bandit_sim::driver::ExperimentDriver;
use om_bandit_sim::ConsensusError;

#[derive(Parser, Debug)]
#[command(name = "run_simulation", about = "Run an OM(m) bandit simulation scenario")]
struct Args {
    /// Path to the top-level scenario document.
    scenario_config_path: PathBuf,
    /// Path to write the persisted `FullResults` blob to.
    results_output_path: PathBuf,
    /// Master RNG seed; defaults to a fixed value for reproducibility.
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(ConsensusError::InvalidConfiguration(msg)) => {
            eprintln!("config error: {msg}");
            ExitCode::from(2)
        }
        Err(err) => {
            eprintln!("simulation failed: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> om_bandit_sim::Result<()> {
    info!(path = %args.scenario_config_path.display(), "loading scenario");
    let scenario = ScenarioConfig::load(&args.scenario_config_path)?;

    let driver = ExperimentDriver::new(scenario, args.seed);
    let results = driver.run().await;
    info!(rounds = results.rounds.len(), "experiment complete");

    let encoded = bincode::serialize(&results)?;
    std::fs::write(&args.results_output_path, encoded)?;
    info!(path = %args.results_output_path.display(), "results written");

    Ok(())
}
