//! `analyze_results <results-path> <scenario-config-path> [<baseline-results-path>]`
//!
//! Deliberately thin: no plotting or cross-run statistics here, only
//! deserializing the results blob(s) and printing a one-line summary per
//! file (round count, mean max-per-round latency, failure rate) — a
//! reporting layer over `FullResults`, not an analysis tool.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use om_bandit_sim::config::ScenarioConfig;
use om_bandit_sim::results::FullResults;
use om_bandit_sim::ConsensusError;

#[derive(Parser, Debug)]
#[command(name = "analyze_results", about = "Print a one-line summary of a results blob")]
struct Args {
    results_path: PathBuf,
    scenario_config_path: PathBuf,
    baseline_results_path: Option<PathBuf>,
}

fn main() -> ExitCode {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(ConsensusError::InvalidConfiguration(msg)) => {
            eprintln!("config error: {msg}");
            ExitCode::from(2)
        }
        Err(err) => {
            eprintln!("analysis failed: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> om_bandit_sim::Result<()> {
    // Loaded only to validate the pairing between results and scenario;
    // this binary does no plotting or cross-scenario statistics.
    let _scenario = ScenarioConfig::load(&args.scenario_config_path)?;

    let results = load_results(&args.results_path)?;
    print_summary("results", &results);

    if let Some(baseline_path) = &args.baseline_results_path {
        let baseline = load_results(baseline_path)?;
        print_summary("baseline", &baseline);
    }

    Ok(())
}

fn load_results(path: &PathBuf) -> om_bandit_sim::Result<FullResults> {
    let bytes = std::fs::read(path)?;
    let results: FullResults = bincode::deserialize(&bytes)?;
    Ok(results)
}

fn print_summary(label: &str, results: &FullResults) {
    let round_count = results.rounds.len();
    let latencies: Vec<f64> = results
        .rounds
        .iter()
        .flat_map(|r| r.active_m_values().filter_map(move |m| r.max_latency_for(m)))
        .map(|ms| ms as f64)
        .collect();
    let mean_latency = if latencies.is_empty() {
        0.0
    } else {
        latencies.iter().sum::<f64>() / latencies.len() as f64
    };
    let failures = results
        .rounds
        .iter()
        .filter(|r| r.active_m_values().any(|m| r.failed_by_m.get(&m).copied().unwrap_or(false)))
        .count();
    let failure_rate = if round_count == 0 {
        0.0
    } else {
        failures as f64 / round_count as f64
    };

    println!(
        "{label}: rounds={round_count} mean_latency_ms={mean_latency:.2} failure_rate={failure_rate:.3}"
    );
}
