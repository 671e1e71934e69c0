//! # OM Bandit Sim
//!
//! Discrete-time simulator and adaptive multi-armed-bandit controller for
//! Lamport's Oral Messages Byzantine agreement protocol, OM(m).
//!
//! The crate studies whether an online bandit learner, observing per-round
//! latency and failure, can pick the fault-tolerance parameter `m`
//! adaptively so the network only pays for deeper OM(m) recursion when the
//! actual number of faulty nodes warrants it.
//!
//! ## Layout
//!
//! - [`types`] — node ids, commander chains, wire messages, the
//!   `Majority`/`Corruptible` value abstraction (currently instantiated
//!   only with `bool`).
//! - [`clock`] — the simulation's monotonic millisecond clock and
//!   truncated-normal latency sampler.
//! - [`tree`] — the per-round result tree each node folds its OM(m)
//!   recursion into.
//! - [`node`] — the per-node actor running the OM(m) algorithm.
//! - [`network`] — the fabric: delayed delivery, fault injection, round
//!   setup/collection.
//! - [`mab`] — the centralized discounted-UCB controller over candidate
//!   `m` values, plus the decentralized variant's interface stub.
//! - [`results`] — per-round observations and the append-only experiment
//!   log.
//! - [`driver`] — sequences rounds and observation periods end to end.
//! - [`config`] — the scenario configuration surface (YAML sub-configs).
//! - [`error`] — the crate's error taxonomy.
//!
//! ## Example
//!
//! ```rust,no_run
//! use om_bandit_sim::config::ScenarioConfig;
//! use om_bandit_sim::driver::ExperimentDriver;
//!
//! #[tokio::main]
//! async fn main() -> om_bandit_sim::Result<()> {
//!     let scenario = ScenarioConfig::load(std::path::Path::new("scenario.yaml"))?;
//!     let driver = ExperimentDriver::new(scenario, 42);
//!     let results = driver.run().await;
//!     println!("recorded {} rounds", results.rounds.len());
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod config;
pub mod driver;
pub mod error;
pub mod mab;
pub mod network;
pub mod node;
pub mod results;
pub mod tree;
pub mod types;

pub use error::{ConsensusError, Result};
pub use types::NodeId;
