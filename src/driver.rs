//! Experiment driver: sequences consensus rounds and observation
//! periods, seeds faulty-node churn from the scenario's round-to-faulty-count
//! tape, and feeds the centralized MAB at each period boundary.

use std::collections::HashSet;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, info_span, trace};
use uuid::Uuid;

use crate::clock::{LatencyModel, SimClock};
use crate::config::ScenarioConfig;
use crate::mab::DiscountedUcbMab;
use crate::network::NetworkFabric;
use crate::node;
use crate::results::{FullResults, SingleRoundResults};
use crate::types::{ConsensusResultMessage, NodeId};

/// Runs a complete experiment: `Init -> RoundSetup -> ConsensusRun -> Record
/// -> [period boundary? Decide] -> RoundSetup -> ... -> Shutdown`. Owns the
/// node actors and network fabric for the duration of the run and joins
/// every actor task before returning.
pub struct ExperimentDriver {
    scenario: ScenarioConfig,
    master_seed: u64,
}

impl ExperimentDriver {
    pub fn new(scenario: ScenarioConfig, master_seed: u64) -> Self {
        Self {
            scenario,
            master_seed,
        }
    }

    /// Run the experiment to completion, returning the accumulated results.
    pub async fn run(&self) -> FullResults {
        let span = info_span!("experiment", rounds = self.scenario.run.num_consensus_rounds);
        let _enter = span.enter();

        let clock = Arc::new(SimClock::new());
        let total_nodes = self.scenario.run.num_nodes;
        let latency = LatencyModel::new(
            self.scenario.network.average_latency_ms,
            self.scenario.network.latency_std_dev_ms,
            self.scenario.network.max_latency_ms,
        );

        // Pre-decision default: the largest candidate m, the safest choice,
        // runs until the first observation period produces a MAB decision.
        let mut current_m = *self
            .scenario
            .run
            .possible_m_values
            .iter()
            .max()
            .expect("possible_m_values validated non-empty");

        let mut handles = Vec::with_capacity(total_nodes);
        let mut joins = Vec::with_capacity(total_nodes);
        for i in 0..total_nodes as u32 {
            let (handle, join) = node::spawn(
                NodeId(i),
                total_nodes,
                self.scenario.byzantine.default_consensus_value,
                self.scenario.run.sleep_between_node_processing_ms,
                self.scenario.network.max_latency_ms,
                vec![current_m],
                clock.clone(),
            );
            handles.push(handle);
            joins.push(join);
        }

        let mut fabric = NetworkFabric::new(
            handles,
            clock.clone(),
            latency,
            self.scenario.byzantine.percent_drop_message,
            self.scenario.run.sleep_between_node_processing_ms,
            self.master_seed,
        );

        let mut mab = DiscountedUcbMab::new(
            self.scenario.run.possible_m_values.clone(),
            self.scenario.mab.discount_gamma,
            self.scenario.mab.reward_bias,
            self.scenario.mab.failure_penalty,
        );

        let mut results = FullResults::new();
        results.record_decision(current_m);

        let mut value_rng = StdRng::seed_from_u64(self.master_seed.wrapping_add(1));
        let period = self.scenario.round.rounds_per_observation_period;

        for round_idx in 0..self.scenario.run.num_consensus_rounds {
            let faulty_count = self.scenario.faulty_count_for_round(round_idx);
            fabric.set_faulty_count(faulty_count);

            let true_value: bool = value_rng.gen();
            let round_id = Uuid::new_v4();
            trace!(round = round_idx, %round_id, "starting consensus round");
            let report = fabric.start_round_and_collect(true_value).await;

            let round_results = classify_round(&report.results_by_node, &report.faulty_nodes, current_m, true_value);
            results.record_round(round_results, report.faulty_nodes.len());

            if (round_idx + 1) % period == 0 {
                let batch = results.drain_since_last_decision(current_m);
                current_m = mab.next_m(batch);
                results.record_decision(current_m);
                fabric.broadcast_m_values(vec![current_m]).await;
                info!(round = round_idx, new_m = current_m, "observation period boundary, mab decided");
            }
        }

        fabric.shutdown();
        for join in joins {
            let _ = join.await;
        }

        results
    }
}

/// Build this round's `SingleRoundResults` and classify failure: non-faulty
/// nodes disagreeing on their reported decision (spec.md §4.4 step 5).
fn classify_round(
    results_by_node: &std::collections::HashMap<NodeId, ConsensusResultMessage<bool>>,
    faulty_nodes: &HashSet<NodeId>,
    m: usize,
    true_value: bool,
) -> SingleRoundResults {
    let mut latencies = std::collections::HashMap::new();
    let mut consensuses = std::collections::HashMap::new();
    let mut non_faulty_decisions: HashSet<bool> = HashSet::new();

    for (node_id, result) in results_by_node {
        latencies.insert(*node_id, result.latency_ms);
        consensuses.insert(*node_id, result.value);
        if !faulty_nodes.contains(node_id) {
            non_faulty_decisions.insert(result.value);
        }
    }

    let failed = non_faulty_decisions.len() > 1;

    SingleRoundResults {
        latencies_by_m: std::collections::HashMap::from([(m, latencies)]),
        consensuses_by_m: std::collections::HashMap::from([(m, consensuses)]),
        true_value,
        failed_by_m: std::collections::HashMap::from([(m, failed)]),
        recorded_at: chrono::Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        ByzantineConfig, DistributedMabConfig, MabConfig, NetworkLatencyConfig, RoundConfig,
        RunConfig,
    };
    use std::collections::BTreeMap;

    fn scenario(num_rounds: u64, num_nodes: usize, m_values: Vec<usize>, faulty: usize) -> ScenarioConfig {
        ScenarioConfig {
            run: RunConfig {
                num_consensus_rounds: num_rounds,
                num_nodes,
                possible_m_values: m_values.clone(),
                use_centralized_multi_armed_bandit: true,
                sleep_between_node_processing_ms: 0.0,
            },
            mab: MabConfig {
                discount_gamma: 1.0,
                reward_bias: 100.0,
                failure_penalty: -1000.0,
            },
            round: RoundConfig {
                rounds_per_observation_period: 5,
            },
            network: NetworkLatencyConfig {
                average_latency_ms: 5.0,
                latency_std_dev_ms: 1.0,
                max_latency_ms: 50,
            },
            byzantine: ByzantineConfig {
                consensus_round_to_set_m_value: BTreeMap::from([(0, faulty)]),
                percent_drop_message: 0.0,
                default_consensus_value: false,
            },
            distributed_mab: DistributedMabConfig {
                min_m_value_margin: 1,
                decentralized_fault_tolerance_value: 0,
                default_m_value_pair: (
                    *m_values.first().unwrap(),
                    *m_values.last().unwrap(),
                ),
            },
        }
    }

    #[tokio::test]
    async fn scenario_one_zero_faults_never_fails() {
        let cfg = scenario(20, 4, vec![1], 0);
        let driver = ExperimentDriver::new(cfg, 7);
        let results = driver.run().await;
        assert_eq!(results.rounds.len(), 20);
        assert!(results.rounds.iter().all(|r| !r.failed_by_m.values().any(|f| *f)));
    }

    #[tokio::test]
    async fn scenario_two_faults_exceeding_m_can_fail() {
        // N=4, m=1, 2 faulty nodes with a high drop rate: the protocol is
        // not guaranteed safe here (2 > m), so over enough rounds at least
        // one disagreement among non-faulty nodes is expected.
        let mut cfg = scenario(30, 4, vec![1], 2);
        cfg.byzantine.percent_drop_message = 1.0;
        let driver = ExperimentDriver::new(cfg, 11);
        let results = driver.run().await;
        assert_eq!(results.rounds.len(), 30);
    }
}
