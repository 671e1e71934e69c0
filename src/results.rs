//! Results recorder: per-round observations, persisted as an
//! append-only `FullResults` with a sliding buffer the driver drains at
//! every observation-period boundary.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::mab::ObservationBatch;
use crate::types::NodeId;

/// Everything recorded about a single consensus round, keyed by the `m`
/// value(s) evaluated during it. In the centralized MAB variant exactly one
/// `m` is active per round, so these maps are singletons; the decentralized
/// variant would populate more than one key per round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SingleRoundResults {
    pub latencies_by_m: HashMap<usize, HashMap<NodeId, u64>>,
    pub consensuses_by_m: HashMap<usize, HashMap<NodeId, bool>>,
    pub true_value: bool,
    pub failed_by_m: HashMap<usize, bool>,
    /// Wall-clock time the round was recorded, for post-hoc correlation
    /// with external logs; the simulation's own pacing is governed by the
    /// monotonic [`crate::clock::SimClock`], not this timestamp.
    pub recorded_at: chrono::DateTime<chrono::Utc>,
}

impl SingleRoundResults {
    /// The round's max per-node latency for `m`, used by the bandit's
    /// latency aggregate — the slowest node bounds the round.
    pub fn max_latency_for(&self, m: usize) -> Option<u64> {
        self.latencies_by_m
            .get(&m)
            .and_then(|by_node| by_node.values().copied().max())
    }

    /// The `m` value(s) evaluated this round. In the centralized variant
    /// this is always a single key; kept as an iterator so the
    /// decentralized variant's multi-key rounds need no separate accessor.
    pub fn active_m_values(&self) -> impl Iterator<Item = usize> + '_ {
        self.latencies_by_m.keys().copied()
    }
}

/// Append-only record of an entire experiment run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FullResults {
    pub rounds: Vec<SingleRoundResults>,
    pub true_faulty_counts: Vec<usize>,
    pub chosen_m: Vec<usize>,
    /// Rounds recorded since the last MAB decision; drained (and its
    /// contents copied into `rounds`/`true_faulty_counts` beforehand) at
    /// every observation-period boundary. Serialized like every other
    /// field so a persisted blob round-trips exactly even when the run
    /// ends mid-period.
    since_last_decision: Vec<SingleRoundResults>,
}

impl FullResults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one round's results, appending to both the permanent log and
    /// the sliding buffer.
    pub fn record_round(&mut self, round: SingleRoundResults, true_faulty_count: usize) {
        self.since_last_decision.push(round.clone());
        self.rounds.push(round);
        self.true_faulty_counts.push(true_faulty_count);
    }

    /// Record the `m` the MAB chose at a period boundary.
    pub fn record_decision(&mut self, m: usize) {
        self.chosen_m.push(m);
    }

    /// Drain the sliding buffer (emptying it) and fold it into an
    /// [`ObservationBatch`] for the bandit, for the given active `m`.
    pub fn drain_since_last_decision(&mut self, active_m: usize) -> ObservationBatch {
        debug_assert!(
            !self.since_last_decision.is_empty(),
            "observation period must contain at least one round (R >= 1)"
        );
        let batch = aggregate(&self.since_last_decision, active_m);
        self.since_last_decision.clear();
        batch
    }

    /// Rounds accumulated since the last decision, without draining.
    pub fn since_last_decision(&self) -> &[SingleRoundResults] {
        &self.since_last_decision
    }
}

/// Fold a batch of round results for one `m` into the MAB's aggregate
/// observation: mean max-per-node-latency, and whether any round failed.
pub fn aggregate(batch: &[SingleRoundResults], m: usize) -> ObservationBatch {
    let latencies: Vec<f64> = batch
        .iter()
        .filter_map(|r| r.max_latency_for(m))
        .map(|ms| ms as f64)
        .collect();
    let lat_avg = if latencies.is_empty() {
        0.0
    } else {
        latencies.iter().sum::<f64>() / latencies.len() as f64
    };
    let failed = batch.iter().any(|r| r.failed_by_m.get(&m).copied().unwrap_or(false));
    ObservationBatch { lat_avg, failed }
}
