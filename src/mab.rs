//! Adaptive controller: a discounted UCB1-style multi-armed bandit over
//! the candidate `m` values, plus the stub contract for the decentralized
//! variant.

use tracing::debug;

/// Aggregate observations for one observation period, computed by the
/// driver from a batch of `R` round results.
#[derive(Debug, Clone, Copy)]
pub struct ObservationBatch {
    /// Mean, over rounds in the batch, of the round's max per-node latency.
    pub lat_avg: f64,
    /// Whether any round in the batch had a consensus failure.
    pub failed: bool,
}

/// Discounted-UCB1 bandit over `K = possible_m_values.len()` arms. Each arm
/// index corresponds positionally to an entry in `possible_m_values`.
#[derive(Debug, Clone)]
pub struct DiscountedUcbMab {
    arms: Vec<usize>,
    gamma: f64,
    reward_bias: f64,
    failure_penalty: f64,
    epsilon: f64,
    n: Vec<f64>,
    s: Vec<f64>,
    prev: Option<usize>,
}

impl DiscountedUcbMab {
    /// `possible_m_values` must be non-empty; this is enforced by
    /// `ScenarioConfig::validate` before a mab is ever constructed.
    pub fn new(possible_m_values: Vec<usize>, gamma: f64, reward_bias: f64, failure_penalty: f64) -> Self {
        let k = possible_m_values.len();
        Self {
            arms: possible_m_values,
            gamma,
            reward_bias,
            failure_penalty,
            epsilon: 0.002,
            n: vec![0.0; k],
            s: vec![0.0; k],
            prev: None,
        }
    }

    /// Number of candidate arms.
    pub fn num_arms(&self) -> usize {
        self.arms.len()
    }

    /// Discounted pull counts, for inspection/tests.
    pub fn pull_counts(&self) -> &[f64] {
        &self.n
    }

    /// Ingest one observation period's aggregate and return the next `m` to
    /// run. Applies the discount and reward update for the previously
    /// pulled arm (if any), then selects an arm via exploration-first /
    /// Bernoulli-UCB.
    pub fn next_m(&mut self, batch: ObservationBatch) -> usize {
        if let Some(prev) = self.prev {
            for i in 0..self.n.len() {
                self.n[i] *= self.gamma;
                self.s[i] *= self.gamma;
            }
            let reward = if batch.failed {
                self.failure_penalty
            } else {
                self.reward_bias - batch.lat_avg
            };
            self.n[prev] += 1.0;
            self.s[prev] += reward;
        }

        let arm = self.select_arm();
        self.prev = Some(arm);
        let chosen_m = self.arms[arm];
        debug!(arm, chosen_m, "mab selected next m");
        chosen_m
    }

    fn select_arm(&self) -> usize {
        if let Some(unexplored) = (0..self.n.len()).filter(|&i| self.n[i] == 0.0).max() {
            return unexplored;
        }

        let total: f64 = self.n.iter().sum();
        let log_t = total.ln();
        let mut best_arm = 0;
        let mut best_score = f64::NEG_INFINITY;
        for i in 0..self.n.len() {
            let mu = self.s[i] / self.n[i];
            let variance_term = (mu * (1.0 - mu)).max(self.epsilon);
            let bonus = (variance_term * log_t / self.n[i]).sqrt();
            let score = mu + bonus;
            if score > best_score {
                best_score = score;
                best_arm = i;
            }
        }
        best_arm
    }
}

/// The decentralized MAB variant: each node is meant to vote for an
/// `(m_low, m_high)` pair separated by at least `min_m_value_margin` via a
/// second meta-consensus round, with an unspecified vote-aggregation rule
/// and reward attribution across the two simultaneously-deployed values.
/// This module only carries the interface contract; it is not implemented.
pub mod decentralized {
    /// A candidate pair of `m` values a node votes for at a period boundary.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MValuePair {
        pub m_low: usize,
        pub m_high: usize,
    }

    impl MValuePair {
        pub fn new(m_low: usize, m_high: usize, min_margin: usize) -> Option<Self> {
            if m_high >= m_low + min_margin {
                Some(Self { m_low, m_high })
            } else {
                None
            }
        }
    }

    /// Per-node vote contribution toward the next `MValuePair`. The
    /// aggregation rule that turns a `Vec<NodeVote>` into a single broadcast
    /// pair, and how reward is attributed back to each of the two
    /// simultaneously-deployed arms, are left open.
    #[derive(Debug, Clone, Copy)]
    pub struct NodeVote {
        pub pair: MValuePair,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explores_unpulled_arms_favouring_largest_index_first() {
        let mut mab = DiscountedUcbMab::new(vec![1, 2, 3], 1.0, 100.0, -1000.0);
        assert_eq!(mab.next_m(ObservationBatch { lat_avg: 50.0, failed: false }), 3);
        assert_eq!(mab.next_m(ObservationBatch { lat_avg: 50.0, failed: false }), 2);
        assert_eq!(mab.next_m(ObservationBatch { lat_avg: 50.0, failed: false }), 1);
    }

    #[test]
    fn after_exploration_prefers_lower_latency_arm() {
        let mut mab = DiscountedUcbMab::new(vec![1, 2, 3], 1.0, 100.0, -1000.0);
        // Exhaust exploration: one pull per arm (order is 3, 2, 1).
        mab.next_m(ObservationBatch { lat_avg: 10.0, failed: false });
        mab.next_m(ObservationBatch { lat_avg: 80.0, failed: false });
        mab.next_m(ObservationBatch { lat_avg: 80.0, failed: false });
        // Arm 0 (m=1) has the best (lowest) latency so far; it should now
        // dominate selection once every arm has at least one pull, modulo
        // the UCB exploration bonus narrowing over many more pulls.
        for _ in 0..50 {
            mab.next_m(ObservationBatch { lat_avg: 80.0, failed: false });
        }
        assert_eq!(mab.pull_counts().len(), 3);
        assert!(mab.pull_counts()[0] > mab.pull_counts()[1]);
    }

    #[test]
    fn failure_applies_penalty_reward() {
        let mut mab = DiscountedUcbMab::new(vec![1], 1.0, 100.0, -1000.0);
        mab.next_m(ObservationBatch { lat_avg: 10.0, failed: false });
        mab.next_m(ObservationBatch { lat_avg: 10.0, failed: true });
        assert!(mab.s[0] < 0.0);
    }

    #[test]
    fn distributed_pair_enforces_margin() {
        use decentralized::MValuePair;
        assert!(MValuePair::new(1, 3, 2).is_some());
        assert!(MValuePair::new(1, 2, 2).is_none());
    }
}
