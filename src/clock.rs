//! Simulated discrete-time clock and the network's truncated-normal latency
//! distribution.

use rand::Rng;
use rand_distr::{Distribution, Normal};
use std::time::Instant;

/// A monotonic millisecond clock shared by every task in a single
/// simulation run, anchored at the experiment's start. Node actors and the
/// fabric both read it to timestamp awaiting-entry deadlines and delivery
/// times; nobody mutates it, it simply tracks real elapsed wall time, which
/// is what actually advances while tasks await `tokio::time::sleep`.
#[derive(Debug)]
pub struct SimClock {
    start: Instant,
}

impl SimClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Samples one-way link latency from a Normal(mean, std_dev) distribution,
/// clamped to `[0, max_latency_ms]`.
#[derive(Debug, Clone, Copy)]
pub struct LatencyModel {
    mean_ms: f64,
    std_dev_ms: f64,
    max_latency_ms: u64,
}

impl LatencyModel {
    pub fn new(mean_ms: f64, std_dev_ms: f64, max_latency_ms: u64) -> Self {
        Self {
            mean_ms,
            std_dev_ms,
            max_latency_ms,
        }
    }

    /// Draw one latency sample in milliseconds, clamped into range.
    pub fn sample(&self, rng: &mut impl Rng) -> u64 {
        if self.std_dev_ms <= 0.0 {
            return (self.mean_ms.round() as i64).clamp(0, self.max_latency_ms as i64) as u64;
        }
        let dist = Normal::new(self.mean_ms, self.std_dev_ms)
            .expect("latency model configured with a non-finite standard deviation");
        let raw = dist.sample(rng);
        let clamped = raw.max(0.0).min(self.max_latency_ms as f64);
        clamped.round() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn clock_is_monotonic_and_starts_near_zero() {
        let clock = SimClock::new();
        let t0 = clock.now_ms();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let t1 = clock.now_ms();
        assert!(t0 < 50);
        assert!(t1 >= t0);
    }

    #[test]
    fn latency_never_exceeds_max_or_goes_negative() {
        let model = LatencyModel::new(500.0, 400.0, 1000);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            let sample = model.sample(&mut rng);
            assert!(sample <= 1000);
        }
    }

    #[test]
    fn zero_std_dev_is_deterministic() {
        let model = LatencyModel::new(250.0, 0.0, 1000);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(model.sample(&mut rng), 250);
        assert_eq!(model.sample(&mut rng), 250);
    }
}
