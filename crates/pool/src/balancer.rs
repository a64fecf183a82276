//! Node selection policies.
//!
//! A [`LoadBalancer`] maps a candidate count to an index in
//! `0..candidate_count`. The strategy is resolved into one of the variants
//! once, when the pool is built, and every variant is safe to call from
//! many tasks at once.
//!
//! # Performance
//!
//! Round-robin is a single `fetch_add`. Random and weighted selection take
//! a short `parking_lot` mutex around their RNG.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tidepool_config::LoadBalanceStrategy;
use tracing::{trace, warn};

/// Load balancer resolved from a [`LoadBalanceStrategy`].
#[derive(Debug)]
pub enum LoadBalancer {
    RoundRobin(RoundRobin),
    Random(RandomPick),
    Weighted(WeightedRandom),
}

impl LoadBalancer {
    pub fn new(strategy: LoadBalanceStrategy) -> Self {
        trace!(strategy = %strategy, "Creating load balancer");
        match strategy {
            LoadBalanceStrategy::RoundRobin => LoadBalancer::RoundRobin(RoundRobin::new()),
            LoadBalanceStrategy::Random => LoadBalancer::Random(RandomPick::new()),
            LoadBalanceStrategy::Weighted => LoadBalancer::Weighted(WeightedRandom::new()),
        }
    }

    pub fn strategy(&self) -> LoadBalanceStrategy {
        match self {
            LoadBalancer::RoundRobin(_) => LoadBalanceStrategy::RoundRobin,
            LoadBalancer::Random(_) => LoadBalanceStrategy::Random,
            LoadBalancer::Weighted(_) => LoadBalanceStrategy::Weighted,
        }
    }

    /// Pick an index in `0..candidate_count`.
    ///
    /// `weights` are the candidates' weights in candidate order and are only
    /// read by the weighted policy. Returns 0 when `candidate_count` is 0;
    /// callers must reject empty candidate sets themselves.
    #[inline]
    pub fn next(&self, candidate_count: usize, weights: &[u32]) -> usize {
        match self {
            LoadBalancer::RoundRobin(rr) => rr.next(candidate_count),
            LoadBalancer::Random(random) => random.next(candidate_count),
            LoadBalancer::Weighted(weighted) => weighted.next(candidate_count, weights),
        }
    }
}

/// Strict rotation driven by an atomic counter.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the rotation at `start` instead of 0.
    pub fn starting_at(start: usize) -> Self {
        Self {
            counter: AtomicUsize::new(start),
        }
    }

    #[inline]
    pub fn next(&self, candidate_count: usize) -> usize {
        if candidate_count == 0 {
            return 0;
        }
        self.counter.fetch_add(1, Ordering::Relaxed) % candidate_count
    }
}

/// Uniform random pick from a per-balancer RNG.
#[derive(Debug)]
pub struct RandomPick {
    rng: Mutex<StdRng>,
}

impl RandomPick {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic sequence for tests and benchmarks.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    #[inline]
    pub fn next(&self, candidate_count: usize) -> usize {
        if candidate_count == 0 {
            return 0;
        }
        self.rng.lock().gen_range(0..candidate_count)
    }
}

impl Default for RandomPick {
    fn default() -> Self {
        Self::new()
    }
}

/// Random pick proportional to candidate weight.
///
/// When the weight list is shorter than the candidate list, or every
/// weight is zero, selection degrades to round-robin and a warning is
/// logged once.
#[derive(Debug)]
pub struct WeightedRandom {
    rng: Mutex<StdRng>,
    fallback: RoundRobin,
    warned: AtomicBool,
}

impl WeightedRandom {
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// Deterministic sequence for tests and benchmarks.
    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            rng: Mutex::new(rng),
            fallback: RoundRobin::new(),
            warned: AtomicBool::new(false),
        }
    }

    pub fn next(&self, candidate_count: usize, weights: &[u32]) -> usize {
        if candidate_count == 0 {
            return 0;
        }

        let weights = &weights[..weights.len().min(candidate_count)];
        let total: u64 = weights.iter().map(|&w| u64::from(w)).sum();
        if weights.len() < candidate_count || total == 0 {
            self.warn_fallback(candidate_count, weights.len(), total);
            return self.fallback.next(candidate_count);
        }

        let mut point = self.rng.lock().gen_range(0..total);
        for (idx, &weight) in weights.iter().enumerate() {
            let weight = u64::from(weight);
            if point < weight {
                return idx;
            }
            point -= weight;
        }

        // Unreachable while point < total; keep the index in range anyway.
        candidate_count - 1
    }

    fn warn_fallback(&self, candidates: usize, weights: usize, total: u64) {
        if !self.warned.swap(true, Ordering::Relaxed) {
            warn!(
                candidates = candidates,
                weights = weights,
                total_weight = total,
                "Weight list does not cover candidates, falling back to round-robin"
            );
        }
    }
}

impl Default for WeightedRandom {
    fn default() -> Self {
        Self::new()
    }
}
