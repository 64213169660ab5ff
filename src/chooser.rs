//! Chooser strategies: pure functions over a `loads` vector that return the
//! index of the engine to place a task on.
//!
//! All strategies are deterministic given their RNG source, so tests can seed
//! [`fastrand::Rng`] and assert exact placement sequences.

use std::fmt;

/// Named placement strategy, selected via [`crate::config::SchedulerConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// Always the head of the (LRU-ordered) loads vector.
    Lru,
    /// Uniform random index.
    PlainRandom,
    /// Sample two indices, keep the lesser-loaded.
    TwoBin,
    /// Index of the global minimum (first occurrence on ties).
    LeastLoad,
    /// Sample two indices weighted by inverse load, keep the lesser-loaded.
    Weighted,
    /// Alias for `Lru`; load accounting is disabled by the caller rather than
    /// by the strategy itself (see `add_job`/`finish_job` hooks on the engine
    /// table).
    Pure,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Scheme::Lru => "lru",
            Scheme::PlainRandom => "plainrandom",
            Scheme::TwoBin => "twobin",
            Scheme::LeastLoad => "leastload",
            Scheme::Weighted => "weighted",
            Scheme::Pure => "pure",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Scheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lru" => Ok(Scheme::Lru),
            "plainrandom" => Ok(Scheme::PlainRandom),
            "twobin" => Ok(Scheme::TwoBin),
            "leastload" => Ok(Scheme::LeastLoad),
            "weighted" => Ok(Scheme::Weighted),
            "pure" => Ok(Scheme::Pure),
            other => Err(format!("unknown chooser scheme: {other}")),
        }
    }
}

/// Epsilon added to each load before inversion in the weighted scheme, so a
/// zero-load engine is weighted ~10^6x over a load-1 engine without
/// dividing by zero.
const WEIGHTED_EPSILON: f64 = 1e-6;

/// Pick an index into `loads` according to `scheme`. `loads` must be
/// non-empty; schemes that need randomness draw from `rng`.
pub fn choose(scheme: Scheme, loads: &[u32], rng: &mut fastrand::Rng) -> usize {
    assert!(!loads.is_empty(), "choose called with empty loads vector");
    match scheme {
        Scheme::Lru | Scheme::Pure => lru(loads),
        Scheme::PlainRandom => plainrandom(loads, rng),
        Scheme::TwoBin => twobin(loads, rng),
        Scheme::LeastLoad => leastload(loads),
        Scheme::Weighted => weighted(loads, rng),
    }
}

pub fn lru(_loads: &[u32]) -> usize {
    0
}

pub fn plainrandom(loads: &[u32], rng: &mut fastrand::Rng) -> usize {
    rng.usize(0..loads.len())
}

pub fn twobin(loads: &[u32], rng: &mut fastrand::Rng) -> usize {
    let i = rng.usize(0..loads.len());
    let j = rng.usize(0..loads.len());
    if loads[i] <= loads[j] {
        i
    } else {
        j
    }
}

pub fn leastload(loads: &[u32]) -> usize {
    let mut best = 0;
    for (i, &load) in loads.iter().enumerate().skip(1) {
        if load < loads[best] {
            best = i;
        }
    }
    best
}

pub fn weighted(loads: &[u32], rng: &mut fastrand::Rng) -> usize {
    let weights: Vec<f64> = loads
        .iter()
        .map(|&l| 1.0 / (WEIGHTED_EPSILON + l as f64))
        .collect();
    let total: f64 = weights.iter().sum();
    let i = sample_weighted(&weights, total, rng);
    let j = sample_weighted(&weights, total, rng);
    if loads[i] <= loads[j] {
        i
    } else {
        j
    }
}

fn sample_weighted(weights: &[f64], total: f64, rng: &mut fastrand::Rng) -> usize {
    let point = rng.f64() * total;
    let mut cumulative = 0.0;
    for (i, &w) in weights.iter().enumerate() {
        cumulative += w;
        if point < cumulative {
            return i;
        }
    }
    weights.len() - 1
}
