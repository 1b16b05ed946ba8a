//! Pluggable deterministic random streams.
//!
//! The kernel never draws from a `RandomSource` itself. It only holds the
//! one injected at construction so process bodies can reach it through
//! `env.rng()`, which keeps independent runs from sharing random state.

use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// A reseedable pseudo-random stream.
///
/// # Contract
///
/// Two sources of the same type reseeded with the same value must yield
/// identical sequences on every platform.
pub trait RandomSource {
    /// Uniform integer in `[0, n)`. Returns `0` when `n == 0`.
    fn next_below(&mut self, n: u64) -> u64;

    /// Uniform float in `[0.0, 1.0)`.
    fn next_f64(&mut self) -> f64;

    /// Restart the stream from `seed`.
    fn reseed(&mut self, seed: u64);

    /// Uniform integer in `[lo, hi)`. Returns `lo` if `lo >= hi`.
    fn next_range(&mut self, lo: u64, hi: u64) -> u64 {
        if lo >= hi {
            return lo;
        }
        lo + self.next_below(hi - lo)
    }

    /// `true` with probability `p`.
    fn chance(&mut self, p: f64) -> bool {
        self.next_f64() < p
    }
}

// ── SplitMix64 ────────────────────────────────────────────────────────

/// SplitMix64: small, fast, dependency-free.
#[derive(Debug, Clone)]
pub struct SplitMix64 {
    state: u64,
}

impl SplitMix64 {
    pub fn new(seed: u64) -> Self {
        SplitMix64 { state: seed }
    }

    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9e3779b97f4a7c15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
        z ^ (z >> 31)
    }

    /// Current internal state.
    pub fn state(&self) -> u64 {
        self.state
    }
}

impl RandomSource for SplitMix64 {
    fn next_below(&mut self, n: u64) -> u64 {
        if n == 0 {
            return 0;
        }
        self.next_u64() % n
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    fn reseed(&mut self, seed: u64) {
        self.state = seed;
    }
}

// ── ChaCha ────────────────────────────────────────────────────────────

/// ChaCha8-backed source for workloads that want a stronger stream.
#[derive(Debug, Clone)]
pub struct ChaChaSource {
    rng: ChaCha8Rng,
}

impl ChaChaSource {
    pub fn new(seed: u64) -> Self {
        ChaChaSource {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        self.rng.next_u64()
    }
}

impl RandomSource for ChaChaSource {
    fn next_below(&mut self, n: u64) -> u64 {
        if n == 0 {
            return 0;
        }
        self.rng.gen_range(0..n)
    }

    fn next_f64(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }

    fn reseed(&mut self, seed: u64) {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
    }
}
