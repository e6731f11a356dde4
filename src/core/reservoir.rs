/*!
 * Reservoir sampling (Algorithm R)
 *
 * Bounded uniform sample over a stream of unknown length, with a
 * deterministic per-seed RNG so identical runs produce identical
 * reservoirs.
 */

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Uniform bounded sample of a value stream
#[derive(Debug, Clone)]
pub struct ReservoirSampler {
    capacity: usize,
    rng: StdRng,
    seen: u64,
    samples: Vec<f64>,
    sampling_enabled: bool,
}

impl ReservoirSampler {
    /// Create a sampler of `capacity` values seeded with `seed`.
    ///
    /// When `expected_total` fits inside the reservoir, sampling is
    /// disabled and every value is kept, making the streaming path
    /// identical to an exact in-memory pass.
    pub fn new(capacity: usize, seed: u64, expected_total: u64) -> Self {
        let sampling_enabled = expected_total > capacity as u64;
        Self {
            capacity,
            rng: StdRng::seed_from_u64(seed),
            seen: 0,
            samples: Vec::with_capacity(capacity.min(expected_total.max(1) as usize)),
            sampling_enabled,
        }
    }

    /// Whether values are being subsampled (false = exhaustive)
    pub fn is_sampling(&self) -> bool {
        self.sampling_enabled
    }

    /// Offer one value from the stream
    pub fn offer(&mut self, x: f64) {
        self.seen += 1;

        if !self.sampling_enabled || self.samples.len() < self.capacity {
            self.samples.push(x);
            return;
        }

        let r = self.rng.random_range(0..self.seen);
        if r < self.capacity as u64 {
            self.samples[r as usize] = x;
        }
    }

    /// Values seen so far (not the reservoir size)
    pub fn seen(&self) -> u64 {
        self.seen
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    /// Consume the sampler and take the reservoir
    pub fn into_samples(self) -> Vec<f64> {
        self.samples
    }
}
