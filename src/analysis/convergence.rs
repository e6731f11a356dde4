/*!
 * Standard-error based convergence tracking
 *
 * A dimension is converged when all four moments have stopped moving
 * relative to their standard errors. Checked at chunk boundaries.
 */

use crate::core::DimensionAccumulator;

/// Observations required before convergence may be declared
pub const MIN_SAMPLES: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq)]
struct MomentSnapshot {
    count: u64,
    mean: f64,
    variance: f64,
    skewness: f64,
    kurtosis: f64,
}

/// Tracks moment movement for one dimension
#[derive(Debug, Clone)]
pub struct ConvergenceTracker {
    threshold: f64,
    last: Option<MomentSnapshot>,
    converged: bool,
}

impl ConvergenceTracker {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            last: None,
            converged: false,
        }
    }

    /// Re-evaluate against the accumulator's current moments. Call once
    /// per accepted chunk.
    pub fn check(&mut self, accumulator: &DimensionAccumulator) {
        let current = MomentSnapshot {
            count: accumulator.count(),
            mean: accumulator.mean(),
            variance: accumulator.variance(),
            skewness: accumulator.skewness(),
            kurtosis: accumulator.excess_kurtosis(),
        };

        if let Some(last) = self.last {
            self.converged = current.count >= MIN_SAMPLES && self.all_moments_stable(&last, &current);
        }
        self.last = Some(current);
    }

    fn all_moments_stable(&self, last: &MomentSnapshot, current: &MomentSnapshot) -> bool {
        let n = current.count as f64;
        let std_dev = current.variance.sqrt();

        let se_mean = std_dev / n.sqrt();
        let se_variance = current.variance * (2.0 / n).sqrt();
        let se_skewness = (6.0 / n).sqrt();
        let se_kurtosis = (24.0 / n).sqrt();

        self.moment_stable(current.mean - last.mean, se_mean)
            && self.moment_stable(current.variance - last.variance, se_variance)
            && self.moment_stable(current.skewness - last.skewness, se_skewness)
            && self.moment_stable(current.kurtosis - last.kurtosis, se_kurtosis)
    }

    fn moment_stable(&self, delta: f64, standard_error: f64) -> bool {
        // A degenerate dimension (zero variance) has zero SE for the
        // mean; no movement at all still counts as stable
        delta.abs() < self.threshold * standard_error || delta == 0.0
    }

    pub fn is_converged(&self) -> bool {
        self.converged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn gaussian(rng: &mut StdRng) -> f64 {
        let u1: f64 = rng.random_range(f64::EPSILON..1.0);
        let u2: f64 = rng.random_range(0.0..1.0);
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    }

    #[test]
    fn test_not_converged_before_min_samples() {
        let mut acc = DimensionAccumulator::new();
        let mut tracker = ConvergenceTracker::new(0.5);

        for chunk in 0..4 {
            for i in 0..1000 {
                acc.update(((chunk * 1000 + i) as f64 * 0.37).sin());
            }
            tracker.check(&acc);
        }
        // 4000 samples < MIN_SAMPLES even though the stream is stationary
        assert!(!tracker.is_converged());
    }

    #[test]
    fn test_stationary_stream_converges() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut acc = DimensionAccumulator::new();
        let mut tracker = ConvergenceTracker::new(0.5);

        for _ in 0..20 {
            for _ in 0..1000 {
                acc.update(gaussian(&mut rng));
            }
            tracker.check(&acc);
            if tracker.is_converged() {
                break;
            }
        }
        assert!(tracker.is_converged());
        assert!(acc.count() >= MIN_SAMPLES);
    }

    #[test]
    fn test_shifting_stream_does_not_converge() {
        let mut acc = DimensionAccumulator::new();
        let mut tracker = ConvergenceTracker::new(0.01);

        for chunk in 0..20 {
            // The mean drifts by 10 every chunk; deltas stay far above
            // the shrinking standard errors
            let offset = chunk as f64 * 10.0;
            for i in 0..1000 {
                acc.update(offset + (i as f64 * 0.11).sin());
            }
            tracker.check(&acc);
        }
        assert!(!tracker.is_converged());
    }

    #[test]
    fn test_constant_stream_converges() {
        let mut acc = DimensionAccumulator::new();
        let mut tracker = ConvergenceTracker::new(0.01);

        for _ in 0..7 {
            for _ in 0..1000 {
                acc.update(4.25);
            }
            tracker.check(&acc);
        }
        assert!(tracker.is_converged());
    }
}
