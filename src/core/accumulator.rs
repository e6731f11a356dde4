/*!
 * Streaming moment accumulation for a single dimension
 *
 * Welford-style online updates for the first four central moments plus
 * min/max, with Chan's parallel combine so per-chunk accumulators can
 * be reduced in any order.
 */

use serde::{Deserialize, Serialize};

/// Finalized statistics for one dimension
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DimensionStatistics {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub variance: f64,
    pub std_dev: f64,
    pub skewness: f64,
    pub excess_kurtosis: f64,
}

/// Incremental accumulator for one dimension's moments.
///
/// Not internally synchronized; callers serialize updates per
/// dimension (or keep one accumulator per worker and combine).
#[derive(Debug, Clone, Copy)]
pub struct DimensionAccumulator {
    count: u64,
    mean: f64,
    m2: f64,
    m3: f64,
    m4: f64,
    min: f64,
    max: f64,
}

impl Default for DimensionAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl DimensionAccumulator {
    pub fn new() -> Self {
        Self {
            count: 0,
            mean: 0.0,
            m2: 0.0,
            m3: 0.0,
            m4: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    /// Rebuild an accumulator from externally computed summary
    /// statistics. `kurtosis` is the raw fourth standardized moment
    /// (not excess).
    #[allow(clippy::too_many_arguments)]
    pub fn from_statistics(
        count: u64,
        min: f64,
        max: f64,
        mean: f64,
        variance: f64,
        skewness: f64,
        kurtosis: f64,
    ) -> Self {
        let n = count as f64;
        let std_dev = variance.sqrt();
        Self {
            count,
            mean,
            m2: variance * n,
            m3: skewness * std_dev.powi(3) * n,
            m4: kurtosis * variance * variance * n,
            min,
            max,
        }
    }

    /// Add one observation.
    ///
    /// The fourth and third moments must be updated against the
    /// previous m2/m3; m2 changes last.
    pub fn update(&mut self, x: f64) {
        let n1 = self.count as f64;
        self.count += 1;
        let n = self.count as f64;

        let delta = x - self.mean;
        let delta_n = delta / n;
        let delta_n2 = delta_n * delta_n;
        let term = delta * delta_n * n1;

        self.mean += delta_n;
        self.m4 += term * delta_n2 * (n * n - 3.0 * n + 3.0) + 6.0 * delta_n2 * self.m2
            - 4.0 * delta_n * self.m3;
        self.m3 += term * delta_n * (n - 2.0) - 3.0 * delta_n * self.m2;
        self.m2 += term;

        if x < self.min {
            self.min = x;
        }
        if x > self.max {
            self.max = x;
        }
    }

    /// Merge another accumulator into this one (Chan's formulas).
    ///
    /// Combining with an empty accumulator is the identity; the result
    /// is deterministic for a given pair.
    pub fn combine(&mut self, other: &DimensionAccumulator) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = *other;
            return;
        }

        let n_a = self.count as f64;
        let n_b = other.count as f64;
        let n = n_a + n_b;

        let delta = other.mean - self.mean;
        let delta2 = delta * delta;
        let delta3 = delta2 * delta;
        let delta4 = delta3 * delta;

        let mean = self.mean + delta * n_b / n;

        let m2 = self.m2 + other.m2 + delta2 * n_a * n_b / n;

        let m3 = self.m3
            + other.m3
            + delta3 * n_a * n_b * (n_a - n_b) / (n * n)
            + 3.0 * delta * (n_a * other.m2 - n_b * self.m2) / n;

        let m4 = self.m4
            + other.m4
            + delta4 * n_a * n_b * (n_a * n_a - n_a * n_b + n_b * n_b) / (n * n * n)
            + 6.0 * delta2 * (n_a * n_a * other.m2 + n_b * n_b * self.m2) / (n * n)
            + 4.0 * delta * (n_a * other.m3 - n_b * self.m3) / n;

        self.count += other.count;
        self.mean = mean;
        self.m2 = m2;
        self.m3 = m3;
        self.m4 = m4;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    /// Population variance (m2 / n)
    pub fn variance(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.m2 / self.count as f64
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Standardized third moment; zero for degenerate distributions
    pub fn skewness(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let std_dev = self.std_dev();
        if std_dev > 0.0 {
            (self.m3 / self.count as f64) / std_dev.powi(3)
        } else {
            0.0
        }
    }

    /// Fourth standardized moment minus 3; zero below four samples or
    /// at zero variance
    pub fn excess_kurtosis(&self) -> f64 {
        if self.count < 4 {
            return 0.0;
        }
        let variance = self.variance();
        if variance > 0.0 {
            (self.m4 / self.count as f64) / (variance * variance) - 3.0
        } else {
            0.0
        }
    }

    /// Snapshot of all finalized statistics
    pub fn statistics(&self) -> DimensionStatistics {
        DimensionStatistics {
            count: self.count,
            min: self.min,
            max: self.max,
            mean: self.mean,
            variance: self.variance(),
            std_dev: self.std_dev(),
            skewness: self.skewness(),
            excess_kurtosis: self.excess_kurtosis(),
        }
    }
}
