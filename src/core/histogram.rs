/*!
 * Adaptive streaming histogram with peak and gap detection
 *
 * Fixed bin count, bounds that grow to follow the stream. When a value
 * lands outside the current bounds the range is widened with a 10%
 * margin and existing counts are redistributed by mapping each old
 * bin's center onto the new binning.
 */

use serde::{Deserialize, Serialize};

use crate::error::{NebulaError, Result};

/// Margin added on both sides when bounds expand
const EXPANSION_MARGIN: f64 = 0.10;

/// A retained histogram peak
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mode {
    pub bin_index: usize,
    /// Center of the peak bin
    pub value: f64,
    /// Raw (unsmoothed) count at the peak bin
    pub count: u64,
    pub prominence: f64,
}

/// A low-density region between two peaks
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gap {
    pub start_bin: usize,
    pub end_bin: usize,
    pub start_value: f64,
    pub end_value: f64,
    /// valley height / min(neighbor peak heights); below 0.4 for a gap
    pub contrast_ratio: f64,
    pub width_bins: usize,
}

/// Fixed-bin histogram whose bounds track the observed range
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingHistogram {
    num_bins: usize,
    counts: Vec<u64>,
    min: f64,
    max: f64,
    bounds_initialized: bool,
    total_count: u64,
}

impl StreamingHistogram {
    /// Create a histogram; `num_bins` must be at least 10
    pub fn new(num_bins: usize) -> Result<Self> {
        if num_bins < 10 {
            return Err(NebulaError::InvalidConfig(format!(
                "histogram needs at least 10 bins, got {}",
                num_bins
            )));
        }
        Ok(Self {
            num_bins,
            counts: vec![0; num_bins],
            min: 0.0,
            max: 0.0,
            bounds_initialized: false,
            total_count: 0,
        })
    }

    pub fn num_bins(&self) -> usize {
        self.num_bins
    }

    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn bin_width(&self) -> f64 {
        (self.max - self.min) / self.num_bins as f64
    }

    /// Center of bin `i`
    pub fn bin_center(&self, i: usize) -> f64 {
        self.min + (i as f64 + 0.5) * self.bin_width()
    }

    /// Record one observation
    pub fn add(&mut self, x: f64) {
        if !x.is_finite() {
            return;
        }

        if !self.bounds_initialized {
            self.min = x - 0.5;
            self.max = x + 0.5;
            self.bounds_initialized = true;
        } else if x < self.min || x > self.max {
            self.expand_bounds(x);
        }

        let idx = self.bin_for(x);
        self.counts[idx] += 1;
        self.total_count += 1;
    }

    fn bin_for(&self, x: f64) -> usize {
        let width = self.bin_width();
        if width <= 0.0 {
            return 0;
        }
        (((x - self.min) / width) as usize).min(self.num_bins - 1)
    }

    /// Widen bounds to cover `x` with a 10% margin and remap existing
    /// counts by old-bin-center
    fn expand_bounds(&mut self, x: f64) {
        let new_min = x.min(self.min);
        let new_max = x.max(self.max);
        let margin = (new_max - new_min) * EXPANSION_MARGIN;

        let old_min = self.min;
        let old_width = self.bin_width();
        let old_counts = std::mem::replace(&mut self.counts, vec![0; self.num_bins]);

        self.min = new_min - margin;
        self.max = new_max + margin;

        for (i, &count) in old_counts.iter().enumerate() {
            if count == 0 {
                continue;
            }
            let center = old_min + (i as f64 + 0.5) * old_width;
            let idx = self.bin_for(center);
            self.counts[idx] += count;
        }
    }

    /// Counts smoothed with a centered moving average of `window` bins
    fn smoothed(&self, window: usize) -> Vec<f64> {
        let half = window / 2;
        let n = self.num_bins;
        let mut out = vec![0.0; n];
        for i in 0..n {
            let lo = i.saturating_sub(half);
            let hi = (i + half).min(n - 1);
            let sum: u64 = self.counts[lo..=hi].iter().sum();
            out[i] = sum as f64 / (hi - lo + 1) as f64;
        }
        out
    }

    /// Detect peaks whose prominence clears
    /// `prominence_threshold * max(smoothed)`.
    ///
    /// Prominence is measured against the higher of the two valleys
    /// separating the peak from its nearest higher neighbor (or edge).
    pub fn find_modes(&self, prominence_threshold: f64) -> Vec<Mode> {
        if self.total_count == 0 {
            return Vec::new();
        }

        let smoothed = self.smoothed(3);
        let max_smoothed = smoothed.iter().cloned().fold(0.0, f64::max);
        if max_smoothed <= 0.0 {
            return Vec::new();
        }

        let peaks = local_maxima(&smoothed);
        let min_prominence = prominence_threshold * max_smoothed;

        let mut modes = Vec::new();
        for &peak in &peaks {
            let height = smoothed[peak];
            let left_valley = side_valley(&smoothed, peak, Direction::Left);
            let right_valley = side_valley(&smoothed, peak, Direction::Right);
            let prominence = height - left_valley.max(right_valley);

            if prominence >= min_prominence {
                modes.push(Mode {
                    bin_index: peak,
                    value: self.bin_center(peak),
                    count: self.counts[peak],
                    prominence,
                });
            }
        }
        modes
    }

    /// Detect low-density regions between peaks.
    ///
    /// Uses a width-5 smoothing; a valley below half the global maximum
    /// counts as a gap when its height is under 0.4x the smaller of its
    /// neighboring peaks.
    pub fn gap_analysis(&self, peak_threshold: f64) -> Vec<Gap> {
        if self.total_count == 0 {
            return Vec::new();
        }

        let smoothed = self.smoothed(5);
        let max_smoothed = smoothed.iter().cloned().fold(0.0, f64::max);
        if max_smoothed <= 0.0 {
            return Vec::new();
        }

        let peaks: Vec<usize> = local_maxima(&smoothed)
            .into_iter()
            .filter(|&i| smoothed[i] > peak_threshold * max_smoothed)
            .collect();
        if peaks.len() < 2 {
            return Vec::new();
        }

        let valleys: Vec<usize> = local_minima(&smoothed)
            .into_iter()
            .filter(|&i| smoothed[i] < 0.5 * max_smoothed)
            .collect();

        let mut gaps = Vec::new();
        for &valley in &valleys {
            let left_peak = peaks.iter().rev().find(|&&p| p < valley);
            let right_peak = peaks.iter().find(|&&p| p > valley);
            let (left, right) = match (left_peak, right_peak) {
                (Some(&l), Some(&r)) => (l, r),
                _ => continue,
            };

            let neighbor_floor = smoothed[left].min(smoothed[right]);
            if neighbor_floor <= 0.0 {
                continue;
            }
            let contrast_ratio = smoothed[valley] / neighbor_floor;
            if contrast_ratio >= 0.4 {
                continue;
            }

            // The gap spans outward from the valley until density
            // recovers past half the smaller neighbor peak
            let recovery = 0.5 * neighbor_floor;
            let mut start_bin = valley;
            while start_bin > left && smoothed[start_bin - 1] < recovery {
                start_bin -= 1;
            }
            let mut end_bin = valley;
            while end_bin < right && smoothed[end_bin + 1] < recovery {
                end_bin += 1;
            }

            gaps.push(Gap {
                start_bin,
                end_bin,
                start_value: self.bin_center(start_bin),
                end_value: self.bin_center(end_bin),
                contrast_ratio,
                width_bins: end_bin - start_bin + 1,
            });
        }

        // A wide flat gap yields one valley per plateau bin; keep the
        // deepest representative per span
        gaps.sort_by(|a, b| {
            (a.start_bin, a.contrast_ratio)
                .partial_cmp(&(b.start_bin, b.contrast_ratio))
                .unwrap()
        });
        gaps.dedup_by(|b, a| a.start_bin == b.start_bin && a.end_bin == b.end_bin);
        gaps
    }

    /// True when peaks or gaps indicate more than one population
    pub fn is_multi_modal(&self, prominence_threshold: f64) -> bool {
        self.find_modes(prominence_threshold).len() > 1
            || self.has_significant_gaps(prominence_threshold)
    }

    pub fn has_significant_gaps(&self, peak_threshold: f64) -> bool {
        !self.gap_analysis(peak_threshold).is_empty()
    }
}

#[derive(Clone, Copy)]
enum Direction {
    Left,
    Right,
}

/// Indices that are local maxima of `values`, edges included
fn local_maxima(values: &[f64]) -> Vec<usize> {
    let n = values.len();
    let mut peaks = Vec::new();
    for i in 0..n {
        let left_ok = i == 0 || values[i] > values[i - 1];
        let right_ok = i == n - 1 || values[i] >= values[i + 1];
        if left_ok && right_ok && values[i] > 0.0 {
            peaks.push(i);
        }
    }
    peaks
}

/// Indices that are local minima of `values`, interior only
fn local_minima(values: &[f64]) -> Vec<usize> {
    let n = values.len();
    let mut valleys = Vec::new();
    for i in 1..n.saturating_sub(1) {
        if values[i] <= values[i - 1] && values[i] <= values[i + 1] {
            valleys.push(i);
        }
    }
    valleys
}

/// Minimum value between `peak` and the nearest strictly higher bin
/// (or the edge) on the given side
fn side_valley(values: &[f64], peak: usize, direction: Direction) -> f64 {
    let height = values[peak];
    let mut valley = height;

    match direction {
        Direction::Left => {
            let mut i = peak;
            while i > 0 {
                i -= 1;
                if values[i] > height {
                    break;
                }
                valley = valley.min(values[i]);
            }
        }
        Direction::Right => {
            let mut i = peak;
            while i + 1 < values.len() {
                i += 1;
                if values[i] > height {
                    break;
                }
                valley = valley.min(values[i]);
            }
        }
    }
    valley
}
