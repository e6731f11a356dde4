/*!
 * Adaptive per-dimension fitting
 *
 * The chain tries a single parametric fit, escalates to mixture fits
 * when the dimension looks multimodal or the fit is poor, and falls
 * back to the empirical histogram model. Concrete parametric fitters
 * are injected through the `ComponentFitter` contract.
 */

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use super::model::{
    CompositeComponent, DistributionRegistry, EmpiricalModel, ParametricModel, ScalarModel,
};
use crate::config::{AnalysisConfig, ClusteringStrategy};
use crate::core::StreamingHistogram;
use crate::error::{NebulaError, Result};

/// Penalty added to an empirical fit's score when competing with a
/// parametric fit
pub const EMPIRICAL_PENALTY: f64 = 0.15;

/// Smallest cluster worth fitting a component to
const MIN_CLUSTER_SIZE: usize = 10;

/// Iteration caps for the clustering loops
const MAX_CLUSTER_ITERATIONS: usize = 100;
const MAX_EM_ITERATIONS: usize = 50;

/// A parametric fit produced by an external fitter
#[derive(Debug, Clone, PartialEq)]
pub struct FittedComponent {
    pub model: ParametricModel,
    pub ks_distance: f64,
}

/// Contract for concrete parametric fitters (Normal, Beta, Uniform, ...)
pub trait ComponentFitter: Send + Sync {
    /// Family this fitter produces, matching a registered
    /// `DistributionFamily` name
    fn model_type(&self) -> &str;

    /// Fit the (ascending-sorted) samples, reporting the KS distance of
    /// the fit
    fn fit(&self, sorted_samples: &[f64]) -> Result<FittedComponent>;
}

/// Immutable set of registered component fitters
#[derive(Default)]
pub struct FitterRegistry {
    fitters: Vec<Arc<dyn ComponentFitter>>,
}

impl FitterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, fitter: Arc<dyn ComponentFitter>) {
        self.fitters.push(fitter);
    }

    pub fn is_empty(&self) -> bool {
        self.fitters.is_empty()
    }

    /// Run every fitter and keep the best-scoring result; individual
    /// fitter failures are swallowed
    pub fn best_fit(&self, sorted_samples: &[f64]) -> Option<FittedComponent> {
        let mut best: Option<FittedComponent> = None;
        for fitter in &self.fitters {
            match fitter.fit(sorted_samples) {
                Ok(candidate) => {
                    let better = best
                        .as_ref()
                        .map(|b| candidate.ks_distance < b.ks_distance)
                        .unwrap_or(true);
                    if better {
                        best = Some(candidate);
                    }
                }
                Err(e) => {
                    tracing::debug!("fitter {} failed: {}", fitter.model_type(), e);
                }
            }
        }
        best
    }
}

/// Kolmogorov-Smirnov D statistic between sorted samples and a CDF
pub fn ks_distance<F>(sorted_samples: &[f64], cdf: F) -> f64
where
    F: Fn(f64) -> f64,
{
    let n = sorted_samples.len();
    if n == 0 {
        return 1.0;
    }

    let mut d = 0.0f64;
    for (i, &x) in sorted_samples.iter().enumerate() {
        let f = cdf(x);
        let below = i as f64 / n as f64;
        let above = (i + 1) as f64 / n as f64;
        d = d.max((f - below).abs()).max((f - above).abs());
    }
    d
}

/// Two-sample Kolmogorov-Smirnov D statistic
pub fn two_sample_ks(sorted_a: &[f64], sorted_b: &[f64]) -> f64 {
    if sorted_a.is_empty() || sorted_b.is_empty() {
        return 1.0;
    }

    let (mut i, mut j) = (0usize, 0usize);
    let (n, m) = (sorted_a.len() as f64, sorted_b.len() as f64);
    let mut d = 0.0f64;

    while i < sorted_a.len() && j < sorted_b.len() {
        if sorted_a[i] <= sorted_b[j] {
            i += 1;
        } else {
            j += 1;
        }
        d = d.max((i as f64 / n - j as f64 / m).abs());
    }
    d
}

/// Partition sorted samples into up to `k` clusters with 1-D k-means.
///
/// Centroids start at quantiles, so the procedure is deterministic.
pub fn cluster_hard(sorted_samples: &[f64], k: usize) -> Vec<Vec<f64>> {
    let n = sorted_samples.len();
    if n == 0 || k == 0 {
        return Vec::new();
    }
    if k == 1 {
        return vec![sorted_samples.to_vec()];
    }

    let mut centroids: Vec<f64> = (0..k)
        .map(|i| sorted_samples[((i as f64 + 0.5) / k as f64 * n as f64) as usize % n])
        .collect();

    let mut assignment = vec![0usize; n];
    for _ in 0..MAX_CLUSTER_ITERATIONS {
        // In one dimension the nearest centroid boundaries are the
        // midpoints between consecutive centroids
        let mut changed = false;
        for (i, &x) in sorted_samples.iter().enumerate() {
            let mut best = 0;
            let mut best_distance = f64::INFINITY;
            for (c, &centroid) in centroids.iter().enumerate() {
                let distance = (x - centroid).abs();
                if distance < best_distance {
                    best_distance = distance;
                    best = c;
                }
            }
            if assignment[i] != best {
                assignment[i] = best;
                changed = true;
            }
        }

        let mut sums = vec![0.0f64; k];
        let mut counts = vec![0usize; k];
        for (i, &x) in sorted_samples.iter().enumerate() {
            sums[assignment[i]] += x;
            counts[assignment[i]] += 1;
        }
        for c in 0..k {
            if counts[c] > 0 {
                centroids[c] = sums[c] / counts[c] as f64;
            }
        }

        if !changed {
            break;
        }
    }

    let mut clusters = vec![Vec::new(); k];
    for (i, &x) in sorted_samples.iter().enumerate() {
        clusters[assignment[i]].push(x);
    }
    clusters.retain(|c| !c.is_empty());
    clusters
}

/// Partition sorted samples with a 1-D Gaussian-mixture EM pass,
/// hard-assigning each sample to its highest-responsibility component.
pub fn cluster_em(sorted_samples: &[f64], k: usize) -> Vec<Vec<f64>> {
    let n = sorted_samples.len();
    if n == 0 || k == 0 {
        return Vec::new();
    }
    if k == 1 {
        return vec![sorted_samples.to_vec()];
    }

    let global_mean = sorted_samples.iter().sum::<f64>() / n as f64;
    let global_var = sorted_samples
        .iter()
        .map(|x| (x - global_mean).powi(2))
        .sum::<f64>()
        / n as f64;
    let floor_var = (global_var / (k * k) as f64).max(1e-12);

    let mut means: Vec<f64> = (0..k)
        .map(|i| sorted_samples[((i as f64 + 0.5) / k as f64 * n as f64) as usize % n])
        .collect();
    let mut variances = vec![global_var.max(1e-12); k];
    let mut weights = vec![1.0 / k as f64; k];

    let mut responsibilities = vec![vec![0.0f64; k]; n];
    for _ in 0..MAX_EM_ITERATIONS {
        // E-step
        for (i, &x) in sorted_samples.iter().enumerate() {
            let mut total = 0.0;
            for c in 0..k {
                let var = variances[c].max(floor_var);
                let density = (-0.5 * (x - means[c]).powi(2) / var).exp()
                    / (2.0 * std::f64::consts::PI * var).sqrt();
                responsibilities[i][c] = weights[c] * density;
                total += responsibilities[i][c];
            }
            if total > 0.0 {
                for c in 0..k {
                    responsibilities[i][c] /= total;
                }
            }
        }

        // M-step
        let mut drift = 0.0f64;
        for c in 0..k {
            let resp_total: f64 = responsibilities.iter().map(|r| r[c]).sum();
            if resp_total <= f64::EPSILON {
                continue;
            }
            let new_mean = sorted_samples
                .iter()
                .enumerate()
                .map(|(i, &x)| responsibilities[i][c] * x)
                .sum::<f64>()
                / resp_total;
            let new_var = sorted_samples
                .iter()
                .enumerate()
                .map(|(i, &x)| responsibilities[i][c] * (x - new_mean).powi(2))
                .sum::<f64>()
                / resp_total;

            drift = drift.max((new_mean - means[c]).abs());
            means[c] = new_mean;
            variances[c] = new_var.max(floor_var);
            weights[c] = resp_total / n as f64;
        }

        if drift < 1e-9 {
            break;
        }
    }

    let mut clusters = vec![Vec::new(); k];
    for (i, &x) in sorted_samples.iter().enumerate() {
        let best = (0..k)
            .max_by(|&a, &b| {
                responsibilities[i][a]
                    .partial_cmp(&responsibilities[i][b])
                    .unwrap()
            })
            .unwrap_or(0);
        clusters[best].push(x);
    }
    clusters.retain(|c| !c.is_empty());
    clusters
}

/// Outcome of fitting one dimension
#[derive(Debug, Clone, PartialEq)]
pub struct DimensionFit {
    pub model: ScalarModel,
    pub ks_distance: f64,
}

struct Candidate {
    model: ScalarModel,
    ks: f64,
    /// Parametric < Composite < Empirical when everything else ties
    kind_rank: u8,
}

/// Run the adaptive fit chain for one dimension.
///
/// `seed` makes the internal verification draws reproducible per
/// dimension; everything else in the chain is deterministic.
pub fn fit_dimension(
    samples: &mut Vec<f64>,
    histogram: Option<&StreamingHistogram>,
    config: &AnalysisConfig,
    fitters: &FitterRegistry,
    distributions: &DistributionRegistry,
    seed: u64,
) -> Result<DimensionFit> {
    if samples.is_empty() {
        return Err(NebulaError::NoData(
            "no samples available for fitting".to_string(),
        ));
    }
    samples.sort_by(|a, b| a.partial_cmp(b).unwrap());

    let multimodal = histogram
        .map(|h| h.find_modes(config.prominence_threshold).len() > 1)
        .unwrap_or(false);
    let gapped = histogram
        .map(|h| h.has_significant_gaps(config.prominence_threshold))
        .unwrap_or(false);

    let parametric = fitters.best_fit(samples);
    let mut candidates: Vec<Candidate> = Vec::new();

    // Step 1: accept a clean parametric fit on a unimodal dimension
    if let Some(ref fit) = parametric {
        if fit.ks_distance <= config.ks_threshold_parametric && !multimodal && !gapped {
            let model = ScalarModel::Parametric(fit.model.clone());
            let verified = !config.internal_verification
                || verify_round_trip(&model, samples, config, distributions, seed)?;
            if verified {
                return Ok(DimensionFit {
                    model,
                    ks_distance: fit.ks_distance,
                });
            }
        }
        candidates.push(Candidate {
            model: ScalarModel::Parametric(fit.model.clone()),
            ks: fit.ks_distance,
            kind_rank: 0,
        });
    }

    // Step 2: mixtures, when the shape or the score calls for them
    let parametric_ks = parametric.as_ref().map(|f| f.ks_distance).unwrap_or(f64::MAX);
    let needs_composite = multimodal
        || gapped
        || parametric_ks > 1.5 * config.ks_threshold_parametric;

    if needs_composite && !fitters.is_empty() {
        let composite_threshold = if gapped {
            config.ks_threshold_composite * 1.5
        } else {
            config.ks_threshold_composite
        };

        let mut best_composite: Option<(ScalarModel, f64)> = None;
        for k in 2..=config.max_components {
            let fit = match fit_composite(
                samples,
                k,
                config.clustering_strategy,
                fitters,
                distributions,
            ) {
                Ok(fit) => fit,
                Err(e) => {
                    tracing::debug!("composite fit with {} components failed: {}", k, e);
                    continue;
                }
            };

            if fit.1 <= composite_threshold {
                return Ok(DimensionFit {
                    model: fit.0,
                    ks_distance: fit.1,
                });
            }
            let better = best_composite
                .as_ref()
                .map(|(_, ks)| fit.1 < *ks)
                .unwrap_or(true);
            if better {
                best_composite = Some(fit);
            }
        }

        if let Some((model, ks)) = best_composite {
            candidates.push(Candidate {
                model,
                ks,
                kind_rank: 1,
            });
        }
    }

    // Step 3: empirical fallback, handicapped against the parametric fit
    if let Some(histogram) = histogram {
        if histogram.total_count() > 0 {
            let empirical = EmpiricalModel::from_histogram(histogram)?;
            let ks = ks_distance(samples, |x| empirical.cdf(x));
            candidates.push(Candidate {
                model: ScalarModel::Empirical(empirical),
                ks: ks + EMPIRICAL_PENALTY,
                kind_rank: 2,
            });
        }
    }

    // Final selection: best penalized score, then fewer components,
    // then parametric over composite over empirical
    candidates
        .into_iter()
        .min_by(|a, b| {
            (a.ks, a.model.component_count(), a.kind_rank)
                .partial_cmp(&(b.ks, b.model.component_count(), b.kind_rank))
                .unwrap()
        })
        .map(|c| DimensionFit {
            model: c.model,
            ks_distance: c.ks,
        })
        .ok_or_else(|| {
            NebulaError::Other("every fit option failed for this dimension".to_string())
        })
}

/// Sample the fitted model and compare against the observed samples
/// with a two-sample KS test.
fn verify_round_trip(
    model: &ScalarModel,
    sorted_samples: &[f64],
    config: &AnalysisConfig,
    distributions: &DistributionRegistry,
    seed: u64,
) -> Result<bool> {
    let count = config.verification_level.sample_count();
    let mut rng = StdRng::seed_from_u64(seed);

    let mut generated = Vec::with_capacity(count);
    for _ in 0..count {
        generated.push(model.sample(&mut rng, distributions)?);
    }
    generated.sort_by(|a, b| a.partial_cmp(b).unwrap());

    let d = two_sample_ks(sorted_samples, &generated);
    let (n, m) = (sorted_samples.len() as f64, generated.len() as f64);
    // 95% two-sample critical value, floored by the configured
    // tolerance so tiny reservoirs do not fail spuriously
    let critical = (1.36 * ((n + m) / (n * m)).sqrt()).max(2.0 * config.ks_threshold_parametric);
    Ok(d <= critical)
}

/// Fit a `k`-component mixture: cluster, fit each cluster, weight by
/// cluster mass, and score the whole sample against the mixture CDF.
fn fit_composite(
    sorted_samples: &[f64],
    k: usize,
    strategy: ClusteringStrategy,
    fitters: &FitterRegistry,
    distributions: &DistributionRegistry,
) -> Result<(ScalarModel, f64)> {
    let clusters = match strategy {
        ClusteringStrategy::Hard => cluster_hard(sorted_samples, k),
        ClusteringStrategy::Em => cluster_em(sorted_samples, k),
    };

    if clusters.len() < 2 {
        return Err(NebulaError::Other(format!(
            "clustering produced {} usable clusters",
            clusters.len()
        )));
    }

    let total: usize = clusters.iter().map(|c| c.len()).sum();
    let mut components = Vec::with_capacity(clusters.len());
    for cluster in &clusters {
        if cluster.len() < MIN_CLUSTER_SIZE {
            return Err(NebulaError::Other(format!(
                "cluster of {} samples is too small to fit",
                cluster.len()
            )));
        }
        let fit = fitters
            .best_fit(cluster)
            .ok_or_else(|| NebulaError::Other("no fitter produced a component".to_string()))?;
        components.push(CompositeComponent {
            weight: cluster.len() as f64 / total as f64,
            model: ScalarModel::Parametric(fit.model),
        });
    }

    let model = ScalarModel::composite(components, strategy);
    let ks = ks_distance(sorted_samples, |x| {
        model.cdf(x, distributions).unwrap_or(0.0)
    });
    Ok((model, ks))
}
