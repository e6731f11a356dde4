/*!
 * Shared test support: a reference Gaussian family and moment fitter
 *
 * Concrete parametric fitters are injected by callers in production;
 * the integration tests supply this minimal pair.
 */

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use nebula::analysis::{
    ks_distance, ComponentFitter, DistributionFamily, DistributionRegistry, FittedComponent,
    FitterRegistry, ParametricModel,
};
use nebula::{NebulaError, Result};

/// Abramowitz-Stegun 7.1.26 approximation of erf
pub fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.3275911 * x);
    let y = 1.0
        - (((((1.061405429 * t - 1.453152027) * t) + 1.421413741) * t - 0.284496736) * t
            + 0.254829592)
            * t
            * (-x * x).exp();
    sign * y
}

pub fn normal_cdf(mean: f64, std_dev: f64, x: f64) -> f64 {
    0.5 * (1.0 + erf((x - mean) / (std_dev * std::f64::consts::SQRT_2)))
}

pub struct NormalFamily;

impl DistributionFamily for NormalFamily {
    fn name(&self) -> &str {
        "normal"
    }

    fn cdf(&self, params: &[f64], x: f64) -> f64 {
        normal_cdf(params[0], params[1], x)
    }

    fn sample(&self, params: &[f64], rng: &mut StdRng) -> f64 {
        let u1: f64 = rng.random_range(f64::EPSILON..1.0);
        let u2: f64 = rng.random_range(0.0..1.0);
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        params[0] + params[1] * z
    }
}

/// Fits a normal by moment matching and scores it with KS
pub struct NormalMomentFitter;

impl ComponentFitter for NormalMomentFitter {
    fn model_type(&self) -> &str {
        "normal"
    }

    fn fit(&self, sorted_samples: &[f64]) -> Result<FittedComponent> {
        let n = sorted_samples.len() as f64;
        if n < 2.0 {
            return Err(NebulaError::NoData("too few samples to fit".to_string()));
        }
        let mean = sorted_samples.iter().sum::<f64>() / n;
        let variance = sorted_samples
            .iter()
            .map(|x| (x - mean).powi(2))
            .sum::<f64>()
            / n;
        let std_dev = variance.sqrt().max(1e-12);

        let ks = ks_distance(sorted_samples, |x| normal_cdf(mean, std_dev, x));
        Ok(FittedComponent {
            model: ParametricModel {
                name: "normal".to_string(),
                params: vec![mean, std_dev],
            },
            ks_distance: ks,
        })
    }
}

/// Registries wired with the reference family and fitter
pub fn reference_registries() -> (Arc<FitterRegistry>, Arc<DistributionRegistry>) {
    let mut fitters = FitterRegistry::new();
    fitters.register(Arc::new(NormalMomentFitter));
    let mut distributions = DistributionRegistry::new();
    distributions.register(Arc::new(NormalFamily));
    (Arc::new(fitters), Arc::new(distributions))
}

/// `n` Gaussian draws with a fixed seed
pub fn gaussian_draws(seed: u64, n: usize, mean: f64, std_dev: f64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let family = NormalFamily;
    (0..n)
        .map(|_| family.sample(&[mean, std_dev], &mut rng))
        .collect()
}
