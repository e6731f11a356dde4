/*!
 * Scalar distribution models
 *
 * A fitted dimension is one of three shapes: a single parametric
 * distribution, a weighted mixture of sub-models, or an empirical
 * histogram CDF. Parametric behavior (cdf/sampling) is resolved
 * through an explicit name-to-family registry so models serialize as
 * plain data and round-trip structurally.
 */

use std::collections::HashMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::ClusteringStrategy;
use crate::core::StreamingHistogram;
use crate::error::{NebulaError, Result};

/// Behavior of a named parametric family, supplied by the fitter side
pub trait DistributionFamily: Send + Sync {
    /// Family name, e.g. `"normal"`; keys the registry
    fn name(&self) -> &str;

    /// CDF at `x` for the given parameter vector
    fn cdf(&self, params: &[f64], x: f64) -> f64;

    /// Draw one value for the given parameter vector
    fn sample(&self, params: &[f64], rng: &mut StdRng) -> f64;
}

/// Immutable name -> family table, built once at startup
#[derive(Default)]
pub struct DistributionRegistry {
    families: HashMap<String, Arc<dyn DistributionFamily>>,
}

impl DistributionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, family: Arc<dyn DistributionFamily>) {
        self.families.insert(family.name().to_string(), family);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn DistributionFamily>> {
        self.families.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.families.keys().map(|s| s.as_str()).collect()
    }
}

/// A fitted parametric distribution as plain data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParametricModel {
    pub name: String,
    pub params: Vec<f64>,
}

/// Histogram-derived CDF with linear interpolation inside bins
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmpiricalModel {
    /// `num_bins + 1` ascending edges
    bin_edges: Vec<f64>,
    /// Cumulative fraction at each bin's upper edge
    cumulative: Vec<f64>,
}

impl EmpiricalModel {
    /// Build from a populated histogram
    pub fn from_histogram(histogram: &StreamingHistogram) -> Result<Self> {
        let total = histogram.total_count();
        if total == 0 {
            return Err(NebulaError::NoData(
                "cannot build empirical model from empty histogram".to_string(),
            ));
        }

        let num_bins = histogram.num_bins();
        let width = histogram.bin_width();
        let mut bin_edges = Vec::with_capacity(num_bins + 1);
        for i in 0..=num_bins {
            bin_edges.push(histogram.min() + i as f64 * width);
        }

        let mut cumulative = Vec::with_capacity(num_bins);
        let mut running = 0u64;
        for &count in histogram.counts() {
            running += count;
            cumulative.push(running as f64 / total as f64);
        }

        Ok(Self {
            bin_edges,
            cumulative,
        })
    }

    pub fn cdf(&self, x: f64) -> f64 {
        let first = self.bin_edges[0];
        let last = *self.bin_edges.last().unwrap();
        if x <= first {
            return 0.0;
        }
        if x >= last {
            return 1.0;
        }

        let bin = match self
            .bin_edges
            .binary_search_by(|edge| edge.partial_cmp(&x).unwrap())
        {
            Ok(i) => i.saturating_sub(1),
            Err(i) => i - 1,
        }
        .min(self.cumulative.len() - 1);

        let lower_cdf = if bin == 0 { 0.0 } else { self.cumulative[bin - 1] };
        let upper_cdf = self.cumulative[bin];
        let lower_edge = self.bin_edges[bin];
        let upper_edge = self.bin_edges[bin + 1];

        let t = if upper_edge > lower_edge {
            (x - lower_edge) / (upper_edge - lower_edge)
        } else {
            0.0
        };
        lower_cdf + t * (upper_cdf - lower_cdf)
    }

    /// Inverse-transform sampling
    pub fn sample(&self, rng: &mut StdRng) -> f64 {
        let u: f64 = rng.random_range(0.0..1.0);

        let bin = self
            .cumulative
            .partition_point(|&c| c < u)
            .min(self.cumulative.len() - 1);

        let lower_cdf = if bin == 0 { 0.0 } else { self.cumulative[bin - 1] };
        let upper_cdf = self.cumulative[bin];
        let lower_edge = self.bin_edges[bin];
        let upper_edge = self.bin_edges[bin + 1];

        let span = upper_cdf - lower_cdf;
        let t = if span > 0.0 { (u - lower_cdf) / span } else { 0.5 };
        lower_edge + t * (upper_edge - lower_edge)
    }
}

/// One weighted member of a composite model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeComponent {
    pub weight: f64,
    pub model: ScalarModel,
}

/// A fitted per-dimension model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScalarModel {
    Parametric(ParametricModel),
    Composite {
        components: Vec<CompositeComponent>,
        strategy: ClusteringStrategy,
    },
    Empirical(EmpiricalModel),
}

impl ScalarModel {
    /// Build a composite, collapsing the degenerate single-component
    /// case to the component itself
    pub fn composite(
        components: Vec<CompositeComponent>,
        strategy: ClusteringStrategy,
    ) -> ScalarModel {
        let mut components = components;
        if components.len() == 1 {
            return components.remove(0).model;
        }
        ScalarModel::Composite {
            components,
            strategy,
        }
    }

    /// Number of constituent components (1 for non-composites)
    pub fn component_count(&self) -> usize {
        match self {
            ScalarModel::Composite { components, .. } => components.len(),
            _ => 1,
        }
    }

    /// CDF at `x`; parametric families resolve through `registry`
    pub fn cdf(&self, x: f64, registry: &DistributionRegistry) -> Result<f64> {
        match self {
            ScalarModel::Parametric(p) => {
                let family = registry.get(&p.name).ok_or_else(|| {
                    NebulaError::Other(format!("unknown distribution family: {}", p.name))
                })?;
                Ok(family.cdf(&p.params, x))
            }
            ScalarModel::Composite { components, .. } => {
                let mut acc = 0.0;
                for component in components {
                    acc += component.weight * component.model.cdf(x, registry)?;
                }
                Ok(acc)
            }
            ScalarModel::Empirical(e) => Ok(e.cdf(x)),
        }
    }

    /// Draw one value; composite sampling picks a component by weight
    pub fn sample(&self, rng: &mut StdRng, registry: &DistributionRegistry) -> Result<f64> {
        match self {
            ScalarModel::Parametric(p) => {
                let family = registry.get(&p.name).ok_or_else(|| {
                    NebulaError::Other(format!("unknown distribution family: {}", p.name))
                })?;
                Ok(family.sample(&p.params, rng))
            }
            ScalarModel::Composite { components, .. } => {
                let u: f64 = rng.random_range(0.0..1.0);
                let mut acc = 0.0;
                for component in components {
                    acc += component.weight;
                    if u <= acc {
                        return component.model.sample(rng, registry);
                    }
                }
                // Weights sum to 1 up to rounding; fall through to the
                // last component
                components
                    .last()
                    .expect("composite has no components")
                    .model
                    .sample(rng, registry)
            }
            ScalarModel::Empirical(e) => Ok(e.sample(rng)),
        }
    }

    /// Opaque serialized parameter blob
    pub fn parameters(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a blob produced by `parameters`
    pub fn from_parameters(bytes: &[u8]) -> Result<ScalarModel> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Compact description of an analyzed dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorSpaceModel {
    pub unique_vectors: u64,
    pub per_dim_models: Vec<ScalarModel>,
}

impl VectorSpaceModel {
    pub fn dimensionality(&self) -> usize {
        self.per_dim_models.len()
    }
}
