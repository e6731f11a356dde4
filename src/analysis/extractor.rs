/*!
 * Model extractor analyzer
 *
 * Streams chunks into per-dimension accumulators, histograms, and
 * reservoirs, then fits a scalar model per dimension on completion,
 * fanning the fitting work across NUMA nodes.
 */

use std::sync::{Arc, Mutex};

use rayon::prelude::*;

use super::analyzer::{AnalyzerOutput, StreamingAnalyzer};
use super::convergence::ConvergenceTracker;
use super::fitting::{fit_dimension, FitterRegistry};
use super::model::{DistributionRegistry, VectorSpaceModel};
use super::numa::{run_partitioned, NumaTopology};
use crate::config::AnalysisConfig;
use crate::core::{
    Chunk, DataspaceShape, DimensionAccumulator, ReservoirSampler, StreamingHistogram,
};
use crate::error::{NebulaError, Result};

/// Registry id of the model extractor
pub const MODEL_EXTRACTOR_ID: &str = "model_extractor";

struct DimensionState {
    accumulator: DimensionAccumulator,
    histogram: Option<StreamingHistogram>,
    reservoir: ReservoirSampler,
    tracker: Option<ConvergenceTracker>,
}

/// Streaming analyzer producing a `VectorSpaceModel`
pub struct ModelExtractor {
    config: AnalysisConfig,
    fitters: Arc<FitterRegistry>,
    distributions: Arc<DistributionRegistry>,
    shape: Option<DataspaceShape>,
    dims: Vec<Mutex<DimensionState>>,
}

impl ModelExtractor {
    pub fn new(
        config: AnalysisConfig,
        fitters: Arc<FitterRegistry>,
        distributions: Arc<DistributionRegistry>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            fitters,
            distributions,
            shape: None,
            dims: Vec::new(),
        })
    }

    /// Per-dimension statistics accumulated so far
    pub fn statistics(&self) -> Vec<crate::core::DimensionStatistics> {
        self.dims
            .iter()
            .map(|dim| {
                dim.lock()
                    .expect("dimension lock poisoned")
                    .accumulator
                    .statistics()
            })
            .collect()
    }
}

impl StreamingAnalyzer for ModelExtractor {
    fn analyzer_id(&self) -> &str {
        MODEL_EXTRACTOR_ID
    }

    fn initialize(&mut self, shape: &DataspaceShape) -> Result<()> {
        let dimensions = shape.dimensionality as usize;
        let cardinality = shape.cardinality;

        let mut dims = Vec::with_capacity(dimensions);
        for d in 0..dimensions {
            let histogram = if self.config.histogram_enabled {
                Some(StreamingHistogram::new(self.config.histogram_bins)?)
            } else {
                None
            };

            // Seeded per dimension so reruns reproduce the reservoir;
            // with sampling off the reservoir degenerates to keep-all
            let seed = self.config.base_seed.wrapping_add(d as u64);
            let reservoir = if self.config.reservoir_sampling {
                ReservoirSampler::new(self.config.reservoir_size, seed, cardinality)
            } else {
                ReservoirSampler::new(cardinality.max(1) as usize, seed, cardinality)
            };

            let tracker = if self.config.early_stopping {
                Some(ConvergenceTracker::new(self.config.convergence_threshold))
            } else {
                None
            };

            dims.push(Mutex::new(DimensionState {
                accumulator: DimensionAccumulator::new(),
                histogram,
                reservoir,
                tracker,
            }));
        }

        self.shape = Some(*shape);
        self.dims = dims;
        tracing::debug!(
            "model extractor initialized for {} dims x {} vectors",
            dimensions,
            cardinality
        );
        Ok(())
    }

    fn accept(&self, chunk: &Chunk, _start_index: u64) -> Result<()> {
        if self.dims.is_empty() {
            return Err(NebulaError::Analyzer {
                id: MODEL_EXTRACTOR_ID.to_string(),
                message: "accept called before initialize".to_string(),
            });
        }
        if chunk.dimension_count() != self.dims.len() {
            return Err(NebulaError::DimensionMismatch {
                expected: self.dims.len() as u32,
                actual: chunk.dimension_count() as u32,
            });
        }

        // Dimensions update independently under their own locks; within
        // one dimension the lock serializes concurrent accepts
        (0..self.dims.len()).into_par_iter().for_each(|d| {
            let mut state = self.dims[d].lock().expect("dimension lock poisoned");

            let mut update = |x: f32| {
                let x = x as f64;
                if !x.is_finite() {
                    return;
                }
                state.accumulator.update(x);
                if let Some(ref mut histogram) = state.histogram {
                    histogram.add(x);
                }
                state.reservoir.offer(x);
            };

            match chunk.dimension_slice(d) {
                Some(values) => {
                    for &x in values {
                        update(x);
                    }
                }
                None => {
                    for v in 0..chunk.vector_count() {
                        update(chunk.get(v, d));
                    }
                }
            }

            if state.tracker.is_some() {
                let accumulator = state.accumulator;
                if let Some(ref mut tracker) = state.tracker {
                    tracker.check(&accumulator);
                }
            }
        });

        Ok(())
    }

    fn complete(&mut self) -> Result<AnalyzerOutput> {
        let shape = self.shape.ok_or_else(|| NebulaError::Analyzer {
            id: MODEL_EXTRACTOR_ID.to_string(),
            message: "complete called before initialize".to_string(),
        })?;

        let dims = std::mem::take(&mut self.dims);
        let dimensions = dims.len();
        let unique_vectors = dims
            .first()
            .map(|d| d.lock().expect("dimension lock poisoned").accumulator.count())
            .unwrap_or(0);

        let topology = if self.config.numa_aware {
            NumaTopology::detect()
        } else {
            NumaTopology::single_node()
        };
        let parallelism = self.config.effective_parallelism();
        tracing::debug!(
            "fitting {} dimensions across {} node(s) with parallelism {}",
            dimensions,
            topology.node_count(),
            parallelism
        );

        let config = &self.config;
        let fitters = &self.fitters;
        let distributions = &self.distributions;

        let fits = run_partitioned(dimensions, parallelism, &topology, |d| {
            let state = dims[d].lock().expect("dimension lock poisoned");
            let mut samples = state.reservoir.samples().to_vec();
            let histogram = state.histogram.clone();
            drop(state);

            fit_dimension(
                &mut samples,
                histogram.as_ref(),
                config,
                fitters,
                distributions,
                config.base_seed.wrapping_add(d as u64),
            )
        });

        let mut per_dim_models = Vec::with_capacity(dimensions);
        let mut failures = Vec::new();
        for (d, fit) in fits.into_iter().enumerate() {
            match fit {
                Ok(fit) => per_dim_models.push(fit.model),
                Err(e) => failures.push(format!("dim {}: {}", d, e)),
            }
        }

        if !failures.is_empty() {
            return Err(NebulaError::Analyzer {
                id: MODEL_EXTRACTOR_ID.to_string(),
                message: format!("fitting failed for {}", failures.join("; ")),
            });
        }

        debug_assert_eq!(per_dim_models.len(), shape.dimensionality as usize);
        Ok(AnalyzerOutput::new(VectorSpaceModel {
            unique_vectors,
            per_dim_models,
        }))
    }

    fn supports_early_stop(&self) -> bool {
        self.config.early_stopping
    }

    fn should_stop_early(&self) -> bool {
        if !self.config.early_stopping || self.dims.is_empty() {
            return false;
        }
        self.dims.iter().all(|dim| {
            dim.lock()
                .expect("dimension lock poisoned")
                .tracker
                .as_ref()
                .map(|t| t.is_converged())
                .unwrap_or(false)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::model::ScalarModel;
    use crate::core::Layout;

    fn bare_extractor(config: AnalysisConfig) -> ModelExtractor {
        ModelExtractor::new(
            config,
            Arc::new(FitterRegistry::new()),
            Arc::new(DistributionRegistry::new()),
        )
        .unwrap()
    }

    fn ramp_chunk() -> Chunk {
        // Vectors [0,0], [1,1], [2,2], [3,3]
        Chunk::new(
            vec![0.0, 1.0, 2.0, 3.0, 0.0, 1.0, 2.0, 3.0],
            Layout::Columnar,
            4,
            2,
            0,
        )
        .unwrap()
    }

    #[test]
    fn test_accumulated_statistics() {
        let mut extractor = bare_extractor(AnalysisConfig::default());
        let shape = DataspaceShape::new(4, 2, Layout::Columnar).unwrap();
        extractor.initialize(&shape).unwrap();
        extractor.accept(&ramp_chunk(), 0).unwrap();

        for stats in extractor.statistics() {
            assert_eq!(stats.count, 4);
            assert_eq!(stats.min, 0.0);
            assert_eq!(stats.max, 3.0);
            assert!((stats.mean - 1.5).abs() < 1e-9);
            assert!((stats.variance - 1.25).abs() < 1e-9);
            assert!((stats.std_dev - 1.118033988749895).abs() < 1e-9);
            assert!(stats.skewness.abs() < 1e-9);
            assert!((stats.excess_kurtosis + 1.36).abs() < 1e-9);
        }
    }

    #[test]
    fn test_split_stream_matches_single_chunk() {
        let shape = DataspaceShape::new(4, 2, Layout::Columnar).unwrap();

        let mut whole = bare_extractor(AnalysisConfig::default());
        whole.initialize(&shape).unwrap();
        whole.accept(&ramp_chunk(), 0).unwrap();

        let mut split = bare_extractor(AnalysisConfig::default());
        split.initialize(&shape).unwrap();
        let first = Chunk::new(vec![0.0, 1.0, 0.0, 1.0], Layout::Columnar, 2, 2, 0).unwrap();
        let second = Chunk::new(vec![2.0, 3.0, 2.0, 3.0], Layout::Columnar, 2, 2, 2).unwrap();
        split.accept(&first, 0).unwrap();
        split.accept(&second, 2).unwrap();

        let a = whole.statistics();
        let b = split.statistics();
        for (x, y) in a.iter().zip(&b) {
            assert!((x.mean - y.mean).abs() < 1e-12);
            assert!((x.variance - y.variance).abs() < 1e-12);
            assert!((x.excess_kurtosis - y.excess_kurtosis).abs() < 1e-12);
        }
    }

    #[test]
    fn test_row_major_chunks_accepted() {
        let mut extractor = bare_extractor(AnalysisConfig::default());
        let shape = DataspaceShape::new(3, 2, Layout::RowMajor).unwrap();
        extractor.initialize(&shape).unwrap();

        let chunk = Chunk::new(
            vec![1.0, 10.0, 2.0, 20.0, 3.0, 30.0],
            Layout::RowMajor,
            3,
            2,
            0,
        )
        .unwrap();
        extractor.accept(&chunk, 0).unwrap();

        let stats = extractor.statistics();
        assert!((stats[0].mean - 2.0).abs() < 1e-9);
        assert!((stats[1].mean - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let mut extractor = bare_extractor(AnalysisConfig::default());
        let shape = DataspaceShape::new(4, 3, Layout::Columnar).unwrap();
        extractor.initialize(&shape).unwrap();

        let err = extractor.accept(&ramp_chunk(), 0).unwrap_err();
        assert!(matches!(err, NebulaError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_early_stop_requires_convergence() {
        let mut config = AnalysisConfig::default();
        config.early_stopping = true;
        let mut extractor = bare_extractor(config);
        let shape = DataspaceShape::new(100_000, 1, Layout::Columnar).unwrap();
        extractor.initialize(&shape).unwrap();

        assert!(extractor.supports_early_stop());
        assert!(!extractor.should_stop_early());

        // A stationary constant stream converges quickly once past the
        // minimum sample count
        for chunk_index in 0..8 {
            let data = vec![5.0f32; 1000];
            let chunk = Chunk::new(data, Layout::Columnar, 1000, 1, chunk_index * 1000).unwrap();
            extractor.accept(&chunk, chunk_index * 1000).unwrap();
        }
        assert!(extractor.should_stop_early());
    }

    #[test]
    fn test_complete_without_fitters_uses_empirical() {
        let mut extractor = bare_extractor(AnalysisConfig::default());
        let shape = DataspaceShape::new(4, 2, Layout::Columnar).unwrap();
        extractor.initialize(&shape).unwrap();
        extractor.accept(&ramp_chunk(), 0).unwrap();

        let output = extractor.complete().unwrap();
        let model = output.downcast_ref::<VectorSpaceModel>().unwrap();
        assert_eq!(model.unique_vectors, 4);
        assert_eq!(model.dimensionality(), 2);
        for dim_model in &model.per_dim_models {
            assert!(matches!(dim_model, ScalarModel::Empirical(_)));
        }
    }

    #[test]
    fn test_complete_fails_with_no_options() {
        let mut config = AnalysisConfig::default();
        config.histogram_enabled = false;
        let mut extractor = bare_extractor(config);
        let shape = DataspaceShape::new(4, 1, Layout::Columnar).unwrap();
        extractor.initialize(&shape).unwrap();

        let chunk = Chunk::new(vec![1.0, 2.0, 3.0, 4.0], Layout::Columnar, 4, 1, 0).unwrap();
        extractor.accept(&chunk, 0).unwrap();

        let err = extractor.complete().unwrap_err();
        assert!(matches!(err, NebulaError::Analyzer { .. }));
    }
}
