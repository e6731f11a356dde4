/*!
 * Streaming analysis: analyzer contract, model extraction, harness
 * orchestration, and NUMA-partitioned fitting
 */

pub mod analyzer;
pub mod convergence;
pub mod extractor;
pub mod fitting;
pub mod harness;
pub mod model;
pub mod numa;
pub mod results;

pub use analyzer::{AnalyzerOutput, AnalyzerRegistry, StreamingAnalyzer};
pub use convergence::{ConvergenceTracker, MIN_SAMPLES};
pub use extractor::{ModelExtractor, MODEL_EXTRACTOR_ID};
pub use fitting::{
    fit_dimension, ks_distance, two_sample_ks, ComponentFitter, DimensionFit, FittedComponent,
    FitterRegistry, EMPIRICAL_PENALTY,
};
pub use harness::{AnalyzerHarness, ProgressPhase};
pub use model::{
    CompositeComponent, DistributionFamily, DistributionRegistry, EmpiricalModel, ParametricModel,
    ScalarModel, VectorSpaceModel,
};
pub use numa::{NumaNode, NumaTopology};
pub use results::AnalysisResults;
