/*!
 * Nebula - Streaming vector-space analysis library
 *
 * Analyzes large collections of high-dimensional f32 vectors without
 * holding them in memory:
 * - Chunked data sources (in-memory, file-backed, prefetching)
 * - Merkle-verified chunked transport for remote inputs
 * - Per-dimension streaming moments, histograms, and shape detection
 * - Adaptive per-dimension distribution fitting with NUMA-aware
 *   parallelism
 * - A multi-analyzer harness with progress, early stop, and
 *   per-analyzer error isolation
 */

pub mod analysis;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod reader;
pub mod source;
pub mod transport;

// Re-export commonly used types for convenience
pub use analysis::{
    AnalysisResults, AnalyzerHarness, AnalyzerOutput, AnalyzerRegistry, ComponentFitter,
    DistributionFamily, DistributionRegistry, FitterRegistry, ModelExtractor, ProgressPhase,
    ScalarModel, StreamingAnalyzer, VectorSpaceModel, MODEL_EXTRACTOR_ID,
};
pub use config::{
    AnalysisConfig, ClusteringStrategy, MemoryBudget, TransportConfig, VerificationLevel,
};
pub use core::{
    Chunk, ChunkSizer, DataspaceShape, DimensionAccumulator, Layout, MemoryPressureMonitor,
    PressureLevel, ReservoirSampler, StreamingHistogram,
};
pub use error::{ErrorCategory, NebulaError, Result};
pub use reader::{IndexedVectorAccessor, RawVectorFileReader, VectorFileReader};
pub use source::{
    ColumnarFileSource, DataSource, InMemorySource, PrefetchingSource, VectorSpaceSource,
};
pub use transport::{
    download_to, open_transport, ByteRangeTransport, DownloadHandle, HttpTransport,
    LocalTransport, MerkleChannel, RetryPolicy,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_default_config_is_usable() {
        let config = AnalysisConfig::default();
        assert!(config.validate().is_ok());
    }
}
