/*!
 * Configuration structures and defaults for Nebula
 */

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{NebulaError, Result};

/// Clustering strategy for composite (mixture) fits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusteringStrategy {
    /// Hard assignment (k-means style): each sample belongs to one component
    Hard,
    /// Soft assignment with expectation-maximization responsibilities
    Em,
}

impl Default for ClusteringStrategy {
    fn default() -> Self {
        Self::Hard
    }
}

/// How many samples the internal verification round-trip draws
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationLevel {
    Fast,
    Balanced,
    Thorough,
}

impl Default for VerificationLevel {
    fn default() -> Self {
        Self::Balanced
    }
}

impl VerificationLevel {
    /// Number of samples drawn from a fitted model for the round-trip check
    pub fn sample_count(&self) -> usize {
        match self {
            Self::Fast => 500,
            Self::Balanced => 1000,
            Self::Thorough => 5000,
        }
    }
}

/// A memory budget: either an absolute byte count or a fraction of
/// available memory
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MemoryBudget {
    Bytes(u64),
    Fraction(f64),
}

impl MemoryBudget {
    /// Parse a budget spec: `"4g"`, `"512m"`, `"1024k"`, a plain byte
    /// count, or a fraction in (0, 1]
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim().to_lowercase();
        if s.is_empty() {
            return Err(NebulaError::InvalidConfig(
                "empty memory budget spec".to_string(),
            ));
        }

        let (digits, multiplier) = match s.as_bytes()[s.len() - 1] {
            b'g' => (&s[..s.len() - 1], 1024u64 * 1024 * 1024),
            b'm' => (&s[..s.len() - 1], 1024u64 * 1024),
            b'k' => (&s[..s.len() - 1], 1024u64),
            _ => (&s[..], 1u64),
        };

        if multiplier > 1 {
            let value: u64 = digits.parse().map_err(|_| {
                NebulaError::InvalidConfig(format!("invalid memory budget: {}", s))
            })?;
            return Ok(Self::Bytes(value * multiplier));
        }

        // No suffix: integer means bytes, otherwise a fraction
        if let Ok(bytes) = digits.parse::<u64>() {
            return Ok(Self::Bytes(bytes));
        }

        let fraction: f64 = digits
            .parse()
            .map_err(|_| NebulaError::InvalidConfig(format!("invalid memory budget: {}", s)))?;
        if fraction <= 0.0 || fraction > 1.0 {
            return Err(NebulaError::InvalidConfig(format!(
                "memory budget fraction must be in (0, 1], got {}",
                fraction
            )));
        }
        Ok(Self::Fraction(fraction))
    }

    /// Resolve to a byte count against the given available memory
    pub fn resolve(&self, available_bytes: u64) -> u64 {
        match self {
            Self::Bytes(b) => *b,
            Self::Fraction(f) => (available_bytes as f64 * f) as u64,
        }
    }
}

/// Main configuration for an analysis run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Fraction of available memory that chunk buffers may occupy
    pub memory_budget_fraction: f64,

    /// Explicit memory budget in bytes (overrides the fraction when set)
    pub memory_budget_bytes: Option<u64>,

    /// Allocation overhead factor applied to raw chunk sizes
    pub overhead_factor: f64,

    /// Explicit chunk cardinality (0 = derive from the memory budget)
    pub explicit_chunk_size: usize,

    /// Number of chunks the prefetcher keeps in flight
    pub prefetch_count: usize,

    /// Memory pressure thresholds (moderate, high) as used/max ratios
    pub pressure_thresholds: (f64, f64),

    /// Worker parallelism (0 = all cores minus a 10-core reserve)
    pub parallelism: usize,

    /// Partition fitting work across NUMA nodes
    pub numa_aware: bool,

    /// Per-dimension reservoir capacity for fitting samples
    pub reservoir_size: usize,

    /// Whether reservoir sampling is enabled at all
    pub reservoir_sampling: bool,

    /// Base seed for the per-dimension reservoir RNGs
    pub base_seed: u64,

    /// Relative moment-change threshold for convergence detection
    pub convergence_threshold: f64,

    /// Stop the chunk pump once all dimensions converge
    pub early_stopping: bool,

    /// KS acceptance threshold for a single parametric fit
    pub ks_threshold_parametric: f64,

    /// KS acceptance threshold for composite fits
    pub ks_threshold_composite: f64,

    /// Largest mixture size tried for composite fits
    pub max_components: usize,

    /// How composite components are assigned samples
    pub clustering_strategy: ClusteringStrategy,

    /// Re-sample fitted models and verify the KS round-trip
    pub internal_verification: bool,

    /// Sample count used by internal verification
    pub verification_level: VerificationLevel,

    /// Maintain per-dimension histograms (required for shape detection)
    pub histogram_enabled: bool,

    /// Number of histogram bins per dimension
    pub histogram_bins: usize,

    /// Peak prominence threshold for mode detection
    pub prominence_threshold: f64,

    /// Abort the whole run on the first analyzer error
    pub fail_fast: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            memory_budget_fraction: 0.6,
            memory_budget_bytes: None,
            overhead_factor: 1.2,
            explicit_chunk_size: 0, // Auto
            prefetch_count: 2,
            pressure_thresholds: (0.70, 0.85),
            parallelism: 0, // Auto-detect
            numa_aware: true,
            reservoir_size: 10_000,
            reservoir_sampling: true,
            base_seed: 42,
            convergence_threshold: 0.01,
            early_stopping: false,
            ks_threshold_parametric: 0.03,
            ks_threshold_composite: 0.05,
            max_components: 10,
            clustering_strategy: ClusteringStrategy::Hard,
            internal_verification: false,
            verification_level: VerificationLevel::Balanced,
            histogram_enabled: true,
            histogram_bins: 100,
            prominence_threshold: 0.1,
            fail_fast: false,
        }
    }
}

impl AnalysisConfig {
    /// Validate invariants that cannot be expressed in the type system
    pub fn validate(&self) -> Result<()> {
        if self.memory_budget_fraction <= 0.0 || self.memory_budget_fraction > 1.0 {
            return Err(NebulaError::InvalidConfig(format!(
                "memory_budget_fraction must be in (0, 1], got {}",
                self.memory_budget_fraction
            )));
        }
        if self.overhead_factor < 1.0 {
            return Err(NebulaError::InvalidConfig(format!(
                "overhead_factor must be >= 1.0, got {}",
                self.overhead_factor
            )));
        }
        if self.prefetch_count < 1 {
            return Err(NebulaError::InvalidConfig(
                "prefetch_count must be >= 1".to_string(),
            ));
        }
        let (moderate, high) = self.pressure_thresholds;
        if !(moderate > 0.0 && moderate < high && high <= 1.0) {
            return Err(NebulaError::InvalidConfig(format!(
                "pressure thresholds must satisfy 0 < moderate < high <= 1, got ({}, {})",
                moderate, high
            )));
        }
        if self.reservoir_sampling && self.reservoir_size < 1000 {
            return Err(NebulaError::InvalidConfig(format!(
                "reservoir_size must be >= 1000, got {}",
                self.reservoir_size
            )));
        }
        if self.convergence_threshold <= 0.0 || self.convergence_threshold >= 1.0 {
            return Err(NebulaError::InvalidConfig(format!(
                "convergence_threshold must be in (0, 1), got {}",
                self.convergence_threshold
            )));
        }
        if !(2..=10).contains(&self.max_components) {
            return Err(NebulaError::InvalidConfig(format!(
                "max_components must be in [2, 10], got {}",
                self.max_components
            )));
        }
        if self.histogram_bins < 10 {
            return Err(NebulaError::InvalidConfig(format!(
                "histogram_bins must be >= 10, got {}",
                self.histogram_bins
            )));
        }
        if !(0.01..=1.0).contains(&self.prominence_threshold) {
            return Err(NebulaError::InvalidConfig(format!(
                "prominence_threshold must be in [0.01, 1.0], got {}",
                self.prominence_threshold
            )));
        }
        Ok(())
    }

    /// Resolve `parallelism` to a concrete worker count.
    ///
    /// Zero means "all cores minus a 10-core reserve", never less than
    /// one. Detection failure falls back to a single worker.
    pub fn effective_parallelism(&self) -> usize {
        if self.parallelism > 0 {
            return self.parallelism;
        }
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or_else(|e| {
                tracing::warn!(
                    "failed to detect available parallelism: {}; using 1 worker",
                    e
                );
                1
            });
        cores.saturating_sub(10).max(1)
    }

}

/// Transport-layer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Content block size for the Merkle-verified cache (bytes)
    pub block_size: u64,

    /// Maximum fetch attempts per block/chunk
    pub max_attempts: u32,

    /// Chunk size for parallel downloads (bytes)
    pub download_chunk_size: u64,

    /// Parallel range workers for downloads (0 = max(8, cpus/2))
    pub download_parallelism: usize,

    /// Root directory for cached resources
    pub cache_root: Option<PathBuf>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            block_size: 4 * 1024 * 1024,
            max_attempts: 10,
            download_chunk_size: 10 * 1024 * 1024,
            download_parallelism: 0,
            cache_root: None,
        }
    }
}

impl TransportConfig {
    /// Resolve `download_parallelism` to a concrete worker count
    pub fn effective_download_parallelism(&self) -> usize {
        if self.download_parallelism > 0 {
            return self.download_parallelism;
        }
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        (cores / 2).max(8)
    }

    /// Cache path for a resource: `<root>/<dataset>/<profile>/<relative>`
    pub fn cache_path(&self, dataset: &str, profile: &str, relative: &str) -> Option<PathBuf> {
        self.cache_root
            .as_ref()
            .map(|root| root.join(dataset).join(profile).join(relative))
    }
}

/// Configuration file structure (loaded from TOML)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConfigFile {
    #[serde(default)]
    pub analysis: AnalysisDefaults,

    #[serde(default)]
    pub transport: TransportDefaults,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AnalysisDefaults {
    pub memory_budget: Option<String>,
    pub chunk_size: Option<usize>,
    pub prefetch_count: Option<usize>,
    pub parallelism: Option<usize>,
    pub numa_aware: Option<bool>,
    pub reservoir_size: Option<usize>,
    pub early_stopping: Option<bool>,
    pub clustering_strategy: Option<ClusteringStrategy>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TransportDefaults {
    pub block_size: Option<u64>,
    pub max_attempts: Option<u32>,
    pub cache_root: Option<PathBuf>,
}

impl ConfigFile {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| NebulaError::InvalidConfig(format!("failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| NebulaError::InvalidConfig(format!("failed to parse config file: {}", e)))
    }

    /// Load configuration with fallback priority:
    /// 1. ./nebula.toml (project-specific)
    /// 2. ~/.nebula/nebula.toml (user defaults)
    /// 3. Built-in defaults
    pub fn load_with_fallback() -> Self {
        if let Ok(config) = Self::load(Path::new("nebula.toml")) {
            return config;
        }

        if let Some(home) = home_dir() {
            let user_config = home.join(".nebula").join("nebula.toml");
            if let Ok(config) = Self::load(&user_config) {
                return config;
            }
        }

        Self::default()
    }

    /// Apply this config file on top of an AnalysisConfig/TransportConfig pair
    pub fn apply_to(&self, analysis: &mut AnalysisConfig, transport: &mut TransportConfig) {
        if let Some(ref budget) = self.analysis.memory_budget {
            if let Ok(parsed) = MemoryBudget::parse(budget) {
                match parsed {
                    MemoryBudget::Bytes(b) => analysis.memory_budget_bytes = Some(b),
                    MemoryBudget::Fraction(f) => {
                        analysis.memory_budget_bytes = None;
                        analysis.memory_budget_fraction = f;
                    }
                }
            }
        }

        if let Some(chunk_size) = self.analysis.chunk_size {
            analysis.explicit_chunk_size = chunk_size;
        }
        if let Some(prefetch) = self.analysis.prefetch_count {
            analysis.prefetch_count = prefetch;
        }
        if let Some(parallelism) = self.analysis.parallelism {
            analysis.parallelism = parallelism;
        }
        if let Some(numa) = self.analysis.numa_aware {
            analysis.numa_aware = numa;
        }
        if let Some(reservoir) = self.analysis.reservoir_size {
            analysis.reservoir_size = reservoir;
        }
        if let Some(early) = self.analysis.early_stopping {
            analysis.early_stopping = early;
        }
        if let Some(strategy) = self.analysis.clustering_strategy {
            analysis.clustering_strategy = strategy;
        }

        if let Some(block_size) = self.transport.block_size {
            transport.block_size = block_size;
        }
        if let Some(attempts) = self.transport.max_attempts {
            transport.max_attempts = attempts;
        }
        if let Some(ref root) = self.transport.cache_root {
            transport.cache_root = Some(root.clone());
        }
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_budget_parsing() {
        assert_eq!(
            MemoryBudget::parse("4g").unwrap(),
            MemoryBudget::Bytes(4 * 1024 * 1024 * 1024)
        );
        assert_eq!(
            MemoryBudget::parse("512m").unwrap(),
            MemoryBudget::Bytes(512 * 1024 * 1024)
        );
        assert_eq!(
            MemoryBudget::parse("1024k").unwrap(),
            MemoryBudget::Bytes(1024 * 1024)
        );
        assert_eq!(
            MemoryBudget::parse("65536").unwrap(),
            MemoryBudget::Bytes(65536)
        );
        assert_eq!(
            MemoryBudget::parse("0.5").unwrap(),
            MemoryBudget::Fraction(0.5)
        );
        assert_eq!(
            MemoryBudget::parse("1.0").unwrap(),
            MemoryBudget::Fraction(1.0)
        );
    }

    #[test]
    fn test_invalid_memory_budget() {
        assert!(MemoryBudget::parse("").is_err());
        assert!(MemoryBudget::parse("4x").is_err());
        assert!(MemoryBudget::parse("1.5").is_err());
        assert!(MemoryBudget::parse("-0.5").is_err());
        assert!(MemoryBudget::parse("0").is_ok()); // Zero bytes is parseable; sizing rejects it later
    }

    #[test]
    fn test_budget_resolution() {
        assert_eq!(MemoryBudget::Bytes(1024).resolve(1 << 30), 1024);
        assert_eq!(MemoryBudget::Fraction(0.5).resolve(1024), 512);
    }

    #[test]
    fn test_default_config_validates() {
        let config = AnalysisConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.memory_budget_fraction, 0.6);
        assert_eq!(config.overhead_factor, 1.2);
        assert_eq!(config.reservoir_size, 10_000);
        assert_eq!(config.max_components, 10);
    }

    #[test]
    fn test_invalid_configs() {
        let mut config = AnalysisConfig::default();
        config.memory_budget_fraction = 1.5;
        assert!(config.validate().is_err());

        let mut config = AnalysisConfig::default();
        config.overhead_factor = 0.9;
        assert!(config.validate().is_err());

        let mut config = AnalysisConfig::default();
        config.pressure_thresholds = (0.9, 0.7);
        assert!(config.validate().is_err());

        let mut config = AnalysisConfig::default();
        config.max_components = 11;
        assert!(config.validate().is_err());

        let mut config = AnalysisConfig::default();
        config.reservoir_size = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_verification_level_samples() {
        assert_eq!(VerificationLevel::Fast.sample_count(), 500);
        assert_eq!(VerificationLevel::Balanced.sample_count(), 1000);
        assert_eq!(VerificationLevel::Thorough.sample_count(), 5000);
    }

    #[test]
    fn test_effective_parallelism_floor() {
        let config = AnalysisConfig {
            parallelism: 0,
            ..Default::default()
        };
        assert!(config.effective_parallelism() >= 1);

        let config = AnalysisConfig {
            parallelism: 7,
            ..Default::default()
        };
        assert_eq!(config.effective_parallelism(), 7);
    }

    #[test]
    fn test_config_file_apply() {
        let file = ConfigFile {
            analysis: AnalysisDefaults {
                memory_budget: Some("2g".to_string()),
                chunk_size: Some(50_000),
                early_stopping: Some(true),
                ..Default::default()
            },
            transport: TransportDefaults {
                block_size: Some(1 << 20),
                ..Default::default()
            },
        };

        let mut analysis = AnalysisConfig::default();
        let mut transport = TransportConfig::default();
        file.apply_to(&mut analysis, &mut transport);

        assert_eq!(analysis.memory_budget_bytes, Some(2 * 1024 * 1024 * 1024));
        assert_eq!(analysis.explicit_chunk_size, 50_000);
        assert!(analysis.early_stopping);
        assert_eq!(transport.block_size, 1 << 20);
    }

    #[test]
    fn test_config_file_toml_round_trip() {
        let toml_text = r#"
            [analysis]
            memory_budget = "512m"
            parallelism = 4
            clustering_strategy = "em"

            [transport]
            max_attempts = 5
        "#;

        let file: ConfigFile = toml::from_str(toml_text).unwrap();
        assert_eq!(file.analysis.memory_budget.as_deref(), Some("512m"));
        assert_eq!(file.analysis.parallelism, Some(4));
        assert_eq!(
            file.analysis.clustering_strategy,
            Some(ClusteringStrategy::Em)
        );
        assert_eq!(file.transport.max_attempts, Some(5));
    }

    #[test]
    fn test_cache_path_layout() {
        let transport = TransportConfig {
            cache_root: Some(PathBuf::from("/var/cache/nebula")),
            ..Default::default()
        };
        let path = transport
            .cache_path("glove-100", "default", "base.fvec")
            .unwrap();
        assert_eq!(
            path,
            PathBuf::from("/var/cache/nebula/glove-100/default/base.fvec")
        );
    }
}
