/*!
 * Memory-budgeted chunk sizing
 *
 * Derives how many vectors a chunk may hold so that the buffer
 * (dimension x chunk_size x 4 bytes x overhead) stays inside the
 * configured share of the memory budget.
 */

use sysinfo::System;

use crate::config::{AnalysisConfig, MemoryBudget};
use crate::error::{NebulaError, Result};

/// Smallest chunk cardinality ever produced
pub const MIN_CHUNK_SIZE: usize = 1_000;

/// Largest chunk cardinality ever produced
pub const MAX_CHUNK_SIZE: usize = 500_000;

const BYTES_PER_VALUE: u64 = 4;

/// Computes memory-safe chunk cardinalities
#[derive(Debug, Clone)]
pub struct ChunkSizer {
    budget: MemoryBudget,
    budget_fraction: f64,
    overhead_factor: f64,
}

impl ChunkSizer {
    /// Create a sizer.
    ///
    /// `budget_fraction` is the share of the resolved budget that chunk
    /// buffers may occupy; `overhead_factor` inflates the raw buffer
    /// size to account for allocation slack.
    pub fn new(budget: MemoryBudget, budget_fraction: f64, overhead_factor: f64) -> Result<Self> {
        if budget_fraction <= 0.0 || budget_fraction > 1.0 {
            return Err(NebulaError::InvalidConfig(format!(
                "budget fraction must be in (0, 1], got {}",
                budget_fraction
            )));
        }
        if overhead_factor < 1.0 {
            return Err(NebulaError::InvalidConfig(format!(
                "overhead factor must be >= 1.0, got {}",
                overhead_factor
            )));
        }
        Ok(Self {
            budget,
            budget_fraction,
            overhead_factor,
        })
    }

    /// A sizer with the library defaults (60% of available memory,
    /// 1.2x overhead)
    pub fn with_defaults() -> Self {
        Self {
            budget: MemoryBudget::Fraction(1.0),
            budget_fraction: 0.6,
            overhead_factor: 1.2,
        }
    }

    /// A sizer wired from an analysis configuration: the budget is the
    /// explicit byte budget when set, otherwise available memory, and
    /// `memory_budget_fraction` is the share chunks may occupy
    pub fn from_config(config: &AnalysisConfig) -> Result<Self> {
        let budget = match config.memory_budget_bytes {
            Some(bytes) => MemoryBudget::Bytes(bytes),
            None => MemoryBudget::Fraction(1.0),
        };
        Self::new(budget, config.memory_budget_fraction, config.overhead_factor)
    }

    /// Chunk cardinality for the given dimensionality, clamped to
    /// `[MIN_CHUNK_SIZE, MAX_CHUNK_SIZE]`
    pub fn chunk_size(&self, dimension: u32) -> Result<usize> {
        self.chunk_size_within(dimension, available_memory_bytes())
    }

    /// Chunk cardinality against an explicit available-memory figure
    pub fn chunk_size_within(&self, dimension: u32, available_bytes: u64) -> Result<usize> {
        if dimension == 0 {
            return Err(NebulaError::InvalidConfig(
                "dimension must be > 0".to_string(),
            ));
        }

        let budget_bytes = self.budget.resolve(available_bytes) as f64 * self.budget_fraction;
        let bytes_per_vector = dimension as u64 * BYTES_PER_VALUE;
        let cost_per_vector = bytes_per_vector as f64 * self.overhead_factor;

        if budget_bytes <= 0.0 || cost_per_vector <= 0.0 {
            return Err(NebulaError::InvalidConfig(
                "memory budget resolves to zero bytes".to_string(),
            ));
        }

        let raw = (budget_bytes / cost_per_vector) as usize;
        Ok(raw.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE))
    }
}

/// Chunk cardinality for a run: the configured explicit size when set,
/// otherwise derived from the memory budget for this dimensionality
pub fn run_chunk_size(config: &AnalysisConfig, dimension: u32) -> Result<usize> {
    if config.explicit_chunk_size > 0 {
        return Ok(config.explicit_chunk_size);
    }
    ChunkSizer::from_config(config)?.chunk_size(dimension)
}

/// Currently available memory on this machine
fn available_memory_bytes() -> u64 {
    let mut system = System::new();
    system.refresh_memory();
    let available = system.available_memory();
    if available > 0 {
        available
    } else {
        system.total_memory()
    }
}
