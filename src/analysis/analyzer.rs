/*!
 * Streaming analyzer contract and registry
 */

use std::any::Any;
use std::collections::BTreeMap;

use crate::core::{Chunk, DataspaceShape};
use crate::error::{NebulaError, Result};

/// Output produced by an analyzer's `complete` phase.
///
/// Analyzers define their own output types; results are recovered with
/// a typed downcast.
pub struct AnalyzerOutput(Box<dyn Any + Send>);

impl std::fmt::Debug for AnalyzerOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalyzerOutput").finish_non_exhaustive()
    }
}

impl AnalyzerOutput {
    pub fn new<T: Any + Send>(value: T) -> Self {
        Self(Box::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    pub fn downcast<T: Any>(self) -> std::result::Result<Box<T>, Self> {
        self.0.downcast::<T>().map_err(Self)
    }
}

/// Lifecycle contract for streaming analyzers.
///
/// `initialize` runs once, `accept` runs for every chunk (possibly
/// concurrently from the harness's workers), and `complete` runs once
/// at the end. Chunks arrive in strictly increasing `start_index`
/// order.
pub trait StreamingAnalyzer: Send + Sync {
    /// Stable identifier used for result and error routing
    fn analyzer_id(&self) -> &str;

    /// Called once before any chunks
    fn initialize(&mut self, shape: &DataspaceShape) -> Result<()>;

    /// Called for every chunk; must tolerate concurrent invocations
    fn accept(&self, chunk: &Chunk, start_index: u64) -> Result<()>;

    /// Called once after the last chunk
    fn complete(&mut self) -> Result<AnalyzerOutput>;

    /// Whether this analyzer participates in the convergence protocol
    fn supports_early_stop(&self) -> bool {
        false
    }

    /// Polled by the harness at chunk boundaries
    fn should_stop_early(&self) -> bool {
        false
    }
}

type AnalyzerConstructor = Box<dyn Fn() -> Box<dyn StreamingAnalyzer> + Send + Sync>;

/// Explicit id -> constructor table.
///
/// Built once at startup and immutable afterwards; there is no runtime
/// discovery or reload.
#[derive(Default)]
pub struct AnalyzerRegistry {
    constructors: BTreeMap<String, AnalyzerConstructor>,
}

impl AnalyzerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor under `id`. Duplicate registration is a
    /// configuration error.
    pub fn register<F>(&mut self, id: &str, constructor: F) -> Result<()>
    where
        F: Fn() -> Box<dyn StreamingAnalyzer> + Send + Sync + 'static,
    {
        if self.constructors.contains_key(id) {
            return Err(NebulaError::InvalidConfig(format!(
                "analyzer '{}' is already registered",
                id
            )));
        }
        self.constructors.insert(id.to_string(), Box::new(constructor));
        Ok(())
    }

    /// Instantiate the analyzer registered under `id`
    pub fn create(&self, id: &str) -> Result<Box<dyn StreamingAnalyzer>> {
        self.constructors
            .get(id)
            .map(|ctor| ctor())
            .ok_or_else(|| NebulaError::InvalidConfig(format!("unknown analyzer: {}", id)))
    }

    /// Registered ids in deterministic order
    pub fn ids(&self) -> Vec<&str> {
        self.constructors.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.constructors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constructors.is_empty()
    }
}
