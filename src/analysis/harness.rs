/*!
 * Analyzer harness
 *
 * Pumps chunks from a data source, fans each chunk out to every
 * registered analyzer concurrently, polls for convergence-based early
 * stop, and collects per-analyzer results and errors.
 */

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use super::analyzer::StreamingAnalyzer;
use super::results::AnalysisResults;
use crate::error::{NebulaError, Result};
use crate::source::DataSource;

/// Phase reported through the progress callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressPhase {
    /// Before chunk I/O
    Loading,
    /// After I/O, while analyzers accept the chunk
    Processing,
    /// Final completion phase
    Completing,
}

/// `(phase, fraction, processed, total, chunk_number, total_chunks)`
pub type ProgressFn = dyn Fn(ProgressPhase, f64, u64, u64, u64, u64) + Send + Sync;

struct Slot {
    analyzer: Box<dyn StreamingAnalyzer>,
    error: Option<NebulaError>,
}

impl Slot {
    fn is_live(&self) -> bool {
        self.error.is_none()
    }
}

/// Orchestrates one analysis run over a data source
pub struct AnalyzerHarness {
    slots: Vec<Slot>,
    chunk_size: usize,
    fail_fast: bool,
    stop: Arc<AtomicBool>,
    progress: Option<Arc<ProgressFn>>,
}

impl AnalyzerHarness {
    pub fn new(chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(NebulaError::InvalidConfig(
                "harness chunk size must be >= 1".to_string(),
            ));
        }
        Ok(Self {
            slots: Vec::new(),
            chunk_size,
            fail_fast: false,
            stop: Arc::new(AtomicBool::new(false)),
            progress: None,
        })
    }

    /// Add an analyzer; ids must be unique within a harness
    pub fn register(&mut self, analyzer: Box<dyn StreamingAnalyzer>) -> Result<()> {
        let id = analyzer.analyzer_id();
        if self.slots.iter().any(|s| s.analyzer.analyzer_id() == id) {
            return Err(NebulaError::InvalidConfig(format!(
                "analyzer '{}' registered twice",
                id
            )));
        }
        self.slots.push(Slot {
            analyzer,
            error: None,
        });
        Ok(())
    }

    /// Abort the whole run on the first analyzer error
    pub fn fail_fast(mut self, enabled: bool) -> Self {
        self.fail_fast = enabled;
        self
    }

    /// Install a progress callback
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProgressPhase, f64, u64, u64, u64, u64) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(callback));
        self
    }

    /// Handle for cooperative cancellation; observed at chunk
    /// boundaries
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Request a cooperative stop
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    fn report(
        &self,
        phase: ProgressPhase,
        processed: u64,
        total: u64,
        chunk: u64,
        total_chunks: u64,
    ) {
        if let Some(ref progress) = self.progress {
            let fraction = if total > 0 {
                (processed as f64 / total as f64).min(1.0)
            } else {
                0.0
            };
            progress(phase, fraction, processed, total, chunk, total_chunks);
        }
    }

    /// Run every registered analyzer over the source.
    ///
    /// Analyzer failures are isolated into the error map unless
    /// fail-fast is set; source errors abort the run.
    pub fn run(&mut self, source: &dyn DataSource) -> Result<AnalysisResults> {
        let started = Instant::now();

        let shape = source.shape();
        if shape.cardinality == 0 {
            return Err(NebulaError::NoData("data source is empty".to_string()));
        }

        for slot in &mut self.slots {
            if let Err(e) = slot.analyzer.initialize(&shape) {
                let id = slot.analyzer.analyzer_id().to_string();
                tracing::warn!("analyzer {} failed to initialize: {}", id, e);
                if self.fail_fast {
                    return Err(NebulaError::Analyzer {
                        id,
                        message: format!("initialize failed: {}", e),
                    });
                }
                slot.error = Some(e);
            }
        }

        let total = shape.cardinality;
        let total_chunks = total.div_ceil(self.chunk_size as u64);
        let mut processed = 0u64;
        let mut chunk_number = 0u64;

        let mut chunks = source.chunks(self.chunk_size)?;
        loop {
            if self.stop.load(Ordering::Relaxed) {
                tracing::info!("stop requested; finishing after {} chunks", chunk_number);
                break;
            }

            self.report(
                ProgressPhase::Loading,
                processed,
                total,
                chunk_number,
                total_chunks,
            );

            let chunk = match chunks.next() {
                Some(chunk) => chunk?,
                None => break,
            };
            chunk_number += 1;
            let vectors = chunk.vector_count() as u64;
            let start_index = chunk.start_index();

            // One shared columnar view per chunk; analyzers read it
            // concurrently and never copy it
            let columnar = Arc::new(chunk.into_columnar());

            self.report(
                ProgressPhase::Processing,
                processed,
                total,
                chunk_number,
                total_chunks,
            );

            let outcomes: Vec<(usize, Result<()>)> = std::thread::scope(|scope| {
                let mut handles = Vec::new();
                for (index, slot) in self.slots.iter().enumerate() {
                    if !slot.is_live() {
                        continue;
                    }
                    let analyzer = &slot.analyzer;
                    let chunk = Arc::clone(&columnar);
                    handles.push((
                        index,
                        scope.spawn(move || analyzer.accept(&chunk, start_index)),
                    ));
                }
                handles
                    .into_iter()
                    .map(|(index, handle)| {
                        (index, handle.join().expect("analyzer accept panicked"))
                    })
                    .collect()
            });

            for (index, outcome) in outcomes {
                if let Err(e) = outcome {
                    let id = self.slots[index].analyzer.analyzer_id().to_string();
                    tracing::warn!("analyzer {} failed on chunk {}: {}", id, chunk_number, e);
                    if self.fail_fast {
                        return Err(NebulaError::Analyzer {
                            id,
                            message: format!("accept failed: {}", e),
                        });
                    }
                    self.slots[index].error = Some(e);
                }
            }

            processed += vectors;

            if self.check_early_stop_requested() {
                tracing::info!(
                    "analyzers converged after {} of {} chunks",
                    chunk_number,
                    total_chunks
                );
                break;
            }
        }

        self.report(
            ProgressPhase::Completing,
            processed,
            total,
            chunk_number,
            total_chunks,
        );

        let mut results = BTreeMap::new();
        let mut errors = BTreeMap::new();
        for slot in &mut self.slots {
            let id = slot.analyzer.analyzer_id().to_string();
            match slot.error.take() {
                Some(e) => {
                    errors.insert(id, e);
                }
                None => match slot.analyzer.complete() {
                    Ok(output) => {
                        results.insert(id, output);
                    }
                    Err(e) => {
                        if self.fail_fast {
                            return Err(NebulaError::Analyzer {
                                id,
                                message: format!("complete failed: {}", e),
                            });
                        }
                        errors.insert(id, e);
                    }
                },
            }
        }

        Ok(AnalysisResults::new(results, errors, started.elapsed()))
    }

    /// True when every live analyzer that participates in the
    /// convergence protocol has requested a stop (and at least one
    /// does participate)
    fn check_early_stop_requested(&self) -> bool {
        let mut any = false;
        for slot in &self.slots {
            if !slot.is_live() || !slot.analyzer.supports_early_stop() {
                continue;
            }
            any = true;
            if !slot.analyzer.should_stop_early() {
                return false;
            }
        }
        any
    }
}
