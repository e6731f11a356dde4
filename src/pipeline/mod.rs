/*!
 * Multi-file conversion pipeline
 *
 * A bounded four-stage pipeline: one reader thread feeding a
 * processing queue, a processor pool (optional L2 normalization), a
 * write queue, and a single writer. Backpressure comes from the
 * bounded queues; a shared failure flag stops every stage.
 */

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_channel::bounded;

use crate::error::{NebulaError, Result};
use crate::reader::VectorFileReader;

/// Queue capacity between stages
const STAGE_QUEUE_CAPACITY: usize = 1_000;

/// Vectors read per batched file read
const READ_BATCH: u64 = 1_024;

/// Vectors with a smaller L2 magnitude pass through unnormalized
const NORMALIZE_EPSILON: f64 = 1e-10;

/// Conversion settings
#[derive(Debug, Clone)]
pub struct ConvertConfig {
    /// Scale vectors to unit L2 length
    pub normalize: bool,
    /// Processor threads (0 = available cores)
    pub processors: usize,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            normalize: true,
            processors: 0,
        }
    }
}

impl ConvertConfig {
    fn effective_processors(&self) -> usize {
        if self.processors > 0 {
            return self.processors;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

/// Totals reported after a conversion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConvertStats {
    pub files_read: usize,
    pub vectors_read: u64,
    pub vectors_written: u64,
    pub vectors_normalized: u64,
}

struct Item {
    #[allow(dead_code)]
    file_index: usize,
    values: Vec<f32>,
}

/// Convert `inputs` into a single output file in the raw record
/// format, optionally normalizing every vector.
///
/// All inputs must share one dimensionality; a mismatch fails the whole
/// pipeline. Output order follows processing order, not input order.
pub fn convert_files(
    inputs: &[PathBuf],
    output: &Path,
    reader: Arc<dyn VectorFileReader>,
    config: &ConvertConfig,
) -> Result<ConvertStats> {
    if inputs.is_empty() {
        return Err(NebulaError::NoData("no input files".to_string()));
    }

    let dimension = reader.metadata(&inputs[0])?.dimension;
    let failed = Arc::new(AtomicBool::new(false));
    let first_error: Arc<Mutex<Option<NebulaError>>> = Arc::new(Mutex::new(None));

    let record_error = |error: NebulaError,
                        failed: &AtomicBool,
                        slot: &Mutex<Option<NebulaError>>| {
        failed.store(true, Ordering::Relaxed);
        let mut slot = slot.lock().expect("error slot poisoned");
        if slot.is_none() {
            *slot = Some(error);
        }
    };

    let (process_tx, process_rx) = bounded::<Item>(STAGE_QUEUE_CAPACITY);
    let (write_tx, write_rx) = bounded::<Item>(STAGE_QUEUE_CAPACITY);

    let vectors_read = Arc::new(AtomicU64::new(0));
    let vectors_normalized = Arc::new(AtomicU64::new(0));
    let vectors_written = Arc::new(AtomicU64::new(0));

    std::thread::scope(|scope| {
        // Stage 1: reader
        {
            let reader = Arc::clone(&reader);
            let failed = Arc::clone(&failed);
            let first_error = Arc::clone(&first_error);
            let vectors_read = Arc::clone(&vectors_read);
            let inputs = inputs.to_vec();

            scope.spawn(move || {
                'files: for (file_index, path) in inputs.iter().enumerate() {
                    if failed.load(Ordering::Relaxed) {
                        break;
                    }

                    let meta = match reader.metadata(path) {
                        Ok(meta) => meta,
                        Err(e) => {
                            record_error(e, &failed, &first_error);
                            break;
                        }
                    };
                    if meta.dimension != dimension {
                        record_error(
                            NebulaError::DimensionMismatch {
                                expected: dimension,
                                actual: meta.dimension,
                            },
                            &failed,
                            &first_error,
                        );
                        break;
                    }

                    let mut start = 0u64;
                    while start < meta.vector_count {
                        if failed.load(Ordering::Relaxed) {
                            break 'files;
                        }
                        let end = (start + READ_BATCH).min(meta.vector_count);
                        let chunk = match reader.load_transposed(path, start, end) {
                            Ok(chunk) => chunk,
                            Err(e) => {
                                record_error(e, &failed, &first_error);
                                break 'files;
                            }
                        };
                        for v in 0..chunk.vector_count() {
                            let values: Vec<f32> = (0..chunk.dimension_count())
                                .map(|d| chunk.get(v, d))
                                .collect();
                            vectors_read.fetch_add(1, Ordering::Relaxed);
                            if process_tx.send(Item { file_index, values }).is_err() {
                                break 'files;
                            }
                        }
                        start = end;
                    }
                }
                drop(process_tx);
            });
        }

        // Stage 2: processor pool
        let processors = config.effective_processors();
        for _ in 0..processors {
            let process_rx = process_rx.clone();
            let write_tx = write_tx.clone();
            let failed = Arc::clone(&failed);
            let vectors_normalized = Arc::clone(&vectors_normalized);
            let normalize = config.normalize;

            scope.spawn(move || {
                while let Ok(mut item) = process_rx.recv() {
                    if failed.load(Ordering::Relaxed) {
                        break;
                    }
                    if normalize {
                        let magnitude = item
                            .values
                            .iter()
                            .map(|&x| (x as f64) * (x as f64))
                            .sum::<f64>()
                            .sqrt();
                        if magnitude >= NORMALIZE_EPSILON {
                            for value in &mut item.values {
                                *value = (*value as f64 / magnitude) as f32;
                            }
                            vectors_normalized.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    if write_tx.send(item).is_err() {
                        break;
                    }
                }
            });
        }
        drop(process_rx);
        drop(write_tx);

        // Stage 3: single writer
        {
            let failed = Arc::clone(&failed);
            let first_error = Arc::clone(&first_error);
            let vectors_written = Arc::clone(&vectors_written);
            let output = output.to_path_buf();

            scope.spawn(move || {
                let file = match File::create(&output) {
                    Ok(file) => file,
                    Err(e) => {
                        record_error(NebulaError::Io(e), &failed, &first_error);
                        // Drain so producers do not block forever
                        while write_rx.recv().is_ok() {}
                        return;
                    }
                };
                let mut out = BufWriter::new(file);

                while let Ok(item) = write_rx.recv() {
                    if failed.load(Ordering::Relaxed) {
                        break;
                    }
                    let mut write_record = || -> std::io::Result<()> {
                        out.write_all(&(item.values.len() as u32).to_le_bytes())?;
                        for &value in &item.values {
                            out.write_all(&value.to_le_bytes())?;
                        }
                        Ok(())
                    };
                    if let Err(e) = write_record() {
                        record_error(NebulaError::Io(e), &failed, &first_error);
                        break;
                    }
                    vectors_written.fetch_add(1, Ordering::Relaxed);
                }

                if let Err(e) = out.flush() {
                    record_error(NebulaError::Io(e), &failed, &first_error);
                }
            });
        }
    });

    if let Some(error) = first_error.lock().expect("error slot poisoned").take() {
        let _ = std::fs::remove_file(output);
        return Err(error);
    }

    Ok(ConvertStats {
        files_read: inputs.len(),
        vectors_read: vectors_read.load(Ordering::Relaxed),
        vectors_written: vectors_written.load(Ordering::Relaxed),
        vectors_normalized: vectors_normalized.load(Ordering::Relaxed),
    })
}
