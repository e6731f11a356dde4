/*!
 * Background-prefetching source wrapper
 *
 * A single producer thread reads ahead from the delegate into a
 * bounded channel while the consumer drains it. The buffer depth
 * follows the memory monitor's recommendation, and the producer backs
 * off (bounded) when pressure is HIGH.
 */

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver};

use super::{ChunkStream, DataSource};
use crate::core::memory::{MemoryPressureMonitor, PressureLevel};
use crate::core::{Chunk, DataspaceShape};
use crate::error::Result;

/// How long the producer waits for memory relief before proceeding
/// anyway (prevents a consumer/producer deadlock under pressure)
const DEFAULT_RELIEF_TIMEOUT: Duration = Duration::from_secs(5);

/// Wraps a source with a double-buffering background reader
pub struct PrefetchingSource {
    delegate: Arc<dyn DataSource>,
    monitor: Arc<MemoryPressureMonitor>,
    configured_depth: usize,
    relief_timeout: Duration,
}

impl PrefetchingSource {
    pub fn new(
        delegate: Arc<dyn DataSource>,
        monitor: Arc<MemoryPressureMonitor>,
        configured_depth: usize,
    ) -> Self {
        Self {
            delegate,
            monitor,
            configured_depth: configured_depth.max(1),
            relief_timeout: DEFAULT_RELIEF_TIMEOUT,
        }
    }

    pub fn with_relief_timeout(mut self, timeout: Duration) -> Self {
        self.relief_timeout = timeout;
        self
    }

    /// Effective buffer depth after consulting the monitor
    pub fn buffer_depth(&self) -> usize {
        self.monitor
            .recommended_prefetch_count(self.configured_depth)
            .max(1)
    }
}

impl DataSource for PrefetchingSource {
    fn shape(&self) -> DataspaceShape {
        self.delegate.shape()
    }

    fn chunks(&self, chunk_size: usize) -> Result<ChunkStream> {
        super::check_chunk_size(chunk_size)?;

        let depth = self.buffer_depth();
        let (tx, rx) = bounded::<Result<Chunk>>(depth);
        let stop = Arc::new(AtomicBool::new(false));

        let delegate = Arc::clone(&self.delegate);
        let monitor = Arc::clone(&self.monitor);
        let relief_timeout = self.relief_timeout;
        let producer_stop = Arc::clone(&stop);

        let handle = std::thread::Builder::new()
            .name("nebula-prefetch".to_string())
            .spawn(move || {
                let iter = match delegate.chunks(chunk_size) {
                    Ok(iter) => iter,
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        return;
                    }
                };

                for item in iter {
                    if producer_stop.load(Ordering::Relaxed) {
                        return;
                    }

                    if monitor.pressure_level() == PressureLevel::High {
                        // On timeout we enqueue anyway; stalling forever
                        // here would deadlock against the consumer
                        if !monitor.wait_for_memory_relief(relief_timeout) {
                            tracing::debug!(
                                "prefetch proceeding under memory pressure after {:?} wait",
                                relief_timeout
                            );
                        }
                    }

                    let was_error = item.is_err();
                    if tx.send(item).is_err() {
                        // Consumer dropped; nothing left to do
                        return;
                    }
                    if was_error {
                        // Producer errors are fatal to the iteration
                        return;
                    }
                }
                // tx drops here; the closed channel is the end-of-stream
                // sentinel
            })
            .expect("failed to spawn prefetch thread");

        Ok(Box::new(PrefetchIter {
            rx: Some(rx),
            stop,
            handle: Some(handle),
        }))
    }
}

struct PrefetchIter {
    rx: Option<Receiver<Result<Chunk>>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Iterator for PrefetchIter {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.rx.as_ref()?.recv().ok();
        if item.is_none() {
            // Stream finished; reap the producer eagerly
            self.shutdown();
        }
        item
    }
}

impl PrefetchIter {
    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        // Dropping the receiver unblocks a producer stuck on send
        self.rx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PrefetchIter {
    fn drop(&mut self) {
        self.shutdown();
    }
}
