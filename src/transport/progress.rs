/*!
 * Progress-tracking transport decorator
 *
 * Wraps any transport and accumulates cumulative bytes, throughput,
 * and chunk counters, optionally publishing each fetch to a callback.
 */

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use super::{ByteRangeTransport, FetchResult, TransportMetadata};
use crate::error::Result;

/// Snapshot of a transfer in flight
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferSnapshot {
    pub cumulative_bytes: u64,
    pub chunk_index: u64,
    pub total_chunks: u64,
    pub throughput_bytes_per_sec: f64,
}

type ProgressCallback = dyn Fn(&TransferSnapshot) + Send + Sync;

pub struct ProgressTrackingTransport {
    inner: Arc<dyn ByteRangeTransport>,
    cumulative_bytes: AtomicU64,
    chunks_fetched: AtomicU64,
    total_chunks: u64,
    started: Instant,
    callback: Option<Box<ProgressCallback>>,
}

impl ProgressTrackingTransport {
    pub fn new(inner: Arc<dyn ByteRangeTransport>, total_chunks: u64) -> Self {
        Self {
            inner,
            cumulative_bytes: AtomicU64::new(0),
            chunks_fetched: AtomicU64::new(0),
            total_chunks,
            started: Instant::now(),
            callback: None,
        }
    }

    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&TransferSnapshot) + Send + Sync + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Current cumulative progress
    pub fn snapshot(&self) -> TransferSnapshot {
        let cumulative = self.cumulative_bytes.load(Ordering::Relaxed);
        let elapsed = self.started.elapsed().as_secs_f64();
        TransferSnapshot {
            cumulative_bytes: cumulative,
            chunk_index: self.chunks_fetched.load(Ordering::Relaxed),
            total_chunks: self.total_chunks,
            throughput_bytes_per_sec: if elapsed > 0.0 {
                cumulative as f64 / elapsed
            } else {
                0.0
            },
        }
    }
}

impl ByteRangeTransport for ProgressTrackingTransport {
    fn metadata(&self) -> Result<TransportMetadata> {
        self.inner.metadata()
    }

    fn fetch_range(&self, offset: u64, length: u64) -> Result<FetchResult> {
        let result = self.inner.fetch_range(offset, length)?;

        self.cumulative_bytes
            .fetch_add(result.actual_length, Ordering::Relaxed);
        self.chunks_fetched.fetch_add(1, Ordering::Relaxed);

        if let Some(ref callback) = self.callback {
            callback(&self.snapshot());
        }

        Ok(result)
    }
}
