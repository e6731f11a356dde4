/*!
 * Chunked data sources
 *
 * A data source declares its shape and hands out a lazy, finite
 * sequence of chunks in that shape's layout. Sources are read through
 * once per run; the prefetching wrapper overlaps I/O with analysis.
 */

pub mod file_columnar;
pub mod in_memory;
pub mod prefetch;
pub mod vector_space;

pub use file_columnar::ColumnarFileSource;
pub use in_memory::InMemorySource;
pub use prefetch::PrefetchingSource;
pub use vector_space::VectorSpaceSource;

use crate::core::{Chunk, DataspaceShape};
use crate::error::{NebulaError, Result};

/// A lazy stream of chunk results
pub type ChunkStream = Box<dyn Iterator<Item = Result<Chunk>> + Send + 'static>;

/// Source of chunked vector data.
///
/// The last chunk may hold fewer vectors than requested, never fewer
/// dimensions; iterating past the end yields `None` rather than an
/// error.
pub trait DataSource: Send + Sync {
    /// Shape of the full dataset
    fn shape(&self) -> DataspaceShape;

    /// Lazy sequence of chunks of (up to) `chunk_size` vectors
    fn chunks(&self, chunk_size: usize) -> Result<ChunkStream>;

    /// Drive a callback over every chunk, stopping on the first error
    /// or when the callback asks to stop
    fn for_each_chunk<F>(&self, chunk_size: usize, mut callback: F) -> Result<()>
    where
        F: FnMut(&Chunk) -> Result<bool>,
        Self: Sized,
    {
        for chunk in self.chunks(chunk_size)? {
            let chunk = chunk?;
            if !callback(&chunk)? {
                break;
            }
        }
        Ok(())
    }
}

/// Validate a requested chunk size before building an iterator
pub(crate) fn check_chunk_size(chunk_size: usize) -> Result<()> {
    if chunk_size == 0 {
        return Err(NebulaError::InvalidConfig(
            "chunk size must be >= 1".to_string(),
        ));
    }
    Ok(())
}
