/*!
 * Data source over an indexed vector accessor
 */

use std::sync::Arc;

use super::{check_chunk_size, ChunkStream, DataSource};
use crate::core::{DataspaceShape, Layout};
use crate::error::Result;
use crate::reader::IndexedVectorAccessor;

/// Adapts any ordinal-indexed vector collection into a chunked,
/// row-major source via bulk range reads.
pub struct VectorSpaceSource {
    accessor: Arc<dyn IndexedVectorAccessor>,
}

impl VectorSpaceSource {
    pub fn new(accessor: Arc<dyn IndexedVectorAccessor>) -> Self {
        Self { accessor }
    }
}

impl DataSource for VectorSpaceSource {
    fn shape(&self) -> DataspaceShape {
        DataspaceShape {
            cardinality: self.accessor.count(),
            dimensionality: self.accessor.dimension(),
            layout: Layout::RowMajor,
        }
    }

    fn chunks(&self, chunk_size: usize) -> Result<ChunkStream> {
        check_chunk_size(chunk_size)?;

        let accessor = Arc::clone(&self.accessor);
        let cardinality = accessor.count();

        let iter = (0..cardinality)
            .step_by(chunk_size)
            .map(move |start| {
                let end = (start + chunk_size as u64).min(cardinality);
                accessor.read_range(start, end)
            });

        Ok(Box::new(iter))
    }
}
