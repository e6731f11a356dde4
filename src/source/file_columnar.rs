/*!
 * File-backed columnar data source
 */

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{check_chunk_size, ChunkStream, DataSource};
use crate::core::{ChunkSizer, DataspaceShape, Layout};
use crate::error::Result;
use crate::reader::{VectorFileReader, VectorFileMetadata};

/// Reads transposed (columnar) chunks straight out of a vector file
/// through an injected `VectorFileReader`.
pub struct ColumnarFileSource {
    path: PathBuf,
    reader: Arc<dyn VectorFileReader>,
    metadata: VectorFileMetadata,
    sizer: ChunkSizer,
}

impl ColumnarFileSource {
    pub fn open(
        path: &Path,
        reader: Arc<dyn VectorFileReader>,
        sizer: ChunkSizer,
    ) -> Result<Self> {
        let metadata = reader.metadata(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            reader,
            metadata,
            sizer,
        })
    }

    /// Chunk cardinality the memory budget allows for this file's
    /// dimensionality
    pub fn optimal_chunk_size(&self) -> Result<usize> {
        self.sizer.chunk_size(self.metadata.dimension)
    }
}

impl DataSource for ColumnarFileSource {
    fn shape(&self) -> DataspaceShape {
        DataspaceShape {
            cardinality: self.metadata.vector_count,
            dimensionality: self.metadata.dimension,
            layout: Layout::Columnar,
        }
    }

    fn chunks(&self, chunk_size: usize) -> Result<ChunkStream> {
        check_chunk_size(chunk_size)?;

        let path = self.path.clone();
        let reader = Arc::clone(&self.reader);
        let cardinality = self.metadata.vector_count;

        let iter = (0..cardinality)
            .step_by(chunk_size)
            .map(move |start| {
                let end = (start + chunk_size as u64).min(cardinality);
                reader.load_transposed(&path, start, end)
            });

        Ok(Box::new(iter))
    }
}
