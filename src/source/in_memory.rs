/*!
 * In-memory row-major data source
 */

use std::sync::Arc;

use super::{check_chunk_size, ChunkStream, DataSource};
use crate::core::{Chunk, DataspaceShape, Layout};
use crate::error::{NebulaError, Result};

/// Wraps a rectangular `[N][D]` buffer; each chunk copies one
/// contiguous run of rows out of the shared backing slab.
#[derive(Debug)]
pub struct InMemorySource {
    data: Arc<Vec<f32>>,
    shape: DataspaceShape,
}

impl InMemorySource {
    /// Wrap a flat row-major buffer of `cardinality * dimensionality`
    /// values
    pub fn new(data: Vec<f32>, cardinality: u64, dimensionality: u32) -> Result<Self> {
        let expected = cardinality * dimensionality as u64;
        if data.len() as u64 != expected {
            return Err(NebulaError::InvalidConfig(format!(
                "buffer length {} does not match {} vectors x {} dimensions",
                data.len(),
                cardinality,
                dimensionality
            )));
        }
        Ok(Self {
            data: Arc::new(data),
            shape: DataspaceShape::new(cardinality, dimensionality, Layout::RowMajor)?,
        })
    }

    /// Build from per-vector rows, checking rectangularity
    pub fn from_vectors(vectors: Vec<Vec<f32>>) -> Result<Self> {
        if vectors.is_empty() {
            return Err(NebulaError::NoData("no vectors supplied".to_string()));
        }
        let dimension = vectors[0].len() as u32;
        let mut data = Vec::with_capacity(vectors.len() * dimension as usize);
        for vector in &vectors {
            if vector.len() as u32 != dimension {
                return Err(NebulaError::DimensionMismatch {
                    expected: dimension,
                    actual: vector.len() as u32,
                });
            }
            data.extend_from_slice(vector);
        }
        Self::new(data, vectors.len() as u64, dimension)
    }
}

impl DataSource for InMemorySource {
    fn shape(&self) -> DataspaceShape {
        self.shape
    }

    fn chunks(&self, chunk_size: usize) -> Result<ChunkStream> {
        check_chunk_size(chunk_size)?;

        let data = Arc::clone(&self.data);
        let cardinality = self.shape.cardinality;
        let dimension = self.shape.dimensionality as usize;

        let iter = (0..cardinality)
            .step_by(chunk_size)
            .map(move |start| {
                let end = (start + chunk_size as u64).min(cardinality);
                let vectors = (end - start) as usize;
                let byte_start = start as usize * dimension;
                let slice = data[byte_start..byte_start + vectors * dimension].to_vec();
                Chunk::new(slice, Layout::RowMajor, vectors, dimension, start)
            });

        Ok(Box::new(iter))
    }
}
