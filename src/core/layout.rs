/*!
 * Chunk layouts: row-major and columnar views of 2-D f32 data
 */

use serde::{Deserialize, Serialize};

use crate::error::{NebulaError, Result};

/// Storage order of a chunk's flat buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    /// `[vector][dimension]`
    RowMajor,
    /// `[dimension][vector]`
    Columnar,
}

/// Shape of a dataspace: how many vectors, how wide, and in what order
/// chunks arrive. Immutable; carried through the pipeline unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataspaceShape {
    pub cardinality: u64,
    pub dimensionality: u32,
    pub layout: Layout,
}

impl DataspaceShape {
    pub fn new(cardinality: u64, dimensionality: u32, layout: Layout) -> Result<Self> {
        if dimensionality == 0 {
            return Err(NebulaError::InvalidConfig(
                "dimensionality must be > 0".to_string(),
            ));
        }
        Ok(Self {
            cardinality,
            dimensionality,
            layout,
        })
    }
}

/// A rectangular slice of the dataset.
///
/// The flat buffer is indexed according to `layout`. In row-major order
/// the chunk holds `vectors` rows of `dimensions` columns; in columnar
/// order it holds `dimensions` rows of `vectors` columns. `start_index`
/// is the ordinal of the chunk's first vector within the dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    data: Vec<f32>,
    layout: Layout,
    vectors: usize,
    dimensions: usize,
    start_index: u64,
}

impl Chunk {
    /// Wrap an existing buffer. The buffer length must equal
    /// `vectors * dimensions`.
    pub fn new(
        data: Vec<f32>,
        layout: Layout,
        vectors: usize,
        dimensions: usize,
        start_index: u64,
    ) -> Result<Self> {
        if dimensions == 0 {
            return Err(NebulaError::InvalidConfig(
                "chunk dimension count must be > 0".to_string(),
            ));
        }
        if data.len() != vectors * dimensions {
            return Err(NebulaError::InvalidConfig(format!(
                "chunk buffer length {} does not match {} vectors x {} dimensions",
                data.len(),
                vectors,
                dimensions
            )));
        }
        Ok(Self {
            data,
            layout,
            vectors,
            dimensions,
            start_index,
        })
    }

    /// An all-zero chunk, useful as a write target
    pub fn zeroed(layout: Layout, vectors: usize, dimensions: usize, start_index: u64) -> Self {
        Self {
            data: vec![0.0; vectors * dimensions],
            layout,
            vectors,
            dimensions,
            start_index,
        }
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn vector_count(&self) -> usize {
        self.vectors
    }

    pub fn dimension_count(&self) -> usize {
        self.dimensions
    }

    pub fn start_index(&self) -> u64 {
        self.start_index
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    fn offset(&self, vector: usize, dimension: usize) -> usize {
        debug_assert!(vector < self.vectors && dimension < self.dimensions);
        match self.layout {
            Layout::RowMajor => vector * self.dimensions + dimension,
            Layout::Columnar => dimension * self.vectors + vector,
        }
    }

    /// Value of dimension `d` of vector `v`
    pub fn get(&self, vector: usize, dimension: usize) -> f32 {
        self.data[self.offset(vector, dimension)]
    }

    /// Set dimension `d` of vector `v`
    pub fn set(&mut self, vector: usize, dimension: usize, value: f32) {
        let offset = self.offset(vector, dimension);
        self.data[offset] = value;
    }

    /// Borrow vector `v` as a contiguous slice. Only row-major chunks
    /// store vectors contiguously.
    pub fn vector(&self, v: usize) -> Option<&[f32]> {
        match self.layout {
            Layout::RowMajor => {
                let start = v * self.dimensions;
                Some(&self.data[start..start + self.dimensions])
            }
            Layout::Columnar => None,
        }
    }

    /// Borrow dimension `d` across every vector as a contiguous slice.
    /// Only columnar chunks store dimensions contiguously.
    pub fn dimension_slice(&self, d: usize) -> Option<&[f32]> {
        match self.layout {
            Layout::Columnar => {
                let start = d * self.vectors;
                Some(&self.data[start..start + self.vectors])
            }
            Layout::RowMajor => None,
        }
    }

    /// All values of dimension `d`, gathering when the layout is
    /// row-major
    pub fn dimension_values(&self, d: usize) -> Vec<f32> {
        match self.layout {
            Layout::Columnar => self.dimension_slice(d).unwrap().to_vec(),
            Layout::RowMajor => (0..self.vectors).map(|v| self.get(v, d)).collect(),
        }
    }

    /// Convert to columnar order. Returns the same buffer untouched when
    /// the chunk is already columnar.
    pub fn into_columnar(self) -> Chunk {
        match self.layout {
            Layout::Columnar => self,
            Layout::RowMajor => self.transposed(Layout::Columnar),
        }
    }

    /// Convert to row-major order. Returns the same buffer untouched
    /// when the chunk is already row-major.
    pub fn into_row_major(self) -> Chunk {
        match self.layout {
            Layout::RowMajor => self,
            Layout::Columnar => self.transposed(Layout::RowMajor),
        }
    }

    fn transposed(&self, target: Layout) -> Chunk {
        let mut data = vec![0.0f32; self.data.len()];
        match target {
            // Row-major source: data[v * D + d] -> out[d * N + v]
            Layout::Columnar => {
                for v in 0..self.vectors {
                    for d in 0..self.dimensions {
                        data[d * self.vectors + v] = self.data[v * self.dimensions + d];
                    }
                }
            }
            // Columnar source: data[d * N + v] -> out[v * D + d]
            Layout::RowMajor => {
                for d in 0..self.dimensions {
                    for v in 0..self.vectors {
                        data[v * self.dimensions + d] = self.data[d * self.vectors + v];
                    }
                }
            }
        }
        Chunk {
            data,
            layout: target,
            vectors: self.vectors,
            dimensions: self.dimensions,
            start_index: self.start_index,
        }
    }
}
