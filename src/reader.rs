/*!
 * Vector file access seams
 *
 * File-format decoding is an external concern; the analysis core only
 * needs shape metadata and transposed range reads. `RawVectorFileReader`
 * is the built-in fallback for the common raw layout: a little-endian
 * u32 dimension before each record's f32 payload.
 */

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::core::{Chunk, Layout};
use crate::error::{NebulaError, Result};

/// Shape metadata of a vector file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorFileMetadata {
    pub vector_count: u64,
    pub dimension: u32,
}

/// Contract for vector-file decoders.
///
/// Implementations are injected by the caller; the core never inspects
/// file formats beyond this interface.
pub trait VectorFileReader: Send + Sync {
    /// Shape of the file without reading its body
    fn metadata(&self, path: &Path) -> Result<VectorFileMetadata>;

    /// Read vectors `[start, end)` as a columnar chunk
    /// (`dimension` rows of `end - start` values)
    fn load_transposed(&self, path: &Path, start: u64, end: u64) -> Result<Chunk>;
}

/// Random access to vectors by ordinal, independent of storage
pub trait IndexedVectorAccessor: Send + Sync {
    /// Total number of vectors
    fn count(&self) -> u64;

    /// Dimensionality of every vector
    fn dimension(&self) -> u32;

    /// Bulk-read vectors `[start, end)` as a row-major chunk
    fn read_range(&self, start: u64, end: u64) -> Result<Chunk>;
}

/// Fallback reader for raw vector files: each record is a little-endian
/// u32 dimension followed by `dimension` little-endian f32 values.
#[derive(Debug, Default, Clone)]
pub struct RawVectorFileReader;

impl RawVectorFileReader {
    pub fn new() -> Self {
        Self
    }

    fn record_bytes(dimension: u32) -> u64 {
        (1 + dimension as u64) * 4
    }

    fn read_dimension(file: &mut File) -> Result<u32> {
        let mut header = [0u8; 4];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut header)?;
        let dimension = u32::from_le_bytes(header);
        if dimension == 0 {
            return Err(NebulaError::NoData(
                "vector file declares zero dimensions".to_string(),
            ));
        }
        Ok(dimension)
    }
}

impl VectorFileReader for RawVectorFileReader {
    fn metadata(&self, path: &Path) -> Result<VectorFileMetadata> {
        let mut file = File::open(path)
            .map_err(|_| NebulaError::NotFound(path.display().to_string()))?;
        let dimension = Self::read_dimension(&mut file)?;

        let file_size = file.metadata()?.len();
        let record = Self::record_bytes(dimension);
        if file_size % record != 0 {
            return Err(NebulaError::Other(format!(
                "file size {} is not a multiple of the {}-byte record",
                file_size, record
            )));
        }

        Ok(VectorFileMetadata {
            vector_count: file_size / record,
            dimension,
        })
    }

    fn load_transposed(&self, path: &Path, start: u64, end: u64) -> Result<Chunk> {
        if end < start {
            return Err(NebulaError::InvalidConfig(format!(
                "invalid vector range [{}, {})",
                start, end
            )));
        }

        let meta = self.metadata(path)?;
        if end > meta.vector_count {
            return Err(NebulaError::InvalidConfig(format!(
                "range end {} exceeds vector count {}",
                end, meta.vector_count
            )));
        }

        let dimension = meta.dimension as usize;
        let vectors = (end - start) as usize;
        let record = Self::record_bytes(meta.dimension);

        let mut file = File::open(path)?;
        file.seek(SeekFrom::Start(start * record))?;

        let mut raw = vec![0u8; vectors * record as usize];
        file.read_exact(&mut raw)?;

        // Transpose while decoding: record v's dimension d lands at
        // data[d * vectors + v]
        let mut data = vec![0.0f32; vectors * dimension];
        for v in 0..vectors {
            let record_base = v * record as usize;
            let declared = u32::from_le_bytes(
                raw[record_base..record_base + 4].try_into().unwrap(),
            );
            if declared != meta.dimension {
                return Err(NebulaError::DimensionMismatch {
                    expected: meta.dimension,
                    actual: declared,
                });
            }
            for d in 0..dimension {
                let offset = record_base + 4 + d * 4;
                let bits = u32::from_le_bytes(raw[offset..offset + 4].try_into().unwrap());
                data[d * vectors + v] = f32::from_bits(bits);
            }
        }

        Chunk::new(data, Layout::Columnar, vectors, dimension, start)
    }
}

/// Accessor over a raw vector file, for sources that want row-major
/// ordinal reads instead of transposed ones
#[derive(Debug, Clone)]
pub struct RawFileAccessor {
    path: PathBuf,
    metadata: VectorFileMetadata,
}

impl RawFileAccessor {
    pub fn open(path: &Path) -> Result<Self> {
        let metadata = RawVectorFileReader::new().metadata(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            metadata,
        })
    }
}

impl IndexedVectorAccessor for RawFileAccessor {
    fn count(&self) -> u64 {
        self.metadata.vector_count
    }

    fn dimension(&self) -> u32 {
        self.metadata.dimension
    }

    fn read_range(&self, start: u64, end: u64) -> Result<Chunk> {
        let columnar = RawVectorFileReader::new().load_transposed(&self.path, start, end)?;
        Ok(columnar.into_row_major())
    }
}

/// Write vectors in the raw record format; test and pipeline support
pub fn write_raw_vectors(path: &Path, vectors: &[Vec<f32>]) -> Result<()> {
    use std::io::Write;

    let mut file = File::create(path)?;
    for vector in vectors {
        let dimension = vector.len() as u32;
        file.write_all(&dimension.to_le_bytes())?;
        for &value in vector {
            file.write_all(&value.to_le_bytes())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_file(dir: &Path) -> PathBuf {
        let path = dir.join("vectors.raw");
        let vectors = vec![
            vec![0.0, 10.0],
            vec![1.0, 11.0],
            vec![2.0, 12.0],
            vec![3.0, 13.0],
        ];
        write_raw_vectors(&path, &vectors).unwrap();
        path
    }

    #[test]
    fn test_metadata() {
        let dir = tempdir().unwrap();
        let path = sample_file(dir.path());

        let meta = RawVectorFileReader::new().metadata(&path).unwrap();
        assert_eq!(meta.vector_count, 4);
        assert_eq!(meta.dimension, 2);
    }

    #[test]
    fn test_metadata_missing_file() {
        let err = RawVectorFileReader::new()
            .metadata(Path::new("/nonexistent/vectors.raw"))
            .unwrap_err();
        assert!(matches!(err, NebulaError::NotFound(_)));
    }

    #[test]
    fn test_load_transposed_full() {
        let dir = tempdir().unwrap();
        let path = sample_file(dir.path());

        let chunk = RawVectorFileReader::new()
            .load_transposed(&path, 0, 4)
            .unwrap();
        assert_eq!(chunk.layout(), Layout::Columnar);
        assert_eq!(chunk.vector_count(), 4);
        assert_eq!(chunk.dimension_count(), 2);
        assert_eq!(chunk.dimension_slice(0), Some(&[0.0, 1.0, 2.0, 3.0][..]));
        assert_eq!(chunk.dimension_slice(1), Some(&[10.0, 11.0, 12.0, 13.0][..]));
    }

    #[test]
    fn test_load_transposed_subrange() {
        let dir = tempdir().unwrap();
        let path = sample_file(dir.path());

        let chunk = RawVectorFileReader::new()
            .load_transposed(&path, 1, 3)
            .unwrap();
        assert_eq!(chunk.start_index(), 1);
        assert_eq!(chunk.vector_count(), 2);
        assert_eq!(chunk.dimension_slice(0), Some(&[1.0, 2.0][..]));
    }

    #[test]
    fn test_range_validation() {
        let dir = tempdir().unwrap();
        let path = sample_file(dir.path());
        let reader = RawVectorFileReader::new();

        assert!(reader.load_transposed(&path, 3, 1).is_err());
        assert!(reader.load_transposed(&path, 0, 5).is_err());
    }

    #[test]
    fn test_accessor_row_major_reads() {
        let dir = tempdir().unwrap();
        let path = sample_file(dir.path());

        let accessor = RawFileAccessor::open(&path).unwrap();
        assert_eq!(accessor.count(), 4);
        assert_eq!(accessor.dimension(), 2);

        let chunk = accessor.read_range(2, 4).unwrap();
        assert_eq!(chunk.layout(), Layout::RowMajor);
        assert_eq!(chunk.vector(0), Some(&[2.0, 12.0][..]));
        assert_eq!(chunk.vector(1), Some(&[3.0, 13.0][..]));
    }

    #[test]
    fn test_corrupt_record_dimension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.raw");
        // First record claims dim 2, second claims dim 3 but the file
        // is sized for dim 2 records
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.extend_from_slice(&1.0f32.to_le_bytes());
        bytes.extend_from_slice(&2.0f32.to_le_bytes());
        bytes.extend_from_slice(&3u32.to_le_bytes());
        bytes.extend_from_slice(&1.0f32.to_le_bytes());
        bytes.extend_from_slice(&2.0f32.to_le_bytes());
        std::fs::write(&path, bytes).unwrap();

        let err = RawVectorFileReader::new()
            .load_transposed(&path, 0, 2)
            .unwrap_err();
        assert!(matches!(err, NebulaError::DimensionMismatch { .. }));
    }
}
