/*!
 * Merkle tree over fixed-size content blocks, with a sidecar file
 *
 * The sidecar lives next to the cache file and records the block
 * size, resource size, per-block blake3 hashes, and the tree root.
 * Layout: 4-byte magic `NBMK`, little-endian u16 version, little-endian
 * u64 payload length, bincode payload.
 */

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::ByteRangeTransport;
use crate::error::{NebulaError, Result};

/// Suffix appended to the cache file's path
pub const SIDECAR_SUFFIX: &str = ".nbmk";

const SIDECAR_MAGIC: &[u8; 4] = b"NBMK";
const SIDECAR_VERSION: u16 = 1;

/// Hash one content block
pub fn hash_block(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Merkle tree reduced from per-block hashes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleTree {
    root: [u8; 32],
    leaves: Vec<[u8; 32]>,
}

impl MerkleTree {
    /// Build from leaf hashes. An odd node at any level is promoted
    /// unchanged; an empty tree hashes the empty string.
    pub fn from_leaves(leaves: Vec<[u8; 32]>) -> Self {
        let root = Self::reduce(&leaves);
        Self { root, leaves }
    }

    fn reduce(leaves: &[[u8; 32]]) -> [u8; 32] {
        if leaves.is_empty() {
            return hash_block(&[]);
        }

        let mut level: Vec<[u8; 32]> = leaves.to_vec();
        while level.len() > 1 {
            let mut next = Vec::with_capacity(level.len().div_ceil(2));
            for pair in level.chunks(2) {
                if pair.len() == 2 {
                    let mut hasher = blake3::Hasher::new();
                    hasher.update(&pair[0]);
                    hasher.update(&pair[1]);
                    next.push(*hasher.finalize().as_bytes());
                } else {
                    next.push(pair[0]);
                }
            }
            level = next;
        }
        level[0]
    }

    pub fn root(&self) -> &[u8; 32] {
        &self.root
    }

    pub fn leaves(&self) -> &[[u8; 32]] {
        &self.leaves
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SidecarPayload {
    block_size: u64,
    resource_size: u64,
    root: [u8; 32],
    block_hashes: Vec<[u8; 32]>,
}

/// Persisted per-block hashes for one cached resource
#[derive(Debug, Clone, PartialEq)]
pub struct MerkleSidecar {
    pub block_size: u64,
    pub resource_size: u64,
    pub root: [u8; 32],
    pub block_hashes: Vec<[u8; 32]>,
}

impl MerkleSidecar {
    /// Sidecar path for a cache file
    pub fn path_for(cache_path: &Path) -> PathBuf {
        let mut name = cache_path.as_os_str().to_os_string();
        name.push(SIDECAR_SUFFIX);
        PathBuf::from(name)
    }

    /// Number of blocks the resource splits into
    pub fn block_count(&self) -> u64 {
        if self.block_size == 0 {
            return 0;
        }
        self.resource_size.div_ceil(self.block_size)
    }

    /// Build by streaming the whole resource through the transport,
    /// hashing each block
    pub fn build_from_transport(
        transport: &dyn ByteRangeTransport,
        block_size: u64,
    ) -> Result<Self> {
        if block_size == 0 {
            return Err(NebulaError::InvalidConfig(
                "block size must be > 0".to_string(),
            ));
        }

        let resource_size = transport.metadata()?.size;
        let block_count = resource_size.div_ceil(block_size);

        let mut block_hashes = Vec::with_capacity(block_count as usize);
        for block in 0..block_count {
            let offset = block * block_size;
            let length = block_size.min(resource_size - offset);
            let fetched = transport.fetch_range(offset, length)?;
            if fetched.actual_length != length {
                return Err(NebulaError::Transport(format!(
                    "short read building sidecar: wanted {} bytes at {}, got {}",
                    length, offset, fetched.actual_length
                )));
            }
            block_hashes.push(hash_block(&fetched.data));
        }

        let tree = MerkleTree::from_leaves(block_hashes.clone());
        Ok(Self {
            block_size,
            resource_size,
            root: *tree.root(),
            block_hashes,
        })
    }

    /// Write the sidecar next to `cache_path`
    pub fn save(&self, cache_path: &Path) -> Result<()> {
        let payload = SidecarPayload {
            block_size: self.block_size,
            resource_size: self.resource_size,
            root: self.root,
            block_hashes: self.block_hashes.clone(),
        };
        let encoded = bincode::serialize(&payload)
            .map_err(|e| NebulaError::Other(format!("sidecar serialization error: {}", e)))?;

        let mut file = File::create(Self::path_for(cache_path))?;
        file.write_all(SIDECAR_MAGIC)?;
        file.write_all(&SIDECAR_VERSION.to_le_bytes())?;
        file.write_all(&(encoded.len() as u64).to_le_bytes())?;
        file.write_all(&encoded)?;
        file.sync_all()?;
        Ok(())
    }

    /// Load and validate the sidecar for `cache_path`.
    ///
    /// Returns `None` for a missing, truncated, or otherwise invalid
    /// sidecar; callers rebuild from the source in that case.
    pub fn load(cache_path: &Path) -> Option<Self> {
        let mut file = File::open(Self::path_for(cache_path)).ok()?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic).ok()?;
        if &magic != SIDECAR_MAGIC {
            return None;
        }

        let mut version_bytes = [0u8; 2];
        file.read_exact(&mut version_bytes).ok()?;
        if u16::from_le_bytes(version_bytes) != SIDECAR_VERSION {
            return None;
        }

        let mut len_bytes = [0u8; 8];
        file.read_exact(&mut len_bytes).ok()?;
        let payload_len = u64::from_le_bytes(len_bytes) as usize;

        let mut encoded = vec![0u8; payload_len];
        file.read_exact(&mut encoded).ok()?;

        let payload: SidecarPayload = bincode::deserialize(&encoded).ok()?;

        let sidecar = Self {
            block_size: payload.block_size,
            resource_size: payload.resource_size,
            root: payload.root,
            block_hashes: payload.block_hashes,
        };

        // Internal consistency: hash count and recomputed root
        if sidecar.block_size == 0 {
            return None;
        }
        if sidecar.block_hashes.len() as u64 != sidecar.block_count() {
            return None;
        }
        let tree = MerkleTree::from_leaves(sidecar.block_hashes.clone());
        if tree.root() != &sidecar.root {
            return None;
        }

        Some(sidecar)
    }

    /// Verify one block's content against its recorded hash
    pub fn verify_block(&self, block: u64, data: &[u8]) -> Result<()> {
        let expected = self
            .block_hashes
            .get(block as usize)
            .ok_or_else(|| NebulaError::Other(format!("block {} out of range", block)))?;
        let actual = hash_block(data);
        if &actual != expected {
            return Err(NebulaError::Integrity {
                block,
                expected: hex::encode(expected),
                actual: hex::encode(actual),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LocalTransport;
    use tempfile::tempdir;

    #[test]
    fn test_tree_roots() {
        let empty = MerkleTree::from_leaves(Vec::new());
        assert_eq!(empty.root(), blake3::hash(&[]).as_bytes());

        let single = MerkleTree::from_leaves(vec![hash_block(b"one")]);
        assert_eq!(single.root(), &hash_block(b"one"));

        // Odd leaf promoted: root(a, b, c) = H(H(a, b), c)
        let (a, b, c) = (hash_block(b"a"), hash_block(b"b"), hash_block(b"c"));
        let tree = MerkleTree::from_leaves(vec![a, b, c]);
        let mut h = blake3::Hasher::new();
        h.update(&a);
        h.update(&b);
        let ab = *h.finalize().as_bytes();
        let mut h = blake3::Hasher::new();
        h.update(&ab);
        h.update(&c);
        assert_eq!(tree.root(), h.finalize().as_bytes());
    }

    #[test]
    fn test_root_is_content_sensitive() {
        let t1 = MerkleTree::from_leaves(vec![hash_block(b"a"), hash_block(b"b")]);
        let t2 = MerkleTree::from_leaves(vec![hash_block(b"a"), hash_block(b"x")]);
        assert_ne!(t1.root(), t2.root());
    }

    #[test]
    fn test_build_from_transport() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("resource.bin");
        let content: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &content).unwrap();

        let transport = LocalTransport::open(&path).unwrap();
        let sidecar = MerkleSidecar::build_from_transport(&transport, 256).unwrap();

        assert_eq!(sidecar.resource_size, 1000);
        assert_eq!(sidecar.block_count(), 4);
        assert_eq!(sidecar.block_hashes.len(), 4);
        assert_eq!(sidecar.block_hashes[0], hash_block(&content[..256]));
        assert_eq!(sidecar.block_hashes[3], hash_block(&content[768..]));
    }

    #[test]
    fn test_sidecar_round_trip() {
        let dir = tempdir().unwrap();
        let cache_path = dir.path().join("resource.bin");
        std::fs::write(&cache_path, b"cached bytes").unwrap();

        let transport = LocalTransport::open(&cache_path).unwrap();
        let sidecar = MerkleSidecar::build_from_transport(&transport, 4).unwrap();
        sidecar.save(&cache_path).unwrap();

        let loaded = MerkleSidecar::load(&cache_path).unwrap();
        assert_eq!(loaded, sidecar);
        assert!(MerkleSidecar::path_for(&cache_path)
            .to_string_lossy()
            .ends_with(SIDECAR_SUFFIX));
    }

    #[test]
    fn test_corrupt_sidecar_rejected() {
        let dir = tempdir().unwrap();
        let cache_path = dir.path().join("resource.bin");
        std::fs::write(&cache_path, b"0123456789").unwrap();

        let transport = LocalTransport::open(&cache_path).unwrap();
        let sidecar = MerkleSidecar::build_from_transport(&transport, 4).unwrap();
        sidecar.save(&cache_path).unwrap();

        let sidecar_path = MerkleSidecar::path_for(&cache_path);

        // Flip a byte inside the payload
        let mut bytes = std::fs::read(&sidecar_path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&sidecar_path, &bytes).unwrap();
        assert!(MerkleSidecar::load(&cache_path).is_none());

        // Wrong magic
        std::fs::write(&sidecar_path, b"XXXX rest").unwrap();
        assert!(MerkleSidecar::load(&cache_path).is_none());

        // Truncated
        std::fs::write(&sidecar_path, b"NB").unwrap();
        assert!(MerkleSidecar::load(&cache_path).is_none());

        // Missing entirely
        std::fs::remove_file(&sidecar_path).unwrap();
        assert!(MerkleSidecar::load(&cache_path).is_none());
    }

    #[test]
    fn test_verify_block() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("resource.bin");
        std::fs::write(&path, b"abcdefgh").unwrap();

        let transport = LocalTransport::open(&path).unwrap();
        let sidecar = MerkleSidecar::build_from_transport(&transport, 4).unwrap();

        assert!(sidecar.verify_block(0, b"abcd").is_ok());
        assert!(sidecar.verify_block(1, b"efgh").is_ok());

        let err = sidecar.verify_block(0, b"abXd").unwrap_err();
        assert!(matches!(err, NebulaError::Integrity { block: 0, .. }));

        assert!(sidecar.verify_block(9, b"").is_err());
    }
}
