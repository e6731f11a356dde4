/*!
 * Merkle-verified random-access channel
 *
 * Serves byte ranges out of a local cache file, verifying every block
 * against the sidecar hashes before it is exposed. Unverified or
 * corrupt blocks are (re)fetched from the backing transport with the
 * shared retry policy.
 */

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use super::merkle::{hash_block, MerkleSidecar};
use super::{ByteRangeTransport, RetryPolicy};
use crate::error::{NebulaError, Result};

pub struct MerkleChannel {
    transport: Arc<dyn ByteRangeTransport>,
    sidecar: MerkleSidecar,
    cache_path: PathBuf,
    cache_file: Mutex<File>,
    verified: Mutex<Vec<bool>>,
    retry: RetryPolicy,
}

impl MerkleChannel {
    /// Open a verified channel over `transport`, caching at
    /// `cache_path`.
    ///
    /// An existing valid sidecar is reused; a missing or invalid one is
    /// rebuilt by streaming the resource once. The cache file is
    /// pre-sized to the resource; blocks already present are trusted
    /// only after their hash checks out on first read.
    pub fn open(
        transport: Arc<dyn ByteRangeTransport>,
        cache_path: &Path,
        block_size: u64,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let resource_size = transport.metadata()?.size;

        let sidecar = match MerkleSidecar::load(cache_path) {
            Some(sidecar)
                if sidecar.resource_size == resource_size
                    && sidecar.block_size == block_size =>
            {
                tracing::debug!("reusing sidecar for {}", cache_path.display());
                sidecar
            }
            _ => {
                tracing::debug!("building sidecar for {}", cache_path.display());
                let sidecar = MerkleSidecar::build_from_transport(transport.as_ref(), block_size)?;
                if let Some(parent) = cache_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                sidecar.save(cache_path)?;
                sidecar
            }
        };

        let cache_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(cache_path)?;
        cache_file.set_len(resource_size)?;

        let block_count = sidecar.block_count() as usize;
        Ok(Self {
            transport,
            sidecar,
            cache_path: cache_path.to_path_buf(),
            cache_file: Mutex::new(cache_file),
            verified: Mutex::new(vec![false; block_count]),
            retry,
        })
    }

    pub fn len(&self) -> u64 {
        self.sidecar.resource_size
    }

    pub fn is_empty(&self) -> bool {
        self.sidecar.resource_size == 0
    }

    pub fn block_size(&self) -> u64 {
        self.sidecar.block_size
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    /// Number of blocks currently verified in the cache
    pub fn verified_blocks(&self) -> usize {
        self.verified
            .lock()
            .expect("verified bitmap lock poisoned")
            .iter()
            .filter(|&&v| v)
            .count()
    }

    /// Read `length` bytes at `offset`. Ranges overhanging the end
    /// truncate; ranges past the end are empty.
    pub fn read_at(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
        let end = (offset + length).min(self.len());
        if offset >= end {
            return Ok(Vec::new());
        }

        let block_size = self.sidecar.block_size;
        let first_block = offset / block_size;
        let last_block = (end - 1) / block_size;

        // Multi-block requests verify their blocks concurrently; the
        // shared flag stops siblings after a fatal failure
        let failed = AtomicBool::new(false);
        if first_block == last_block {
            self.ensure_block(first_block, &failed)?;
        } else {
            std::thread::scope(|scope| -> Result<()> {
                let mut handles = Vec::new();
                for block in first_block..=last_block {
                    let failed = &failed;
                    handles.push(scope.spawn(move || self.ensure_block(block, failed)));
                }
                for handle in handles {
                    handle.join().expect("block verification thread panicked")?;
                }
                Ok(())
            })?;
        }

        let mut data = vec![0u8; (end - offset) as usize];
        {
            let mut file = self.cache_file.lock().expect("cache file lock poisoned");
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut data)?;
        }
        Ok(data)
    }

    /// Read the entire resource
    pub fn read_all(&self) -> Result<Vec<u8>> {
        self.read_at(0, self.len())
    }

    fn block_extent(&self, block: u64) -> (u64, u64) {
        let offset = block * self.sidecar.block_size;
        let length = self.sidecar.block_size.min(self.len() - offset);
        (offset, length)
    }

    /// Make sure `block` is present and verified in the cache
    fn ensure_block(&self, block: u64, failed: &AtomicBool) -> Result<()> {
        {
            let verified = self.verified.lock().expect("verified bitmap lock poisoned");
            if verified[block as usize] {
                return Ok(());
            }
        }

        let (offset, length) = self.block_extent(block);

        // A pre-existing cache file may already hold the block
        let cached = self.read_cached_block(offset, length)?;
        if self.sidecar.verify_block(block, &cached).is_ok() {
            self.mark_verified(block);
            return Ok(());
        }

        self.retry.run(failed, |attempt| {
            if attempt > 1 {
                tracing::debug!("re-fetching block {} (attempt {})", block, attempt);
            }
            let fetched = self.transport.fetch_range(offset, length)?;
            if fetched.actual_length != length {
                return Err(NebulaError::Transport(format!(
                    "short read for block {}: wanted {}, got {}",
                    block, length, fetched.actual_length
                )));
            }

            // A mismatch drops the (stale) cache content and counts as
            // a retry
            self.sidecar.verify_block(block, &fetched.data)?;

            let mut file = self.cache_file.lock().expect("cache file lock poisoned");
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(&fetched.data)?;
            Ok(())
        })?;

        self.mark_verified(block);
        Ok(())
    }

    fn read_cached_block(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
        let mut data = vec![0u8; length as usize];
        let mut file = self.cache_file.lock().expect("cache file lock poisoned");
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut data)?;
        Ok(data)
    }

    fn mark_verified(&self, block: u64) {
        let mut verified = self.verified.lock().expect("verified bitmap lock poisoned");
        verified[block as usize] = true;
    }

    /// Root hash of the verified resource
    pub fn root_hash(&self) -> String {
        hex::encode(self.sidecar.root)
    }

    /// True when the cache file's full content matches the sidecar
    pub fn verify_cache_file(&self) -> Result<bool> {
        for block in 0..self.sidecar.block_count() {
            let (offset, length) = self.block_extent(block);
            let data = self.read_cached_block(offset, length)?;
            if hash_block(&data) != self.sidecar.block_hashes[block as usize] {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{FetchResult, LocalTransport, TransportMetadata};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::tempdir;

    fn resource_bytes(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 239) as u8).collect()
    }

    /// Transport that fails the first `failures` fetches, then behaves
    struct FlakyTransport {
        inner: LocalTransport,
        failures: AtomicU32,
    }

    impl ByteRangeTransport for FlakyTransport {
        fn metadata(&self) -> Result<TransportMetadata> {
            self.inner.metadata()
        }

        fn fetch_range(&self, offset: u64, length: u64) -> Result<FetchResult> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |f| {
                    if f > 0 {
                        Some(f - 1)
                    } else {
                        None
                    }
                })
                .is_ok()
            {
                return Err(NebulaError::Transport("simulated failure".to_string()));
            }
            self.inner.fetch_range(offset, length)
        }
    }

    /// Transport that returns corrupted bytes for one block
    struct CorruptingTransport {
        inner: LocalTransport,
        corrupt_offset: u64,
    }

    impl ByteRangeTransport for CorruptingTransport {
        fn metadata(&self) -> Result<TransportMetadata> {
            self.inner.metadata()
        }

        fn fetch_range(&self, offset: u64, length: u64) -> Result<FetchResult> {
            let mut result = self.inner.fetch_range(offset, length)?;
            if offset == self.corrupt_offset && !result.data.is_empty() {
                result.data[0] ^= 0xFF;
            }
            Ok(result)
        }
    }

    #[test]
    fn test_read_all_matches_remote() {
        let dir = tempdir().unwrap();
        let remote_path = dir.path().join("remote.bin");
        let content = resource_bytes(1_000);
        std::fs::write(&remote_path, &content).unwrap();

        let transport = Arc::new(LocalTransport::open(&remote_path).unwrap());
        let cache_path = dir.path().join("cache").join("remote.bin");
        let channel =
            MerkleChannel::open(transport, &cache_path, 256, RetryPolicy::new(3)).unwrap();

        assert_eq!(channel.len(), 1_000);
        assert_eq!(channel.read_all().unwrap(), content);
        assert_eq!(channel.verified_blocks(), 4);
        assert!(channel.verify_cache_file().unwrap());
    }

    #[test]
    fn test_random_access_reads() {
        let dir = tempdir().unwrap();
        let remote_path = dir.path().join("remote.bin");
        let content = resource_bytes(600);
        std::fs::write(&remote_path, &content).unwrap();

        let transport = Arc::new(LocalTransport::open(&remote_path).unwrap());
        let cache_path = dir.path().join("remote.cache");
        let channel =
            MerkleChannel::open(transport, &cache_path, 128, RetryPolicy::new(3)).unwrap();

        // Cross-block interior read
        assert_eq!(channel.read_at(100, 200).unwrap(), &content[100..300]);
        // Overhanging read truncates
        assert_eq!(channel.read_at(550, 500).unwrap(), &content[550..]);
        // Read past the end is empty
        assert!(channel.read_at(700, 16).unwrap().is_empty());
    }

    #[test]
    fn test_sidecar_reused_across_opens() {
        let dir = tempdir().unwrap();
        let remote_path = dir.path().join("remote.bin");
        std::fs::write(&remote_path, resource_bytes(300)).unwrap();
        let cache_path = dir.path().join("remote.cache");

        let transport = Arc::new(LocalTransport::open(&remote_path).unwrap());
        {
            let channel = MerkleChannel::open(
                Arc::clone(&transport) as Arc<dyn ByteRangeTransport>,
                &cache_path,
                128,
                RetryPolicy::new(3),
            )
            .unwrap();
            channel.read_all().unwrap();
        }

        // Second open reuses the sidecar and the cached bytes verify
        // without touching the transport
        let failing = Arc::new(FlakyTransport {
            inner: LocalTransport::open(&remote_path).unwrap(),
            failures: AtomicU32::new(0),
        });
        let channel =
            MerkleChannel::open(failing, &cache_path, 128, RetryPolicy::new(1)).unwrap();
        assert_eq!(channel.read_all().unwrap(), resource_bytes(300));
    }

    #[test]
    fn test_transient_failures_recovered() {
        let dir = tempdir().unwrap();
        let remote_path = dir.path().join("remote.bin");
        let content = resource_bytes(256);
        std::fs::write(&remote_path, &content).unwrap();
        let cache_path = dir.path().join("remote.cache");

        // Build the sidecar with a healthy transport first so the flaky
        // one is only exercised on block reads
        {
            let healthy = Arc::new(LocalTransport::open(&remote_path).unwrap());
            MerkleChannel::open(healthy, &cache_path, 128, RetryPolicy::new(3)).unwrap();
        }
        // Invalidate the cache body (sidecar stays) so blocks must be
        // re-fetched through the flaky transport
        std::fs::OpenOptions::new()
            .write(true)
            .open(&cache_path)
            .unwrap()
            .set_len(0)
            .unwrap();

        let flaky = Arc::new(FlakyTransport {
            inner: LocalTransport::open(&remote_path).unwrap(),
            failures: AtomicU32::new(2),
        });
        let channel =
            MerkleChannel::open(flaky, &cache_path, 128, RetryPolicy::new(5)).unwrap();
        assert_eq!(channel.read_all().unwrap(), content);
    }

    #[test]
    fn test_persistent_corruption_is_integrity_error() {
        let dir = tempdir().unwrap();
        let remote_path = dir.path().join("remote.bin");
        std::fs::write(&remote_path, resource_bytes(256)).unwrap();
        let cache_path = dir.path().join("remote.cache");

        {
            let healthy = Arc::new(LocalTransport::open(&remote_path).unwrap());
            MerkleChannel::open(healthy, &cache_path, 128, RetryPolicy::new(3)).unwrap();
        }
        std::fs::OpenOptions::new()
            .write(true)
            .open(&cache_path)
            .unwrap()
            .set_len(0)
            .unwrap();

        let corrupting = Arc::new(CorruptingTransport {
            inner: LocalTransport::open(&remote_path).unwrap(),
            corrupt_offset: 128,
        });
        let channel =
            MerkleChannel::open(corrupting, &cache_path, 128, RetryPolicy::new(2)).unwrap();

        // First block is fine; second is corrupted on every attempt
        assert!(channel.read_at(0, 128).is_ok());
        let err = channel.read_at(128, 128).unwrap_err();
        assert!(matches!(err, NebulaError::Integrity { block: 1, .. }));
    }
}
