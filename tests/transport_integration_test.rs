/*!
 * Transport round trips: parallel download, Merkle-verified channel,
 * and local/remote parity
 */

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tempfile::tempdir;

use nebula::transport::{
    download_to, local_matches_remote, FetchResult, MerkleChannel, MerkleSidecar,
    ProgressTrackingTransport, RetryPolicy, TransportMetadata,
};
use nebula::{ByteRangeTransport, LocalTransport, NebulaError, Result, TransportConfig};

fn fixture_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + 7) % 256) as u8).collect()
}

fn write_fixture(dir: &Path, len: usize) -> (std::path::PathBuf, Vec<u8>) {
    let path = dir.join("resource.bin");
    let content = fixture_bytes(len);
    std::fs::write(&path, &content).unwrap();
    (path, content)
}

/// Adds ETag/Last-Modified validators to a local transport so the
/// equivalence check has something to corroborate with
struct ValidatedTransport {
    inner: LocalTransport,
    etag: String,
}

impl ByteRangeTransport for ValidatedTransport {
    fn metadata(&self) -> Result<TransportMetadata> {
        let mut meta = self.inner.metadata()?;
        meta.etag = Some(self.etag.clone());
        meta.last_modified = Some("Mon, 01 Jan 2024 00:00:00 GMT".to_string());
        Ok(meta)
    }

    fn fetch_range(&self, offset: u64, length: u64) -> Result<FetchResult> {
        self.inner.fetch_range(offset, length)
    }
}

#[test]
fn test_download_then_verified_read_back() {
    let dir = tempdir().unwrap();
    let (remote, content) = write_fixture(dir.path(), 100_000);
    let target = dir.path().join("cache").join("resource.bin");

    let transport: Arc<dyn ByteRangeTransport> =
        Arc::new(LocalTransport::open(&remote).unwrap());
    let config = TransportConfig {
        download_chunk_size: 8_192,
        download_parallelism: 4,
        max_attempts: 3,
        ..Default::default()
    };

    // Download, then serve the downloaded file through the verified
    // channel and compare every byte
    download_to(Arc::clone(&transport), &target, &config, false)
        .unwrap()
        .wait()
        .unwrap();
    assert_eq!(std::fs::read(&target).unwrap(), content);

    let channel_cache = dir.path().join("cache2").join("resource.bin");
    let channel =
        MerkleChannel::open(transport, &channel_cache, 16_384, RetryPolicy::new(3)).unwrap();
    assert_eq!(channel.read_all().unwrap(), content);
    assert!(channel.verify_cache_file().unwrap());
}

#[test]
fn test_local_and_channel_reads_agree() {
    let dir = tempdir().unwrap();
    let (remote, content) = write_fixture(dir.path(), 10_000);

    let local = LocalTransport::open(&remote).unwrap();
    let channel = MerkleChannel::open(
        Arc::new(LocalTransport::open(&remote).unwrap()),
        &dir.path().join("resource.cache"),
        1_024,
        RetryPolicy::new(3),
    )
    .unwrap();

    // Sequential and random access behave identically
    let probes = [(0u64, 100u64), (999, 2_000), (9_900, 500), (5_000, 1)];
    for (offset, length) in probes {
        let direct = local.fetch_range(offset, length).unwrap().data;
        let verified = channel.read_at(offset, length).unwrap();
        assert_eq!(direct, verified, "mismatch at offset {}", offset);
        let end = ((offset + length).min(10_000)) as usize;
        assert_eq!(direct, &content[offset.min(10_000) as usize..end]);
    }
}

#[test]
fn test_corrupted_cache_is_healed() {
    let dir = tempdir().unwrap();
    let (remote, content) = write_fixture(dir.path(), 4_096);
    let cache = dir.path().join("resource.cache");

    {
        let channel = MerkleChannel::open(
            Arc::new(LocalTransport::open(&remote).unwrap()),
            &cache,
            1_024,
            RetryPolicy::new(3),
        )
        .unwrap();
        channel.read_all().unwrap();
    }

    // Corrupt two cached blocks on disk
    let mut bytes = std::fs::read(&cache).unwrap();
    bytes[100] ^= 0xFF;
    bytes[2_000] ^= 0xFF;
    std::fs::write(&cache, &bytes).unwrap();

    // A fresh channel re-verifies, detects the damage, and re-fetches
    let channel = MerkleChannel::open(
        Arc::new(LocalTransport::open(&remote).unwrap()),
        &cache,
        1_024,
        RetryPolicy::new(3),
    )
    .unwrap();
    assert_eq!(channel.read_all().unwrap(), content);
    assert!(channel.verify_cache_file().unwrap());
}

#[test]
fn test_flaky_transport_exact_delivery() {
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
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |f| f.checked_sub(1))
                .is_ok()
            {
                return Err(NebulaError::Transport("injected failure".to_string()));
            }
            self.inner.fetch_range(offset, length)
        }
    }

    let dir = tempdir().unwrap();
    let (remote, content) = write_fixture(dir.path(), 8_192);
    let target = dir.path().join("data.bin");

    // 3 transient failures against a budget of 10 attempts per chunk
    let transport = Arc::new(FlakyTransport {
        inner: LocalTransport::open(&remote).unwrap(),
        failures: AtomicU32::new(3),
    });
    let config = TransportConfig {
        download_chunk_size: 2_048,
        download_parallelism: 2,
        max_attempts: 10,
        ..Default::default()
    };

    download_to(transport, &target, &config, false)
        .unwrap()
        .wait()
        .unwrap();
    assert_eq!(std::fs::read(&target).unwrap(), content);
}

#[test]
fn test_equivalence_check_uses_recorded_validators() {
    let dir = tempdir().unwrap();
    let (remote, _) = write_fixture(dir.path(), 2_048);
    let target = dir.path().join("data.bin");

    let transport = Arc::new(ValidatedTransport {
        inner: LocalTransport::open(&remote).unwrap(),
        etag: "\"v1\"".to_string(),
    });
    let config = TransportConfig {
        download_chunk_size: 1_024,
        download_parallelism: 2,
        max_attempts: 3,
        ..Default::default()
    };

    download_to(
        Arc::clone(&transport) as Arc<dyn ByteRangeTransport>,
        &target,
        &config,
        false,
    )
    .unwrap()
    .wait()
    .unwrap();

    // Same validators: the local copy is considered current
    assert!(local_matches_remote(&target, transport.as_ref()).unwrap());

    // A changed ETag invalidates it, even with the size unchanged
    let rotated = ValidatedTransport {
        inner: LocalTransport::open(&remote).unwrap(),
        etag: "\"v2\"".to_string(),
    };
    assert!(!local_matches_remote(&target, &rotated).unwrap());

    // A size change alone is already disqualifying
    std::fs::write(&target, b"tiny").unwrap();
    assert!(!local_matches_remote(&target, transport.as_ref()).unwrap());
}

#[test]
fn test_progress_decorator_over_channel_fetches() {
    let dir = tempdir().unwrap();
    let (remote, content) = write_fixture(dir.path(), 6_000);

    let tracked = Arc::new(ProgressTrackingTransport::new(
        Arc::new(LocalTransport::open(&remote).unwrap()),
        6,
    ));
    let channel = MerkleChannel::open(
        Arc::clone(&tracked) as Arc<dyn ByteRangeTransport>,
        &dir.path().join("resource.cache"),
        1_000,
        RetryPolicy::new(3),
    )
    .unwrap();

    assert_eq!(channel.read_all().unwrap(), content);

    let snapshot = tracked.snapshot();
    // Sidecar construction reads the resource once, block fetches read
    // it again
    assert!(snapshot.cumulative_bytes >= 2 * 6_000);
    assert!(snapshot.chunk_index >= 12);
}

#[test]
fn test_sidecar_survives_and_validates() {
    let dir = tempdir().unwrap();
    let (remote, _) = write_fixture(dir.path(), 3_000);
    let cache = dir.path().join("resource.cache");

    let channel = MerkleChannel::open(
        Arc::new(LocalTransport::open(&remote).unwrap()),
        &cache,
        1_024,
        RetryPolicy::new(3),
    )
    .unwrap();
    let root = channel.root_hash();
    drop(channel);

    let sidecar = MerkleSidecar::load(&cache).expect("sidecar must persist");
    assert_eq!(sidecar.resource_size, 3_000);
    assert_eq!(sidecar.block_count(), 3);
    assert_eq!(hex::encode(sidecar.root), root);
}
