/*!
 * Chunked byte-range transport
 *
 * Random-access reads over resources that may be local files or HTTP
 * servers with Range support, a progress-tracking decorator, a
 * retrying parallel downloader, and a Merkle-verified block cache that
 * exposes the same read semantics for both.
 */

pub mod channel;
pub mod download;
pub mod http;
pub mod local;
pub mod merkle;
pub mod progress;
pub mod retry;

pub use channel::MerkleChannel;
pub use download::{download_to, DownloadHandle};
pub use http::HttpTransport;
pub use local::LocalTransport;
pub use merkle::{MerkleSidecar, MerkleTree, SIDECAR_SUFFIX};
pub use progress::{ProgressTrackingTransport, TransferSnapshot};
pub use retry::RetryPolicy;

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Resource metadata learned from a HEAD probe (or its 0-0 GET
/// fallback)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportMetadata {
    pub size: u64,
    pub supports_ranges: bool,
    pub content_type: Option<String>,
    pub last_modified: Option<String>,
    pub etag: Option<String>,
}

/// One completed range fetch
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub data: Vec<u8>,
    pub requested_offset: u64,
    pub requested_length: u64,
    pub actual_length: u64,
    pub start_time: Instant,
    pub end_time: Instant,
}

impl FetchResult {
    pub fn elapsed(&self) -> std::time::Duration {
        self.end_time.duration_since(self.start_time)
    }
}

/// Random-access byte source with explicit range semantics.
///
/// Ranges that begin past the end of the resource yield an empty
/// result rather than an error; ranges that overhang the end are
/// truncated (`actual_length < requested_length`).
pub trait ByteRangeTransport: Send + Sync {
    /// Probe the resource's size and capabilities
    fn metadata(&self) -> Result<TransportMetadata>;

    /// Fetch `length` bytes starting at `offset`
    fn fetch_range(&self, offset: u64, length: u64) -> Result<FetchResult>;
}

/// Open a transport for a URL: `http(s)://` goes over the wire,
/// `file://` or a bare path maps to the local channel with identical
/// semantics.
pub fn open_transport(url: &str) -> Result<Arc<dyn ByteRangeTransport>> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(Arc::new(HttpTransport::new(url)?))
    } else if let Some(path) = url.strip_prefix("file://") {
        Ok(Arc::new(LocalTransport::open(Path::new(path))?))
    } else {
        Ok(Arc::new(LocalTransport::open(Path::new(url))?))
    }
}

/// Compare a local copy against the remote resource.
///
/// Size must match first; content equality is then confirmed through
/// the validators recorded at download time (ETag, else Last-Modified
/// plus size). A timestamp alone is never treated as proof, and
/// without a recorded stamp the answer is `false`.
pub fn local_matches_remote(path: &Path, transport: &dyn ByteRangeTransport) -> Result<bool> {
    let local_size = match std::fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(_) => return Ok(false),
    };

    let remote = transport.metadata()?;
    if local_size != remote.size {
        return Ok(false);
    }

    let stamp = match download::ResourceStamp::load(path) {
        Some(stamp) => stamp,
        None => return Ok(false),
    };
    if stamp.size != remote.size {
        return Ok(false);
    }

    match (&stamp.etag, &remote.etag) {
        (Some(recorded), Some(current)) => return Ok(recorded == current),
        _ => {}
    }

    match (&stamp.last_modified, &remote.last_modified) {
        // Size already matched above; Last-Modified is corroboration,
        // not the sole signal
        (Some(recorded), Some(current)) => Ok(recorded == current),
        _ => Ok(false),
    }
}

/// Split `[offset, offset + length)` into sub-ranges aligned to
/// `block_size` boundaries of the underlying resource
pub fn shard_range(offset: u64, length: u64, block_size: u64) -> Vec<(u64, u64)> {
    if length == 0 || block_size == 0 {
        return Vec::new();
    }

    let end = offset + length;
    let mut shards = Vec::new();
    let mut cursor = offset;
    while cursor < end {
        let block_end = (cursor / block_size + 1) * block_size;
        let shard_end = block_end.min(end);
        shards.push((cursor, shard_end - cursor));
        cursor = shard_end;
    }
    shards
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_range_alignment() {
        // 100-byte blocks, range [150, 420)
        let shards = shard_range(150, 270, 100);
        assert_eq!(shards, vec![(150, 50), (200, 100), (300, 100), (400, 20)]);
        assert_eq!(shards.iter().map(|(_, l)| l).sum::<u64>(), 270);
    }

    #[test]
    fn test_shard_range_single_block() {
        assert_eq!(shard_range(10, 20, 100), vec![(10, 20)]);
        assert_eq!(shard_range(0, 100, 100), vec![(0, 100)]);
    }

    #[test]
    fn test_shard_range_empty() {
        assert!(shard_range(10, 0, 100).is_empty());
    }

    #[test]
    fn test_open_transport_local_path() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(temp.path(), b"hello").unwrap();

        let url = format!("file://{}", temp.path().display());
        let transport = open_transport(&url).unwrap();
        assert_eq!(transport.metadata().unwrap().size, 5);

        let bare = open_transport(temp.path().to_str().unwrap()).unwrap();
        assert_eq!(bare.metadata().unwrap().size, 5);
    }

    #[test]
    fn test_local_matches_remote_size_gate() {
        let dir = tempfile::tempdir().unwrap();
        let remote_path = dir.path().join("remote.bin");
        std::fs::write(&remote_path, b"0123456789").unwrap();
        let transport = LocalTransport::open(&remote_path).unwrap();

        let local_path = dir.path().join("local.bin");
        std::fs::write(&local_path, b"0123").unwrap();

        // Size differs: no match regardless of stamps
        assert!(!local_matches_remote(&local_path, &transport).unwrap());

        // Size matches but no stamp was recorded: still no match
        std::fs::write(&local_path, b"9876543210").unwrap();
        assert!(!local_matches_remote(&local_path, &transport).unwrap());
    }
}
