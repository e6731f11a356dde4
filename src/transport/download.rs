/*!
 * Parallel ranged download
 *
 * Splits a resource into fixed-size chunks, fetches them on a worker
 * pool, and writes each at its absolute offset in a pre-sized target
 * file. Failure or cancellation removes the partial file.
 */

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::unbounded;
use serde::{Deserialize, Serialize};

use super::{local_matches_remote, ByteRangeTransport, RetryPolicy};
use crate::config::TransportConfig;
use crate::error::{NebulaError, Result};

/// Validators recorded beside a completed download, consulted by
/// `local_matches_remote`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceStamp {
    pub size: u64,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl ResourceStamp {
    const SUFFIX: &'static str = ".stamp";

    fn path_for(target: &Path) -> PathBuf {
        let mut name = target.as_os_str().to_os_string();
        name.push(Self::SUFFIX);
        PathBuf::from(name)
    }

    pub fn save(&self, target: &Path) -> Result<()> {
        let json = serde_json::to_string(self)?;
        std::fs::write(Self::path_for(target), json)?;
        Ok(())
    }

    pub fn load(target: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(Self::path_for(target)).ok()?;
        serde_json::from_str(&content).ok()
    }

    pub fn remove(target: &Path) {
        let _ = std::fs::remove_file(Self::path_for(target));
    }
}

/// Handle to an in-flight (or already finished) download
pub struct DownloadHandle {
    target_path: PathBuf,
    total_bytes: u64,
    current_bytes: Arc<AtomicU64>,
    cancel: Arc<AtomicBool>,
    completion: Option<JoinHandle<Result<()>>>,
}

impl DownloadHandle {
    pub fn target_path(&self) -> &Path {
        &self.target_path
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn current_bytes(&self) -> u64 {
        self.current_bytes.load(Ordering::Relaxed)
    }

    /// Fraction complete in [0, 1]
    pub fn progress(&self) -> f64 {
        if self.total_bytes == 0 {
            return 1.0;
        }
        (self.current_bytes() as f64 / self.total_bytes as f64).min(1.0)
    }

    /// Ask the workers to stop; the partial file is deleted
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Block until the download finishes
    pub fn wait(mut self) -> Result<()> {
        match self.completion.take() {
            Some(handle) => handle.join().expect("download supervisor panicked"),
            None => Ok(()),
        }
    }
}

/// Download the transport's resource to `target`, fetching chunks in
/// parallel. Returns immediately with a progress handle.
///
/// When `force` is false and the local file still matches the remote
/// validators, no work is scheduled.
pub fn download_to(
    transport: Arc<dyn ByteRangeTransport>,
    target: &Path,
    config: &TransportConfig,
    force: bool,
) -> Result<DownloadHandle> {
    let metadata = transport.metadata()?;

    if !force && local_matches_remote(target, transport.as_ref())? {
        tracing::debug!("{} already matches remote, skipping", target.display());
        return Ok(DownloadHandle {
            target_path: target.to_path_buf(),
            total_bytes: metadata.size,
            current_bytes: Arc::new(AtomicU64::new(metadata.size)),
            cancel: Arc::new(AtomicBool::new(false)),
            completion: None,
        });
    }

    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(target)?;
    file.set_len(metadata.size)?;
    drop(file);
    ResourceStamp::remove(target);

    let chunk_size = config.download_chunk_size.max(1);
    let parallelism = config.effective_download_parallelism();
    let retry = RetryPolicy::new(config.max_attempts);

    let (tx, rx) = unbounded::<(u64, u64)>();
    for shard in super::shard_range(0, metadata.size, chunk_size) {
        tx.send(shard).expect("queue send failed");
    }
    drop(tx);

    let current_bytes = Arc::new(AtomicU64::new(0));
    let cancel = Arc::new(AtomicBool::new(false));
    let failed = Arc::new(AtomicBool::new(false));

    let mut workers = Vec::with_capacity(parallelism);
    for worker_id in 0..parallelism {
        let rx = rx.clone();
        let transport = Arc::clone(&transport);
        let target = target.to_path_buf();
        let current = Arc::clone(&current_bytes);
        let cancel = Arc::clone(&cancel);
        let failed = Arc::clone(&failed);
        let retry = retry.clone();

        let handle = std::thread::Builder::new()
            .name(format!("nebula-dl-{}", worker_id))
            .spawn(move || -> Result<()> {
                let mut out = OpenOptions::new().write(true).open(&target)?;

                while let Ok((offset, length)) = rx.recv() {
                    if cancel.load(Ordering::Relaxed) {
                        return Err(NebulaError::Cancelled);
                    }
                    if failed.load(Ordering::Relaxed) {
                        return Err(NebulaError::Cancelled);
                    }

                    let fetched = retry.run(&failed, |_| {
                        let result = transport.fetch_range(offset, length)?;
                        if result.actual_length != length {
                            return Err(NebulaError::Transport(format!(
                                "short read at {}: wanted {}, got {}",
                                offset, length, result.actual_length
                            )));
                        }
                        Ok(result)
                    })?;

                    out.seek(SeekFrom::Start(offset))?;
                    out.write_all(&fetched.data)?;
                    current.fetch_add(length, Ordering::Relaxed);
                }
                Ok(())
            })
            .expect("failed to spawn download worker");
        workers.push(handle);
    }
    drop(rx);

    let supervisor_target = target.to_path_buf();
    let supervisor_cancel = Arc::clone(&cancel);
    let stamp = ResourceStamp {
        size: metadata.size,
        etag: metadata.etag.clone(),
        last_modified: metadata.last_modified.clone(),
    };
    let completion = std::thread::Builder::new()
        .name("nebula-dl-supervisor".to_string())
        .spawn(move || -> Result<()> {
            // Prefer the root-cause error over the Cancelled results of
            // short-circuited siblings
            let mut first_error: Option<NebulaError> = None;
            for worker in workers {
                if let Err(e) = worker.join().expect("download worker panicked") {
                    let is_cancel = matches!(e, NebulaError::Cancelled);
                    match &first_error {
                        None => first_error = Some(e),
                        Some(NebulaError::Cancelled) if !is_cancel => first_error = Some(e),
                        _ => {}
                    }
                }
            }

            if supervisor_cancel.load(Ordering::Relaxed) {
                let _ = std::fs::remove_file(&supervisor_target);
                return Err(NebulaError::Cancelled);
            }

            match first_error {
                Some(e) => {
                    // Never leave a half-written file behind
                    let _ = std::fs::remove_file(&supervisor_target);
                    Err(e)
                }
                None => {
                    stamp.save(&supervisor_target)?;
                    Ok(())
                }
            }
        })
        .expect("failed to spawn download supervisor");

    Ok(DownloadHandle {
        target_path: target.to_path_buf(),
        total_bytes: metadata.size,
        current_bytes,
        cancel,
        completion: Some(completion),
    })
}
