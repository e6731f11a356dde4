/*!
 * Local-file transport
 *
 * The same range semantics as the HTTP transport, over an ordinary
 * file. Used for `file://` URLs and for serving verified caches.
 */

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

use super::{ByteRangeTransport, FetchResult, TransportMetadata};
use crate::error::{NebulaError, Result};

#[derive(Debug)]
pub struct LocalTransport {
    path: PathBuf,
    file: Mutex<File>,
    size: u64,
}

impl LocalTransport {
    pub fn open(path: &Path) -> Result<Self> {
        let file =
            File::open(path).map_err(|_| NebulaError::NotFound(path.display().to_string()))?;
        let size = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ByteRangeTransport for LocalTransport {
    fn metadata(&self) -> Result<TransportMetadata> {
        Ok(TransportMetadata {
            size: self.size,
            supports_ranges: true,
            content_type: None,
            last_modified: None,
            etag: None,
        })
    }

    fn fetch_range(&self, offset: u64, length: u64) -> Result<FetchResult> {
        let start_time = Instant::now();

        // Reads past the end truncate; reads starting past the end are
        // empty, mirroring an exhausted iterator rather than an error
        let end = (offset + length).min(self.size);
        let actual = end.saturating_sub(offset.min(self.size));

        let mut data = vec![0u8; actual as usize];
        if actual > 0 {
            let mut file = self.file.lock().expect("local transport lock poisoned");
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut data)?;
        }

        Ok(FetchResult {
            data,
            requested_offset: offset,
            requested_length: length,
            actual_length: actual,
            start_time,
            end_time: Instant::now(),
        })
    }
}
