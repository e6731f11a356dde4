/*!
 * HTTP(S) range transport
 *
 * Ranged GETs against servers that honor `Range: bytes=a-b` with 206
 * responses. Metadata comes from HEAD, falling back to a 0-0 ranged
 * GET for servers that reject HEAD.
 */

use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use reqwest::StatusCode;

use super::{ByteRangeTransport, FetchResult, TransportMetadata};
use crate::error::{NebulaError, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub struct HttpTransport {
    url: String,
    client: Client,
}

impl HttpTransport {
    pub fn new(url: &str) -> Result<Self> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(NebulaError::InvalidConfig(format!(
                "not an HTTP(S) URL: {}",
                url
            )));
        }
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| NebulaError::Transport(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            url: url.to_string(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn header_string(response: &reqwest::blocking::Response, name: &str) -> Option<String> {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    }

    fn metadata_from_head(&self) -> Result<TransportMetadata> {
        let response = self
            .client
            .head(&self.url)
            .send()
            .map_err(|e| NebulaError::Transport(format!("HEAD {} failed: {}", self.url, e)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(NebulaError::NotFound(self.url.clone()));
        }
        if !status.is_success() {
            return Err(NebulaError::HttpStatus {
                status: status.as_u16(),
                url: self.url.clone(),
            });
        }

        let size = response
            .content_length()
            .ok_or_else(|| NebulaError::Transport(format!("HEAD {} had no length", self.url)))?;

        let supports_ranges = Self::header_string(&response, "accept-ranges")
            .map(|v| v.eq_ignore_ascii_case("bytes"))
            .unwrap_or(false);

        Ok(TransportMetadata {
            size,
            supports_ranges,
            content_type: Self::header_string(&response, "content-type"),
            last_modified: Self::header_string(&response, "last-modified"),
            etag: Self::header_string(&response, "etag"),
        })
    }

    /// Probe with `Range: bytes=0-0`; a 206 with a Content-Range total
    /// gives both the size and range support in one request
    fn metadata_from_probe(&self) -> Result<TransportMetadata> {
        let response = self
            .client
            .get(&self.url)
            .header("Range", "bytes=0-0")
            .send()
            .map_err(|e| NebulaError::Transport(format!("GET {} failed: {}", self.url, e)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(NebulaError::NotFound(self.url.clone()));
        }

        match status {
            StatusCode::PARTIAL_CONTENT => {
                let total = Self::header_string(&response, "content-range")
                    .and_then(|v| v.rsplit('/').next().and_then(|t| t.parse::<u64>().ok()))
                    .ok_or_else(|| {
                        NebulaError::Transport(format!(
                            "unparseable Content-Range from {}",
                            self.url
                        ))
                    })?;
                Ok(TransportMetadata {
                    size: total,
                    supports_ranges: true,
                    content_type: Self::header_string(&response, "content-type"),
                    last_modified: Self::header_string(&response, "last-modified"),
                    etag: Self::header_string(&response, "etag"),
                })
            }
            StatusCode::OK => {
                // Server ignored the range: usable, but only whole-file
                let size = response.content_length().ok_or_else(|| {
                    NebulaError::Transport(format!("GET {} had no length", self.url))
                })?;
                Ok(TransportMetadata {
                    size,
                    supports_ranges: false,
                    content_type: Self::header_string(&response, "content-type"),
                    last_modified: Self::header_string(&response, "last-modified"),
                    etag: Self::header_string(&response, "etag"),
                })
            }
            other => Err(NebulaError::HttpStatus {
                status: other.as_u16(),
                url: self.url.clone(),
            }),
        }
    }
}

impl ByteRangeTransport for HttpTransport {
    fn metadata(&self) -> Result<TransportMetadata> {
        match self.metadata_from_head() {
            Ok(meta) => Ok(meta),
            Err(e) if e.is_fatal() => Err(e),
            Err(head_err) => {
                tracing::debug!("HEAD failed ({}), probing with ranged GET", head_err);
                self.metadata_from_probe()
            }
        }
    }

    fn fetch_range(&self, offset: u64, length: u64) -> Result<FetchResult> {
        let start_time = Instant::now();

        if length == 0 {
            return Ok(FetchResult {
                data: Vec::new(),
                requested_offset: offset,
                requested_length: 0,
                actual_length: 0,
                start_time,
                end_time: Instant::now(),
            });
        }

        let range = format!("bytes={}-{}", offset, offset + length - 1);
        let response = self
            .client
            .get(&self.url)
            .header("Range", range)
            .send()
            .map_err(|e| NebulaError::Transport(format!("GET {} failed: {}", self.url, e)))?;

        let status = response.status();
        match status {
            StatusCode::PARTIAL_CONTENT => {}
            // Requested range starts past the end: empty result, like a
            // local read past EOF
            StatusCode::RANGE_NOT_SATISFIABLE => {
                return Ok(FetchResult {
                    data: Vec::new(),
                    requested_offset: offset,
                    requested_length: length,
                    actual_length: 0,
                    start_time,
                    end_time: Instant::now(),
                });
            }
            other => {
                return Err(NebulaError::HttpStatus {
                    status: other.as_u16(),
                    url: self.url.clone(),
                });
            }
        }

        let data = response
            .bytes()
            .map_err(|e| NebulaError::Transport(format!("read body from {}: {}", self.url, e)))?
            .to_vec();
        let actual_length = data.len() as u64;

        Ok(FetchResult {
            data,
            requested_offset: offset,
            requested_length: length,
            actual_length,
            start_time,
            end_time: Instant::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_http_urls() {
        assert!(HttpTransport::new("ftp://example/x").is_err());
        assert!(HttpTransport::new("/local/path").is_err());
        assert!(HttpTransport::new("https://example.com/data.bin").is_ok());
    }

    #[test]
    fn test_zero_length_fetch_never_touches_network() {
        let transport = HttpTransport::new("http://unreachable.invalid/data").unwrap();
        let result = transport.fetch_range(128, 0).unwrap();
        assert!(result.data.is_empty());
        assert_eq!(result.requested_offset, 128);
    }
}
