/*!
 * Error types for Nebula
 */

use std::fmt;
use std::io;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, NebulaError>;

#[derive(Debug)]
pub enum NebulaError {
    /// Configuration precondition violated (bad threshold, zero dimension, ...)
    InvalidConfig(String),

    /// Empty input where at least one vector was required
    NoData(String),

    /// Vector with the wrong dimensionality in a multi-file stream
    DimensionMismatch { expected: u32, actual: u32 },

    /// Resource not found (local path or remote URL)
    NotFound(String),

    /// Network or remote-range failure; retried per transport policy
    Transport(String),

    /// Unexpected HTTP status from a remote resource
    HttpStatus { status: u16, url: String },

    /// Block content did not match its recorded hash
    Integrity { block: u64, expected: String, actual: String },

    /// Failure raised from an analyzer's initialize/accept/complete
    Analyzer { id: String, message: String },

    /// Cooperative stop requested
    Cancelled,

    /// Retries exhausted
    RetriesExhausted { attempts: u32 },

    /// I/O error
    Io(io::Error),

    /// Invalid path
    InvalidPath(PathBuf),

    /// Generic error with message
    Other(String),
}

impl NebulaError {
    /// Check if this error is fatal (should not retry)
    pub fn is_fatal(&self) -> bool {
        match self {
            // These are fatal - don't retry
            NebulaError::InvalidConfig(_) => true,
            NebulaError::NoData(_) => true,
            NebulaError::DimensionMismatch { .. } => true,
            NebulaError::NotFound(_) => true,
            NebulaError::Cancelled => true,
            NebulaError::RetriesExhausted { .. } => true,
            NebulaError::InvalidPath(_) => true,

            // Client errors other than 416 will not succeed on retry
            NebulaError::HttpStatus { status, .. } => {
                (400..500).contains(status) && *status != 416
            }

            // These are not fatal - can retry
            NebulaError::Transport(_) => false,
            NebulaError::Integrity { .. } => false,
            NebulaError::Analyzer { .. } => false,
            NebulaError::Io(_) => false,
            NebulaError::Other(_) => false,
        }
    }

    /// Check if this error is transient (temporary, worth retrying)
    pub fn is_transient(&self) -> bool {
        match self {
            NebulaError::Transport(_) => true,
            NebulaError::HttpStatus { .. } => !self.is_fatal(),
            // A corrupt cached block is re-fetched, so integrity failures
            // are transient until the attempt budget runs out
            NebulaError::Integrity { .. } => true,
            NebulaError::Io(io_err) => Self::is_io_transient(io_err),

            _ => false,
        }
    }

    /// Check if an I/O error is transient
    fn is_io_transient(io_err: &io::Error) -> bool {
        use io::ErrorKind::*;
        matches!(
            io_err.kind(),
            ConnectionRefused
                | ConnectionReset
                | ConnectionAborted
                | NotConnected
                | BrokenPipe
                | TimedOut
                | Interrupted
                | WouldBlock
                | WriteZero
        )
    }

    /// Get error category for logging and instrumentation
    pub fn category(&self) -> ErrorCategory {
        match self {
            NebulaError::InvalidConfig(_) => ErrorCategory::Configuration,
            NebulaError::NoData(_) | NebulaError::DimensionMismatch { .. } => {
                ErrorCategory::Validation
            }
            NebulaError::NotFound(_) | NebulaError::InvalidPath(_) => ErrorCategory::Validation,
            NebulaError::Transport(_) | NebulaError::HttpStatus { .. } => ErrorCategory::Network,
            NebulaError::Integrity { .. } => ErrorCategory::Integrity,
            NebulaError::Analyzer { .. } => ErrorCategory::Analysis,
            NebulaError::Cancelled => ErrorCategory::Cancellation,
            NebulaError::RetriesExhausted { .. } => ErrorCategory::Retry,
            NebulaError::Io(_) => ErrorCategory::IoError,
            NebulaError::Other(_) => ErrorCategory::Unknown,
        }
    }
}

/// Error category for classification and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Input validation errors
    Validation,
    /// Configuration errors
    Configuration,
    /// Network/transport errors
    Network,
    /// Data integrity errors (hash mismatches)
    Integrity,
    /// Analyzer lifecycle errors
    Analysis,
    /// Cooperative cancellation
    Cancellation,
    /// Retry exhaustion
    Retry,
    /// I/O operation errors
    IoError,
    /// Uncategorized errors
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Validation => write!(f, "validation"),
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Network => write!(f, "network"),
            ErrorCategory::Integrity => write!(f, "integrity"),
            ErrorCategory::Analysis => write!(f, "analysis"),
            ErrorCategory::Cancellation => write!(f, "cancellation"),
            ErrorCategory::Retry => write!(f, "retry"),
            ErrorCategory::IoError => write!(f, "io"),
            ErrorCategory::Unknown => write!(f, "unknown"),
        }
    }
}

impl fmt::Display for NebulaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NebulaError::InvalidConfig(msg) => {
                write!(f, "Configuration error: {}", msg)
            }
            NebulaError::NoData(msg) => {
                write!(f, "No data: {}", msg)
            }
            NebulaError::DimensionMismatch { expected, actual } => {
                write!(
                    f,
                    "Dimension mismatch: expected {}, got {}",
                    expected, actual
                )
            }
            NebulaError::NotFound(resource) => {
                write!(f, "Resource not found: {}", resource)
            }
            NebulaError::Transport(msg) => {
                write!(f, "Transport error: {}", msg)
            }
            NebulaError::HttpStatus { status, url } => {
                write!(f, "Unexpected HTTP status {} from {}", status, url)
            }
            NebulaError::Integrity {
                block,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "Integrity check failed for block {}: expected {}, got {}",
                    block, expected, actual
                )
            }
            NebulaError::Analyzer { id, message } => {
                write!(f, "Analyzer '{}' failed: {}", id, message)
            }
            NebulaError::Cancelled => {
                write!(f, "Operation cancelled")
            }
            NebulaError::RetriesExhausted { attempts } => {
                write!(f, "All {} retry attempts exhausted", attempts)
            }
            NebulaError::Io(err) => {
                write!(f, "I/O error: {}", err)
            }
            NebulaError::InvalidPath(path) => {
                write!(f, "Invalid path: {}", path.display())
            }
            NebulaError::Other(msg) => {
                write!(f, "{}", msg)
            }
        }
    }
}

impl std::error::Error for NebulaError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NebulaError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for NebulaError {
    fn from(err: io::Error) -> Self {
        NebulaError::Io(err)
    }
}

impl From<serde_json::Error> for NebulaError {
    fn from(err: serde_json::Error) -> Self {
        NebulaError::Other(format!("JSON error: {}", err))
    }
}
