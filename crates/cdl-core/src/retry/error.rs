//! Transfer error type for retry classification.

use std::fmt;

/// Error returned by a single transfer attempt (curl failure, HTTP error, or storage failure).
/// Used so we can classify and decide retries before recording it on the unit.
#[derive(Debug)]
pub enum TransferError {
    /// Curl reported an error (timeout, connection, etc.).
    Curl(curl::Error),
    /// Network-level failure reported by a non-curl transport.
    Network(String),
    /// HTTP response had a non-2xx status.
    Http(u32),
    /// Transfer ended but fewer (or more) bytes arrived than the known length.
    PartialTransfer { expected: u64, received: u64 },
    /// A range request came back with a `Content-Range` that does not start at the requested offset.
    RangeMismatch { requested: u64, served: u64 },
    /// Disk/storage write failed (e.g. disk full, permission denied). Fails the whole job.
    Storage(std::io::Error),
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferError::Curl(e) => write!(f, "{}", e),
            TransferError::Network(msg) => write!(f, "network: {}", msg),
            TransferError::Http(code) => write!(f, "HTTP {}", code),
            TransferError::PartialTransfer { expected, received } => {
                write!(f, "partial transfer: expected {} bytes, got {}", expected, received)
            }
            TransferError::RangeMismatch { requested, served } => {
                write!(f, "range mismatch: requested offset {}, served {}", requested, served)
            }
            TransferError::Storage(e) => write!(f, "storage: {}", e),
        }
    }
}

impl std::error::Error for TransferError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransferError::Curl(e) => Some(e),
            TransferError::Storage(e) => Some(e),
            TransferError::Network(_)
            | TransferError::Http(_)
            | TransferError::PartialTransfer { .. }
            | TransferError::RangeMismatch { .. } => None,
        }
    }
}

impl From<std::io::Error> for TransferError {
    fn from(e: std::io::Error) -> Self {
        TransferError::Storage(e)
    }
}
