//! HTTP transport for transfer units.
//!
//! The transfer loop talks to the network only through [`Transport`]: one
//! GET per attempt, optionally starting at a byte offset. Response headers are
//! delivered once before the first body chunk; body chunks are pushed to the
//! sink as they arrive. A sink error aborts the transfer and is returned as-is.

mod curl_transport;
mod head;
#[cfg(test)]
pub(crate) mod scripted;

use std::collections::HashMap;

pub use curl_transport::CurlTransport;
pub use head::{parse_content_range, parse_response_head, ContentRange, ResponseHead};

use crate::retry::TransferError;

/// Receives one response: headers first, then body chunks in order.
pub trait BodySink {
    fn on_head(&mut self, head: &ResponseHead) -> Result<(), FetchError>;
    fn on_chunk(&mut self, chunk: &[u8]) -> Result<(), FetchError>;
}

/// One GET request.
#[derive(Debug, Clone)]
pub struct FetchRequest<'a> {
    pub url: &'a str,
    pub headers: &'a HashMap<String, String>,
    /// Start offset; a non-zero offset sends `Range: bytes=<offset>-`.
    pub offset: u64,
    /// Preferred receive buffer size in bytes.
    pub chunk_size: usize,
}

/// Why a transport call did not complete. Also returned by sinks to stop a transfer early.
#[derive(Debug)]
pub enum FetchError {
    /// Job control asked the transfer to stop (pause/cancel/abort).
    Stopped(crate::control::Stop),
    /// Network, HTTP, storage or range failure.
    Failed(TransferError),
}

impl From<TransferError> for FetchError {
    fn from(e: TransferError) -> Self {
        FetchError::Failed(e)
    }
}

/// Blocking HTTP client used by the transfer loop. Called from a blocking worker thread.
///
/// Implementations must report non-2xx responses as `TransferError::Http`
/// without delivering their bodies to the sink.
pub trait Transport: Send + Sync {
    fn get(&self, req: &FetchRequest<'_>, sink: &mut dyn BodySink) -> Result<(), FetchError>;
}
