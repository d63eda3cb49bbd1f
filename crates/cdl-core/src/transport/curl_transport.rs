//! libcurl-backed transport: one easy handle per GET.

use std::cell::RefCell;
use std::time::Duration;

use super::{parse_response_head, BodySink, FetchError, FetchRequest, ResponseHead, Transport};
use crate::retry::TransferError;

/// Blocking transport on top of `curl::easy`. Stateless; safe to share across workers.
#[derive(Debug, Clone)]
pub struct CurlTransport {
    connect_timeout: Duration,
    /// Abort if throughput stays below `low_speed_limit` bytes/s for `low_speed_time`.
    low_speed_limit: u32,
    low_speed_time: Duration,
}

impl Default for CurlTransport {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            low_speed_limit: 1024,
            low_speed_time: Duration::from_secs(60),
        }
    }
}

impl CurlTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

fn curl_err(e: curl::Error) -> FetchError {
    FetchError::Failed(TransferError::Curl(e))
}

fn is_success(status: u32) -> bool {
    (200..300).contains(&status)
}

impl Transport for CurlTransport {
    fn get(&self, req: &FetchRequest<'_>, sink: &mut dyn BodySink) -> Result<(), FetchError> {
        let mut easy = curl::easy::Easy::new();
        easy.url(req.url).map_err(curl_err)?;
        easy.follow_location(true).map_err(curl_err)?;
        easy.connect_timeout(self.connect_timeout).map_err(curl_err)?;
        // Low-speed abort instead of a wall-clock timeout: lectures can be large.
        easy.low_speed_limit(self.low_speed_limit).map_err(curl_err)?;
        easy.low_speed_time(self.low_speed_time).map_err(curl_err)?;
        if req.chunk_size > 0 {
            easy.buffer_size(req.chunk_size).map_err(curl_err)?;
        }
        if req.offset > 0 {
            easy.range(&format!("{}-", req.offset)).map_err(curl_err)?;
        }

        if !req.headers.is_empty() {
            let mut list = curl::easy::List::new();
            for (k, v) in req.headers {
                list.append(&format!("{}: {}", k.trim(), v.trim()))
                    .map_err(curl_err)?;
            }
            easy.http_headers(list).map_err(curl_err)?;
        }

        let header_lines: RefCell<Vec<String>> = RefCell::new(Vec::new());
        let head: RefCell<Option<ResponseHead>> = RefCell::new(None);
        // Error raised inside the write callback; curl only sees a short write.
        let callback_error: RefCell<Option<FetchError>> = RefCell::new(None);
        let sink = RefCell::new(sink);

        let perform_result = {
            let mut transfer = easy.transfer();
            transfer
                .header_function(|line| {
                    let line = String::from_utf8_lossy(line).trim_end().to_string();
                    let mut lines = header_lines.borrow_mut();
                    if line.starts_with("HTTP/") {
                        lines.clear();
                    }
                    lines.push(line);
                    true
                })
                .map_err(curl_err)?;
            transfer
                .write_function(|data| {
                    let mut sink = sink.borrow_mut();
                    if head.borrow().is_none() {
                        let parsed = parse_response_head(&header_lines.borrow());
                        if !is_success(parsed.status) {
                            *callback_error.borrow_mut() =
                                Some(FetchError::Failed(TransferError::Http(parsed.status)));
                            return Ok(0);
                        }
                        if let Err(e) = sink.on_head(&parsed) {
                            *callback_error.borrow_mut() = Some(e);
                            return Ok(0);
                        }
                        *head.borrow_mut() = Some(parsed);
                    }
                    match sink.on_chunk(data) {
                        Ok(()) => Ok(data.len()),
                        Err(e) => {
                            *callback_error.borrow_mut() = Some(e);
                            Ok(0)
                        }
                    }
                })
                .map_err(curl_err)?;
            transfer.perform()
        };

        if let Err(e) = perform_result {
            if e.is_write_error() {
                if let Some(err) = callback_error.borrow_mut().take() {
                    return Err(err);
                }
            }
            return Err(curl_err(e));
        }

        // Empty body: the head was never delivered through the write callback.
        if head.borrow().is_none() {
            let mut parsed = parse_response_head(&header_lines.borrow());
            if parsed.status == 0 {
                parsed.status = easy.response_code().map_err(curl_err)?;
            }
            if !is_success(parsed.status) {
                return Err(FetchError::Failed(TransferError::Http(parsed.status)));
            }
            sink.borrow_mut().on_head(&parsed)?;
        }

        Ok(())
    }
}
