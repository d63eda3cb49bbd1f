//! In-memory transport with per-URL failure scripts, for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::{BodySink, ContentRange, FetchError, FetchRequest, ResponseHead, Transport};
use crate::retry::TransferError;

/// Behaviour of one request. Requests beyond the script succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Ok,
    Http(u32),
    /// Connection fails before any header arrives.
    NetworkError,
    /// Body is cut once the absolute offset reaches this value.
    CutAt(u64),
    /// Reply 200 with the full body even when a range was requested.
    IgnoreRange,
}

struct Resource {
    body: Vec<u8>,
    send_length: bool,
    steps: VecDeque<Step>,
    requests: Vec<u64>,
}

#[derive(Default)]
pub(crate) struct ScriptedTransport {
    resources: Mutex<HashMap<String, Resource>>,
    chunk_delay: Duration,
    active: AtomicUsize,
    peak: AtomicUsize,
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Sleep before every chunk so transfers stay in flight long enough to observe.
    pub(crate) fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    pub(crate) fn add(&self, url: &str, body: Vec<u8>) {
        self.insert(url, body, true);
    }

    /// Resource served without Content-Length (chunked-style).
    pub(crate) fn add_unknown_length(&self, url: &str, body: Vec<u8>) {
        self.insert(url, body, false);
    }

    fn insert(&self, url: &str, body: Vec<u8>, send_length: bool) {
        self.resources.lock().unwrap().insert(
            url.to_string(),
            Resource {
                body,
                send_length,
                steps: VecDeque::new(),
                requests: Vec::new(),
            },
        );
    }

    pub(crate) fn script(&self, url: &str, steps: &[Step]) {
        let mut resources = self.resources.lock().unwrap();
        let res = resources.get_mut(url).expect("unknown url");
        res.steps.extend(steps.iter().copied());
    }

    /// Offsets requested for `url`, in order.
    pub(crate) fn requests(&self, url: &str) -> Vec<u64> {
        self.resources
            .lock()
            .unwrap()
            .get(url)
            .map(|r| r.requests.clone())
            .unwrap_or_default()
    }

    /// Highest number of concurrent `get` calls observed.
    pub(crate) fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

fn network(msg: &str) -> FetchError {
    FetchError::Failed(TransferError::Network(msg.to_string()))
}

impl Transport for ScriptedTransport {
    fn get(&self, req: &FetchRequest<'_>, sink: &mut dyn BodySink) -> Result<(), FetchError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _guard = ActiveGuard(&self.active);

        let (body, send_length, step) = {
            let mut resources = self.resources.lock().unwrap();
            let Some(res) = resources.get_mut(req.url) else {
                return Err(FetchError::Failed(TransferError::Http(404)));
            };
            res.requests.push(req.offset);
            let step = res.steps.pop_front().unwrap_or(Step::Ok);
            (res.body.clone(), res.send_length, step)
        };
        let len = body.len() as u64;

        let start = match step {
            Step::Http(code) => return Err(FetchError::Failed(TransferError::Http(code))),
            Step::NetworkError => return Err(network("connection refused")),
            Step::IgnoreRange => 0,
            Step::Ok | Step::CutAt(_) => req.offset,
        };
        if start > 0 && start >= len {
            return Err(FetchError::Failed(TransferError::Http(416)));
        }

        let head = if start > 0 {
            ResponseHead {
                status: 206,
                content_length: send_length.then_some(len - start),
                content_range: Some(ContentRange {
                    start,
                    end_inclusive: len - 1,
                    total: send_length.then_some(len),
                }),
            }
        } else {
            ResponseHead {
                status: 200,
                content_length: send_length.then_some(len),
                content_range: None,
            }
        };
        sink.on_head(&head)?;

        let cut = match step {
            Step::CutAt(n) => Some(n),
            _ => None,
        };
        let mut pos = start;
        for chunk in body[start as usize..].chunks(req.chunk_size.max(1)) {
            let mut chunk = chunk;
            if let Some(n) = cut {
                if pos >= n {
                    return Err(network("connection reset by peer"));
                }
                chunk = &chunk[..chunk.len().min((n - pos) as usize)];
            }
            if !self.chunk_delay.is_zero() {
                std::thread::sleep(self.chunk_delay);
            }
            sink.on_chunk(chunk)?;
            pos += chunk.len() as u64;
        }
        if let Some(n) = cut {
            if pos >= n && pos < len {
                return Err(network("connection reset by peer"));
            }
        }
        Ok(())
    }
}
