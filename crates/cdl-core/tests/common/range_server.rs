//! Minimal HTTP/1.1 server with Range GET and fault injection for integration tests.
//!
//! Serves static bodies by path. Faults are counted per path: the first
//! `fail_first` GETs answer 503, and the first successful GET can be cut
//! after a given number of body bytes.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct RangeServerOptions {
    /// If true, GET ignores Range and always returns 200 with the full body.
    pub ignore_ranges: bool,
    /// First N GETs of every path answer 503.
    pub fail_first: u32,
    /// First successful GET of every path closes the connection once this
    /// absolute offset is reached (Content-Length still announces the full size).
    pub cut_first_at: Option<u64>,
    /// Paths answered with 403.
    pub forbidden: Vec<String>,
    /// Pause between 4 KiB writes.
    pub chunk_delay: Duration,
}

/// One GET as seen by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub path: String,
    /// Start of the requested range, if any.
    pub range_start: Option<u64>,
}

#[derive(Default)]
struct PathState {
    gets: u32,
    cut_done: bool,
}

pub struct RangeServer {
    base: String,
    log: Arc<Mutex<Vec<Request>>>,
}

impl RangeServer {
    /// URL of `path` on this server.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path.trim_start_matches('/'))
    }

    /// Range starts requested for `path`, in order (0 for plain GETs).
    pub fn requests(&self, path: &str) -> Vec<u64> {
        let path = format!("/{}", path.trim_start_matches('/'));
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.path == path)
            .map(|r| r.range_start.unwrap_or(0))
            .collect()
    }
}

pub fn start(files: Vec<(&str, Vec<u8>)>) -> RangeServer {
    start_with_options(files, RangeServerOptions::default())
}

/// Starts a server in a background thread. It runs until the process exits.
pub fn start_with_options(files: Vec<(&str, Vec<u8>)>, opts: RangeServerOptions) -> RangeServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let files: Arc<HashMap<String, Vec<u8>>> = Arc::new(
        files
            .into_iter()
            .map(|(p, b)| (format!("/{}", p.trim_start_matches('/')), b))
            .collect(),
    );
    let log = Arc::new(Mutex::new(Vec::new()));
    let state = Arc::new(Mutex::new(HashMap::<String, PathState>::new()));
    let opts = Arc::new(opts);
    {
        let log = Arc::clone(&log);
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let files = Arc::clone(&files);
                let log = Arc::clone(&log);
                let state = Arc::clone(&state);
                let opts = Arc::clone(&opts);
                thread::spawn(move || handle(stream, &files, &log, &state, &opts));
            }
        });
    }
    RangeServer {
        base: format!("http://127.0.0.1:{}/", port),
        log,
    }
}

fn handle(
    mut stream: std::net::TcpStream,
    files: &HashMap<String, Vec<u8>>,
    log: &Mutex<Vec<Request>>,
    state: &Mutex<HashMap<String, PathState>>,
    opts: &RangeServerOptions,
) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(2)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) | Err(_) => return,
        Ok(n) => n,
    };
    let Ok(request) = std::str::from_utf8(&buf[..n]) else {
        return;
    };
    let (method, path, range) = parse_request(request);
    if !method.eq_ignore_ascii_case("GET") {
        let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\n\r\n");
        return;
    }
    log.lock().unwrap().push(Request {
        path: path.to_string(),
        range_start: range,
    });

    let Some(body) = files.get(path) else {
        let _ = stream.write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n");
        return;
    };
    if opts.forbidden.iter().any(|p| format!("/{}", p.trim_start_matches('/')) == path) {
        let _ = stream.write_all(b"HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\n\r\n");
        return;
    }

    let cut = {
        let mut state = state.lock().unwrap();
        let st = state.entry(path.to_string()).or_default();
        st.gets += 1;
        if st.gets <= opts.fail_first {
            drop(state);
            let _ = stream.write_all(b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\n\r\n");
            return;
        }
        match opts.cut_first_at {
            Some(at) if !st.cut_done => {
                st.cut_done = true;
                Some(at)
            }
            _ => None,
        }
    };

    let total = body.len() as u64;
    let start = match range {
        Some(start) if !opts.ignore_ranges => start,
        _ => 0,
    };
    if start > 0 && start >= total {
        let response = format!(
            "HTTP/1.1 416 Range Not Satisfiable\r\nContent-Range: bytes */{}\r\nContent-Length: 0\r\n\r\n",
            total
        );
        let _ = stream.write_all(response.as_bytes());
        return;
    }
    let slice = &body[start as usize..];
    let head = if start > 0 {
        format!(
            "HTTP/1.1 206 Partial Content\r\nContent-Length: {}\r\nContent-Range: bytes {}-{}/{}\r\nAccept-Ranges: bytes\r\n\r\n",
            slice.len(),
            start,
            total - 1,
            total
        )
    } else {
        format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nAccept-Ranges: bytes\r\n\r\n",
            total
        )
    };
    if stream.write_all(head.as_bytes()).is_err() {
        return;
    }

    let mut pos = start;
    for chunk in slice.chunks(4096) {
        let mut chunk = chunk;
        if let Some(at) = cut {
            if pos >= at {
                break;
            }
            chunk = &chunk[..chunk.len().min((at - pos) as usize)];
        }
        if !opts.chunk_delay.is_zero() {
            thread::sleep(opts.chunk_delay);
        }
        if stream.write_all(chunk).is_err() {
            return;
        }
        pos += chunk.len() as u64;
    }
    let _ = stream.flush();
}

/// Returns (method, path, optional range start for `Range: bytes=X-`).
fn parse_request(request: &str) -> (&str, &str, Option<u64>) {
    let mut lines = request.lines();
    let mut first = lines.next().unwrap_or("").split_whitespace();
    let method = first.next().unwrap_or("");
    let path = first.next().unwrap_or("/");
    let mut range = None;
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("range") {
                let value = value.trim();
                if value.to_lowercase().starts_with("bytes=") {
                    if let Some((a, _)) = value[6..].split_once('-') {
                        range = a.trim().parse::<u64>().ok();
                    }
                }
            }
        }
    }
    (method, path, range)
}
