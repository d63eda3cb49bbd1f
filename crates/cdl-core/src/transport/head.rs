//! Parse HTTP response header lines into a `ResponseHead`.

/// Parsed `Content-Range: bytes start-end/total` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub start: u64,
    pub end_inclusive: u64,
    /// Full resource length if the server sent it (not `*`).
    pub total: Option<u64>,
}

/// Status and the headers the transfer loop needs from the final response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u32,
    pub content_length: Option<u64>,
    pub content_range: Option<ContentRange>,
}

impl ResponseHead {
    /// Full resource length implied by this response to a request at `offset`.
    pub fn total_length(&self, offset: u64) -> Option<u64> {
        match (self.status, &self.content_range) {
            (206, Some(range)) => range.total,
            (206, None) => self.content_length.map(|n| n + offset),
            _ => self.content_length,
        }
    }
}

/// Parse a `Content-Range` header value.
pub fn parse_content_range(value: &str) -> Option<ContentRange> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (range, total) = rest.split_once('/')?;
    let (start, end) = range.trim().split_once('-')?;
    let total = match total.trim() {
        "*" => None,
        t => Some(t.parse::<u64>().ok()?),
    };
    Some(ContentRange {
        start: start.trim().parse().ok()?,
        end_inclusive: end.trim().parse().ok()?,
        total,
    })
}

/// Parse the header lines of one response. Lines from earlier responses in a
/// redirect chain are ignored: only the block after the last status line counts.
pub fn parse_response_head(lines: &[String]) -> ResponseHead {
    let mut head = ResponseHead::default();

    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with("HTTP/") {
            head = ResponseHead::default();
            head.status = line
                .split_whitespace()
                .nth(1)
                .and_then(|c| c.parse().ok())
                .unwrap_or(0);
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim();
            let value = value.trim();
            if name.eq_ignore_ascii_case("content-length") {
                head.content_length = value.parse::<u64>().ok();
            } else if name.eq_ignore_ascii_case("content-range") {
                head.content_range = parse_content_range(value);
            }
        }
    }

    head
}
