//! Request framing for the USB serial console.
//!
//! Host bytes arrive in arbitrary packet-sized pieces. [`RequestAssembler`]
//! accumulates them until it holds one complete request: the header block up
//! to the first blank line plus `Content-Length` bytes of body when that header
//! is present. The dispatcher then parses the frame with
//! [`pool_core::dispatch::parse_request`].

use core::fmt;
use core::mem;
use core::str;

use heapless::Vec;

/// Longest request the console accepts, headers and body included.
pub const MAX_REQUEST_LEN: usize = 512;

/// One complete request as received from the host.
pub type RequestFrame = Vec<u8, MAX_REQUEST_LEN>;

/// Framing failure; the partial request is discarded.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FrameError {
    Overflow,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::Overflow => write!(f, "request exceeds {MAX_REQUEST_LEN} bytes"),
        }
    }
}

/// Incremental request framer.
#[derive(Debug, Default)]
pub struct RequestAssembler {
    buffer: RequestFrame,
    body_start: Option<usize>,
    body_len: usize,
}

impl RequestAssembler {
    pub const fn new() -> Self {
        Self {
            buffer: Vec::new(),
            body_start: None,
            body_len: 0,
        }
    }

    /// Bytes held for the request currently being assembled.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drops any partial request, e.g. when the host disconnects.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.body_start = None;
        self.body_len = 0;
    }

    /// Feeds one byte, returning a frame once a request is complete.
    pub fn feed(&mut self, byte: u8) -> Option<Result<RequestFrame, FrameError>> {
        // Blank lines between requests carry nothing.
        if self.buffer.is_empty() && matches!(byte, b'\r' | b'\n') {
            return None;
        }
        if self.buffer.push(byte).is_err() {
            self.reset();
            return Some(Err(FrameError::Overflow));
        }

        if self.body_start.is_none() {
            let start = header_end(&self.buffer)?;
            self.body_start = Some(start);
            self.body_len = content_length(&self.buffer[..start]);
        }

        let start = self.body_start?;
        if self.buffer.len() - start < self.body_len {
            return None;
        }

        let frame = mem::take(&mut self.buffer);
        self.reset();
        Some(Ok(frame))
    }
}

fn header_end(buffer: &[u8]) -> Option<usize> {
    if buffer.ends_with(b"\r\n\r\n") || buffer.ends_with(b"\n\n") {
        Some(buffer.len())
    } else {
        None
    }
}

fn content_length(header: &[u8]) -> usize {
    let Ok(header) = str::from_utf8(header) else {
        return 0;
    };
    header
        .lines()
        .skip(1)
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(assembler: &mut RequestAssembler, bytes: &[u8]) -> Option<RequestFrame> {
        let mut completed = None;
        for &byte in bytes {
            if let Some(result) = assembler.feed(byte) {
                assert!(completed.is_none(), "only one frame expected");
                completed = Some(result.expect("frame fits"));
            }
        }
        completed
    }

    #[test]
    fn completes_single_line_requests_at_blank_line() {
        let mut assembler = RequestAssembler::new();
        let frame = feed_all(&mut assembler, b"GET /data\r\n\r\n").expect("frame");
        assert_eq!(frame.as_slice(), b"GET /data\r\n\r\n");
        assert_eq!(assembler.buffered(), 0);
    }

    #[test]
    fn waits_for_declared_body() {
        let mut assembler = RequestAssembler::new();
        let head = b"POST /CMD HTTP/1.1\r\nContent-Length: 15\r\n\r\n";
        assert!(feed_all(&mut assembler, head).is_none());
        assert!(feed_all(&mut assembler, br#"{"command":"#).is_none());
        let frame = feed_all(&mut assembler, br#""R"}"#).expect("frame");
        assert!(frame.ends_with(br#"{"command":"R"}"#));
    }

    #[test]
    fn skips_blank_lines_between_requests() {
        let mut assembler = RequestAssembler::new();
        assert!(feed_all(&mut assembler, b"\r\n\n").is_none());
        assert_eq!(assembler.buffered(), 0);
        let frame = feed_all(&mut assembler, b"GET /HELP\n\n").expect("frame");
        assert!(frame.starts_with(b"GET /HELP"));
    }

    #[test]
    fn header_names_ignore_case() {
        assert_eq!(content_length(b"POST /POLL\ncontent-LENGTH: 7\n\n"), 7);
        assert_eq!(content_length(b"POST /POLL\nContent-Type: text/json\n\n"), 0);
    }

    #[test]
    fn oversized_requests_are_dropped() {
        let mut assembler = RequestAssembler::new();
        let mut overflowed = false;
        for _ in 0..=MAX_REQUEST_LEN {
            if let Some(result) = assembler.feed(b'x') {
                assert_eq!(result, Err(FrameError::Overflow));
                overflowed = true;
            }
        }
        assert!(overflowed);
        assert_eq!(assembler.buffered(), 0);
    }
}
