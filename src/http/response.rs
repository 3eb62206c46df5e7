//! Response assembly (spec §3 "Response", §4.G "Rendering contract").
//!
//! A [`Response`] carries a serialized head (status line + headers) and
//! exactly one of three body sources: an in-memory buffer, an open file
//! with an offset/length for zero-copy transmission, or a pointer into a
//! cache entry's pre-assembled bytes. The cache-entry case stores the
//! *entire* wire response (head and body both), since that's what the
//! response cache keeps (spec §3 "Cache entry").

use crate::http::types::{StatusCode, Version};
use std::fs::File;
use std::sync::Arc;

/// The three mutually exclusive body sources a response may carry (spec §8:
/// "either body_in_memory, body_from_file, or body_from_cache holds, never
/// two simultaneously").
pub enum Body {
    /// No body at all (304 responses, HEAD requests).
    Empty,
    /// A fully buffered body, e.g. a compressed artifact or a small file
    /// read into memory ahead of compression.
    Memory(Vec<u8>),
    /// An open file plus the byte range to transmit via zero-copy transfer.
    File { file: File, offset: u64, len: u64 },
    /// The complete wire bytes of a previous response, served verbatim from
    /// the response cache. When this variant is set, `Response::head` is
    /// empty — these bytes already include the status line and headers.
    /// `write_len` is how much of `bytes` actually goes out: the full
    /// length for GET, or just the header prefix for a HEAD hit whose body
    /// is suppressed (spec §4.G step 11).
    CacheVerbatim { bytes: Arc<[u8]>, write_len: usize },
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Body::Empty => write!(f, "Body::Empty"),
            Body::Memory(b) => write!(f, "Body::Memory({} bytes)", b.len()),
            Body::File { offset, len, .. } => {
                write!(f, "Body::File {{ offset: {offset}, len: {len} }}")
            }
            Body::CacheVerbatim { bytes, write_len } => {
                write!(f, "Body::CacheVerbatim({} of {} bytes)", write_len, bytes.len())
            }
        }
    }
}

/// An assembled HTTP response ready for rendering onto a connection.
#[derive(Debug)]
pub struct Response {
    head: Vec<u8>,
    body: Body,
    status: StatusCode,
    pub(crate) keep_alive: bool,
    /// True when this response was served from the response cache (distinct
    /// from `Body::CacheVerbatim` only in that a 304 against a cache hit
    /// still sets this even though its body is `Empty`).
    pub(crate) cached: bool,
}

impl Response {
    /// Starts building a response with a status line and no headers yet.
    pub fn new(status: StatusCode, version: Version, keep_alive: bool) -> Self {
        let mut head = Vec::with_capacity(256);
        status.write_status_line(version, &mut head);
        Response { head, body: Body::Empty, status, keep_alive, cached: false }
    }

    /// A response built entirely out of previously cached wire bytes (spec
    /// §4.G step 4 "return the entry bytes verbatim"). No further header
    /// assembly happens; `render` writes `bytes` as-is. `head_len` is the
    /// length of the status-line-plus-headers prefix within `bytes`;
    /// `suppress_body` (HEAD hits, spec §4.G step 11) truncates the write to
    /// just that prefix instead of falling back to a fresh re-read.
    pub fn from_cache_verbatim(bytes: Arc<[u8]>, head_len: usize, suppress_body: bool, keep_alive: bool) -> Self {
        let write_len = if suppress_body { head_len } else { bytes.len() };
        Response {
            head: Vec::new(),
            body: Body::CacheVerbatim { bytes, write_len },
            status: StatusCode::Ok,
            keep_alive,
            cached: true,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Whether the connection should stay open after this response (spec
    /// §4.G keep-alive rules).
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Whether this response was served from the response cache.
    pub fn cached(&self) -> bool {
        self.cached
    }

    pub fn header(&mut self, name: &str, value: &str) -> &mut Self {
        self.head.extend_from_slice(name.as_bytes());
        self.head.extend_from_slice(b": ");
        self.head.extend_from_slice(value.as_bytes());
        self.head.extend_from_slice(b"\r\n");
        self
    }

    pub fn header_bytes(&mut self, name: &str, value: &[u8]) -> &mut Self {
        self.head.extend_from_slice(name.as_bytes());
        self.head.extend_from_slice(b": ");
        self.head.extend_from_slice(value);
        self.head.extend_from_slice(b"\r\n");
        self
    }

    /// Sets an in-memory body and the matching `Content-Length` header.
    /// `suppress_body` (spec §4.G step 11, HEAD requests) keeps the header
    /// but drops the bytes.
    pub fn with_memory_body(&mut self, bytes: Vec<u8>, suppress_body: bool) -> &mut Self {
        self.header("content-length", &bytes.len().to_string());
        self.body = if suppress_body { Body::Empty } else { Body::Memory(bytes) };
        self
    }

    /// Sets a zero-copy file body and the matching `Content-Length` header.
    pub fn with_file_body(&mut self, file: File, offset: u64, len: u64, suppress_body: bool) -> &mut Self {
        self.header("content-length", &len.to_string());
        self.body = if suppress_body { Body::Empty } else { Body::File { file, offset, len } };
        self
    }

    /// No body, `Content-Length: 0` (304 responses, error dispositions).
    pub fn with_empty_body(&mut self) -> &mut Self {
        self.header("content-length", "0");
        self.body = Body::Empty;
        self
    }

    /// Finalizes the head with the connection-management headers every
    /// response carries (spec §6: `Server`, one of `Connection: keep-alive`
    /// / `Connection: close`, and `Keep-Alive: timeout=<N>` when applicable)
    /// and terminates the header block.
    pub fn finish(&mut self, keep_alive_timeout_secs: u64) -> &mut Self {
        self.head.extend_from_slice(b"server: edgecached\r\n");
        if self.keep_alive {
            self.head.extend_from_slice(b"connection: keep-alive\r\n");
            self.head.extend_from_slice(
                format!("keep-alive: timeout={keep_alive_timeout_secs}\r\n").as_bytes(),
            );
        } else {
            self.head.extend_from_slice(b"connection: close\r\n");
        }
        self.head.extend_from_slice(b"\r\n");
        self
    }

    /// The serialized status line and headers (everything before the
    /// body), terminated by the blank line.
    pub fn head(&self) -> &[u8] {
        &self.head
    }

    /// Renders the complete wire bytes of this response by concatenating
    /// the head with the body. The connection loop never calls this —
    /// it streams the head and body separately so a file body can go out
    /// via zero-copy transfer — but it's a convenient single entry point
    /// for tests that want to assert on a full response without driving
    /// a real socket.
    pub fn to_wire_bytes(&self) -> Vec<u8> {
        let mut out = self.head.clone();
        match &self.body {
            Body::Empty => {}
            Body::Memory(b) => out.extend_from_slice(b),
            Body::File { file, offset, len } => {
                use std::io::{Read, Seek, SeekFrom};
                let mut f = file.try_clone().expect("clone fd for wire rendering");
                f.seek(SeekFrom::Start(*offset)).expect("seek to body start");
                let mut buf = vec![0u8; *len as usize];
                f.read_exact(&mut buf).expect("read file body");
                out.extend_from_slice(&buf);
            }
            Body::CacheVerbatim { bytes, write_len } => out.extend_from_slice(&bytes[..*write_len]),
        }
        out
    }

    /// The response's body source (spec §8: exactly one variant is active
    /// at a time).
    pub fn body(&self) -> &Body {
        &self.body
    }

    pub(crate) fn into_body(self) -> Body {
        self.body
    }

    /// Total response length, when fully knowable up front (everything but
    /// an open-ended file body whose length is already tracked separately).
    pub(crate) fn total_len(&self) -> u64 {
        let body_len = match &self.body {
            Body::Empty => 0,
            Body::Memory(b) => b.len() as u64,
            Body::File { len, .. } => *len,
            Body::CacheVerbatim { write_len, .. } => return *write_len as u64,
        };
        self.head.len() as u64 + body_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembles_head_with_keep_alive_headers() {
        let mut resp = Response::new(StatusCode::Ok, Version::Http11, true);
        resp.header("content-type", "text/html");
        resp.with_memory_body(b"hi".to_vec(), false);
        resp.finish(60);
        let head = String::from_utf8(resp.head().to_vec()).unwrap();
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(head.contains("content-type: text/html\r\n"));
        assert!(head.contains("content-length: 2\r\n"));
        assert!(head.contains("connection: keep-alive\r\n"));
        assert!(head.contains("keep-alive: timeout=60\r\n"));
        assert!(head.ends_with("\r\n\r\n"));
    }

    #[test]
    fn close_response_omits_keep_alive_header() {
        let mut resp = Response::new(StatusCode::Forbidden, Version::Http11, false);
        resp.with_empty_body();
        resp.finish(60);
        let head = String::from_utf8(resp.head().to_vec()).unwrap();
        assert!(head.contains("connection: close\r\n"));
        assert!(!head.contains("keep-alive:"));
    }

    #[test]
    fn head_suppresses_body_but_keeps_content_length() {
        let mut resp = Response::new(StatusCode::Ok, Version::Http11, true);
        resp.with_memory_body(b"0123456789".to_vec(), true);
        resp.finish(60);
        assert!(matches!(resp.body(), Body::Empty));
        assert!(String::from_utf8(resp.head().to_vec()).unwrap().contains("content-length: 10"));
    }

    #[test]
    fn cache_verbatim_has_no_separate_head() {
        let bytes: Arc<[u8]> = Arc::from(&b"HTTP/1.1 200 OK\r\n\r\n"[..]);
        let resp = Response::from_cache_verbatim(bytes.clone(), bytes.len(), false, true);
        assert!(resp.head().is_empty());
        assert!(resp.cached);
        match resp.body() {
            Body::CacheVerbatim { bytes: b, write_len } => {
                assert_eq!(&**b, &*bytes);
                assert_eq!(*write_len, bytes.len());
            }
            _ => panic!("expected CacheVerbatim body"),
        }
    }

    #[test]
    fn cache_verbatim_head_request_truncates_to_head_len() {
        let bytes: Arc<[u8]> = Arc::from(&b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\nhi"[..]);
        let head_len = bytes.len() - 2;
        let resp = Response::from_cache_verbatim(bytes.clone(), head_len, true, true);
        match resp.body() {
            Body::CacheVerbatim { write_len, .. } => assert_eq!(*write_len, head_len),
            _ => panic!("expected CacheVerbatim body"),
        }
        assert_eq!(resp.total_len(), head_len as u64);
    }
}
