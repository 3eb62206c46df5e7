//! Request-line and header parsing (spec §4.G "Parsing contract").
//!
//! The parser is zero-copy: every field in [`Request`] borrows from the
//! connection's read buffer. Nothing here touches the network or the
//! filesystem; it only turns a byte slice into a structured request, or an
//! [`ErrorKind`] describing why it couldn't.

use crate::errors::ErrorKind;
use crate::http::types::{HeaderMap, Method, Version};
use memchr::{memchr, memchr_iter};

pub(crate) const MAX_METHOD_LEN: usize = 15;
pub(crate) const MAX_URI_LEN: usize = 2047;
pub(crate) const MAX_VERSION_LEN: usize = 15;
pub(crate) const MAX_HEADERS: usize = 256;
pub(crate) const MAX_HEADER_VALUE_LEN: usize = 8 * 1024;

/// A fully parsed HTTP request (spec §3 "Request").
#[derive(Debug)]
pub struct Request<'a> {
    method: Method,
    target: &'a [u8],
    version: Version,
    headers: HeaderMap<'a>,
    keep_alive: bool,
}

impl<'a> Request<'a> {
    #[inline]
    pub fn method(&self) -> Method {
        self.method
    }

    /// The raw request-target bytes, e.g. `/style.css`. Never contains the
    /// query string separately; this server has no query-string semantics.
    #[inline]
    pub fn target(&self) -> &'a [u8] {
        self.target
    }

    #[inline]
    pub fn version(&self) -> Version {
        self.version
    }

    #[inline]
    pub fn header(&self, name: &str) -> Option<&'a [u8]> {
        self.headers.get(name)
    }

    #[inline]
    pub fn headers(&self) -> &HeaderMap<'a> {
        &self.headers
    }

    /// Keep-alive as derived at parse time from version + `Connection`
    /// header (spec §4.G keep-alive rules). The handler may still force
    /// close for error dispositions regardless of this value.
    #[inline]
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }
}

/// Parses one complete request out of `buf`, returning the request and the
/// number of bytes it consumed (so the caller can advance past it and
/// continue parsing a pipelined request from the remainder). Returns `Ok(None)`
/// if `buf` doesn't yet contain a full CRLFCRLF-terminated request head and
/// hasn't exceeded the buffer-overflow threshold — the caller should read
/// more bytes and retry. Returns `Err(TooLarge)` once `buf.len()` reaches the
/// connection buffer ceiling without a terminator having appeared.
pub fn parse_request<'a>(buf: &'a [u8], buffer_cap: usize) -> Result<Option<(Request<'a>, usize)>, ErrorKind> {
    let Some(head_end) = find_head_end(buf) else {
        if buf.len() >= buffer_cap.saturating_sub(1) {
            return Err(ErrorKind::TooLarge);
        }
        return Ok(None);
    };

    let head = &buf[..head_end];
    let (method, after_method) = Method::from_bytes(head)?;

    let line_end = memchr(b'\r', &head[after_method..])
        .map(|i| i + after_method)
        .ok_or(ErrorKind::Malformed)?;
    if line_end <= after_method {
        return Err(ErrorKind::Malformed);
    }
    let rest_of_line = &head[after_method..line_end];

    let space = memchr(b' ', rest_of_line).ok_or(ErrorKind::Malformed)?;
    let target = &rest_of_line[..space];
    if target.is_empty() || target.len() > MAX_URI_LEN || target[0] != b'/' {
        return Err(ErrorKind::Malformed);
    }

    let version_bytes = &rest_of_line[space + 1..];
    if version_bytes.is_empty() || version_bytes.len() > MAX_VERSION_LEN {
        return Err(ErrorKind::Malformed);
    }
    let version = Version::from_bytes(version_bytes)?;

    let headers_region = &head[line_end + 2..];
    let headers = parse_headers(headers_region)?;

    let keep_alive = resolve_keep_alive(version, &headers);

    Ok(Some((
        Request { method, target, version, headers, keep_alive },
        head_end + 4,
    )))
}

/// Locates the CRLFCRLF that terminates the request head, if present.
fn find_head_end(buf: &[u8]) -> Option<usize> {
    memchr_iter(b'\n', buf).find_map(|i| {
        if i >= 3 && &buf[i - 3..=i] == b"\r\n\r\n" {
            Some(i - 3)
        } else {
            None
        }
    })
}

fn parse_headers<'a>(region: &'a [u8]) -> Result<HeaderMap<'a>, ErrorKind> {
    let mut headers = HeaderMap::with_capacity(32);
    if region.is_empty() {
        return Ok(headers);
    }

    for line in split_lines(region) {
        if line.is_empty() {
            continue;
        }
        if headers.len() >= MAX_HEADERS {
            return Err(ErrorKind::Malformed);
        }
        let colon = memchr(b':', line).ok_or(ErrorKind::Malformed)?;
        let name = &line[..colon];
        if name.is_empty() || name.iter().any(|&b| b == b' ' || b == b'\t') {
            return Err(ErrorKind::Malformed);
        }
        let mut value = &line[colon + 1..];
        value = trim_leading_spaces(value);
        if value.len() > MAX_HEADER_VALUE_LEN {
            value = &value[..MAX_HEADER_VALUE_LEN];
        }
        headers.push(name, value);
    }

    Ok(headers)
}

/// Splits a CRLF-terminated header block into individual lines without the
/// trailing `\r\n`. The block is expected to already exclude the final
/// blank-line terminator.
fn split_lines(region: &[u8]) -> impl Iterator<Item = &[u8]> {
    let mut start = 0;
    memchr_iter(b'\n', region).filter_map(move |i| {
        let line_end = if i > start && region[i - 1] == b'\r' { i - 1 } else { i };
        let line = &region[start..line_end];
        start = i + 1;
        Some(line)
    })
}

#[inline]
fn trim_leading_spaces(mut s: &[u8]) -> &[u8] {
    while let [b' ', rest @ ..] = s {
        s = rest;
    }
    s
}

fn resolve_keep_alive(version: Version, headers: &HeaderMap<'_>) -> bool {
    match headers.get("connection") {
        Some(v) if v.eq_ignore_ascii_case(b"close") => false,
        Some(v) if v.eq_ignore_ascii_case(b"keep-alive") => true,
        _ => version.default_keep_alive(),
    }
}
