//! Core HTTP protocol types: methods, versions, status codes, and the MIME /
//! Cache-Control policy tables spec §4.G describes.

use crate::errors::ErrorKind;

// METHOD

/// HTTP request methods this server recognizes.
///
/// Only `GET` and `HEAD` are served; every other verb is reported as
/// `501 Not Implemented` per spec §3 ("Method ... only GET, HEAD recognized;
/// others reported as 501").
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Other,
}

impl Method {
    /// Parses the method token at the start of a request line, returning the
    /// method and the byte offset of the following space. Any token other
    /// than GET/HEAD still parses (so the engine can answer 501 instead of
    /// 400), as long as it looks like a method token.
    #[inline]
    pub(crate) fn from_bytes(src: &[u8]) -> Result<(Self, usize), ErrorKind> {
        match src {
            [b'G', b'E', b'T', b' ', ..] => Ok((Method::Get, 4)),
            [b'H', b'E', b'A', b'D', b' ', ..] => Ok((Method::Head, 5)),
            _ => {
                let end = memchr::memchr(b' ', src).ok_or(ErrorKind::Malformed)?;
                if end == 0 || end > 15 || !src[..end].iter().all(u8::is_ascii_alphabetic) {
                    return Err(ErrorKind::Malformed);
                }
                Ok((Method::Other, end + 1))
            }
        }
    }
}

// VERSION

/// HTTP protocol version. Spec §2/§6: HTTP/1.0 and HTTP/1.1 only.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    /// Parses an exact `HTTP/1.0` or `HTTP/1.1` token. Anything else is
    /// `UnsupportedVersion` (→ 505) per spec §4.G.
    #[inline]
    pub(crate) fn from_bytes(src: &[u8]) -> Result<Self, ErrorKind> {
        match src {
            b"HTTP/1.1" => Ok(Self::Http11),
            b"HTTP/1.0" => Ok(Self::Http10),
            _ => Err(ErrorKind::UnsupportedVersion),
        }
    }

    #[inline]
    pub(crate) const fn as_bytes(self) -> &'static [u8] {
        match self {
            Version::Http11 => b"HTTP/1.1",
            Version::Http10 => b"HTTP/1.0",
        }
    }

    /// Default keep-alive disposition before reading any `Connection` header
    /// (spec §4.G keep-alive rules): on for 1.1, off for 1.0.
    #[inline]
    pub(crate) const fn default_keep_alive(self) -> bool {
        matches!(self, Version::Http11)
    }
}

// STATUS CODE

macro_rules! set_status_codes {
    ($( $name:ident = ($num:expr, $str:expr); )+) => {
        /// HTTP status codes this server can emit.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum StatusCode { $( $name = $num, )+ }

        impl StatusCode {
            #[inline]
            pub(crate) const fn reason(&self) -> &'static str {
                match self { $( StatusCode::$name => $str, )+ }
            }

            #[inline]
            pub(crate) const fn code(&self) -> u16 {
                match self { $( StatusCode::$name => $num, )+ }
            }
        }
    }
}

set_status_codes! {
    Ok = (200, "OK");
    NotModified = (304, "Not Modified");
    BadRequest = (400, "Bad Request");
    Forbidden = (403, "Forbidden");
    NotFound = (404, "Not Found");
    PayloadTooLarge = (413, "Payload Too Large");
    InternalServerError = (500, "Internal Server Error");
    NotImplemented = (501, "Not Implemented");
    HttpVersionNotSupported = (505, "HTTP Version Not Supported");
}

impl StatusCode {
    #[inline]
    pub(crate) fn write_status_line(&self, version: Version, buf: &mut Vec<u8>) {
        buf.extend_from_slice(version.as_bytes());
        buf.push(b' ');
        buf.extend_from_slice(self.code().to_string().as_bytes());
        buf.push(b' ');
        buf.extend_from_slice(self.reason().as_bytes());
        buf.extend_from_slice(b"\r\n");
    }
}

// CONTENT NEGOTIATION

/// The collapsed `Accept-Encoding` negotiation result used as half of the
/// response cache key (spec §4.F "Keying").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    None,
    Gzip,
    Deflate,
}

impl Encoding {
    /// Reduces a raw `Accept-Encoding` header value down to the small
    /// enumeration the cache key and compressor both use. Prefers gzip over
    /// deflate when a client advertises both, matching common server
    /// behavior and keeping the choice deterministic.
    pub(crate) fn negotiate(accept_encoding: Option<&[u8]>) -> Self {
        let Some(header) = accept_encoding else {
            return Encoding::None;
        };
        let mut saw_deflate = false;
        for token in header.split(|&b| b == b',') {
            let token = trim_ascii(token);
            let name = token.split(|&b| b == b';').next().unwrap_or(token);
            let name = trim_ascii(name);
            if name.eq_ignore_ascii_case(b"gzip") {
                return Encoding::Gzip;
            }
            if name.eq_ignore_ascii_case(b"deflate") {
                saw_deflate = true;
            }
        }
        if saw_deflate {
            Encoding::Deflate
        } else {
            Encoding::None
        }
    }

    #[inline]
    pub(crate) const fn as_header_value(self) -> Option<&'static str> {
        match self {
            Encoding::None => None,
            Encoding::Gzip => Some("gzip"),
            Encoding::Deflate => Some("deflate"),
        }
    }
}

#[inline]
pub(crate) fn trim_ascii(mut s: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = s {
        if first.is_ascii_whitespace() {
            s = rest;
        } else {
            break;
        }
    }
    while let [rest @ .., last] = s {
        if last.is_ascii_whitespace() {
            s = rest;
        } else {
            break;
        }
    }
    s
}

// MIME / CACHE-CONTROL POLICY (spec §4.G tables)

/// Extension-derived content class driving both MIME type and Cache-Control
/// policy, plus compression level eligibility (spec §4.E, §4.G).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ContentClass {
    Html,
    Css,
    Js,
    Json,
    Image,
    Icon,
    Font,
    Svg,
    Text,
    Document,
    OctetStream,
    NoExtension,
}

impl ContentClass {
    pub(crate) fn classify(path: &[u8]) -> Self {
        let Some(ext) = extension_of(path) else {
            return ContentClass::NoExtension;
        };
        match ext.to_ascii_lowercase().as_slice() {
            b"html" | b"htm" => ContentClass::Html,
            b"css" => ContentClass::Css,
            b"js" => ContentClass::Js,
            b"json" => ContentClass::Json,
            b"png" | b"jpg" | b"jpeg" | b"gif" => ContentClass::Image,
            b"ico" => ContentClass::Icon,
            b"svg" => ContentClass::Svg,
            b"woff" | b"woff2" | b"ttf" | b"otf" | b"eot" => ContentClass::Font,
            b"txt" => ContentClass::Text,
            b"pdf" | b"doc" | b"docx" => ContentClass::Document,
            _ => ContentClass::OctetStream,
        }
    }

    pub(crate) fn mime_type(self, ext: &[u8]) -> &'static str {
        match self {
            ContentClass::Html => "text/html",
            ContentClass::Css => "text/css",
            ContentClass::Js => "application/javascript",
            ContentClass::Json => "application/json",
            ContentClass::Image => match ext.to_ascii_lowercase().as_slice() {
                b"png" => "image/png",
                b"gif" => "image/gif",
                _ => "image/jpeg",
            },
            ContentClass::Icon => "image/x-icon",
            ContentClass::Svg => "image/svg+xml",
            ContentClass::Font => "font/woff2",
            ContentClass::Text => "text/plain",
            ContentClass::Document => "application/pdf",
            ContentClass::OctetStream | ContentClass::NoExtension => "application/octet-stream",
        }
    }

    pub(crate) const fn cache_control(self) -> &'static str {
        match self {
            ContentClass::Css | ContentClass::Js => "public, max-age=86400, must-revalidate",
            ContentClass::Image | ContentClass::Icon => "public, max-age=604800, immutable",
            ContentClass::Html => "public, max-age=300, must-revalidate",
            ContentClass::Document => "public, max-age=86400",
            ContentClass::NoExtension => "no-cache, no-store, must-revalidate",
            ContentClass::Json
            | ContentClass::Svg
            | ContentClass::Font
            | ContentClass::Text
            | ContentClass::OctetStream => "public, max-age=3600",
        }
    }

    /// `flate2` compression level to use for this class (spec §4.E): text
    /// formats compress well at a moderate level, fonts/svg benefit from the
    /// highest level since they're compressed once and served many times,
    /// and already-compressed binary formats get the cheapest level so the
    /// compressor doesn't waste cycles for little gain.
    pub(crate) const fn compression_level(self) -> u32 {
        match self {
            ContentClass::Html | ContentClass::Css | ContentClass::Js | ContentClass::Json => 6,
            ContentClass::Font | ContentClass::Svg => 9,
            ContentClass::Image | ContentClass::OctetStream => 1,
            ContentClass::Icon
            | ContentClass::Text
            | ContentClass::Document
            | ContentClass::NoExtension => 6,
        }
    }
}

/// `Content-Type` string for a request path, per the spec §4.G MIME table.
pub(crate) fn mime_type_for(path: &[u8]) -> &'static str {
    let ext = extension_of(path).unwrap_or(b"");
    ContentClass::classify(path).mime_type(ext)
}

fn extension_of(path: &[u8]) -> Option<&[u8]> {
    let last_segment = match memchr::memrchr(b'/', path) {
        Some(idx) => &path[idx + 1..],
        None => path,
    };
    let dot = memchr::memrchr(b'.', last_segment)?;
    if dot == 0 {
        return None;
    }
    Some(&last_segment[dot + 1..])
}

// HEADERS

/// A single request header as a byte-slice view into the connection buffer.
#[derive(Debug, Clone, Copy)]
pub struct Header<'a> {
    pub name: &'a [u8],
    pub value: &'a [u8],
}

/// Ordered header list with case-insensitive name lookup (spec §3: "ordered
/// list of header name/value pairs (case-insensitive name match on read)").
/// Backed by a `Vec` of borrowed name/value slices into the connection's
/// read buffer; `parse_request` allocates a fresh one with `with_capacity`
/// per call rather than reusing one across requests on a connection.
/// Entries beyond `MAX_HEADERS` are dropped by the parser before they reach
/// here.
#[derive(Debug, Default)]
pub struct HeaderMap<'a> {
    entries: Vec<Header<'a>>,
}

impl<'a> HeaderMap<'a> {
    pub(crate) fn with_capacity(cap: usize) -> Self {
        HeaderMap { entries: Vec::with_capacity(cap) }
    }

    pub(crate) fn push(&mut self, name: &'a [u8], value: &'a [u8]) {
        self.entries.push(Header { name, value });
    }

    pub fn get(&self, name: &str) -> Option<&'a [u8]> {
        self.entries
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name.as_bytes()))
            .map(|h| h.value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header<'a>> {
        self.entries.iter()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_parses_get_and_head() {
        assert_eq!(Method::from_bytes(b"GET /x HTTP/1.1").unwrap(), (Method::Get, 4));
        assert_eq!(Method::from_bytes(b"HEAD /x HTTP/1.1").unwrap(), (Method::Head, 5));
    }

    #[test]
    fn method_other_still_parses_for_501() {
        let (m, n) = Method::from_bytes(b"POST / HTTP/1.1").unwrap();
        assert_eq!(m, Method::Other);
        assert_eq!(n, 5);
    }

    #[test]
    fn version_rejects_unknown() {
        assert!(Version::from_bytes(b"HTTP/2.0").is_err());
        assert!(Version::from_bytes(b"HTTP/0.9").is_err());
    }

    #[test]
    fn encoding_prefers_gzip() {
        assert_eq!(Encoding::negotiate(Some(b"deflate, gzip")), Encoding::Gzip);
        assert_eq!(Encoding::negotiate(Some(b"deflate")), Encoding::Deflate);
        assert_eq!(Encoding::negotiate(Some(b"br")), Encoding::None);
        assert_eq!(Encoding::negotiate(None), Encoding::None);
    }

    #[test]
    fn mime_table_matches_spec() {
        assert_eq!(mime_type_for(b"/index.html"), "text/html");
        assert_eq!(mime_type_for(b"/a/b/style.css"), "text/css");
        assert_eq!(mime_type_for(b"/app.js"), "application/javascript");
        assert_eq!(mime_type_for(b"/img/pic.jpg"), "image/jpeg");
        assert_eq!(mime_type_for(b"/no_ext"), "application/octet-stream");
    }

    #[test]
    fn header_map_lookup_is_case_insensitive() {
        let mut headers = HeaderMap::with_capacity(4);
        headers.push(b"Accept-Encoding", b"gzip, deflate");
        assert_eq!(headers.get("accept-encoding"), Some(&b"gzip, deflate"[..]));
        assert_eq!(headers.get("ACCEPT-ENCODING"), Some(&b"gzip, deflate"[..]));
        assert_eq!(headers.get("host"), None);
    }

    #[test]
    fn cache_control_classes() {
        assert_eq!(ContentClass::Css.cache_control(), "public, max-age=86400, must-revalidate");
        assert_eq!(ContentClass::Html.cache_control(), "public, max-age=300, must-revalidate");
        assert_eq!(ContentClass::NoExtension.cache_control(), "no-cache, no-store, must-revalidate");
    }
}
