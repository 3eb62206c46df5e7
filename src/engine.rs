//! The HTTP engine (spec §4.G): ties parsing, path resolution, conditional
//! validation, compression, and the response cache together into the
//! request-handling algorithm described in "Request handling (for GET and
//! HEAD)".

use std::fs::File;
use std::io::Read as _;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use crate::cache::{Cache, InsertOutcome};
use crate::errors::ErrorKind;
use crate::http::request::Request;
use crate::http::response::Response;
use crate::http::types::{mime_type_for, ContentClass, Encoding, Method, StatusCode, Version};
use crate::limits::{CACHEABLE_BODY_CEILING, COMPRESSIBLE_READ_CEILING};
use crate::{compress, pathres};

/// Outcome of a single compression attempt, keeping the already-read plain
/// bytes around so an expansion-abort can fall back to them instead of
/// re-reading the file (spec §4.E step 10).
enum CompressOutcome {
    Compressed(Vec<u8>),
    Rejected(Vec<u8>),
    ReadFailed,
}

pub struct Engine {
    root: PathBuf,
    cache: Cache,
    keep_alive_timeout_secs: u64,
}

impl Engine {
    pub fn new(root: PathBuf, cache: Cache, keep_alive_timeout_secs: u64) -> Self {
        Engine { root, cache, keep_alive_timeout_secs }
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Implements spec §4.G "Request handling" steps 1-12.
    pub fn handle(&self, req: &Request<'_>, now: Instant) -> Response {
        let version = req.version();

        // Step 1: method gate.
        if !matches!(req.method(), Method::Get | Method::Head) {
            return self.error_for(ErrorKind::UnknownMethod, version);
        }

        // Step 2: path resolution, mapping `/` to `/index.html`.
        let target = if req.target() == b"/" { &b"/index.html"[..] } else { req.target() };
        let canonical = match pathres::resolve(&self.root, target) {
            Ok(path) => path,
            Err(_) => return self.error_for(ErrorKind::PathRejected, version),
        };
        let path_key = canonical.to_string_lossy().into_owned();

        // Step 3: negotiate encoding.
        let accept_encoding = req.header("accept-encoding");
        let encoding = Encoding::negotiate(accept_encoding);

        let keep_alive = req.keep_alive();

        // Step 4: cache lookup.
        if let Some(hit) = self.cache.lookup(&path_key, encoding, now) {
            if if_none_match_hits(req.header("if-none-match"), &hit.etag) {
                return self.not_modified(&hit.etag, version, keep_alive, &canonical);
            }
            let suppress_body = req.method() == Method::Head;
            return Response::from_cache_verbatim(hit.bytes, hit.head_len, suppress_body, keep_alive);
        }

        // Step 5: stat the file.
        let metadata = match std::fs::metadata(&canonical) {
            Ok(m) => m,
            Err(_) => return self.error_for(ErrorKind::NotFound, version),
        };
        let etag = compute_etag(&metadata);

        // Step 6: If-None-Match against the derived ETag.
        if if_none_match_hits(req.header("if-none-match"), &etag) {
            return self.not_modified(&etag, version, keep_alive, &canonical);
        }

        // Step 7: If-Modified-Since, only consulted if If-None-Match absent.
        if req.header("if-none-match").is_none() {
            if let Some(raw) = req.header("if-modified-since") {
                if let Some(since) = parse_http_date(raw) {
                    let mtime = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                    if !is_newer_than(mtime, since) {
                        return self.not_modified(&etag, version, keep_alive, &canonical);
                    }
                }
            }
        }

        // Steps 8-12: assemble a fresh 200.
        self.assemble_200(&canonical, &path_key, encoding, req, version, keep_alive, now)
    }

    fn assemble_200(
        &self,
        canonical: &Path,
        path_key: &str,
        encoding: Encoding,
        req: &Request<'_>,
        version: Version,
        keep_alive: bool,
        now: Instant,
    ) -> Response {
        let metadata = match std::fs::metadata(canonical) {
            Ok(m) => m,
            Err(_) => return self.error_for(ErrorKind::NotFound, version),
        };
        let etag = compute_etag(&metadata);
        let class = ContentClass::classify(canonical.as_os_str().as_encoded_bytes());
        let mime = mime_type_for(canonical.as_os_str().as_encoded_bytes());
        let last_modified = httpdate::fmt_http_date(metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH));

        let mut resp = Response::new(StatusCode::Ok, version, keep_alive);
        resp.header("content-type", mime)
            .header("last-modified", &last_modified)
            .header("etag", &etag)
            .header("vary", "Accept-Encoding, User-Agent")
            .header("cache-control", class.cache_control());

        let suppress_body = req.method() == Method::Head;
        let file_len = metadata.len();

        let body: Option<Vec<u8>> = if encoding != Encoding::None && file_len <= COMPRESSIBLE_READ_CEILING {
            match self.try_compress(canonical, file_len, encoding, class) {
                CompressOutcome::Compressed(bytes) => {
                    if let Some(enc_name) = encoding.as_header_value() {
                        resp.header("content-encoding", enc_name);
                    }
                    Some(bytes)
                }
                // Expansion check aborted the attempt (spec §4.E step 10):
                // the plain bytes were already read, so serve those instead
                // of discarding them and falling back to a second read via
                // zero-copy file transmission.
                CompressOutcome::Rejected(plain) => Some(plain),
                CompressOutcome::ReadFailed => None,
            }
        } else if file_len <= CACHEABLE_BODY_CEILING {
            std::fs::read(canonical).ok()
        } else {
            None
        };

        match body {
            Some(body) => {
                // Spec §4.G step 10: only small pre-assembled bodies get
                // cached, and the cached bytes must be exactly what's sent,
                // so a HEAD response (which suppresses the body) never
                // caches — only the GET path that produced `body` does.
                let should_cache = !suppress_body && body.len() as u64 <= CACHEABLE_BODY_CEILING;
                let wire_body = should_cache.then(|| body.clone());
                resp.with_memory_body(body, suppress_body);
                resp.finish(self.keep_alive_timeout_secs);
                if let Some(body) = wire_body {
                    let head_len = resp.head().len();
                    let mut wire = Vec::with_capacity(head_len + body.len());
                    wire.extend_from_slice(resp.head());
                    wire.extend_from_slice(&body);
                    self.cache.insert(path_key, encoding, &etag, Arc::from(wire.into_boxed_slice()), head_len, now);
                }
                resp
            }
            None => match File::open(canonical) {
                Ok(file) => {
                    resp.with_file_body(file, 0, file_len, suppress_body);
                    resp.finish(self.keep_alive_timeout_secs);
                    resp
                }
                Err(_) => self.error_for(ErrorKind::NotFound, version),
            },
        }
    }

    fn try_compress(&self, canonical: &Path, file_len: u64, encoding: Encoding, class: ContentClass) -> CompressOutcome {
        let Ok(mut file) = File::open(canonical) else { return CompressOutcome::ReadFailed };
        let mut contents = Vec::with_capacity(file_len as usize);
        if file.read_to_end(&mut contents).is_err() {
            return CompressOutcome::ReadFailed;
        }
        match compress::compress(&contents, encoding, class.compression_level()) {
            Ok(compressed) => CompressOutcome::Compressed(compressed),
            Err(_) => CompressOutcome::Rejected(contents),
        }
    }

    fn not_modified(&self, etag: &str, version: Version, keep_alive: bool, canonical: &Path) -> Response {
        let mut resp = Response::new(StatusCode::NotModified, version, keep_alive);
        let class = ContentClass::classify(canonical.as_os_str().as_encoded_bytes());
        resp.header("etag", etag).header("cache-control", class.cache_control());
        resp.with_empty_body();
        resp.finish(self.keep_alive_timeout_secs);
        resp
    }

    /// Renders the disposition for a parse-time or dispatch-time error
    /// (spec §7). Public within the crate so the connection loop can use it
    /// directly for `ParseError` outcomes that never reach `handle`.
    pub(crate) fn error_for(&self, kind: ErrorKind, version: Version) -> Response {
        let status = match kind.status() {
            400 => StatusCode::BadRequest,
            403 => StatusCode::Forbidden,
            404 => StatusCode::NotFound,
            413 => StatusCode::PayloadTooLarge,
            501 => StatusCode::NotImplemented,
            505 => StatusCode::HttpVersionNotSupported,
            _ => StatusCode::InternalServerError,
        };
        let keep_alive = !kind.forces_close();
        let mut resp = Response::new(status, version, keep_alive);
        resp.with_empty_body();
        resp.finish(self.keep_alive_timeout_secs);
        resp
    }
}

/// Derives the quoted ETag `"inode-size-mtime"` (lowercase hex) per spec
/// §4.G step 5.
fn compute_etag(metadata: &std::fs::Metadata) -> String {
    let inode = metadata.ino();
    let size = metadata.size();
    let mtime = metadata.mtime();
    format!("\"{inode:x}-{size:x}-{mtime:x}\"")
}

/// Spec §4.G step 4/6 tokenization rules: comma-separated, trimmed,
/// optional `W/` weak prefix, enclosing double quotes stripped; `*` always
/// matches.
fn if_none_match_hits(header: Option<&[u8]>, etag: &str) -> bool {
    let Some(header) = header else { return false };
    let Ok(header) = std::str::from_utf8(header) else { return false };
    let stripped_target = etag.trim_matches('"');

    for token in header.split(',') {
        let token = token.trim();
        if token == "*" {
            return true;
        }
        let token = token.strip_prefix("W/").unwrap_or(token);
        let token = token.trim_matches('"');
        if token == stripped_target {
            return true;
        }
    }
    false
}

/// Parses an `If-Modified-Since` value in any of RFC-1123, RFC-850, or
/// asctime form (spec §4.G step 7). `httpdate` accepts all three per
/// RFC 7231 §7.1.1.1.
fn parse_http_date(raw: &[u8]) -> Option<SystemTime> {
    let s = std::str::from_utf8(raw).ok()?;
    httpdate::parse_http_date(s).ok()
}

/// Compares mtime truncated to seconds against `since`; returns true if the
/// file is strictly newer (spec §4.G step 7: "if not newer -> 304").
fn is_newer_than(mtime: SystemTime, since: SystemTime) -> bool {
    let mtime_secs = mtime.duration_since(SystemTime::UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
    let since_secs = since.duration_since(SystemTime::UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
    mtime_secs > since_secs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::parse_request;
    use crate::http::response::Body;
    use std::time::Duration;

    fn engine_over(dir: &Path) -> Engine {
        Engine::new(dir.to_path_buf(), Cache::new(64, Duration::from_secs(3600)), 60)
    }

    #[test]
    fn serves_index_html_with_expected_headers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), b"x").unwrap();
        let engine = engine_over(dir.path());
        let raw = b"GET /index.html HTTP/1.1\r\nHost: x\r\n\r\n";
        let (req, _) = parse_request(raw, 8192).unwrap().unwrap();
        let resp = engine.handle(&req, Instant::now());
        let head = String::from_utf8(resp.head().to_vec()).unwrap();
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(head.contains("content-type: text/html"));
        assert!(head.contains("content-length: 1"));
    }

    #[test]
    fn if_none_match_star_always_matches() {
        assert!(if_none_match_hits(Some(b"*"), "\"abc\""));
    }

    #[test]
    fn if_none_match_weak_prefix_matches() {
        assert!(if_none_match_hits(Some(b"W/\"abc\""), "\"abc\""));
    }

    #[test]
    fn path_traversal_is_forbidden() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_over(dir.path());
        let raw = b"GET /../etc/passwd HTTP/1.1\r\nHost: x\r\n\r\n";
        let (req, _) = parse_request(raw, 8192).unwrap().unwrap();
        let resp = engine.handle(&req, Instant::now());
        assert_eq!(resp.status(), StatusCode::Forbidden);
        assert!(!resp.keep_alive);
    }

    #[test]
    fn unknown_method_is_501() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_over(dir.path());
        let raw = b"POST / HTTP/1.1\r\nHost: x\r\n\r\n";
        let (req, _) = parse_request(raw, 8192).unwrap().unwrap();
        let resp = engine.handle(&req, Instant::now());
        assert_eq!(resp.status(), StatusCode::NotImplemented);
    }

    #[test]
    fn missing_file_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_over(dir.path());
        let raw = b"GET /nope.html HTTP/1.1\r\nHost: x\r\n\r\n";
        let (req, _) = parse_request(raw, 8192).unwrap().unwrap();
        let resp = engine.handle(&req, Instant::now());
        assert_eq!(resp.status(), StatusCode::NotFound);
    }

    #[test]
    fn head_against_cache_hit_suppresses_body_but_keeps_headers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello world").unwrap();
        let engine = engine_over(dir.path());
        let now = Instant::now();

        let get_raw = b"GET /a.txt HTTP/1.1\r\nHost: x\r\n\r\n";
        let (get_req, _) = parse_request(get_raw, 8192).unwrap().unwrap();
        let get_resp = engine.handle(&get_req, now);
        assert_eq!(get_resp.status(), StatusCode::Ok);
        assert!(!get_resp.cached(), "first request is a miss, not yet from the cache");

        let head_raw = b"HEAD /a.txt HTTP/1.1\r\nHost: x\r\n\r\n";
        let (head_req, _) = parse_request(head_raw, 8192).unwrap().unwrap();
        let head_resp = engine.handle(&head_req, now);
        assert!(head_resp.cached(), "second request should be served from the cache");
        assert_eq!(head_resp.status(), StatusCode::Ok);
        assert!(matches!(head_resp.body(), Body::CacheVerbatim { .. }));
        assert_eq!(head_resp.total_len(), head_resp.to_wire_bytes().len() as u64);

        let wire = head_resp.to_wire_bytes();
        let text = String::from_utf8_lossy(&wire);
        assert!(text.contains("content-length: 11"));
        assert!(text.ends_with("\r\n\r\n"), "body must be suppressed");
    }
}
