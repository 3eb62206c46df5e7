//! End-to-end scenarios against the in-process HTTP engine (parse -> handle
//! -> render), without a real socket. Mirrors spec §8's literal concrete
//! scenarios and testable properties.

use std::sync::Arc;
use std::time::{Duration, Instant};

use edgecached::cache::Cache;
use edgecached::http::request::parse_request;
use edgecached::http::types::{Encoding, StatusCode};
use edgecached::rate_limit::{Admission, Denied, RateLimiter};
use edgecached::Engine;

const BUF_CAP: usize = 8 * 1024;

fn engine_over(root: &std::path::Path) -> Engine {
    Engine::new(root.to_path_buf(), Cache::new(64, Duration::from_secs(3600)), 60)
}

/// Scenario 1: GET /index.html against a 1-byte file.
#[test]
fn scenario_get_index_html() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), b"x").unwrap();
    let engine = engine_over(dir.path());

    let raw = b"GET /index.html HTTP/1.1\r\nHost: x\r\n\r\n";
    let (req, _) = parse_request(raw, BUF_CAP).unwrap().unwrap();
    let resp = engine.handle(&req, Instant::now());

    assert_eq!(resp.status(), StatusCode::Ok);
    let head = String::from_utf8(resp.head().to_vec()).unwrap();
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(head.contains("content-type: text/html\r\n"));
    assert!(head.contains("content-length: 1\r\n"));
    assert!(head.contains("etag: \""));
}

/// Scenario 2: a matching If-None-Match produces 304 with the same ETag
/// and no body.
#[test]
fn scenario_if_none_match_produces_304() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), b"x").unwrap();
    let engine = engine_over(dir.path());

    let first = b"GET /index.html HTTP/1.1\r\nHost: x\r\n\r\n";
    let (req, _) = parse_request(first, BUF_CAP).unwrap().unwrap();
    let resp = engine.handle(&req, Instant::now());
    let head = String::from_utf8(resp.head().to_vec()).unwrap();
    let etag = head
        .lines()
        .find(|l| l.to_ascii_lowercase().starts_with("etag:"))
        .unwrap()
        .split_once(':')
        .unwrap()
        .1
        .trim()
        .to_string();

    let conditional = format!("GET /index.html HTTP/1.1\r\nHost: x\r\nIf-None-Match: {etag}\r\n\r\n");
    let (req, _) = parse_request(conditional.as_bytes(), BUF_CAP).unwrap().unwrap();
    let resp = engine.handle(&req, Instant::now());

    assert_eq!(resp.status(), StatusCode::NotModified);
    let head = String::from_utf8(resp.head().to_vec()).unwrap();
    assert!(head.contains(&format!("etag: {etag}")));
    assert!(matches!(resp.body(), edgecached::http::response::Body::Empty));
}

/// Scenario 3: a traversal attempt is rejected with 403 and forces close.
#[test]
fn scenario_traversal_is_forbidden() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_over(dir.path());

    let raw = b"GET /../etc/passwd HTTP/1.1\r\nHost: x\r\n\r\n";
    let (req, _) = parse_request(raw, BUF_CAP).unwrap().unwrap();
    let resp = engine.handle(&req, Instant::now());

    assert_eq!(resp.status(), StatusCode::Forbidden);
    assert!(!resp.keep_alive());
}

/// Scenario 4: an unsupported method is reported as 501 and forces close.
#[test]
fn scenario_post_is_not_implemented() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_over(dir.path());

    let raw = b"POST / HTTP/1.1\r\nHost: x\r\n\r\n";
    let (req, _) = parse_request(raw, BUF_CAP).unwrap().unwrap();
    let resp = engine.handle(&req, Instant::now());

    assert_eq!(resp.status(), StatusCode::NotImplemented);
    assert!(!resp.keep_alive());
}

/// Scenario 5: sustained traffic from one IP trips the window threshold and,
/// after repeated violations, a ban.
#[test]
fn scenario_rate_limiting_denies_and_then_bans() {
    let mut limiter = RateLimiter::new(false);
    let ip = "203.0.113.7";
    let mut now = Instant::now();

    let mut saw_window_exceeded = false;
    for _ in 0..5 {
        for _ in 0..100 {
            limiter.admit(ip, now);
            limiter.release(ip);
        }
        if limiter.admit(ip, now) == Admission::Denied(Denied::WindowExceeded) {
            saw_window_exceeded = true;
        }
        now += Duration::from_secs(60);
    }
    assert!(saw_window_exceeded);
    assert_eq!(limiter.admit(ip, now), Admission::Denied(Denied::Banned));
}

/// Scenario 6: a compressible file negotiated with gzip gets
/// Content-Encoding: gzip and a body that decompresses back to the
/// original bytes.
#[test]
fn scenario_gzip_negotiation_round_trips() {
    use flate2::read::GzDecoder;
    use std::io::Read;

    let dir = tempfile::tempdir().unwrap();
    let original = b"body { color: red; } ".repeat(256); // 5 KiB-ish
    std::fs::write(dir.path().join("style.css"), &original).unwrap();
    let engine = engine_over(dir.path());

    let raw = b"GET /style.css HTTP/1.1\r\nAccept-Encoding: gzip\r\nHost: x\r\n\r\n";
    let (req, _) = parse_request(raw, BUF_CAP).unwrap().unwrap();
    let resp = engine.handle(&req, Instant::now());

    assert_eq!(resp.status(), StatusCode::Ok);
    let head = String::from_utf8(resp.head().to_vec()).unwrap();
    assert!(head.contains("content-encoding: gzip"));

    let compressed = match resp.body() {
        edgecached::http::response::Body::Memory(b) => b.clone(),
        other => panic!("expected an in-memory compressed body, got {other:?}"),
    };
    let content_length: usize = head
        .lines()
        .find(|l| l.to_ascii_lowercase().starts_with("content-length:"))
        .unwrap()
        .split_once(':')
        .unwrap()
        .1
        .trim()
        .parse()
        .unwrap();
    assert_eq!(content_length, compressed.len());

    let mut decoder = GzDecoder::new(&compressed[..]);
    let mut decompressed = Vec::new();
    decoder.read_to_end(&mut decompressed).unwrap();
    assert_eq!(decompressed, original);
}

/// Round-trip testable property: a cached 200 is served byte-identical on
/// the next matching lookup.
#[test]
fn cache_round_trip_is_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), b"hello cache").unwrap();
    let engine = engine_over(dir.path());

    let raw = b"GET /a.txt HTTP/1.1\r\nHost: x\r\n\r\n";
    let (req, _) = parse_request(raw, BUF_CAP).unwrap().unwrap();
    let now = Instant::now();
    let first = engine.handle(&req, now);
    let first_wire = first.to_wire_bytes();

    let (req, _) = parse_request(raw, BUF_CAP).unwrap().unwrap();
    let second = engine.handle(&req, now);
    assert!(second.cached());
    let second_wire = second.to_wire_bytes();

    assert_eq!(first_wire, second_wire);
}

/// Idempotence: repeated GETs against an unchanged file produce identical
/// bodies, ETags, and Last-Modified values.
#[test]
fn repeated_gets_are_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), b"stable content").unwrap();
    let engine = engine_over(dir.path());
    let raw = b"GET /a.txt HTTP/1.1\r\nHost: x\r\n\r\n";

    let (req, _) = parse_request(raw, BUF_CAP).unwrap().unwrap();
    let first = engine.handle(&req, Instant::now());
    let first_head = String::from_utf8(first.head().to_vec()).unwrap();

    let (req, _) = parse_request(raw, BUF_CAP).unwrap().unwrap();
    let second = engine.handle(&req, Instant::now());
    let second_head = String::from_utf8(second.head().to_vec()).unwrap();

    let extract = |h: &str, name: &str| -> String {
        h.lines().find(|l| l.to_ascii_lowercase().starts_with(name)).unwrap().to_string()
    };
    assert_eq!(extract(&first_head, "etag:"), extract(&second_head, "etag:"));
    assert_eq!(extract(&first_head, "last-modified:"), extract(&second_head, "last-modified:"));
}

/// Conditional laws: `*`, an exact match, and a weak-prefixed match all
/// produce 304 with no body.
#[test]
fn conditional_validator_tokenization_matches_spec() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), b"data").unwrap();
    let engine = engine_over(dir.path());

    let (req, _) = parse_request(b"GET /a.txt HTTP/1.1\r\nHost: x\r\n\r\n", BUF_CAP).unwrap().unwrap();
    let resp = engine.handle(&req, Instant::now());
    let head = String::from_utf8(resp.head().to_vec()).unwrap();
    let etag = head
        .lines()
        .find(|l| l.to_ascii_lowercase().starts_with("etag:"))
        .unwrap()
        .split_once(':')
        .unwrap()
        .1
        .trim()
        .to_string();

    for candidate in ["*".to_string(), etag.clone(), format!("W/{etag}")] {
        let raw = format!("GET /a.txt HTTP/1.1\r\nHost: x\r\nIf-None-Match: {candidate}\r\n\r\n");
        let (req, _) = parse_request(raw.as_bytes(), BUF_CAP).unwrap().unwrap();
        let resp = engine.handle(&req, Instant::now());
        assert_eq!(resp.status(), StatusCode::NotModified, "failed for candidate {candidate}");
        assert!(matches!(resp.body(), edgecached::http::response::Body::Empty));
    }
}

/// Cache memory-ceiling invariant: an entry over the per-entry cap is
/// never stored, so a subsequent lookup still misses.
#[test]
fn oversized_body_never_enters_cache() {
    let cache = Cache::new(16, Duration::from_secs(3600));
    let now = Instant::now();
    let huge: Arc<[u8]> = Arc::from(vec![0u8; 6 * 1024 * 1024].into_boxed_slice());
    let outcome = cache.insert("/big", Encoding::None, "\"e\"", huge, 0, now);
    assert_eq!(outcome, edgecached::cache::InsertOutcome::SkippedTooLarge);
    assert!(cache.lookup("/big", Encoding::None, now).is_none());
}
