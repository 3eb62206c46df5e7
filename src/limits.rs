//! Protocol and resource limits (spec §4.A, §4.G, §5).
//!
//! Most values here are fixed by the protocol contract (buffer size, header
//! count) rather than configurable; the ones the operator can tune live in
//! [`crate::config::Config`] and are threaded through at startup.

use std::time::Duration;

/// Size of each pooled connection buffer and the per-connection read
/// buffer (spec §4.A: "default 8 KiB x 1024").
pub const BUFFER_SIZE: usize = 8 * 1024;

/// Number of buffers the pool holds (spec §4.A default).
pub const BUFFER_POOL_CAPACITY: usize = 1024;

/// Request head overflow ceiling (spec §4.G: "TooLarge if request block
/// exceeds connection buffer (8 KiB - 1) before the CRLFCRLF appears").
pub const MAX_REQUEST_HEAD: usize = BUFFER_SIZE - 1;

/// Spec §4.G: "up to MAX_HEADERS (256) entries".
pub const MAX_HEADERS: usize = crate::http::request::MAX_HEADERS;

/// Spec §4.G: "longer header values are truncated at MAX_HEADER_SIZE (8 KiB)".
pub const MAX_HEADER_SIZE: usize = crate::http::request::MAX_HEADER_VALUE_LEN;

/// Spec §5: "slow-request threshold (10 s, and fewer than four bytes
/// received)".
pub const SLOW_REQUEST_THRESHOLD: Duration = Duration::from_secs(10);
pub const SLOW_REQUEST_BYTE_FLOOR: usize = 4;

/// Spec §4.H: accept-loop batching cap per wakeup.
pub const ACCEPT_BATCH_CAP: usize = 2000;

/// Spec §4.H: emergency eviction sweep size and idle threshold on
/// EMFILE/ENFILE.
pub const EMERGENCY_EVICTION_COUNT: usize = 10;
pub const EMERGENCY_EVICTION_IDLE: Duration = Duration::from_secs(5);

/// Spec §4.H: TCP keepalive parameters applied to every accepted socket.
pub const TCP_KEEPALIVE_IDLE: Duration = Duration::from_secs(60);
pub const TCP_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);
pub const TCP_KEEPALIVE_RETRIES: u32 = 6;

/// Spec §4.C: rate limiter fixed table size.
pub const RATE_LIMIT_TABLE_SIZE: usize = 4096;
/// Spec §4.C default request window.
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);
pub const RATE_LIMIT_WINDOW_THRESHOLD: u32 = 100;
/// Spec §4.C: violations before a ban is imposed.
pub const RATE_LIMIT_VIOLATIONS_BEFORE_BAN: u32 = 5;
/// Spec §4.C default ban duration.
pub const RATE_LIMIT_BAN_DURATION: Duration = Duration::from_secs(600);
/// Spec §4.C: per-IP concurrent-connection cap.
pub const RATE_LIMIT_CONCURRENT_CAP: u32 = 64;
/// Spec §3 rate-limit entry lifecycle: "garbage-collected after four
/// inactivity windows when not under active ban".
pub const RATE_LIMIT_GC_WINDOWS: u32 = 4;

/// Spec §4.F: per-entry and global cache memory ceilings.
pub const CACHE_ENTRY_MAX_BYTES: u64 = 5 * 1024 * 1024;
pub const CACHE_GLOBAL_MAX_BYTES: u64 = 100 * 1024 * 1024;
/// Spec §4.F: lazy purge cadence ("if >= 300 s since last purge").
pub const CACHE_PURGE_INTERVAL: Duration = Duration::from_secs(300);

/// Spec §4.G step 9: only files at or below this size are read into memory
/// for compression; larger files always use zero-copy transmission.
pub const COMPRESSIBLE_READ_CEILING: u64 = 10 * 1024 * 1024;
/// Spec §4.G step 10: only uncompressed bodies below this size are
/// pre-assembled and handed to the cache.
pub const CACHEABLE_BODY_CEILING: u64 = 1024 * 1024;
/// Spec §4.E: a compression attempt that expands past this multiple of the
/// input's length aborts and falls back to uncompressed.
pub const COMPRESSION_EXPANSION_ABORT_FACTOR: u64 = 2;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_request_head_is_one_below_buffer_size() {
        assert_eq!(MAX_REQUEST_HEAD, BUFFER_SIZE - 1);
    }

    #[test]
    fn cache_ceilings_match_spec() {
        assert_eq!(CACHE_ENTRY_MAX_BYTES, 5 * 1024 * 1024);
        assert_eq!(CACHE_GLOBAL_MAX_BYTES, 100 * 1024 * 1024);
    }
}
