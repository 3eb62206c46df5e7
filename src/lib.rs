//! edgecached - an edge-caching HTTP/1.1 static file server tuned for
//! extreme single-host concurrency.
//!
//! # Architecture
//!
//! A supervisor process binds the listening socket once and forks a
//! worker per core, each pinned via `sched_setaffinity`. Every worker runs
//! a single-threaded, non-blocking, readiness-driven connection loop
//! (`mio`): nothing here spawns a thread or blocks on I/O. A request moves
//! through rate limiting, path canonicalization, response caching, and
//! conditional-request handling before a static file is read (or served
//! zero-copy via `sendfile`) and written back.
//!
//! # Modules
//!
//! - [`config`] / [`error`] / [`logging`] / [`access_log`] — the ambient
//!   process stack: TOML configuration, process-level errors distinct
//!   from per-request ones, `tracing`-based lifecycle logs, and a
//!   pluggable per-request access log sink.
//! - [`buffer`] — the pooled read-buffer allocator.
//! - [`rate_limit`] — the fixed-size per-IP admission table.
//! - [`pathres`] — document-root-relative path canonicalization and
//!   traversal rejection.
//! - [`compress`] — gzip/deflate body compression.
//! - [`cache`] — the shared, path+encoding-keyed response cache.
//! - [`http`] — zero-copy request parsing, response assembly, and the
//!   protocol types (methods, versions, status codes, MIME/Cache-Control
//!   tables).
//! - [`engine`] — ties all of the above into the request-handling
//!   algorithm; owns the cache.
//! - [`server`] — the per-connection state machine, the per-process
//!   worker event loop, and the supervisor that binds, forks, and
//!   restarts workers.

pub mod access_log;
pub mod buffer;
pub mod cache;
pub mod compress;
pub mod config;
pub mod engine;
pub mod error;
pub(crate) mod errors;
pub mod http {
    pub mod request;
    pub mod response;
    pub mod types;
}
pub mod limits;
pub mod logging;
pub mod pathres;
pub mod rate_limit;
pub mod server {
    pub(crate) mod connection;
    pub mod supervisor;
    pub mod worker;
}

pub use crate::{
    cache::Cache,
    config::Config,
    engine::Engine,
    http::{
        request::Request,
        response::Response,
        types::{Method, StatusCode, Version},
    },
};
