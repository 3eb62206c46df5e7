//! The per-process connection loop (spec §4.H "Connection Loop").
//!
//! Single-threaded, cooperative, readiness-driven. One `Worker` owns a
//! `mio::Poll`, the buffer pool, the rate limiter, and the HTTP engine
//! (which in turn owns the response cache). Nothing here spawns a thread;
//! every suspension point is a return to `poll()`.

use std::collections::HashMap;
use std::io::{self, ErrorKind as IoErrorKind, Read, Write};
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};

use crate::access_log::{AccessLog, AccessRecord};
use crate::buffer::BufferPool;
use crate::errors::ErrorKind;
use crate::http::request::parse_request;
use crate::http::response::Body;
use crate::http::types::Version;
use crate::limits::{
    ACCEPT_BATCH_CAP, BUFFER_SIZE, EMERGENCY_EVICTION_COUNT, EMERGENCY_EVICTION_IDLE,
    SLOW_REQUEST_BYTE_FLOOR, SLOW_REQUEST_THRESHOLD, TCP_KEEPALIVE_IDLE, TCP_KEEPALIVE_INTERVAL,
    TCP_KEEPALIVE_RETRIES,
};
use crate::rate_limit::{Admission, RateLimiter};
use crate::server::connection::{self, Connection};
use crate::Engine;

const LISTENER_TOKEN: Token = Token(usize::MAX);

/// Flags a worker's signal handlers flip; the event loop observes them at
/// each poll-wakeup yield point (spec §9 "Signal-driven control flow").
#[derive(Default)]
pub struct WorkerSignals {
    pub shutdown: Arc<AtomicBool>,
    pub reload: Arc<AtomicBool>,
}

pub struct Worker {
    poll: Poll,
    listener: TcpListener,
    connections: HashMap<Token, Connection>,
    next_token: usize,
    buffer_pool: BufferPool,
    rate_limiter: RateLimiter,
    engine: Arc<Engine>,
    access_log: Arc<dyn AccessLog>,
    keep_alive_timeout: Duration,
    max_connections: usize,
    signals: Arc<WorkerSignals>,
    draining: bool,
    /// The path `Config` was originally loaded from; re-read on `SIGHUP`
    /// (SPEC_FULL.md §C "Reload detail").
    config_path: std::path::PathBuf,
    /// Whether `-d`/`--dev` was passed on the command line; re-applied
    /// after every reload since the flag has no on-disk representation.
    force_dev: bool,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        listener: TcpListener,
        engine: Arc<Engine>,
        access_log: Arc<dyn AccessLog>,
        development_mode: bool,
        keep_alive_timeout_secs: u64,
        max_connections: usize,
        buffer_pool_capacity: usize,
        signals: Arc<WorkerSignals>,
        config_path: std::path::PathBuf,
        force_dev: bool,
    ) -> io::Result<Self> {
        let poll = Poll::new()?;
        Ok(Worker {
            poll,
            listener,
            connections: HashMap::new(),
            next_token: 0,
            buffer_pool: BufferPool::new(BUFFER_SIZE, buffer_pool_capacity),
            rate_limiter: RateLimiter::new(development_mode),
            engine,
            access_log,
            keep_alive_timeout: Duration::from_secs(keep_alive_timeout_secs),
            max_connections,
            signals,
            draining: false,
            config_path,
            force_dev,
        })
    }

    /// Runs until shutdown is signaled and every in-flight connection has
    /// drained (spec SPEC_FULL.md §C "Graceful drain detail").
    pub fn run(&mut self) -> io::Result<()> {
        self.poll.registry().register(&mut self.listener, LISTENER_TOKEN, Interest::READABLE)?;

        let mut events = Events::with_capacity(1024);
        let tick = Duration::from_secs(1);

        loop {
            if self.signals.shutdown.load(Ordering::Relaxed) && !self.draining {
                self.draining = true;
                let _ = self.poll.registry().deregister(&mut self.listener);
            }
            if self.draining && self.connections.is_empty() {
                return Ok(());
            }
            if self.signals.reload.swap(false, Ordering::Relaxed) {
                self.apply_reload();
            }

            match self.poll.poll(&mut events, Some(tick)) {
                Ok(()) => {}
                Err(e) if e.kind() == IoErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }

            for event in events.iter() {
                if event.token() == LISTENER_TOKEN {
                    if !self.draining {
                        self.accept_batch();
                    }
                    continue;
                }
                let token = event.token();
                if event.is_readable() {
                    self.on_readable(token);
                }
                if event.is_writable() {
                    self.on_writable(token);
                }
                if event.is_error() || event.is_read_closed() {
                    self.close_connection(token);
                }
            }

            self.sweep_timers();
        }
    }

    fn next_token(&mut self) -> Token {
        let t = Token(self.next_token);
        self.next_token = self.next_token.wrapping_add(1).max(1);
        t
    }

    /// Spec §4.H "On listening readiness".
    fn accept_batch(&mut self) {
        for _ in 0..ACCEPT_BATCH_CAP {
            match self.listener.accept() {
                Ok((stream, addr)) => self.admit(stream, addr),
                Err(e) if e.kind() == IoErrorKind::WouldBlock => break,
                Err(e) if is_fd_exhaustion(&e) => {
                    self.emergency_evict();
                    break;
                }
                Err(_) => break,
            }
        }
    }

    fn admit(&mut self, mut stream: TcpStream, addr: SocketAddr) {
        let ip = addr.ip();
        let now = Instant::now();

        if self.connections.len() >= self.max_connections {
            return;
        }

        match self.rate_limiter.admit(&ip.to_string(), now) {
            Admission::Admitted => {}
            Admission::Denied(_) => return, // no HTTP response, immediate close (spec §4.C)
        }

        let Ok(buffer) = self.buffer_pool.acquire() else {
            self.rate_limiter.release(&ip.to_string());
            return;
        };

        apply_socket_options(&stream);

        let token = self.next_token();
        if self.poll.registry().register(&mut stream, token, Interest::READABLE).is_err() {
            self.buffer_pool.release(buffer);
            self.rate_limiter.release(&ip.to_string());
            return;
        }

        let conn = Connection::new(token, stream, ip, buffer, now);
        self.connections.insert(token, conn);
    }

    /// Spec §4.H "On client read-readiness".
    fn on_readable(&mut self, token: Token) {
        let Some(conn) = self.connections.get_mut(&token) else { return };
        let now = Instant::now();

        loop {
            if conn.filled >= conn.buffer.bytes.len() {
                break;
            }
            match conn.socket.read(&mut conn.buffer.bytes[conn.filled..]) {
                Ok(0) => {
                    self.close_connection(token);
                    return;
                }
                Ok(n) => {
                    conn.filled += n;
                    conn.bytes_received += n as u64;
                    conn.touch(now);
                }
                Err(e) if e.kind() == IoErrorKind::WouldBlock => break,
                Err(_) => {
                    self.close_connection(token);
                    return;
                }
            }
        }

        self.drain_requests(token, now);
    }

    /// Parses and dispatches as many whole requests as the buffer holds,
    /// strictly in order (spec §4.H, §5 ordering guarantees).
    fn drain_requests(&mut self, token: Token, now: Instant) {
        loop {
            let Some(conn) = self.connections.get_mut(&token) else { return };
            if conn.pending.is_some() {
                return;
            }

            let buffer_cap = conn.buffer.bytes.len();
            let parsed = parse_request(&conn.buffer.bytes[..conn.filled], buffer_cap);

            match parsed {
                Ok(None) => return,
                Ok(Some((request, consumed))) => {
                    let version = request.version();
                    let response = self.engine.handle(&request, now);
                    let keep_alive = response.keep_alive;
                    let status = response.status().code();
                    let method = format!("{:?}", request.method());
                    let path = request.target().to_vec();
                    conn.request_count += 1;
                    conn.consume(consumed);

                    self.access_log.record(&AccessRecord {
                        peer_ip: &conn.peer_ip_str,
                        method: &method,
                        path: &path,
                        status,
                        bytes_sent: response.total_len(),
                        duration_micros: now.elapsed().as_micros() as u64,
                    });

                    conn.keep_alive = keep_alive;
                    let _ = version;
                    if !self.write_response(token, response) {
                        return;
                    }
                }
                Err(ErrorKind::TooLarge) => {
                    let resp = self.engine.error_for(ErrorKind::TooLarge, Version::Http11);
                    self.write_response(token, resp);
                    return;
                }
                Err(kind) => {
                    let resp = self.engine.error_for(kind, Version::Http11);
                    self.write_response(token, resp);
                    return;
                }
            }
        }
    }

    /// Attempts to write `response` in full right away. Returns `true` if
    /// the caller should keep draining pipelined requests (write completed
    /// or the connection was closed outright), `false` if it suspended.
    fn write_response(&mut self, token: Token, response: crate::http::response::Response) -> bool {
        let keep_alive = response.keep_alive;
        let progress = {
            let Some(conn) = self.connections.get_mut(&token) else { return false };
            try_write_response(conn, &response, 0, 0)
        };
        match progress {
            WriteProgress::Done => {
                if !keep_alive {
                    self.close_connection(token);
                    return false;
                }
                true
            }
            WriteProgress::WouldBlock { head_sent, body_sent } => {
                if let Some(conn) = self.connections.get_mut(&token) {
                    connection::suspend(conn, response, head_sent, body_sent, keep_alive);
                    let _ = self.poll.registry().reregister(&mut conn.socket, token, Interest::WRITABLE);
                }
                false
            }
            WriteProgress::Failed => {
                self.close_connection(token);
                false
            }
        }
    }

    /// Spec §4.H "On client write-readiness".
    fn on_writable(&mut self, token: Token) {
        let Some(pending) = (match self.connections.get_mut(&token) {
            Some(conn) => conn.pending.take(),
            None => return,
        }) else {
            return;
        };

        let progress = {
            let Some(conn) = self.connections.get_mut(&token) else { return };
            try_write_response(conn, &pending.response, pending.head_sent, pending.body_sent)
        };

        match progress {
            WriteProgress::Done => {
                let keep_alive = pending.keep_alive;
                if keep_alive {
                    if let Some(conn) = self.connections.get_mut(&token) {
                        conn.writing = false;
                        let _ = self.poll.registry().reregister(&mut conn.socket, token, Interest::READABLE);
                    }
                    self.drain_requests(token, Instant::now());
                } else {
                    self.close_connection(token);
                }
            }
            WriteProgress::WouldBlock { head_sent, body_sent } => {
                if let Some(conn) = self.connections.get_mut(&token) {
                    connection::suspend(conn, pending.response, head_sent, body_sent, pending.keep_alive);
                }
            }
            WriteProgress::Failed => {
                self.close_connection(token);
            }
        }
    }

    /// Re-reads the config file on `SIGHUP` and applies the settings that
    /// can take effect without rebinding the listening socket
    /// (SPEC_FULL.md §C "Reload detail"): `development_mode`,
    /// `keep_alive_timeout`, and `cache_timeout` apply to new connections
    /// and cache entries going forward; `port` and `worker_processes`
    /// changes are logged as requiring a restart rather than applied here.
    fn apply_reload(&mut self) {
        let config = match crate::config::Config::load_or_default(&self.config_path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %e, path = %self.config_path.display(), "reload failed, keeping current settings");
                return;
            }
        };
        let development_mode = config.development_mode || self.force_dev;
        self.rate_limiter.set_development_mode(development_mode);
        self.keep_alive_timeout = Duration::from_secs(config.keep_alive_timeout);
        self.max_connections = config.max_connections;
        self.engine.cache().set_ttl(Duration::from_secs(config.cache_timeout));
        tracing::info!(
            development_mode,
            keep_alive_timeout = config.keep_alive_timeout,
            cache_timeout = config.cache_timeout,
            "configuration reloaded"
        );
    }

    /// Spec §4.H "On timer firing".
    fn sweep_timers(&mut self) {
        let now = Instant::now();
        let idle_timeout = self.keep_alive_timeout;
        let mut expired = Vec::new();
        for (token, conn) in self.connections.iter() {
            if conn.is_slow_client(now, SLOW_REQUEST_THRESHOLD, SLOW_REQUEST_BYTE_FLOOR) {
                expired.push(*token);
            } else if conn.is_idle(now, idle_timeout) {
                expired.push(*token);
            }
        }
        for token in expired {
            self.close_connection(token);
        }
        self.rate_limiter.sweep(now);
        self.engine.cache().purge_expired(now);
    }

    fn emergency_evict(&mut self) {
        let now = Instant::now();
        let mut idle: Vec<Token> = self
            .connections
            .iter()
            .filter(|(_, c)| now.duration_since(c.last_activity) >= EMERGENCY_EVICTION_IDLE)
            .map(|(t, _)| *t)
            .take(EMERGENCY_EVICTION_COUNT)
            .collect();
        idle.truncate(EMERGENCY_EVICTION_COUNT);
        for token in idle {
            self.close_connection(token);
        }
    }

    fn close_connection(&mut self, token: Token) {
        if let Some(mut conn) = self.connections.remove(&token) {
            let _ = self.poll.registry().deregister(&mut conn.socket);
            self.rate_limiter.release(&conn.peer_ip_str);
            self.buffer_pool.release(conn.buffer);
        }
    }
}

enum WriteProgress {
    Done,
    WouldBlock { head_sent: usize, body_sent: u64 },
    Failed,
}

fn try_write_response(
    conn: &mut Connection,
    response: &crate::http::response::Response,
    mut head_sent: usize,
    mut body_sent: u64,
) -> WriteProgress {
    let head = response.head();
    while head_sent < head.len() {
        match conn.socket.write(&head[head_sent..]) {
            Ok(0) => return WriteProgress::Failed,
            Ok(n) => head_sent += n,
            Err(e) if e.kind() == IoErrorKind::WouldBlock => {
                return WriteProgress::WouldBlock { head_sent, body_sent };
            }
            Err(_) => return WriteProgress::Failed,
        }
    }

    match response.body() {
        Body::Empty => WriteProgress::Done,
        Body::Memory(bytes) => write_slice(conn, bytes, head_sent, &mut body_sent),
        Body::CacheVerbatim { bytes, write_len } => {
            write_slice(conn, &bytes[..*write_len], head_sent, &mut body_sent)
        }
        Body::File { file, offset, len } => {
            write_file(conn, file.as_raw_fd(), *offset, *len, head_sent, &mut body_sent)
        }
    }
}

fn write_slice(conn: &mut Connection, bytes: &[u8], head_sent: usize, body_sent: &mut u64) -> WriteProgress {
    let _ = head_sent;
    while (*body_sent as usize) < bytes.len() {
        match conn.socket.write(&bytes[*body_sent as usize..]) {
            Ok(0) => return WriteProgress::Failed,
            Ok(n) => *body_sent += n as u64,
            Err(e) if e.kind() == IoErrorKind::WouldBlock => {
                return WriteProgress::WouldBlock { head_sent: 0, body_sent: *body_sent };
            }
            Err(_) => return WriteProgress::Failed,
        }
    }
    WriteProgress::Done
}

/// Zero-copy file transmission where available; a fixed-chunk
/// read-then-write fallback otherwise (spec §9 "Zero-copy file
/// transmission"), advancing `body_sent` so a later wakeup can resume.
fn write_file(conn: &mut Connection, fd: RawFd, base_offset: u64, len: u64, head_sent: usize, body_sent: &mut u64) -> WriteProgress {
    let _ = head_sent;
    #[cfg(target_os = "linux")]
    {
        while *body_sent < len {
            let mut off = (base_offset + *body_sent) as libc::off_t;
            let remaining = (len - *body_sent) as usize;
            let sent = unsafe { libc::sendfile(conn.socket.as_raw_fd(), fd, &mut off, remaining) };
            if sent < 0 {
                let err = io::Error::last_os_error();
                return match err.kind() {
                    IoErrorKind::WouldBlock => WriteProgress::WouldBlock { head_sent: 0, body_sent: *body_sent },
                    _ => WriteProgress::Failed,
                };
            }
            if sent == 0 {
                return WriteProgress::Failed;
            }
            *body_sent += sent as u64;
        }
        return WriteProgress::Done;
    }
    #[cfg(not(target_os = "linux"))]
    {
        use std::fs::File;
        use std::io::{Seek, SeekFrom};
        use std::os::fd::FromRawFd;

        const CHUNK: usize = 64 * 1024;
        let mut chunk = vec![0u8; CHUNK];
        // SAFETY: `fd` is owned by the caller's `Body::File` for the
        // duration of this call; we dup it so dropping this local File
        // doesn't close the caller's descriptor.
        let dup_fd = unsafe { libc::dup(fd) };
        if dup_fd < 0 {
            return WriteProgress::Failed;
        }
        let mut file = unsafe { File::from_raw_fd(dup_fd) };
        while *body_sent < len {
            if file.seek(SeekFrom::Start(base_offset + *body_sent)).is_err() {
                return WriteProgress::Failed;
            }
            let to_read = CHUNK.min((len - *body_sent) as usize);
            let n = match file.read(&mut chunk[..to_read]) {
                Ok(0) => return WriteProgress::Failed,
                Ok(n) => n,
                Err(_) => return WriteProgress::Failed,
            };
            match conn.socket.write(&chunk[..n]) {
                Ok(0) => return WriteProgress::Failed,
                Ok(written) => *body_sent += written as u64,
                Err(e) if e.kind() == IoErrorKind::WouldBlock => {
                    return WriteProgress::WouldBlock { head_sent: 0, body_sent: *body_sent };
                }
                Err(_) => return WriteProgress::Failed,
            }
        }
        WriteProgress::Done
    }
}

fn is_fd_exhaustion(e: &io::Error) -> bool {
    matches!(e.raw_os_error(), Some(libc::EMFILE) | Some(libc::ENFILE))
}

/// Spec §4.H: "set TCP_NODELAY, large send/recv buffer hints, keepalive
/// with 60 s idle / 10 s probe / 6 probes".
fn apply_socket_options(stream: &TcpStream) {
    let _ = stream.set_nodelay(true);
    let socket = unsafe { socket2::Socket::from_raw_fd(stream.as_raw_fd()) };
    let keepalive = socket2::TcpKeepalive::new()
        .with_time(TCP_KEEPALIVE_IDLE)
        .with_interval(TCP_KEEPALIVE_INTERVAL)
        .with_retries(TCP_KEEPALIVE_RETRIES);
    let _ = socket.set_tcp_keepalive(&keepalive);
    let _ = socket.set_recv_buffer_size(256 * 1024);
    let _ = socket.set_send_buffer_size(256 * 1024);
    // `socket2::Socket` would close the fd on drop; leak it back since
    // `stream` still owns it.
    std::mem::forget(socket);
}
