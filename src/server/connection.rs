//! Per-connection state (spec §3 "Connection", §4.H "Connection Loop").
//!
//! A `Connection` owns a pooled read buffer, the bookkeeping the idle/slow-
//! request timers need, and — while a response can't be written in one
//! shot — a suspended [`Response`] body waiting for writable readiness.

use std::net::IpAddr;
use std::time::Instant;

use mio::net::TcpStream;
use mio::Token;

use crate::buffer::PooledBuffer;
use crate::http::response::{Body, Response};

/// What's left to send of a response that didn't finish in one write.
pub(crate) struct PendingWrite {
    pub response: Response,
    /// Bytes of `response.head()` already written.
    pub head_sent: usize,
    /// Bytes of the body already written (memory/file bodies) or bytes of
    /// the cache-verbatim blob already written.
    pub body_sent: u64,
    pub keep_alive: bool,
}

pub(crate) struct Connection {
    pub token: Token,
    pub socket: TcpStream,
    pub peer_ip: IpAddr,
    pub peer_ip_str: String,
    pub buffer: PooledBuffer,
    pub filled: usize,
    pub keep_alive: bool,
    pub created_at: Instant,
    pub last_activity: Instant,
    pub bytes_received: u64,
    pub request_count: u64,
    pub pending: Option<PendingWrite>,
    /// True while registered for write-readiness (a response is suspended);
    /// false while registered for read-readiness (spec §3 invariant).
    pub writing: bool,
}

impl Connection {
    pub fn new(token: Token, socket: TcpStream, peer_ip: IpAddr, buffer: PooledBuffer, now: Instant) -> Self {
        Connection {
            token,
            socket,
            peer_ip,
            peer_ip_str: peer_ip.to_string(),
            buffer,
            filled: 0,
            keep_alive: true,
            created_at: now,
            last_activity: now,
            bytes_received: 0,
            request_count: 0,
            pending: None,
            writing: false,
        }
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_activity = now;
    }

    pub fn is_slow_client(&self, now: Instant, threshold: std::time::Duration, byte_floor: usize) -> bool {
        self.bytes_received > 0
            && self.bytes_received < byte_floor as u64
            && now.duration_since(self.created_at) >= threshold
    }

    pub fn is_idle(&self, now: Instant, idle_timeout: std::time::Duration) -> bool {
        now.duration_since(self.last_activity) >= idle_timeout
    }

    /// Drops a matched request's bytes off the front of the fill window,
    /// sliding any remaining pipelined bytes to the buffer head (spec
    /// §4.H: "Memmove any partial trailing request to the buffer head").
    pub fn consume(&mut self, n: usize) {
        self.buffer.bytes.copy_within(n..self.filled, 0);
        self.filled -= n;
    }
}

/// Suspends `response` on the connection after a partial write, per spec
/// §3's "suspended response pending writable readiness".
pub(crate) fn suspend(conn: &mut Connection, response: Response, head_sent: usize, body_sent: u64, keep_alive: bool) {
    conn.pending = Some(PendingWrite { response, head_sent, body_sent, keep_alive });
    conn.writing = true;
}

/// True if nothing is left to send for a pending response.
pub(crate) fn pending_is_complete(pending: &PendingWrite) -> bool {
    let total_body = match pending.response.body() {
        Body::Empty => 0,
        Body::Memory(b) => b.len() as u64,
        Body::File { len, .. } => *len,
        Body::CacheVerbatim { write_len, .. } => *write_len as u64,
    };
    pending.head_sent >= pending.response.head().len() && pending.body_sent >= total_body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::types::{StatusCode, Version};

    #[test]
    fn pending_write_completion_accounts_for_both_head_and_body() {
        let mut resp = Response::new(StatusCode::Ok, Version::Http11, true);
        resp.with_memory_body(b"hello".to_vec(), false);
        resp.finish(60);
        let head_len = resp.head().len();
        let pending = PendingWrite { response: resp, head_sent: head_len, body_sent: 3, keep_alive: true };
        assert!(!pending_is_complete(&pending));
        let pending = PendingWrite { head_sent: head_len, body_sent: 5, ..pending };
        assert!(pending_is_complete(&pending));
    }
}
