//! Per-IP rate limiting (spec §4.C "Rate Limiter").
//!
//! A fixed-size open-addressed table keyed by IP. Collisions replace the
//! existing slot rather than probing further (spec §9 open question: "the
//! rate limiter's hash table uses replacement on collision... the spec
//! documents the current policy"), so under sustained load from many
//! distinct IPs an attacker can displace another IP's bookkeeping — this
//! is accepted behavior, not a bug, per that design note.

use std::hash::{Hash, Hasher};
use std::time::Instant;

use crate::limits::{
    RATE_LIMIT_BAN_DURATION, RATE_LIMIT_CONCURRENT_CAP, RATE_LIMIT_GC_WINDOWS,
    RATE_LIMIT_TABLE_SIZE, RATE_LIMIT_VIOLATIONS_BEFORE_BAN, RATE_LIMIT_WINDOW,
    RATE_LIMIT_WINDOW_THRESHOLD,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denied {
    Banned,
    TooManyConcurrent,
    WindowExceeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Denied(Denied),
}

#[derive(Debug, Clone)]
struct Slot {
    ip: String,
    window_start: Instant,
    count: u32,
    last_request: Instant,
    concurrent: u32,
    violations: u32,
    ban_until: Option<Instant>,
}

impl Slot {
    fn fresh(ip: String, now: Instant) -> Self {
        Slot { ip, window_start: now, count: 1, last_request: now, concurrent: 0, violations: 0, ban_until: None }
    }
}

/// Per-IP bookkeeping table (spec §3 "Rate-limit entry", §4.C operations).
pub struct RateLimiter {
    slots: Vec<Option<Slot>>,
    development_mode: bool,
}

fn slot_index(ip: &str) -> usize {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    ip.hash(&mut hasher);
    (hasher.finish() as usize) % RATE_LIMIT_TABLE_SIZE
}

impl RateLimiter {
    pub fn new(development_mode: bool) -> Self {
        RateLimiter { slots: vec![None; RATE_LIMIT_TABLE_SIZE], development_mode }
    }

    /// Applies a reloaded `development_mode` setting (SPEC_FULL.md §C
    /// "Reload detail").
    pub fn set_development_mode(&mut self, development_mode: bool) {
        self.development_mode = development_mode;
    }

    /// Spec §4.C algorithm, verbatim.
    pub fn admit(&mut self, ip: &str, now: Instant) -> Admission {
        let idx = slot_index(ip);

        let needs_reset = match &self.slots[idx] {
            None => true,
            Some(slot) => {
                slot.ip != ip || now.duration_since(slot.window_start) > RATE_LIMIT_WINDOW * 2
            }
        };
        if needs_reset {
            self.slots[idx] = Some(Slot::fresh(ip.to_string(), now));
        }

        if self.development_mode {
            // Still tracked above so counters reflect real traffic, but the
            // admission decision is unconditional (spec §4.C "Development
            // mode").
            let slot = self.slots[idx].as_mut().unwrap();
            slot.last_request = now;
            slot.concurrent += 1;
            return Admission::Admitted;
        }

        let slot = self.slots[idx].as_mut().unwrap();

        if let Some(ban_until) = slot.ban_until {
            if now < ban_until {
                return Admission::Denied(Denied::Banned);
            }
        }

        if slot.concurrent >= RATE_LIMIT_CONCURRENT_CAP {
            return Admission::Denied(Denied::TooManyConcurrent);
        }

        if now.duration_since(slot.window_start) >= RATE_LIMIT_WINDOW {
            slot.window_start = now;
            slot.count = 0;
        }

        slot.count += 1;
        slot.last_request = now;

        if slot.count > RATE_LIMIT_WINDOW_THRESHOLD {
            slot.violations += 1;
            if slot.violations >= RATE_LIMIT_VIOLATIONS_BEFORE_BAN {
                slot.ban_until = Some(now + RATE_LIMIT_BAN_DURATION);
            }
            return Admission::Denied(Denied::WindowExceeded);
        }

        slot.concurrent += 1;
        Admission::Admitted
    }

    /// Decrements the concurrent count for `ip`. Must pair every `Admitted`
    /// result by the time the connection is destroyed (spec §8 invariant).
    pub fn release(&mut self, ip: &str) {
        let idx = slot_index(ip);
        if let Some(slot) = &mut self.slots[idx] {
            if slot.ip == ip && slot.concurrent > 0 {
                slot.concurrent -= 1;
            }
        }
    }

    /// Removes entries idle beyond four windows, unless under active ban
    /// (spec §3 rate-limit entry lifecycle, §4.C `sweep`).
    pub fn sweep(&mut self, now: Instant) {
        let idle_ceiling = RATE_LIMIT_WINDOW * RATE_LIMIT_GC_WINDOWS;
        for slot_ref in self.slots.iter_mut() {
            let expire = match slot_ref {
                Some(slot) => {
                    let under_ban = slot.ban_until.is_some_and(|b| now < b);
                    !under_ban && now.duration_since(slot.last_request) >= idle_ceiling && slot.concurrent == 0
                }
                None => false,
            };
            if expire {
                *slot_ref = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_unknown_ip_by_default() {
        let mut rl = RateLimiter::new(false);
        let now = Instant::now();
        assert_eq!(rl.admit("1.2.3.4", now), Admission::Admitted);
        rl.release("1.2.3.4");
    }

    #[test]
    fn bans_after_five_violations() {
        let mut rl = RateLimiter::new(false);
        let mut now = Instant::now();
        // Drive the count over threshold five separate times, each in a
        // fresh window so count resets but violations accumulate.
        for _ in 0..5 {
            for _ in 0..RATE_LIMIT_WINDOW_THRESHOLD {
                rl.admit("9.9.9.9", now);
                rl.release("9.9.9.9");
            }
            // one more request in the same window trips WindowExceeded
            let outcome = rl.admit("9.9.9.9", now);
            assert_eq!(outcome, Admission::Denied(Denied::WindowExceeded));
            now += RATE_LIMIT_WINDOW;
        }
        let outcome = rl.admit("9.9.9.9", now);
        assert_eq!(outcome, Admission::Denied(Denied::Banned));
    }

    #[test]
    fn development_mode_always_admits() {
        let mut rl = RateLimiter::new(true);
        let now = Instant::now();
        for _ in 0..(RATE_LIMIT_WINDOW_THRESHOLD * 3) {
            assert_eq!(rl.admit("5.5.5.5", now), Admission::Admitted);
        }
    }

    #[test]
    fn too_many_concurrent_is_denied() {
        let mut rl = RateLimiter::new(false);
        let now = Instant::now();
        for _ in 0..RATE_LIMIT_CONCURRENT_CAP {
            assert_eq!(rl.admit("7.7.7.7", now), Admission::Admitted);
        }
        assert_eq!(rl.admit("7.7.7.7", now), Admission::Denied(Denied::TooManyConcurrent));
    }

    #[test]
    fn sweep_removes_idle_unbanned_entries() {
        let mut rl = RateLimiter::new(false);
        let now = Instant::now();
        rl.admit("3.3.3.3", now);
        rl.release("3.3.3.3");
        let later = now + RATE_LIMIT_WINDOW * (RATE_LIMIT_GC_WINDOWS + 1);
        rl.sweep(later);
        let idx = slot_index("3.3.3.3");
        assert!(rl.slots[idx].is_none());
    }
}
