//! Fixed-window rate limiter
//!
//! One bucket per client key: a window start and a request count. On
//! `check`, a stale or brand-new bucket resets the window and allows;
//! otherwise the request is allowed only while under the configured
//! cap. Buckets live in a `DashMap`, which gives us per-shard locking
//! roughly equivalent to the single-mutex hash table this is modeled
//! on without hand-rolling the chaining/resize logic ourselves.

#![allow(dead_code)]

use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Outcome of a single rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Deny,
}

struct Bucket {
    window_start: Instant,
    request_count: u32,
}

/// A per-client-key fixed-window rate limiter.
pub struct RateLimiter {
    max_per_window: u32,
    window: Duration,
    buckets: DashMap<String, Bucket>,
}

impl RateLimiter {
    /// `capacity_hint` seeds the underlying map's initial capacity as
    /// `max(16, capacity_hint * 2)`, matching the growth policy of the
    /// hash table this type stands in for.
    pub fn new(max_per_window: u32, window: Duration, capacity_hint: usize) -> Self {
        let initial_capacity = (capacity_hint * 2).max(16);
        RateLimiter {
            max_per_window,
            window,
            buckets: DashMap::with_capacity(initial_capacity),
        }
    }

    /// Check and record one request for `client_key`.
    pub fn check(&self, client_key: &str) -> Verdict {
        let now = Instant::now();

        let mut entry = self
            .buckets
            .entry(client_key.to_string())
            .or_insert_with(|| Bucket {
                window_start: now,
                request_count: 0,
            });

        if entry.request_count == 0 || now >= entry.window_start + self.window {
            entry.window_start = now;
            entry.request_count = 1;
            return Verdict::Allow;
        }

        if entry.request_count < self.max_per_window {
            entry.request_count += 1;
            return Verdict::Allow;
        }

        Verdict::Deny
    }

    /// Current request count for `client_key` within its live window,
    /// or `0` if the client has no bucket yet.
    pub fn current_count(&self, client_key: &str) -> u32 {
        self.buckets
            .get(client_key)
            .map(|b| b.request_count)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn allows_up_to_max_then_denies_within_window() {
        let limiter = RateLimiter::new(3, Duration::from_secs(1), 1);
        assert_eq!(limiter.check("a"), Verdict::Allow);
        assert_eq!(limiter.check("a"), Verdict::Allow);
        assert_eq!(limiter.check("a"), Verdict::Allow);
        assert_eq!(limiter.check("a"), Verdict::Deny);
        assert_eq!(limiter.check("a"), Verdict::Deny);
    }

    #[test]
    fn resets_after_window_elapses() {
        let limiter = RateLimiter::new(1, Duration::from_millis(20), 1);
        assert_eq!(limiter.check("a"), Verdict::Allow);
        assert_eq!(limiter.check("a"), Verdict::Deny);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(limiter.check("a"), Verdict::Allow);
    }

    #[test]
    fn distinct_clients_have_independent_windows() {
        let limiter = RateLimiter::new(1, Duration::from_secs(1), 1);
        assert_eq!(limiter.check("a"), Verdict::Allow);
        assert_eq!(limiter.check("b"), Verdict::Allow);
        assert_eq!(limiter.check("a"), Verdict::Deny);
        assert_eq!(limiter.check("b"), Verdict::Deny);
    }

    #[test]
    fn never_exceeds_max_per_window_under_repeated_checks() {
        let limiter = RateLimiter::new(5, Duration::from_secs(1), 1);
        let mut allowed = 0;
        for _ in 0..50 {
            if limiter.check("a") == Verdict::Allow {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 5);
    }
}
