//! Rate limiting: the third policy gate.
//!
//! A fixed window per `(connection_id, rate_group)`: a caller gets
//! `max_requests` within `window_ms`; exceeding it locks that pair out
//! for `lockout_ms` regardless of how the window would otherwise reset.
//! Unlike a continuous-refill token bucket, a fixed window carries an
//! explicit lockout duration for the `RateLimited { lockout_ms }` error
//! to report. Storage is a `DashMap` keyed on connection+group, the same
//! sharded-state idiom used elsewhere in this crate for per-session data.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::handler::RateLimitSpec;

#[derive(Debug)]
struct WindowState {
    window_start: Instant,
    count: u32,
    locked_until: Option<Instant>,
}

/// Rate limiter shared across all connections.
#[derive(Clone)]
pub struct RateLimiter {
    state: Arc<DashMap<(u64, String), WindowState>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            state: Arc::new(DashMap::new()),
        }
    }

    /// Check and record one request from `connection_id` against
    /// `group`/`spec`. Returns `Ok(())` if allowed, `Err(lockout_ms)` —
    /// the remaining lockout, in milliseconds — if not.
    pub fn check(
        &self,
        connection_id: u64,
        group: &str,
        spec: RateLimitSpec,
    ) -> Result<(), u64> {
        let now = Instant::now();
        let key = (connection_id, group.to_string());
        let mut entry = self.state.entry(key).or_insert_with(|| WindowState {
            window_start: now,
            count: 0,
            locked_until: None,
        });

        if let Some(locked_until) = entry.locked_until {
            if now < locked_until {
                return Err((locked_until - now).as_millis() as u64);
            }
            // Lockout expired — start a fresh window.
            entry.locked_until = None;
            entry.window_start = now;
            entry.count = 0;
        }

        if now.duration_since(entry.window_start) >= Duration::from_millis(spec.window_ms) {
            entry.window_start = now;
            entry.count = 0;
        }

        entry.count += 1;
        if entry.count > spec.max_requests {
            let lockout = Duration::from_millis(spec.lockout_ms);
            entry.locked_until = Some(now + lockout);
            return Err(lockout.as_millis() as u64);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(max: u32, window_ms: u64, lockout_ms: u64) -> RateLimitSpec {
        RateLimitSpec { max_requests: max, window_ms, lockout_ms }
    }

    #[test]
    fn allows_within_budget() {
        let limiter = RateLimiter::new();
        for _ in 0..5 {
            assert!(limiter.check(1, "g", spec(5, 1_000, 1_000)).is_ok());
        }
    }

    #[test]
    fn locks_out_once_exceeded() {
        let limiter = RateLimiter::new();
        for _ in 0..3 {
            limiter.check(1, "g", spec(3, 10_000, 10_000)).unwrap();
        }
        let result = limiter.check(1, "g", spec(3, 10_000, 10_000));
        assert!(result.is_err());
    }

    #[test]
    fn distinct_connections_tracked_independently() {
        let limiter = RateLimiter::new();
        for _ in 0..3 {
            limiter.check(1, "g", spec(3, 10_000, 10_000)).unwrap();
        }
        // connection 2 has its own budget
        assert!(limiter.check(2, "g", spec(3, 10_000, 10_000)).is_ok());
    }

    #[test]
    fn distinct_groups_tracked_independently() {
        let limiter = RateLimiter::new();
        for _ in 0..3 {
            limiter.check(1, "a", spec(3, 10_000, 10_000)).unwrap();
        }
        assert!(limiter.check(1, "b", spec(3, 10_000, 10_000)).is_ok());
    }

    /// `max_requests=2, window_ms=1000, lockout=20000`: lockout is a
    /// distinct duration from the window, not derived from it.
    #[test]
    fn lockout_duration_is_independent_of_window() {
        let limiter = RateLimiter::new();
        let budget = spec(2, 1_000, 20_000);
        limiter.check(1, "g", budget).unwrap();
        limiter.check(1, "g", budget).unwrap();
        let lockout_ms = limiter.check(1, "g", budget).unwrap_err();
        assert_eq!(lockout_ms, 20_000);
    }
}
