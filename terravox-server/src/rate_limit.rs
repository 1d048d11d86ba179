//! Generic per-key minimum-interval gate. Keys are `"{room_id}:{player_id}"`
//! strings so a room teardown can sweep its players with one prefix pass.
//! Time comes in as a parameter, which is what lets the tests (and the build
//! handler's scenario tests) drive the clock.

use std::{collections::HashMap, time::{Duration, Instant}};

pub struct RateLimiter {
    interval: Duration,
    last_allowed: HashMap<String, Instant>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_allowed: HashMap::new(),
        }
    }

    /// Returns whether the call is allowed; an allowed call records its
    /// timestamp. A call within `interval` of the last *allowed* one is
    /// gated and leaves no trace.
    pub fn allow(&mut self, key: &str, now: Instant) -> bool {
        if let Some(&last) = self.last_allowed.get(key) {
            if now.duration_since(last) < self.interval {
                return false;
            }
        }
        self.last_allowed.insert(key.to_owned(), now);
        true
    }

    pub fn remove(&mut self, key: &str) {
        self.last_allowed.remove(key);
    }

    /// Sweep all keys of a player or a whole room.
    pub fn remove_by_prefix(&mut self, prefix: &str) {
        self.last_allowed.retain(|key, _| !key.starts_with(prefix));
    }

    pub fn len(&self) -> usize {
        self.last_allowed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_allowed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gates_within_the_interval_and_reopens_after() {
        let mut limiter = RateLimiter::new(Duration::from_millis(100));
        let t0 = Instant::now();

        assert!(limiter.allow("room-0:1", t0));
        assert!(!limiter.allow("room-0:1", t0 + Duration::from_millis(50)));
        assert!(!limiter.allow("room-0:1", t0 + Duration::from_millis(99)));
        assert!(limiter.allow("room-0:1", t0 + Duration::from_millis(100)));
    }

    #[test]
    fn gated_calls_do_not_extend_the_window() {
        let mut limiter = RateLimiter::new(Duration::from_millis(100));
        let t0 = Instant::now();

        assert!(limiter.allow("k", t0));
        // hammering during the window never pushes the reopen time back
        for ms in (10..100).step_by(10) {
            assert!(!limiter.allow("k", t0 + Duration::from_millis(ms)));
        }
        assert!(limiter.allow("k", t0 + Duration::from_millis(101)));
    }

    #[test]
    fn keys_are_independent() {
        let mut limiter = RateLimiter::new(Duration::from_millis(100));
        let t0 = Instant::now();

        assert!(limiter.allow("room-0:1", t0));
        assert!(limiter.allow("room-0:2", t0));
        assert!(limiter.allow("room-1:1", t0));
    }

    #[test]
    fn prefix_removal_sweeps_a_room() {
        let mut limiter = RateLimiter::new(Duration::from_secs(3600));
        let t0 = Instant::now();
        limiter.allow("room-0:1", t0);
        limiter.allow("room-0:2", t0);
        limiter.allow("room-1:1", t0);

        limiter.remove_by_prefix("room-0:");
        assert_eq!(limiter.len(), 1);

        // swept keys are immediately allowed again
        assert!(limiter.allow("room-0:1", t0));

        limiter.remove("room-1:1");
        assert!(limiter.allow("room-1:1", t0));
    }
}
