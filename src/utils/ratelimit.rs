use dashmap::DashMap;

/// Fixed-window rate limiter keyed by user id, used to throttle manually
/// triggered full syncs. Entries are evicted on a scheduler timer rather
/// than growing without bound.
pub struct SyncRateLimiter {
    entries: DashMap<String, WindowState>,
    limit: u32,
    window_secs: i64,
}

#[derive(Debug, Clone, Copy)]
struct WindowState {
    count: u32,
    window_start: i64,
}

impl SyncRateLimiter {
    pub fn new(limit: u32, window_secs: i64) -> Self {
        Self {
            entries: DashMap::new(),
            limit,
            window_secs,
        }
    }

    /// Returns true and counts the request when the caller is inside the
    /// limit; false when the window is exhausted.
    pub fn check(&self, key: &str, now: i64) -> bool {
        let mut entry = self.entries.entry(key.to_string()).or_insert(WindowState {
            count: 0,
            window_start: now,
        });
        if now - entry.window_start >= self.window_secs {
            entry.count = 0;
            entry.window_start = now;
        }
        if entry.count >= self.limit {
            return false;
        }
        entry.count += 1;
        true
    }

    pub fn evict_stale(&self, now: i64) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, state| now - state.window_start < self.window_secs);
        before - self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_limit_then_blocks() {
        let limiter = SyncRateLimiter::new(2, 60);
        assert!(limiter.check("u1", 100));
        assert!(limiter.check("u1", 110));
        assert!(!limiter.check("u1", 120));
    }

    #[test]
    fn window_resets_after_expiry() {
        let limiter = SyncRateLimiter::new(1, 60);
        assert!(limiter.check("u1", 100));
        assert!(!limiter.check("u1", 130));
        assert!(limiter.check("u1", 161));
    }

    #[test]
    fn keys_are_independent() {
        let limiter = SyncRateLimiter::new(1, 60);
        assert!(limiter.check("u1", 100));
        assert!(limiter.check("u2", 100));
    }

    #[test]
    fn eviction_drops_expired_windows_only() {
        let limiter = SyncRateLimiter::new(1, 60);
        limiter.check("old", 100);
        limiter.check("fresh", 150);
        let evicted = limiter.evict_stale(165);
        assert_eq!(evicted, 1);
        // the fresh window still counts against the limit
        assert!(!limiter.check("fresh", 170));
    }
}
