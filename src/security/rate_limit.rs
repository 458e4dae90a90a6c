use std::time::{Duration, Instant};

use dashmap::DashMap;

struct Bucket {
    count: u32,
    window_start: Instant,
}

/// Fixed-window counter per key.
pub struct RateLimiter {
    buckets: DashMap<String, Bucket>,
    limit: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            buckets: DashMap::new(),
            limit,
            window,
        }
    }

    /// Counts one hit against `key`; `false` once the window is used up.
    pub fn check(&self, key: &str) -> bool {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> bool {
        let allowed = {
            let mut entry = self.buckets.entry(key.to_string()).or_insert_with(|| Bucket {
                count: 0,
                window_start: now,
            });
            if now.duration_since(entry.window_start) > self.window {
                entry.count = 0;
                entry.window_start = now;
            }
            if entry.count >= self.limit {
                false
            } else {
                entry.count += 1;
                true
            }
        };

        if self.buckets.len() > 10_000 {
            self.prune(now);
        }
        allowed
    }

    fn prune(&self, now: Instant) {
        let window = self.window;
        self.buckets
            .retain(|_, b| now.duration_since(b.window_start) <= window);
    }
}
