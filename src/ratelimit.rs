use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::sleep;

/// Per-key sliding-window admission, at most `limit_per_minute` admits in
/// any trailing 60s window per key. Keys serialize against each other
/// through a per-key async lock; different keys never block one another.
#[derive(Debug)]
pub struct RateLimiter {
    limit_per_minute: u32,
    locks: DashMap<String, Arc<Mutex<VecDeque<Instant>>>>,
}

impl RateLimiter {
    pub fn new(limit_per_minute: u32) -> Self {
        Self {
            limit_per_minute: limit_per_minute.max(1),
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, key: &str) -> Arc<Mutex<VecDeque<Instant>>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(VecDeque::new())))
            .clone()
    }

    /// Blocks until an admission slot for `key` is available, then records it.
    pub async fn wait(&self, key: &str) {
        let lock = self.lock_for(key);
        let mut events = lock.lock().await;
        let window = Duration::from_secs(60);

        let mut now = Instant::now();
        trim(&mut events, now, window);

        if events.len() as u32 >= self.limit_per_minute {
            let oldest = *events.front().expect("len >= limit implies non-empty");
            let elapsed = now.duration_since(oldest);
            if elapsed < window {
                sleep(window - elapsed).await;
            }
            now = Instant::now();
            trim(&mut events, now, window);
        }

        events.push_back(now);
    }
}

fn trim(events: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&front) = events.front() {
        if now.duration_since(front) >= window {
            events.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn admits_up_to_limit_without_delay() {
        let limiter = RateLimiter::new(3);
        let start = Instant::now();
        for _ in 0..3 {
            limiter.wait("acc").await;
        }
        assert!(start.elapsed() < StdDuration::from_millis(200));
    }

    #[tokio::test]
    async fn floors_limit_at_one() {
        let limiter = RateLimiter::new(0);
        assert_eq!(limiter.limit_per_minute, 1);
    }

    #[tokio::test]
    async fn different_keys_are_independent() {
        let limiter = RateLimiter::new(1);
        limiter.wait("a").await;
        let start = Instant::now();
        limiter.wait("b").await;
        assert!(start.elapsed() < StdDuration::from_millis(200));
    }
}
