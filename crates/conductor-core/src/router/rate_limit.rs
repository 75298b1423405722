//! Fixed-window request counters keyed by (caller, path).
//!
//! A counter resets once its window has elapsed, so a caller that tripped
//! the limit is admitted again in the next window. `prune_expired` drops
//! counters whose window is over; `acquire` runs it every
//! [`PRUNE_EVERY`] calls so the map stays bounded by active callers while
//! the process is live.

use std::sync::atomic::{AtomicU64, Ordering};

use conductor_types::error::ControlPlaneError;
use conductor_types::policy::RateLimit;
use dashmap::DashMap;
use tokio::time::Instant;

/// `acquire` calls between automatic prunes of expired windows.
pub const PRUNE_EVERY: u64 = 256;

struct Window {
    count: u32,
    started: Instant,
    length: std::time::Duration,
}

impl Window {
    fn expired(&self, now: Instant) -> bool {
        now.duration_since(self.started) >= self.length
    }
}

#[derive(Default)]
pub struct RateLimiter {
    windows: DashMap<(String, String), Window>,
    acquires: AtomicU64,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether one more request would be admitted. Does not count it.
    pub fn check(&self, caller: &str, path: &str, limit: &RateLimit) -> Result<(), ControlPlaneError> {
        let now = Instant::now();
        match self.windows.get(&(caller.to_string(), path.to_string())) {
            Some(window) if !window.expired(now) && window.count >= limit.max_requests => {
                Err(limited(caller, path, limit))
            }
            _ => Ok(()),
        }
    }

    /// Count one request against the caller's window, or reject it.
    pub fn acquire(&self, caller: &str, path: &str, limit: &RateLimit) -> Result<(), ControlPlaneError> {
        // Prune before taking the entry guard; `retain` locks every shard.
        if (self.acquires.fetch_add(1, Ordering::Relaxed) + 1) % PRUNE_EVERY == 0 {
            self.prune_expired();
        }

        let now = Instant::now();
        let mut window = self
            .windows
            .entry((caller.to_string(), path.to_string()))
            .or_insert_with(|| Window {
                count: 0,
                started: now,
                length: limit.window(),
            });

        if window.expired(now) {
            window.count = 0;
            window.started = now;
        }
        window.length = limit.window();

        if window.count >= limit.max_requests {
            return Err(limited(caller, path, limit));
        }
        window.count += 1;
        Ok(())
    }

    /// Drop every counter whose window has elapsed. Returns how many.
    pub fn prune_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows.retain(|_, window| !window.expired(now));
        before - self.windows.len()
    }

    /// Number of live counters.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

fn limited(caller: &str, path: &str, limit: &RateLimit) -> ControlPlaneError {
    ControlPlaneError::RateLimited {
        user_id: caller.to_string(),
        path: path.to_string(),
        max_requests: limit.max_requests,
        window_secs: limit.window_secs,
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("active_windows", &self.windows.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn limit() -> RateLimit {
        RateLimit::new(2, Duration::from_secs(10))
    }

    #[tokio::test(start_paused = true)]
    async fn test_limit_trips_and_resets_after_window() {
        let limiter = RateLimiter::new();
        assert!(limiter.acquire("alice", "/a", &limit()).is_ok());
        assert!(limiter.acquire("alice", "/a", &limit()).is_ok());
        assert!(matches!(
            limiter.acquire("alice", "/a", &limit()),
            Err(ControlPlaneError::RateLimited { max_requests: 2, .. })
        ));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(limiter.acquire("alice", "/a", &limit()).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_counters_are_per_caller_and_path() {
        let limiter = RateLimiter::new();
        for _ in 0..2 {
            limiter.acquire("alice", "/a", &limit()).unwrap();
        }
        assert!(limiter.acquire("bob", "/a", &limit()).is_ok());
        assert!(limiter.acquire("alice", "/b", &limit()).is_ok());
        assert!(limiter.acquire("alice", "/a", &limit()).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_does_not_consume() {
        let limiter = RateLimiter::new();
        for _ in 0..5 {
            limiter.check("alice", "/a", &limit()).unwrap();
        }
        limiter.acquire("alice", "/a", &limit()).unwrap();
        limiter.acquire("alice", "/a", &limit()).unwrap();
        assert!(limiter.check("alice", "/a", &limit()).is_err());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(limiter.check("alice", "/a", &limit()).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_window_count_stays_bounded() {
        let limiter = RateLimiter::new();
        let short = RateLimit::new(5, Duration::from_secs(1));
        let mut peak = 0;

        // 1000 one-off callers spread over 200s of 1s windows.
        for i in 0..1000 {
            limiter.acquire(&format!("user-{i}"), "/a", &short).unwrap();
            peak = peak.max(limiter.len());
            tokio::time::advance(Duration::from_millis(200)).await;
        }

        assert!(peak <= PRUNE_EVERY as usize + 10, "peak live windows: {peak}");
        assert!(limiter.len() < 1000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_expired_windows() {
        let limiter = RateLimiter::new();
        limiter.acquire("alice", "/a", &limit()).unwrap();
        limiter
            .acquire("bob", "/a", &RateLimit::new(1, Duration::from_secs(60)))
            .unwrap();
        assert_eq!(limiter.len(), 2);

        tokio::time::advance(Duration::from_secs(15)).await;
        assert_eq!(limiter.prune_expired(), 1);
        assert_eq!(limiter.len(), 1);
    }
}
