//! In-process rate limiter.
//!
//! Fixed-window counters per backend. Correct only within a single process;
//! use the Redis limiter when several gateways share one backend quota.
//! Expired windows are swept once per window, so keys that stop calling
//! are dropped.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::security::rate_limit::{BackendRateLimiter, RateLimitError};

/// Calls counted in the current window.
#[derive(Debug)]
struct Window {
    started: Instant,
    count: u32,
}

/// Rate limiter backed by process memory.
#[derive(Debug)]
pub struct LocalRateLimiter {
    window: Duration,
    rps: DashMap<String, Window>,
    last_sweep: Mutex<Instant>,
    ws_conns: DashMap<String, u32>,
}

impl Default for LocalRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalRateLimiter {
    /// One-second windows.
    pub fn new() -> Self {
        Self::with_window(Duration::from_secs(1))
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            rps: DashMap::new(),
            last_sweep: Mutex::new(Instant::now()),
            ws_conns: DashMap::new(),
        }
    }

    /// Count one call against `key` and report whether it fits in `max`.
    pub fn take(&self, key: &str, max: u32) -> bool {
        let now = Instant::now();
        self.sweep(now);

        let mut entry = self.rps.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });

        if now.duration_since(entry.started) >= self.window {
            entry.started = now;
            entry.count = 0;
        }

        if entry.count >= max {
            return false;
        }
        entry.count += 1;
        true
    }

    /// Keys with a live window.
    pub fn tracked_keys(&self) -> usize {
        self.rps.len()
    }

    fn sweep(&self, now: Instant) {
        {
            let mut last = self.last_sweep.lock().unwrap_or_else(PoisonError::into_inner);
            if now.duration_since(*last) < self.window {
                return;
            }
            *last = now;
        }
        let window = self.window;
        self.rps
            .retain(|_, entry| now.duration_since(entry.started) < window);
    }

    /// Open WebSocket slots for a backend.
    pub fn ws_conns(&self, name: &str) -> u32 {
        self.ws_conns.get(name).map(|c| *c).unwrap_or(0)
    }
}

#[async_trait]
impl BackendRateLimiter for LocalRateLimiter {
    async fn take_backend_rps(&self, name: &str, max_rps: u32) -> Result<bool, RateLimitError> {
        Ok(self.take(name, max_rps))
    }

    async fn take_ws_conn(&self, name: &str, max_conns: u32) -> Result<bool, RateLimitError> {
        let mut count = self.ws_conns.entry(name.to_string()).or_insert(0);
        if *count >= max_conns {
            return Ok(false);
        }
        *count += 1;
        Ok(true)
    }

    async fn release_ws_conn(&self, name: &str) -> Result<(), RateLimitError> {
        if let Some(mut count) = self.ws_conns.get_mut(name) {
            *count = count.saturating_sub(1);
        }
        Ok(())
    }

    async fn flush_backend_ws_conns(&self, names: &[String]) -> Result<(), RateLimitError> {
        for name in names {
            self.ws_conns.remove(name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::rate_limit::acquire_ws_conn;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_rps_window() {
        let limiter = LocalRateLimiter::new();
        for _ in 0..3 {
            assert!(limiter.take_backend_rps("a", 3).await.unwrap());
        }
        assert!(!limiter.take_backend_rps("a", 3).await.unwrap());

        // Other backends have their own counters.
        assert!(limiter.take_backend_rps("b", 3).await.unwrap());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(limiter.take_backend_rps("a", 3).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_denied_until_window_elapses() {
        let limiter = LocalRateLimiter::with_window(Duration::from_millis(500));
        assert!(limiter.take("a", 1));
        tokio::time::advance(Duration::from_millis(499)).await;
        assert!(!limiter.take("a", 1));
        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(limiter.take("a", 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_keys_are_dropped() {
        let limiter = LocalRateLimiter::new();
        for i in 0..10_000 {
            assert!(limiter.take(&format!("10.0.{}.{}", i / 256, i % 256), 1));
        }
        assert_eq!(limiter.tracked_keys(), 10_000);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(limiter.take("10.9.9.9", 1));
        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_keeps_live_windows() {
        let limiter = LocalRateLimiter::new();
        tokio::time::advance(Duration::from_millis(600)).await;
        assert!(limiter.take("a", 1));

        // First sweep after one window: "a" is still mid-window and stays denied.
        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(!limiter.take("a", 1));
        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[tokio::test]
    async fn test_ws_cap_and_release() {
        let limiter = LocalRateLimiter::new();
        assert!(limiter.take_ws_conn("a", 2).await.unwrap());
        assert!(limiter.take_ws_conn("a", 2).await.unwrap());
        assert!(!limiter.take_ws_conn("a", 2).await.unwrap());
        limiter.release_ws_conn("a").await.unwrap();
        assert_eq!(limiter.ws_conns("a"), 1);
        assert!(limiter.take_ws_conn("a", 2).await.unwrap());
    }

    #[tokio::test]
    async fn test_release_never_goes_below_zero() {
        let limiter = LocalRateLimiter::new();
        assert!(limiter.take_ws_conn("a", 5).await.unwrap());
        limiter
            .flush_backend_ws_conns(&["a".to_string()])
            .await
            .unwrap();
        limiter.release_ws_conn("a").await.unwrap();
        limiter.release_ws_conn("a").await.unwrap();
        assert_eq!(limiter.ws_conns("a"), 0);
    }

    #[tokio::test]
    async fn test_permit_releases_once() {
        let limiter = Arc::new(LocalRateLimiter::new());
        let permit = acquire_ws_conn(limiter.clone(), "a", 1)
            .await
            .unwrap()
            .expect("slot available");
        assert!(acquire_ws_conn(limiter.clone(), "a", 1)
            .await
            .unwrap()
            .is_none());

        permit.release().await;
        assert_eq!(limiter.ws_conns("a"), 0);

        let dropped = acquire_ws_conn(limiter.clone(), "a", 1).await.unwrap();
        assert!(dropped.is_some());
        drop(dropped);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(limiter.ws_conns("a"), 0);
    }
}
