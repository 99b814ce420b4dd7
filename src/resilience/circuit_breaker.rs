//! Time-based circuit breaker for backend protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: backend out of service, requests fail fast
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= threshold, or trip()
//! Open → Closed: cooldown elapsed (checked lazily on the next call)
//! ```
//!
//! # Design Decisions
//! - Per-backend circuit breaker (not global): each record has its own lock
//! - Fixed cooldown, no exponential growth
//! - Lock is never held across an await

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

/// Out-of-service tracker for one backend.
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cooldown,
            state: Mutex::new(BreakerState::default()),
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Whether the backend may be called now. Closes an expired open circuit.
    pub fn is_available(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match state.open_until {
            Some(until) if Instant::now() < until => false,
            Some(_) => {
                *state = BreakerState::default();
                true
            }
            None => true,
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.consecutive_failures = 0;
    }

    /// Count a failure. Returns true if this call opened the circuit.
    pub fn record_failure(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.open_until.is_some() {
            return false;
        }
        state.consecutive_failures += 1;
        if state.consecutive_failures >= self.failure_threshold {
            state.open_until = Some(Instant::now() + self.cooldown);
            return true;
        }
        false
    }

    /// Open the circuit regardless of the failure count.
    pub fn trip(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.open_until = Some(Instant::now() + self.cooldown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold_and_recovers() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(5));
        assert!(breaker.is_available());

        assert!(!breaker.record_failure());
        assert!(breaker.is_available());
        assert!(breaker.record_failure());
        assert!(!breaker.is_available());

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(!breaker.is_available());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(breaker.is_available());

        // Counter starts over after recovery.
        assert!(!breaker.record_failure());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_count() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(5));
        breaker.record_failure();
        breaker.record_success();
        assert!(!breaker.record_failure());
        assert!(breaker.is_available());
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_trip() {
        let breaker = CircuitBreaker::new(10, Duration::from_millis(100));
        breaker.trip();
        assert!(!breaker.is_available());
        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(breaker.is_available());
    }
}
