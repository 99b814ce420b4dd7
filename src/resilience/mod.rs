//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to backend:
//!     → circuit_breaker.rs (fail fast while out of service)
//!     → per-attempt timeout
//!     → On failure: backoff.rs (jittered delay before the next attempt)
//!     → retries exhausted: circuit_breaker.rs records the failure
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Retries stay on the same backend; fallback belongs to the group
//! - Jittered backoff prevents thundering herd
//! - Circuit breaker prevents cascading failures

pub mod backoff;
pub mod circuit_breaker;

pub use backoff::calculate_backoff;
pub use circuit_breaker::CircuitBreaker;
