//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound call:
//!     → rate_limit.rs (per-backend RPS quota)
//!     → headers.rs (sanitize X-Forwarded-For)
//!     → upstream
//!
//! Upstream WebSocket:
//!     → rate_limit.rs (claim slot, WsConnPermit)
//!     → ... connection lifetime ...
//!     → permit released exactly once
//!
//! Shutdown:
//!     → flush_backend_ws_conns (reconcile leaked slots)
//! ```
//!
//! # Design Decisions
//! - Fail closed: a limiter error denies the call
//! - local_limiter.rs for single instances, redis_limiter.rs for fleets
//! - No trust in client-supplied forwarding headers

pub mod headers;
pub mod local_limiter;
pub mod rate_limit;
pub mod redis_limiter;

pub use headers::HeaderPolicy;
pub use local_limiter::LocalRateLimiter;
pub use rate_limit::{acquire_ws_conn, BackendRateLimiter, RateLimitError, WsConnPermit};
pub use redis_limiter::RedisRateLimiter;
