//! Backend subsystem.
//!
//! # Data Flow
//! ```text
//! Method mapped to a group
//!     → group.rs (walk backends in order)
//!     → backend.rs:
//!         - circuit breaker (skip while out of service)
//!         - rate limiter (per-backend RPS)
//!         - global semaphore (bounded concurrency)
//!         - attempt with timeout, size cap, retries
//!     → raw upstream bytes or BackendError
//! ```
//!
//! # Design Decisions
//! - Options are applied once at construction; backends are immutable after
//! - Groups reference backends through `Arc`; the orchestrator owns them
//! - A backend never falls back to another one; groups do

#[allow(clippy::module_inception)]
pub mod backend;
pub mod group;
pub mod options;

pub use backend::{Backend, BackendError, ForwardContext, UpstreamWs};
pub use group::BackendGroup;
pub use options::{opts_from_config, BackendOpt, BackendOptions};
