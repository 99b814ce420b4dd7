//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Resolve secrets → Validate → Limiter → Backends → Groups
//!         → Cache + LVCs → Server → Listeners → Grace period
//!
//! Shutdown (gateway.rs):
//!     Stop LVCs → Drain server → Flush WS counters → Stop metrics
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → caller runs Gateway::shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: nothing is spawned until configuration is valid
//! - Ordered shutdown: every step runs even if an earlier one failed
//! - Shutdown is idempotent

pub mod gateway;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use gateway::Gateway;
pub use shutdown::Shutdown;
pub use signals::wait_for_signal;
pub use startup::{start, StartError};
