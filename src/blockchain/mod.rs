//! Blockchain integration subsystem.
//!
//! # Data Flow
//! ```text
//! LVC tick
//!     → client.rs (sync node, dedicated provider with timeout)
//!     → latest block number / suggested gas price
//!     → base-10 string handed back to the LVC
//! ```
//!
//! # Design Decisions
//! - The sync node is never one of the proxied backends, so cache
//!   freshness does not depend on backend health
//! - All RPC calls have a deadline

pub mod client;
pub mod types;

pub use client::SyncClient;
pub use types::{SyncError, SyncResult};
