//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Backend construction
//!     → tls.rs (load CA bundle, optional client identity)
//!     → reqwest client for that backend only
//! ```
//!
//! # Design Decisions
//! - A custom CA replaces the built-in roots for that backend
//! - TLS files are validated at startup, never lazily

pub mod tls;

pub use tls::{TlsError, UpstreamTls};
