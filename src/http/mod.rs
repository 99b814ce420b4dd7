//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, auth key, frontend rate limit, body cap)
//!     → dispatch.rs (parse, batch limit, method → group, cache, forward)
//!     → backend group (ordered fallback across backends)
//!     → JSON-RPC response to client
//!
//! WebSocket upgrade
//!     → websocket.rs (pick backend, claim slot, dial upstream)
//!     → frame proxy with method whitelist
//! ```

mod dispatch;
pub mod server;
pub mod websocket;

pub use server::{ServeError, Server, ServerParams};
