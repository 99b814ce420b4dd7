//! Blockchain JSON-RPC gateway library.
//!
//! # Architecture Overview
//!
//! ```text
//!                         ┌──────────────────────────────────────────────────────┐
//!                         │                     RPC GATEWAY                       │
//!                         │                                                       │
//!   JSON-RPC / WebSocket  │  ┌─────────┐    ┌──────────┐    ┌───────────────┐    │
//!   ──────────────────────┼─▶│  http   │───▶│ dispatch │───▶│ backend group │────┼──▶ Nodes
//!                         │  │ server  │    │ + cache  │    │  + backends   │    │
//!                         │  └─────────┘    └────┬─────┘    └───────┬───────┘    │
//!                         │                      │                  │            │
//!                         │               ┌──────▼─────┐     ┌──────▼──────┐     │
//!                         │               │ LVCs (sync │     │ rate limiter│     │
//!                         │               │   client)  │     │ local/redis │     │
//!                         │               └────────────┘     └─────────────┘     │
//!                         │                                                       │
//!                         │  config · lifecycle · observability · resilience · net │
//!                         └──────────────────────────────────────────────────────┘
//! ```

pub mod backend;
pub mod blockchain;
pub mod cache;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod resilience;
pub mod rpc;
pub mod security;

pub use config::schema::ProxyConfig;
pub use http::Server;
pub use lifecycle::{start, Gateway, Shutdown, StartError};
