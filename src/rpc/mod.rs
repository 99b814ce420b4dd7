//! JSON-RPC wire types and client-facing errors.
//!
//! # Design Decisions
//! - Requests keep `params` and `id` as raw JSON values; the gateway never
//!   interprets them beyond cache fingerprinting
//! - Client-facing error messages live in one immutable `ErrorCatalog`
//!   built at startup and shared by reference

pub mod errors;
pub mod types;

pub use errors::{ErrorCatalog, RpcErrorKind};
pub use types::{RpcErrorObject, RpcRequest, RpcResponse};
