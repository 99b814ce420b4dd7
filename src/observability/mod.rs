//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → tracing events (structured fields: backend, method, error)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → logging.rs subscriber (stdout, text or JSON)
//!     → Metrics endpoint (Prometheus scrape on its own listener)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Metrics are cheap (atomic increments) and safe to record before a
//!   recorder is installed
//! - Metrics listener failures never take the gateway down

pub mod logging;
pub mod metrics;
