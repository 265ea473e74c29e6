//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout, JSON)
//!     → /metrics endpoint (Prometheus scrape)
//!     → health snapshot (last-known values)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Metrics are cheap (atomic increments)
//! - The registry is injected, never a hidden global

pub mod logging;
pub mod metrics;

pub use metrics::MetricsRegistry;
