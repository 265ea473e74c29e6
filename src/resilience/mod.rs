//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Connect attempt fails
//!     → backoff.rs record_failure (attempt += 1)
//!     → attempts < cap: sleep exponential delay with jitter, retry
//!     → attempts = cap: terminal, surfaced to health state
//! Connect succeeds → reset attempts
//! ```
//!
//! # Design Decisions
//! - Only failed connects consume attempts; a dropped session reconnects freely
//! - Jitter spreads reconnect storms across restarts

pub mod backoff;

pub use backoff::{calculate_backoff, ReconnectPolicy};
