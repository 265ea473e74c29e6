//! Alert subsystem.
//!
//! # Data Flow
//! ```text
//! Monitors / market observer
//!     → engine.rs observe (per-metric sample window)
//!     → engine.rs evaluate (≥ 3 samples, cooldown, windowed mean vs threshold)
//!     → alert log (bounded, queryable by level / since / metric)
//!     → notify.rs (ERROR and CRITICAL only, per-sink timeout)
//! ```
//!
//! # Design Decisions
//! - Threshold direction is declared per metric, never inferred from its name
//! - Firing is a pure function of config, state and clock
//! - A failed sink never blocks evaluation or other sinks

pub mod engine;
pub mod notify;
pub mod types;

pub use engine::{should_trigger_alert, AlertEngine, MIN_SAMPLES};
pub use notify::{ChannelSink, LogSink, NotificationSink, Notifier, NotifyError};
pub use types::{Alert, AlertLevel, AlertQuery, AlertState, ThresholdDirection};
