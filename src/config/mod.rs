//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → TelemetryConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Per-metric alert overrides merge over built-in defaults key by key

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AlertConfig, AlertsConfig, BatchingConfig, ChannelConfig, CompressionConfig,
    ConnectionConfig, MonitoringConfig, MonitorsConfig, ObservabilityConfig, RateLimitConfig,
    TelemetryConfig,
};
pub use validation::{validate_config, ValidationError};
