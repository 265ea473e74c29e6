//! Real-time market telemetry pipeline library.

// Core pipeline
pub mod compression;
pub mod config;
pub mod ingest;
pub mod net;
pub mod pipeline;

// Monitoring
pub mod alerts;
pub mod health;
pub mod monitors;

// Cross-cutting concerns
pub mod admin;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod ttl;

pub use config::TelemetryConfig;
pub use lifecycle::Shutdown;
pub use pipeline::{Pipeline, PipelineBuilder, PipelineError};
