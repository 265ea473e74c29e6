//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (sizes > 0, ratios in range)
//! - Check the channel routing table is unambiguous
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: TelemetryConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;

use thiserror::Error;

use crate::config::schema::TelemetryConfig;

/// A single semantic problem in a loaded configuration.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{field}: {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Check every semantic constraint and report all violations.
pub fn validate_config(config: &TelemetryConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let positive = [
        ("monitoring.update_interval_ms", config.monitoring.update_interval_ms),
        ("connection.reconnect_interval_ms", config.connection.reconnect_interval_ms),
        ("connection.enqueue_timeout_ms", config.connection.enqueue_timeout_ms),
        ("connection.connect_timeout_secs", config.connection.connect_timeout_secs),
        ("batching.batch_timeout_ms", config.batching.batch_timeout_ms),
        ("compression.max_compression_time_ms", config.compression.max_compression_time_ms),
        ("monitors.memory_interval_secs", config.monitors.memory_interval_secs),
        ("monitors.cpu_interval_secs", config.monitors.cpu_interval_secs),
        ("monitors.network_interval_secs", config.monitors.network_interval_secs),
        ("monitors.pause_interval_secs", config.monitors.pause_interval_secs),
    ];
    for (field, value) in positive {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be greater than zero"));
        }
    }

    if config.connection.url.trim().is_empty() {
        errors.push(ValidationError::new("connection.url", "must not be empty"));
    } else if let Err(e) = url::Url::parse(&config.connection.url) {
        errors.push(ValidationError::new("connection.url", format!("invalid url: {e}")));
    }

    if config.connection.max_reconnect_interval_ms < config.connection.reconnect_interval_ms {
        errors.push(ValidationError::new(
            "connection.max_reconnect_interval_ms",
            "must be at least reconnect_interval_ms",
        ));
    }

    if config.connection.max_reconnect_attempts == 0 {
        errors.push(ValidationError::new(
            "connection.max_reconnect_attempts",
            "must be greater than zero",
        ));
    }

    if config.batching.message_batch_size == 0 {
        errors.push(ValidationError::new("batching.message_batch_size", "must be greater than zero"));
    }

    if config.batching.message_queue_size == 0 {
        errors.push(ValidationError::new("batching.message_queue_size", "must be greater than zero"));
    }

    validate_channels(config, &mut errors);

    if config.rate_limit.enabled {
        if config.rate_limit.messages_per_second == 0 {
            errors.push(ValidationError::new(
                "rate_limit.messages_per_second",
                "must be greater than zero",
            ));
        }
        if config.rate_limit.burst_size == 0 {
            errors.push(ValidationError::new("rate_limit.burst_size", "must be at least 1"));
        } else if (config.rate_limit.burst_size as usize) < config.batching.message_batch_size {
            // A full batch takes batch_size tokens at once.
            errors.push(ValidationError::new(
                "rate_limit.burst_size",
                format!(
                    "{} is below batching.message_batch_size ({}), full batches could never dispatch",
                    config.rate_limit.burst_size, config.batching.message_batch_size
                ),
            ));
        }
    }

    let compression = &config.compression;
    if compression.cache_capacity == 0 {
        errors.push(ValidationError::new("compression.cache_capacity", "must be greater than zero"));
    }
    if compression.chunk_size_bytes == 0 {
        errors.push(ValidationError::new("compression.chunk_size_bytes", "must be greater than zero"));
    }
    if !(compression.ratio_threshold.is_finite() && compression.ratio_threshold >= 0.0) {
        errors.push(ValidationError::new(
            "compression.ratio_threshold",
            "must be a non-negative number",
        ));
    }
    let max_level = compression.default_algorithm.max_level();
    if compression.compression_level > max_level {
        errors.push(ValidationError::new(
            "compression.compression_level",
            format!(
                "{} exceeds the maximum of {} for {}",
                compression.compression_level, max_level, compression.default_algorithm
            ),
        ));
    }

    for (name, alert) in &config.alerts.metrics {
        if !alert.threshold.is_finite() {
            errors.push(ValidationError::new(
                format!("alerts.metrics.{name}.threshold"),
                "must be a finite number",
            ));
        }
        if alert.aggregation_window_secs == 0 {
            errors.push(ValidationError::new(
                format!("alerts.metrics.{name}.aggregation_window_secs"),
                "must be greater than zero",
            ));
        }
    }

    if config.alerts.max_records == 0 {
        errors.push(ValidationError::new("alerts.max_records", "must be greater than zero"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_channels(config: &TelemetryConfig, errors: &mut Vec<ValidationError>) {
    let channels = &config.batching.channels;
    if channels.is_empty() {
        errors.push(ValidationError::new("batching.channels", "at least one channel is required"));
        return;
    }

    let defaults = channels.iter().filter(|c| c.message_types.is_empty()).count();
    if defaults != 1 {
        errors.push(ValidationError::new(
            "batching.channels",
            format!("exactly one channel must have no message_types (found {defaults})"),
        ));
    }

    let mut names = HashSet::new();
    let mut types = HashSet::new();
    for channel in channels {
        if !names.insert(channel.name.as_str()) {
            errors.push(ValidationError::new(
                "batching.channels",
                format!("duplicate channel name '{}'", channel.name),
            ));
        }
        for message_type in &channel.message_types {
            if !types.insert(message_type.as_str()) {
                errors.push(ValidationError::new(
                    "batching.channels",
                    format!("message type '{message_type}' routed to more than one channel"),
                ));
            }
        }
    }
}
