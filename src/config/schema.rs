//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the pipeline.
//! All types derive Serde traits for deserialization from config files.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::alerts::{AlertLevel, ThresholdDirection};
use crate::compression::CompressionAlgorithm;

/// Root configuration for the telemetry pipeline.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Supervisor cadence and shared thresholds.
    pub monitoring: MonitoringConfig,

    /// Upstream stream connection and reconnect policy.
    pub connection: ConnectionConfig,

    /// Queueing, batching and channel routing.
    pub batching: BatchingConfig,

    /// Per-channel dispatch rate limiting.
    pub rate_limit: RateLimitConfig,

    /// Adaptive compression settings.
    pub compression: CompressionConfig,

    /// Resource monitor schedules and limits.
    pub monitors: MonitorsConfig,

    /// Alert engine settings and per-metric overrides.
    pub alerts: AlertsConfig,

    /// Logging and metrics export.
    pub observability: ObservabilityConfig,
}

/// Supervisor settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Alert evaluation / health refresh period in milliseconds.
    pub update_interval_ms: u64,

    /// Number of price samples used for the volatility estimate.
    pub volatility_window: usize,

    /// Default threshold for the `volatility` alert.
    pub alert_threshold: f64,

    /// Grace period for every loop to exit on stop, in milliseconds.
    pub shutdown_grace_ms: u64,

    /// Delay before a crashed loop is restarted, in milliseconds.
    pub loop_restart_delay_ms: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: 1000,
            volatility_window: 100,
            alert_threshold: 0.05,
            shutdown_grace_ms: 5000,
            loop_restart_delay_ms: 1000,
        }
    }
}

impl MonitoringConfig {
    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn loop_restart_delay(&self) -> Duration {
        Duration::from_millis(self.loop_restart_delay_ms)
    }
}

/// Upstream connection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Stream endpoint (e.g., "wss://feed.example.com/stream").
    pub url: String,

    /// Base delay between reconnect attempts in milliseconds.
    pub reconnect_interval_ms: u64,

    /// Upper bound for the exponential reconnect delay in milliseconds.
    pub max_reconnect_interval_ms: u64,

    /// Consecutive failed connects before giving up for good.
    pub max_reconnect_attempts: u32,

    /// Handshake timeout in seconds.
    pub connect_timeout_secs: u64,

    /// How long the read loop may wait on a full queue, in milliseconds.
    pub enqueue_timeout_ms: u64,

    /// Frames older than this are rejected as stale, in seconds.
    pub staleness_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:9001/stream".to_string(),
            reconnect_interval_ms: 5000,
            max_reconnect_interval_ms: 60_000,
            max_reconnect_attempts: 10,
            connect_timeout_secs: 10,
            enqueue_timeout_ms: 100,
            staleness_secs: 300,
        }
    }
}

impl ConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.enqueue_timeout_ms)
    }

    pub fn staleness(&self) -> Duration {
        Duration::from_secs(self.staleness_secs)
    }
}

/// Batching configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BatchingConfig {
    /// Maximum messages per batch.
    pub message_batch_size: usize,

    /// Capacity of each channel queue.
    pub message_queue_size: usize,

    /// Maximum time a batch stays open after its first message, in milliseconds.
    pub batch_timeout_ms: u64,

    /// Pause after a failed batch, in milliseconds.
    pub error_pause_ms: u64,

    /// Channel routing table.
    pub channels: Vec<ChannelConfig>,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            message_batch_size: 100,
            message_queue_size: 1000,
            batch_timeout_ms: 100,
            error_pause_ms: 1000,
            channels: vec![ChannelConfig::default()],
        }
    }
}

impl BatchingConfig {
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    pub fn error_pause(&self) -> Duration {
        Duration::from_millis(self.error_pause_ms)
    }
}

/// A logical ingestion channel.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChannelConfig {
    /// Channel identifier for logging/metrics.
    pub name: String,

    /// Message types routed here. Empty means "everything unmatched".
    #[serde(default)]
    pub message_types: Vec<String>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            message_types: Vec::new(),
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Steady-state messages per second per channel.
    pub messages_per_second: u32,

    /// Burst capacity.
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            messages_per_second: 10_000,
            burst_size: 20_000,
        }
    }
}

/// Adaptive compression configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Enable compression of batch entries.
    pub enabled: bool,

    /// Balanced algorithm used for medium payloads when there is no history.
    pub default_algorithm: CompressionAlgorithm,

    /// Generic level, clamped to each algorithm's range.
    pub compression_level: u32,

    /// Payloads smaller than this are never compressed.
    pub min_size_bytes: usize,

    /// Message types eligible for compression.
    pub compressible_types: BTreeSet<String>,

    /// Score algorithms from observed history.
    pub adaptive: bool,

    /// Time budget used to normalise the speed term, in milliseconds.
    pub max_compression_time_ms: u64,

    /// Average ratio (original / compressed) below which a type stops being compressed.
    pub ratio_threshold: f64,

    /// Entries kept in the result cache.
    pub cache_capacity: usize,

    /// Payloads at least this large are compressed in parallel chunks.
    pub parallel_threshold_bytes: usize,

    /// Chunk size for parallel compression.
    pub chunk_size_bytes: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_algorithm: CompressionAlgorithm::Gzip,
            compression_level: 6,
            min_size_bytes: 1024,
            compressible_types: ["market_data", "orderbook", "trade", "snapshot"]
                .into_iter()
                .map(String::from)
                .collect(),
            adaptive: true,
            max_compression_time_ms: 100,
            ratio_threshold: 1.1,
            cache_capacity: 1000,
            parallel_threshold_bytes: 4 * 1024 * 1024,
            chunk_size_bytes: 1024 * 1024,
        }
    }
}

impl CompressionConfig {
    pub fn max_compression_time(&self) -> Duration {
        Duration::from_millis(self.max_compression_time_ms)
    }
}

/// Resource monitor configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitorsConfig {
    pub memory_enabled: bool,
    pub memory_interval_secs: u64,

    pub cpu_enabled: bool,
    pub cpu_interval_secs: u64,

    pub network_enabled: bool,
    pub network_interval_secs: u64,
    /// host:port probed for latency. Derived from the connection url when unset.
    pub probe_address: Option<String>,
    pub probe_timeout_ms: u64,
    pub probe_resolve_ttl_secs: u64,

    pub pause_enabled: bool,
    pub pause_interval_secs: u64,
}

impl Default for MonitorsConfig {
    fn default() -> Self {
        Self {
            memory_enabled: true,
            memory_interval_secs: 60,
            cpu_enabled: true,
            cpu_interval_secs: 5,
            network_enabled: true,
            network_interval_secs: 10,
            probe_address: None,
            probe_timeout_ms: 2000,
            probe_resolve_ttl_secs: 300,
            pause_enabled: true,
            pause_interval_secs: 60,
        }
    }
}

/// Alert engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AlertsConfig {
    /// How long fired alerts stay queryable, in seconds.
    pub retention_secs: u64,

    /// Hard cap on retained alert records.
    pub max_records: usize,

    /// Per-sink delivery timeout in seconds.
    pub notify_timeout_secs: u64,

    /// Per-metric overrides, merged over the built-in defaults.
    pub metrics: BTreeMap<String, AlertConfig>,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            retention_secs: 7 * 24 * 3600,
            max_records: 10_000,
            notify_timeout_secs: 10,
            metrics: BTreeMap::new(),
        }
    }
}

impl AlertsConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.notify_timeout_secs)
    }

    /// Built-in metric configs with the configured overrides applied per key.
    pub fn resolved_metrics(&self, monitoring: &MonitoringConfig) -> BTreeMap<String, AlertConfig> {
        let mut resolved = default_alert_metrics(monitoring);
        for (name, config) in &self.metrics {
            resolved.insert(name.clone(), config.clone());
        }
        resolved
    }
}

/// Threshold rule for one metric. Immutable once loaded.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AlertConfig {
    pub level: AlertLevel,
    pub threshold: f64,
    /// Which side of the threshold is bad.
    #[serde(default)]
    pub direction: ThresholdDirection,
    pub cooldown_secs: u64,
    pub aggregation_window_secs: u64,
    #[serde(default)]
    pub description: String,
}

impl AlertConfig {
    pub fn new(level: AlertLevel, threshold: f64, direction: ThresholdDirection) -> Self {
        Self {
            level,
            threshold,
            direction,
            cooldown_secs: 300,
            aggregation_window_secs: 60,
            description: String::new(),
        }
    }

    pub fn with_cooldown_secs(mut self, secs: u64) -> Self {
        self.cooldown_secs = secs;
        self
    }

    pub fn with_window_secs(mut self, secs: u64) -> Self {
        self.aggregation_window_secs = secs;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn aggregation_window(&self) -> Duration {
        Duration::from_secs(self.aggregation_window_secs)
    }
}

// Slow monitors (60s period) get a 300s window so three samples can accumulate.
fn default_alert_metrics(monitoring: &MonitoringConfig) -> BTreeMap<String, AlertConfig> {
    use ThresholdDirection::{Above, Below};

    let mut metrics = BTreeMap::new();
    metrics.insert(
        "memory_usage".to_string(),
        AlertConfig::new(AlertLevel::Critical, 0.8, Above)
            .with_cooldown_secs(600)
            .with_window_secs(300)
            .with_description("Resident memory above 80% of system memory"),
    );
    metrics.insert(
        "cpu_usage".to_string(),
        AlertConfig::new(AlertLevel::Warning, 80.0, Above)
            .with_description("Process CPU above 80%"),
    );
    metrics.insert(
        "network_latency".to_string(),
        AlertConfig::new(AlertLevel::Warning, 100.0, Above)
            .with_description("Upstream probe latency above 100ms"),
    );
    metrics.insert(
        "runtime_pause".to_string(),
        AlertConfig::new(AlertLevel::Error, 1000.0, Above)
            .with_window_secs(300)
            .with_description("Runtime scheduling pause above 1s"),
    );
    metrics.insert(
        "volatility".to_string(),
        AlertConfig::new(AlertLevel::Warning, monitoring.alert_threshold, Above)
            .with_description("Price volatility above threshold"),
    );
    metrics.insert(
        "liquidity".to_string(),
        AlertConfig::new(AlertLevel::Error, 10_000.0, Below)
            .with_description("Liquidity below threshold"),
    );
    metrics
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// "pretty" or "json".
    pub log_format: String,

    /// Enable the health/metrics endpoint.
    pub metrics_enabled: bool,

    /// Health/metrics endpoint bind address.
    pub metrics_address: String,

    /// Bearer token for the /admin routes.
    pub admin_api_key: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
            // WARNING: This is a placeholder! Change this in production.
            admin_api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
        }
    }
}
