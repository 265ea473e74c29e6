//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define pipeline metrics (throughput, drops, batch latency, compression, alerts)
//! - Expose Prometheus-compatible text for scraping
//! - Track per-channel, per-type and per-monitor series via labels
//!
//! # Metrics
//! - `telemetry_messages_received_total` (counter): frames accepted from upstream
//! - `telemetry_dropped_messages_total` (counter): messages lost to a full queue
//! - `telemetry_batch_size` (histogram): messages per dispatched batch
//! - `telemetry_batch_latency_seconds` (histogram): batch start → dispatch
//! - `telemetry_alerts_fired_total` (counter): alerts by metric and level
//!
//! # Design Decisions
//! - One registry per process, constructed at startup and passed by `Arc`
//! - The recorder is never installed globally, so tests get isolated registries
//! - Low-overhead metric updates (handles are atomics once registered)

use std::collections::HashMap;

use metrics::{Counter, Gauge, Histogram, Key, Label, Level, Metadata, Recorder};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle, PrometheusRecorder};

pub const MESSAGES_RECEIVED: &str = "telemetry_messages_received_total";
pub const MESSAGES_PROCESSED: &str = "telemetry_messages_processed_total";
pub const DROPPED_MESSAGES: &str = "telemetry_dropped_messages_total";
pub const PROTOCOL_ERRORS: &str = "telemetry_protocol_errors_total";
pub const CONNECTION_ERRORS: &str = "telemetry_connection_errors_total";
pub const RECONNECT_ATTEMPTS: &str = "telemetry_reconnect_attempts_total";
pub const CONNECTION_UP: &str = "telemetry_connection_up";
pub const QUEUE_DEPTH: &str = "telemetry_queue_depth";

pub const BATCHES_DISPATCHED: &str = "telemetry_batches_dispatched_total";
pub const BATCH_SIZE: &str = "telemetry_batch_size";
pub const BATCH_LATENCY: &str = "telemetry_batch_latency_seconds";
pub const BATCH_EFFICIENCY: &str = "telemetry_batch_efficiency";
pub const BATCH_ERRORS: &str = "telemetry_batch_errors_total";
pub const DISPATCH_REJECTED: &str = "telemetry_dispatch_rejected_total";
pub const OBSERVER_ERRORS: &str = "telemetry_observer_errors_total";

pub const COMPRESSION_OPS: &str = "telemetry_compression_ops_total";
pub const COMPRESSION_CACHE_HITS: &str = "telemetry_compression_cache_hits_total";
pub const COMPRESSION_ERRORS: &str = "telemetry_compression_errors_total";
pub const COMPRESSION_RATIO: &str = "telemetry_compression_ratio";
pub const COMPRESSION_DURATION: &str = "telemetry_compression_duration_seconds";
pub const COMPRESSION_INPUT_BYTES: &str = "telemetry_compression_input_bytes";

pub const MONITOR_ERRORS: &str = "telemetry_monitor_errors_total";
pub const MEMORY_RSS_BYTES: &str = "telemetry_memory_rss_bytes";
pub const MEMORY_USAGE_RATIO: &str = "telemetry_memory_usage_ratio";
pub const CPU_PERCENT: &str = "telemetry_cpu_percent";
pub const NETWORK_LATENCY_MS: &str = "telemetry_network_latency_ms";
pub const NETWORK_RX_BYTES: &str = "telemetry_network_rx_bytes_total";
pub const NETWORK_TX_BYTES: &str = "telemetry_network_tx_bytes_total";
pub const RUNTIME_PAUSE_MS: &str = "telemetry_runtime_pause_ms";

pub const ALERTS_FIRED: &str = "telemetry_alerts_fired_total";
pub const NOTIFY_ERRORS: &str = "telemetry_notify_errors_total";
pub const LOOP_RESTARTS: &str = "telemetry_loop_restarts_total";

const LATENCY_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
];
const BATCH_SIZE_BUCKETS: &[f64] = &[1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0];
const RATIO_BUCKETS: &[f64] = &[1.0, 1.1, 1.5, 2.0, 3.0, 5.0, 10.0, 20.0];
const BYTES_BUCKETS: &[f64] = &[
    1024.0, 10_240.0, 102_400.0, 1_048_576.0, 10_485_760.0, 104_857_600.0,
];

static METADATA: Metadata<'static> =
    Metadata::new(module_path!(), Level::INFO, Some(module_path!()));

/// Process-wide metric namespace backed by a Prometheus recorder.
pub struct MetricsRegistry {
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
}

impl MetricsRegistry {
    /// Create an empty registry with histogram buckets tuned per metric.
    pub fn new() -> Self {
        let recorder = PrometheusBuilder::new()
            .set_buckets(LATENCY_BUCKETS)
            .and_then(|b| b.set_buckets_for_metric(Matcher::Full(BATCH_SIZE.into()), BATCH_SIZE_BUCKETS))
            .and_then(|b| b.set_buckets_for_metric(Matcher::Full(COMPRESSION_RATIO.into()), RATIO_BUCKETS))
            .and_then(|b| {
                b.set_buckets_for_metric(Matcher::Full(COMPRESSION_INPUT_BYTES.into()), BYTES_BUCKETS)
            })
            .map(PrometheusBuilder::build_recorder)
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Invalid histogram buckets, using summaries");
                PrometheusBuilder::new().build_recorder()
            });
        let handle = recorder.handle();
        Self { recorder, handle }
    }

    pub fn counter(&self, name: &'static str, labels: &[(&'static str, &str)]) -> Counter {
        self.recorder.register_counter(&key(name, labels), &METADATA)
    }

    pub fn gauge(&self, name: &'static str, labels: &[(&'static str, &str)]) -> Gauge {
        self.recorder.register_gauge(&key(name, labels), &METADATA)
    }

    pub fn histogram(&self, name: &'static str, labels: &[(&'static str, &str)]) -> Histogram {
        self.recorder.register_histogram(&key(name, labels), &METADATA)
    }

    pub fn increment(&self, name: &'static str, labels: &[(&'static str, &str)]) {
        self.counter(name, labels).increment(1);
    }

    pub fn set_gauge(&self, name: &'static str, labels: &[(&'static str, &str)], value: f64) {
        self.gauge(name, labels).set(value);
    }

    pub fn record(&self, name: &'static str, labels: &[(&'static str, &str)], value: f64) {
        self.histogram(name, labels).record(value);
    }

    /// Prometheus text exposition of every registered series.
    pub fn render(&self) -> String {
        self.handle.render()
    }

    /// Drain histogram buffers. Called on every evaluation cycle.
    pub fn run_upkeep(&self) {
        self.handle.run_upkeep();
    }

    /// Sum of every series of a counter or gauge, read back from the exposition.
    pub fn value(&self, name: &str) -> Option<f64> {
        sum_series(&self.render(), &[name]).remove(name)
    }

    /// Like `value` for several metrics, from a single render. Metrics with
    /// no series are absent from the map.
    pub fn values<'a>(&self, names: &[&'a str]) -> HashMap<&'a str, f64> {
        sum_series(&self.render(), names)
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn key(name: &'static str, labels: &[(&'static str, &str)]) -> Key {
    let labels: Vec<Label> = labels
        .iter()
        .map(|(k, v)| Label::new(*k, v.to_string()))
        .collect();
    Key::from_parts(name, labels)
}

fn sum_series<'a>(exposition: &str, names: &[&'a str]) -> HashMap<&'a str, f64> {
    let mut totals = HashMap::new();
    for line in exposition.lines() {
        if line.starts_with('#') {
            continue;
        }
        let series_name = line
            .split(|c: char| c == '{' || c.is_whitespace())
            .next()
            .unwrap_or_default();
        let Some(name) = names.iter().find(|n| **n == series_name) else {
            continue;
        };
        if let Some(value) = line.rsplit(' ').next().and_then(|v| v.parse::<f64>().ok()) {
            *totals.entry(*name).or_insert(0.0) += value;
        }
    }
    totals
}
