//! Alert types.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Error,
    Critical,
}

impl AlertLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }

    /// ERROR and CRITICAL alerts go out to notification sinks.
    pub fn requires_notification(self) -> bool {
        self >= Self::Error
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of the threshold is bad for a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdDirection {
    /// Higher is worse (latency, memory).
    #[default]
    Above,
    /// Lower is worse (liquidity).
    Below,
}

impl ThresholdDirection {
    pub fn crossed(self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Above => value > threshold,
            Self::Below => value < threshold,
        }
    }
}

/// A fired alert. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Metric name the alert is about.
    #[serde(rename = "type")]
    pub metric: String,
    pub level: AlertLevel,
    pub message: String,
    /// Windowed mean that crossed the threshold.
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    /// How many alerts this metric has fired, this one included.
    pub sequence_count: u64,
}

/// Mutable per-metric state, created on first observation.
#[derive(Debug, Clone, Default)]
pub struct AlertState {
    pub last_alert_time: Option<DateTime<Utc>>,
    pub alert_count: u64,
    pub aggregated_values: VecDeque<(f64, DateTime<Utc>)>,
}

impl AlertState {
    /// Drop samples older than `window` relative to `now`.
    pub fn prune(&mut self, window: chrono::Duration, now: DateTime<Utc>) {
        let cutoff = now - window;
        while self
            .aggregated_values
            .front()
            .is_some_and(|(_, at)| *at < cutoff)
        {
            self.aggregated_values.pop_front();
        }
    }

    pub fn push(&mut self, value: f64, at: DateTime<Utc>) {
        // Out-of-order samples are inserted in place so pruning stays front-only.
        let position = self
            .aggregated_values
            .iter()
            .rposition(|(_, t)| *t <= at)
            .map_or(0, |i| i + 1);
        self.aggregated_values.insert(position, (value, at));
    }

    pub fn sample_count(&self) -> usize {
        self.aggregated_values.len()
    }

    pub fn window_mean(&self) -> Option<f64> {
        if self.aggregated_values.is_empty() {
            return None;
        }
        let sum: f64 = self.aggregated_values.iter().map(|(v, _)| v).sum();
        Some(sum / self.aggregated_values.len() as f64)
    }
}

/// Filter for querying the alert log.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertQuery {
    /// Minimum severity (inclusive).
    pub level: Option<AlertLevel>,
    /// Only alerts at or after this instant.
    pub since: Option<DateTime<Utc>>,
    pub metric: Option<String>,
}

impl AlertQuery {
    pub fn matches(&self, alert: &Alert) -> bool {
        self.level.map_or(true, |level| alert.level >= level)
            && self.since.map_or(true, |since| alert.timestamp >= since)
            && self.metric.as_ref().map_or(true, |m| *m == alert.metric)
    }
}
