//! Threshold evaluation with aggregation windows and cooldowns.
//!
//! # State Transitions (per metric)
//! ```text
//! no-state → observing: first observe()
//! observing → eligible: ≥ 3 samples in window and cooldown elapsed
//! eligible → fired: windowed mean crosses threshold
//! fired → observing: cooldown running, samples keep aggregating
//! ```

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::alerts::types::{Alert, AlertLevel, AlertQuery, AlertState};
use crate::config::AlertConfig;
use crate::observability::metrics::{self, MetricsRegistry};

/// Samples required in the window before a metric may fire.
pub const MIN_SAMPLES: usize = 3;

const UNCONFIGURED_WINDOW_SECS: i64 = 60;

/// Pure firing rule. `state` must already be pruned to the window.
pub fn should_trigger_alert(config: &AlertConfig, state: &AlertState, now: DateTime<Utc>) -> bool {
    if state.sample_count() < MIN_SAMPLES {
        return false;
    }
    if let Some(last) = state.last_alert_time {
        if now - last <= to_chrono(config.cooldown()) {
            return false;
        }
    }
    state
        .window_mean()
        .is_some_and(|mean| config.direction.crossed(mean, config.threshold))
}

fn to_chrono(duration: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

pub struct AlertEngine {
    configs: BTreeMap<String, AlertConfig>,
    states: DashMap<String, AlertState>,
    log: Mutex<VecDeque<Alert>>,
    retention: chrono::Duration,
    max_records: usize,
    metrics: Arc<MetricsRegistry>,
}

impl AlertEngine {
    pub fn new(
        configs: BTreeMap<String, AlertConfig>,
        retention: std::time::Duration,
        max_records: usize,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            configs,
            states: DashMap::new(),
            log: Mutex::new(VecDeque::new()),
            retention: to_chrono(retention),
            max_records: max_records.max(1),
            metrics,
        }
    }

    pub fn config(&self, metric: &str) -> Option<&AlertConfig> {
        self.configs.get(metric)
    }

    /// Record a sample for `metric` at `at`.
    pub fn observe(&self, metric: &str, value: f64, at: DateTime<Utc>) {
        if !value.is_finite() {
            tracing::debug!(metric, value, "Ignoring non-finite sample");
            return;
        }
        let window = self.window_for(metric);
        let mut state = self.states.entry(metric.to_string()).or_default();
        state.push(value, at);
        state.prune(window, at);
    }

    /// Run one evaluation cycle over every configured metric.
    /// Each metric is judged only on its own state.
    pub fn evaluate(&self, now: DateTime<Utc>) -> Vec<Alert> {
        self.configs
            .keys()
            .filter_map(|metric| self.evaluate_metric(metric, now))
            .collect()
    }

    /// Evaluate one metric, firing if eligible.
    pub fn evaluate_metric(&self, metric: &str, now: DateTime<Utc>) -> Option<Alert> {
        let config = self.configs.get(metric)?;
        let mut state = self.states.get_mut(metric)?;
        state.prune(to_chrono(config.aggregation_window()), now);

        if !should_trigger_alert(config, &state, now) {
            return None;
        }

        let value = state.window_mean()?;
        state.alert_count += 1;
        state.last_alert_time = Some(now);
        let alert = Alert {
            metric: metric.to_string(),
            level: config.level,
            message: alert_message(metric, config, value),
            value,
            timestamp: now,
            sequence_count: state.alert_count,
        };
        drop(state);

        self.metrics.increment(
            metrics::ALERTS_FIRED,
            &[("metric", metric), ("level", config.level.as_str())],
        );
        log_alert(&alert);
        self.append(alert.clone());
        Some(alert)
    }

    fn append(&self, alert: Alert) {
        let mut log = self.log.lock();
        let cutoff = alert.timestamp - self.retention;
        while log.front().is_some_and(|a| a.timestamp < cutoff) {
            log.pop_front();
        }
        if log.len() == self.max_records {
            log.pop_front();
        }
        log.push_back(alert);
    }

    /// Alerts matching `query`, oldest first.
    pub fn alerts(&self, query: &AlertQuery) -> Vec<Alert> {
        self.log
            .lock()
            .iter()
            .filter(|a| query.matches(a))
            .cloned()
            .collect()
    }

    pub fn alert_count(&self, metric: &str) -> u64 {
        self.states.get(metric).map_or(0, |s| s.alert_count)
    }

    pub fn total_alerts(&self) -> u64 {
        self.states.iter().map(|s| s.alert_count).sum()
    }

    pub fn sample_count(&self, metric: &str) -> usize {
        self.states.get(metric).map_or(0, |s| s.sample_count())
    }

    fn window_for(&self, metric: &str) -> chrono::Duration {
        self.configs
            .get(metric)
            .map(|c| to_chrono(c.aggregation_window()))
            .unwrap_or_else(|| chrono::Duration::seconds(UNCONFIGURED_WINDOW_SECS))
    }
}

fn alert_message(metric: &str, config: &AlertConfig, value: f64) -> String {
    let description = if config.description.is_empty() {
        metric
    } else {
        config.description.as_str()
    };
    format!(
        "{description}: windowed mean {value:.4} {} threshold {}",
        match config.direction {
            crate::alerts::ThresholdDirection::Above => "above",
            crate::alerts::ThresholdDirection::Below => "below",
        },
        config.threshold
    )
}

fn log_alert(alert: &Alert) {
    match alert.level {
        AlertLevel::Info => tracing::info!(
            metric = %alert.metric, value = alert.value, count = alert.sequence_count,
            "Alert: {}", alert.message
        ),
        AlertLevel::Warning => tracing::warn!(
            metric = %alert.metric, value = alert.value, count = alert.sequence_count,
            "Alert: {}", alert.message
        ),
        AlertLevel::Error | AlertLevel::Critical => tracing::error!(
            metric = %alert.metric, level = %alert.level, value = alert.value,
            count = alert.sequence_count, "Alert: {}", alert.message
        ),
    }
}
