//! Health reporting subsystem.
//!
//! # Data Flow
//! ```text
//! Connection manager ──→ set_state / set_connected / set_fatal
//! Supervisor (panic) ──→ set_state(ERROR)
//! Evaluator cycle ─────→ publish(MetricsSnapshot from registry)
//!                            ↓
//! /health, Pipeline::health() ←── snapshot() (lock-free read)
//! ```
//!
//! # Design Decisions
//! - Readers never block on writers: atomics plus an `ArcSwap` snapshot
//! - STOPPED is sticky; a terminal failure pins the state to ERROR
//! - A bounded transition history is kept for diagnostics

pub mod state;

pub use state::MonitoringState;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapOption};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::observability::metrics::{self, MetricsRegistry};

const HISTORY_CAPACITY: usize = 64;

/// Last-known values of the headline metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub messages_received: f64,
    pub messages_processed: f64,
    pub dropped_messages: f64,
    pub protocol_errors: f64,
    pub connection_errors: f64,
    pub batches_dispatched: f64,
    pub alerts_fired: f64,
    pub memory_usage_ratio: Option<f64>,
    pub cpu_percent: Option<f64>,
    pub network_latency_ms: Option<f64>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl MetricsSnapshot {
    /// Read every headline metric from one render of the registry.
    pub fn capture(registry: &MetricsRegistry, at: DateTime<Utc>) -> Self {
        let values = registry.values(&[
            metrics::MESSAGES_RECEIVED,
            metrics::MESSAGES_PROCESSED,
            metrics::DROPPED_MESSAGES,
            metrics::PROTOCOL_ERRORS,
            metrics::CONNECTION_ERRORS,
            metrics::BATCHES_DISPATCHED,
            metrics::ALERTS_FIRED,
            metrics::MEMORY_USAGE_RATIO,
            metrics::CPU_PERCENT,
            metrics::NETWORK_LATENCY_MS,
        ]);
        let gauge = |name: &str| values.get(name).copied();
        let count = |name: &str| gauge(name).unwrap_or(0.0);
        Self {
            messages_received: count(metrics::MESSAGES_RECEIVED),
            messages_processed: count(metrics::MESSAGES_PROCESSED),
            dropped_messages: count(metrics::DROPPED_MESSAGES),
            protocol_errors: count(metrics::PROTOCOL_ERRORS),
            connection_errors: count(metrics::CONNECTION_ERRORS),
            batches_dispatched: count(metrics::BATCHES_DISPATCHED),
            alerts_fired: count(metrics::ALERTS_FIRED),
            memory_usage_ratio: gauge(metrics::MEMORY_USAGE_RATIO),
            cpu_percent: gauge(metrics::CPU_PERCENT),
            network_latency_ms: gauge(metrics::NETWORK_LATENCY_MS),
            updated_at: Some(at),
        }
    }
}

/// What `/health` and `Pipeline::health()` return.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub state: MonitoringState,
    pub connected: bool,
    pub fatal_error: Option<String>,
    pub metrics: MetricsSnapshot,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.state == MonitoringState::Running && self.fatal_error.is_none()
    }
}

pub struct HealthState {
    state: AtomicU8,
    connected: AtomicBool,
    fatal: ArcSwapOption<String>,
    snapshot: ArcSwap<MetricsSnapshot>,
    history: Mutex<VecDeque<(MonitoringState, DateTime<Utc>)>>,
}

impl HealthState {
    pub fn new() -> Self {
        let mut history = VecDeque::with_capacity(HISTORY_CAPACITY);
        history.push_back((MonitoringState::Initializing, Utc::now()));
        Self {
            state: AtomicU8::new(MonitoringState::Initializing as u8),
            connected: AtomicBool::new(false),
            fatal: ArcSwapOption::empty(),
            snapshot: ArcSwap::from_pointee(MetricsSnapshot::default()),
            history: Mutex::new(history),
        }
    }

    pub fn state(&self) -> MonitoringState {
        MonitoringState::from(self.state.load(Ordering::Acquire))
    }

    /// Apply a state update. Ignored once STOPPED, and RUNNING is refused
    /// after a terminal failure. Returns whether the update was applied.
    pub fn set_state(&self, next: MonitoringState) -> bool {
        let mut history = self.history.lock();
        let current = self.state();
        if current == MonitoringState::Stopped {
            return false;
        }
        if next == MonitoringState::Running && self.fatal_error().is_some() {
            return false;
        }
        self.state.store(next as u8, Ordering::Release);
        if history.len() == HISTORY_CAPACITY {
            history.pop_front();
        }
        history.push_back((next, Utc::now()));
        if current != next {
            tracing::info!(from = %current, to = %next, "Monitoring state changed");
        }
        true
    }

    /// Every applied state update, oldest first.
    pub fn history(&self) -> Vec<MonitoringState> {
        self.history.lock().iter().map(|(s, _)| *s).collect()
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Record a terminal failure and pin the state to ERROR.
    pub fn set_fatal(&self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::error!(reason = %reason, "Pipeline entered terminal failure");
        self.fatal.store(Some(Arc::new(reason)));
        self.set_state(MonitoringState::Error);
    }

    pub fn fatal_error(&self) -> Option<String> {
        self.fatal.load_full().map(|r| r.as_ref().clone())
    }

    pub fn publish(&self, snapshot: MetricsSnapshot) {
        self.snapshot.store(Arc::new(snapshot));
    }

    pub fn snapshot(&self) -> HealthReport {
        HealthReport {
            state: self.state(),
            connected: self.is_connected(),
            fatal_error: self.fatal_error(),
            metrics: self.snapshot.load().as_ref().clone(),
        }
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}
