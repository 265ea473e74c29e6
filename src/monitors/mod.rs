//! Resource monitor subsystem.
//!
//! # Data Flow
//! ```text
//! interval tick (per monitor schedule)
//!     → monitor.sample() (sysinfo / TCP probe / timer oversleep)
//!     → registry gauges
//!     → AlertEngine::observe(metric, value, now)
//!     → immediate check against the metric's alert threshold (warn log)
//! sample error → log, count, skip cycle
//! ```
//!
//! # Design Decisions
//! - Four independent loops; one failing monitor never affects another
//! - Alert firing is left to the engine (window, cooldown, min samples)
//! - The GC-pause monitor becomes a runtime scheduling-pause monitor

pub mod cpu;
pub mod memory;
pub mod network;
pub mod pause;

pub use cpu::CpuMonitor;
pub use memory::MemoryMonitor;
pub use network::NetworkMonitor;
pub use pause::PauseMonitor;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::time::MissedTickBehavior;

use crate::alerts::AlertEngine;
use crate::lifecycle::ShutdownSignal;
use crate::observability::metrics::{self, MetricsRegistry};

pub const MEMORY_USAGE: &str = "memory_usage";
pub const CPU_USAGE: &str = "cpu_usage";
pub const NETWORK_LATENCY: &str = "network_latency";
pub const RUNTIME_PAUSE: &str = "runtime_pause";

#[derive(Debug, Error)]
pub enum SampleError {
    #[error("process {0} not found")]
    ProcessNotFound(u32),

    #[error("metric unavailable: {0}")]
    Unavailable(String),

    #[error("cannot resolve probe address {address}: {reason}")]
    Resolve { address: String, reason: String },

    #[error("probe to {address} failed: {reason}")]
    Probe { address: String, reason: String },
}

/// One sampled value destined for the alert engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub metric: &'static str,
    pub value: f64,
}

impl Reading {
    pub fn new(metric: &'static str, value: f64) -> Self {
        Self { metric, value }
    }

    /// The configured threshold this reading crosses, if any. Metrics
    /// without an alert config are never breached.
    pub fn breached_limit(&self, alerts: &AlertEngine) -> Option<f64> {
        let config = alerts.config(self.metric)?;
        config
            .direction
            .crossed(self.value, config.threshold)
            .then_some(config.threshold)
    }
}

#[async_trait]
pub trait ResourceMonitor: Send {
    fn name(&self) -> &'static str;

    fn interval(&self) -> Duration;

    async fn sample(&mut self) -> Result<Vec<Reading>, SampleError>;

    /// Called once per reading that crosses its alert threshold.
    fn on_breach(&mut self, _reading: &Reading) {}
}

/// Sample `monitor` on its schedule until shutdown.
pub async fn run_monitor<M: ResourceMonitor>(
    mut monitor: M,
    alerts: Arc<AlertEngine>,
    registry: Arc<MetricsRegistry>,
    mut shutdown: ShutdownSignal,
) {
    let name = monitor.name();
    let mut ticker = tokio::time::interval(monitor.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::info!(monitor = name, interval_secs = monitor.interval().as_secs_f64(), "Monitor started");

    loop {
        tokio::select! {
            biased;
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {}
        }

        match monitor.sample().await {
            Ok(readings) => {
                let now = Utc::now();
                for reading in &readings {
                    alerts.observe(reading.metric, reading.value, now);
                    if let Some(limit) = reading.breached_limit(&alerts) {
                        tracing::warn!(
                            monitor = name,
                            metric = reading.metric,
                            value = reading.value,
                            limit,
                            "Resource limit exceeded"
                        );
                        monitor.on_breach(reading);
                    }
                }
            }
            Err(e) => {
                tracing::warn!(monitor = name, error = %e, "Sampling failed, skipping cycle");
                registry.increment(metrics::MONITOR_ERRORS, &[("monitor", name)]);
            }
        }
    }

    tracing::info!(monitor = name, "Monitor stopped");
}
