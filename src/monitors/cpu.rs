//! Process CPU monitor. Over the limit it asks the compression engine to
//! compact its history as a best-effort relief.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sysinfo::{Pid, System};

use crate::compression::CompressionEngine;
use crate::config::MonitorsConfig;
use crate::monitors::{Reading, ResourceMonitor, SampleError, CPU_USAGE};
use crate::observability::metrics::{self, MetricsRegistry};

pub struct CpuMonitor {
    system: System,
    pid: Pid,
    interval: Duration,
    compression: Arc<CompressionEngine>,
    metrics: Arc<MetricsRegistry>,
}

impl CpuMonitor {
    pub fn new(
        config: &MonitorsConfig,
        compression: Arc<CompressionEngine>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            system: System::new(),
            pid: Pid::from_u32(std::process::id()),
            interval: Duration::from_secs(config.cpu_interval_secs),
            compression,
            metrics,
        }
    }
}

#[async_trait]
impl ResourceMonitor for CpuMonitor {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn sample(&mut self) -> Result<Vec<Reading>, SampleError> {
        // Usage is computed between two refreshes; the first sample reads 0.
        if !self.system.refresh_process(self.pid) {
            return Err(SampleError::ProcessNotFound(self.pid.as_u32()));
        }
        let percent = self
            .system
            .process(self.pid)
            .map(|p| f64::from(p.cpu_usage()))
            .ok_or(SampleError::ProcessNotFound(self.pid.as_u32()))?;

        self.metrics.set_gauge(metrics::CPU_PERCENT, &[], percent);
        Ok(vec![Reading::new(CPU_USAGE, percent)])
    }

    fn on_breach(&mut self, reading: &Reading) {
        tracing::info!(cpu_percent = reading.value, "Compacting compression history");
        self.compression.compact();
    }
}
