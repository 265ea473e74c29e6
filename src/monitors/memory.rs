//! Resident memory monitor.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sysinfo::{Pid, System};

use crate::config::MonitorsConfig;
use crate::monitors::{Reading, ResourceMonitor, SampleError, MEMORY_USAGE};
use crate::observability::metrics::{self, MetricsRegistry};

pub struct MemoryMonitor {
    system: System,
    pid: Pid,
    interval: Duration,
    metrics: Arc<MetricsRegistry>,
}

impl MemoryMonitor {
    pub fn new(config: &MonitorsConfig, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            system: System::new(),
            pid: Pid::from_u32(std::process::id()),
            interval: Duration::from_secs(config.memory_interval_secs),
            metrics,
        }
    }
}

#[async_trait]
impl ResourceMonitor for MemoryMonitor {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn sample(&mut self) -> Result<Vec<Reading>, SampleError> {
        self.system.refresh_memory();
        if !self.system.refresh_process(self.pid) {
            return Err(SampleError::ProcessNotFound(self.pid.as_u32()));
        }
        let rss = self
            .system
            .process(self.pid)
            .map(|p| p.memory())
            .ok_or(SampleError::ProcessNotFound(self.pid.as_u32()))?;
        let total = self.system.total_memory();
        if total == 0 {
            return Err(SampleError::Unavailable("total system memory".into()));
        }

        let ratio = rss as f64 / total as f64;
        self.metrics.set_gauge(metrics::MEMORY_RSS_BYTES, &[], rss as f64);
        self.metrics.set_gauge(metrics::MEMORY_USAGE_RATIO, &[], ratio);
        tracing::debug!(rss_bytes = rss, total_bytes = total, ratio, "Memory sampled");

        Ok(vec![Reading::new(MEMORY_USAGE, ratio)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_samples_own_process() {
        let registry = Arc::new(MetricsRegistry::new());
        let mut monitor = MemoryMonitor::new(&MonitorsConfig::default(), registry.clone());
        let readings = monitor.sample().await.unwrap();
        assert_eq!(readings[0].metric, MEMORY_USAGE);
        assert!(readings[0].value > 0.0 && readings[0].value < 1.0);
        assert!(registry.value(metrics::MEMORY_RSS_BYTES).unwrap() > 0.0);
    }
}
