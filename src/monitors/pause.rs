//! Runtime pause monitor.
//!
//! There is no collector to observe, so this measures how late the runtime
//! wakes a short timer: the oversleep is time during which tasks on this
//! runtime could not be scheduled (blocking calls, starved workers).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::config::MonitorsConfig;
use crate::monitors::{Reading, ResourceMonitor, SampleError, RUNTIME_PAUSE};
use crate::observability::metrics::{self, MetricsRegistry};

const PROBE_SLEEP: Duration = Duration::from_millis(10);
const PROBES_PER_SAMPLE: usize = 10;

pub struct PauseMonitor {
    interval: Duration,
    metrics: Arc<MetricsRegistry>,
}

impl PauseMonitor {
    pub fn new(config: &MonitorsConfig, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            interval: Duration::from_secs(config.pause_interval_secs),
            metrics,
        }
    }
}

/// Worst oversleep across `probes` short sleeps, in milliseconds.
pub async fn measure_pause_ms(probes: usize) -> f64 {
    let mut worst = Duration::ZERO;
    for _ in 0..probes {
        let started = Instant::now();
        tokio::time::sleep(PROBE_SLEEP).await;
        worst = worst.max(started.elapsed().saturating_sub(PROBE_SLEEP));
    }
    worst.as_secs_f64() * 1000.0
}

#[async_trait]
impl ResourceMonitor for PauseMonitor {
    fn name(&self) -> &'static str {
        "runtime_pause"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn sample(&mut self) -> Result<Vec<Reading>, SampleError> {
        let pause_ms = measure_pause_ms(PROBES_PER_SAMPLE).await;
        self.metrics.record(metrics::RUNTIME_PAUSE_MS, &[], pause_ms);
        Ok(vec![Reading::new(RUNTIME_PAUSE, pause_ms)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_no_pause_on_idle_runtime() {
        assert_eq!(measure_pause_ms(3).await, 0.0);
    }
}
