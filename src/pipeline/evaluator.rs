//! Periodic alert evaluation and health refresh.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::MissedTickBehavior;

use crate::alerts::{AlertEngine, Notifier};
use crate::health::{HealthState, MetricsSnapshot, MonitoringState};
use crate::lifecycle::ShutdownSignal;
use crate::observability::MetricsRegistry;

pub struct Evaluator {
    pub alerts: Arc<AlertEngine>,
    pub notifier: Arc<Notifier>,
    pub health: Arc<HealthState>,
    pub metrics: Arc<MetricsRegistry>,
    pub interval: Duration,
}

impl Evaluator {
    /// One cycle: evaluate every metric, hand severe alerts to the notifier,
    /// drain histograms and publish a fresh health snapshot.
    pub fn cycle(&self) -> usize {
        let now = Utc::now();
        let fired = self.alerts.evaluate(now);
        let count = fired.len();
        self.notifier.dispatch(fired);

        self.metrics.run_upkeep();
        self.health.publish(MetricsSnapshot::capture(&self.metrics, now));
        if self.health.is_connected() && self.health.state() != MonitoringState::Running {
            self.health.set_state(MonitoringState::Running);
        }
        count
    }

    pub async fn run(self: Arc<Self>, mut shutdown: ShutdownSignal) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                _ = ticker.tick() => {}
            }
            let fired = self.cycle();
            if fired > 0 {
                tracing::debug!(fired, "Evaluation cycle fired alerts");
            }
        }
    }
}
