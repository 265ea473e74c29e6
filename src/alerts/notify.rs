//! Out-of-band notification of severe alerts.
//!
//! # Responsibilities
//! - Hand ERROR/CRITICAL alerts to every configured sink
//! - Bound each delivery with a timeout
//! - Isolate sink failures (logged, counted, never retried)
//! - Track background deliveries so shutdown can wait for them
//!
//! Sinks own their transport, formatting and credentials.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::alerts::types::Alert;
use crate::observability::metrics::{self, MetricsRegistry};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("sink unavailable: {0}")]
    Unavailable(String),

    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),
}

/// A notification channel (chat, email, SMS, ...).
#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(&self, alert: &Alert) -> Result<(), NotifyError>;
}

/// Writes alerts to the log. Always configured.
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, alert: &Alert) -> Result<(), NotifyError> {
        tracing::error!(
            target: "telemetry_pipeline::notifications",
            metric = %alert.metric,
            level = %alert.level,
            value = alert.value,
            timestamp = %alert.timestamp,
            "{}",
            alert.message
        );
        Ok(())
    }
}

/// Forwards alerts into an in-process channel.
pub struct ChannelSink {
    name: String,
    tx: mpsc::Sender<Alert>,
}

impl ChannelSink {
    pub fn new(name: impl Into<String>, capacity: usize) -> (Self, mpsc::Receiver<Alert>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                name: name.into(),
                tx,
            },
            rx,
        )
    }
}

#[async_trait]
impl NotificationSink for ChannelSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn notify(&self, alert: &Alert) -> Result<(), NotifyError> {
        self.tx
            .try_send(alert.clone())
            .map_err(|e| NotifyError::Unavailable(e.to_string()))
    }
}

/// Fans severe alerts out to sinks.
pub struct Notifier {
    sinks: Vec<Arc<dyn NotificationSink>>,
    timeout: Duration,
    metrics: Arc<MetricsRegistry>,
    in_flight: Mutex<JoinSet<()>>,
}

impl Notifier {
    pub fn new(
        sinks: Vec<Arc<dyn NotificationSink>>,
        timeout: Duration,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            sinks,
            timeout,
            metrics,
            in_flight: Mutex::new(JoinSet::new()),
        }
    }

    /// Deliver in the background; the caller never waits on a sink.
    pub fn dispatch(self: &Arc<Self>, alerts: Vec<Alert>) {
        let severe: Vec<Alert> = alerts
            .into_iter()
            .filter(|a| a.level.requires_notification())
            .collect();
        if severe.is_empty() || self.sinks.is_empty() {
            return;
        }
        let notifier = Arc::clone(self);
        let mut in_flight = self.in_flight.lock();
        while in_flight.try_join_next().is_some() {}
        in_flight.spawn(async move {
            for alert in &severe {
                notifier.deliver(alert).await;
            }
        });
    }

    /// Background deliveries not yet finished.
    pub fn in_flight(&self) -> usize {
        let mut in_flight = self.in_flight.lock();
        while in_flight.try_join_next().is_some() {}
        in_flight.len()
    }

    /// Wait up to `grace` for background deliveries, then abort the rest.
    /// Returns how many were aborted.
    pub async fn drain(&self, grace: Duration) -> usize {
        let mut pending = std::mem::take(&mut *self.in_flight.lock());
        if pending.is_empty() {
            return 0;
        }
        let finished = tokio::time::timeout(grace, async {
            while pending.join_next().await.is_some() {}
        })
        .await;
        if finished.is_ok() {
            return 0;
        }
        let aborted = pending.len();
        pending.abort_all();
        while pending.join_next().await.is_some() {}
        tracing::warn!(aborted, "Notifications still in flight at shutdown were dropped");
        aborted
    }

    /// Deliver one alert to every sink concurrently. Returns the number of
    /// sinks that failed.
    pub async fn deliver(&self, alert: &Alert) -> usize {
        let deliveries = self.sinks.iter().map(|sink| async move {
            let outcome = match tokio::time::timeout(self.timeout, sink.notify(alert)).await {
                Ok(result) => result,
                Err(_) => Err(NotifyError::Timeout(self.timeout)),
            };
            if let Err(e) = &outcome {
                tracing::warn!(sink = sink.name(), metric = %alert.metric, error = %e, "Notification failed");
                self.metrics
                    .increment(metrics::NOTIFY_ERRORS, &[("sink", sink.name())]);
            }
            outcome.is_err()
        });
        join_all(deliveries).await.into_iter().filter(|failed| *failed).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::AlertLevel;
    use chrono::Utc;

    struct FailingSink;

    #[async_trait]
    impl NotificationSink for FailingSink {
        fn name(&self) -> &str {
            "failing"
        }

        async fn notify(&self, _alert: &Alert) -> Result<(), NotifyError> {
            Err(NotifyError::Unavailable("smtp down".into()))
        }
    }

    struct StuckSink;

    #[async_trait]
    impl NotificationSink for StuckSink {
        fn name(&self) -> &str {
            "stuck"
        }

        async fn notify(&self, _alert: &Alert) -> Result<(), NotifyError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    struct SlowSink(Duration);

    #[async_trait]
    impl NotificationSink for SlowSink {
        fn name(&self) -> &str {
            "slow"
        }

        async fn notify(&self, _alert: &Alert) -> Result<(), NotifyError> {
            tokio::time::sleep(self.0).await;
            Ok(())
        }
    }

    fn alert(level: AlertLevel) -> Alert {
        Alert {
            metric: "memory_usage".into(),
            level,
            message: "memory high".into(),
            value: 0.93,
            timestamp: Utc::now(),
            sequence_count: 1,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_isolated() {
        let registry = Arc::new(MetricsRegistry::new());
        let (channel, mut rx) = ChannelSink::new("ops", 4);
        let notifier = Notifier::new(
            vec![Arc::new(FailingSink), Arc::new(StuckSink), Arc::new(channel)],
            Duration::from_secs(5),
            registry.clone(),
        );

        let failed = notifier.deliver(&alert(AlertLevel::Critical)).await;
        assert_eq!(failed, 2);
        assert_eq!(rx.recv().await.unwrap().metric, "memory_usage");
        assert_eq!(registry.value(metrics::NOTIFY_ERRORS), Some(2.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_waits_for_background_delivery() {
        let (channel, mut rx) = ChannelSink::new("ops", 4);
        let notifier = Arc::new(Notifier::new(
            vec![Arc::new(SlowSink(Duration::from_millis(200))), Arc::new(channel)],
            Duration::from_secs(5),
            Arc::new(MetricsRegistry::new()),
        ));

        notifier.dispatch(vec![alert(AlertLevel::Critical)]);
        assert_eq!(notifier.in_flight(), 1);
        assert_eq!(notifier.drain(Duration::from_secs(1)).await, 0);
        assert_eq!(notifier.in_flight(), 0);
        assert_eq!(rx.try_recv().unwrap().level, AlertLevel::Critical);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_aborts_after_grace() {
        let notifier = Arc::new(Notifier::new(
            vec![Arc::new(StuckSink)],
            Duration::from_secs(3600),
            Arc::new(MetricsRegistry::new()),
        ));

        notifier.dispatch(vec![alert(AlertLevel::Error)]);
        notifier.dispatch(vec![alert(AlertLevel::Critical)]);
        assert_eq!(notifier.drain(Duration::from_millis(100)).await, 2);
        assert_eq!(notifier.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_dispatch_skips_minor_alerts() {
        let (channel, mut rx) = ChannelSink::new("ops", 4);
        let notifier = Arc::new(Notifier::new(
            vec![Arc::new(channel)],
            Duration::from_secs(1),
            Arc::new(MetricsRegistry::new()),
        ));

        notifier.dispatch(vec![alert(AlertLevel::Warning), alert(AlertLevel::Error)]);
        let received = rx.recv().await.unwrap();
        assert_eq!(received.level, AlertLevel::Error);
        assert!(rx.try_recv().is_err());
    }
}
