//! Pipeline assembly and supervision.
//!
//! # Data Flow
//! ```text
//! PipelineBuilder::build
//!     → MetricsRegistry, HealthState, AlertEngine, Notifier, CompressionEngine
//!     → Dispatcher (market metrics + registered observers)
//!
//! Pipeline::start(connector)
//!     → ChannelRouter (one queue per channel)
//!     → spawn: connection, batch processor per channel, monitors, evaluator
//!
//! Pipeline::stop
//!     → supervisor shutdown (grace, abort) → drain notifications → close connection → STOPPED
//! ```
//!
//! # Design Decisions
//! - Every shared component is built once and injected; nothing is global
//! - Start and stop are each effective once

pub mod evaluator;

pub use evaluator::Evaluator;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::alerts::{AlertEngine, LogSink, NotificationSink, Notifier};
use crate::compression::CompressionEngine;
use crate::config::TelemetryConfig;
use crate::health::{HealthReport, HealthState, MonitoringState};
use crate::ingest::{BatchObserver, BatchProcessor, ChannelRouter, Dispatcher, MarketMetricsObserver, RateLimiter};
use crate::lifecycle::{Shutdown, ShutdownReport, TaskSupervisor};
use crate::monitors::{self, network::probe_target, CpuMonitor, MemoryMonitor, NetworkMonitor, PauseMonitor};
use crate::net::{ConnectionManager, Connector};
use crate::observability::MetricsRegistry;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("pipeline already started")]
    AlreadyStarted,

    #[error("pipeline has been stopped")]
    Stopped,
}

pub struct PipelineBuilder {
    config: TelemetryConfig,
    observers: Vec<Arc<dyn BatchObserver>>,
    sinks: Vec<Arc<dyn NotificationSink>>,
    metrics: Option<Arc<MetricsRegistry>>,
    market_metrics: bool,
    monitors: bool,
}

impl PipelineBuilder {
    pub fn new(config: TelemetryConfig) -> Self {
        Self {
            config,
            observers: Vec::new(),
            sinks: Vec::new(),
            metrics: None,
            market_metrics: true,
            monitors: true,
        }
    }

    pub fn observer(mut self, observer: Arc<dyn BatchObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Use an existing registry instead of a fresh one.
    pub fn metrics(mut self, registry: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(registry);
        self
    }

    pub fn without_market_metrics(mut self) -> Self {
        self.market_metrics = false;
        self
    }

    /// Skip the resource monitors regardless of their enable flags.
    pub fn without_monitors(mut self) -> Self {
        self.monitors = false;
        self
    }

    pub fn build(self) -> Pipeline {
        let config = self.config;
        let metrics = self.metrics.unwrap_or_default();
        let health = Arc::new(HealthState::new());

        let alerts = Arc::new(AlertEngine::new(
            config.alerts.resolved_metrics(&config.monitoring),
            config.alerts.retention(),
            config.alerts.max_records,
            Arc::clone(&metrics),
        ));

        let mut sinks: Vec<Arc<dyn NotificationSink>> = vec![Arc::new(LogSink)];
        sinks.extend(self.sinks);
        let notifier = Arc::new(Notifier::new(
            sinks,
            config.alerts.notify_timeout(),
            Arc::clone(&metrics),
        ));

        let compression = Arc::new(CompressionEngine::new(
            config.compression.clone(),
            Arc::clone(&metrics),
        ));

        let mut observers = self.observers;
        if self.market_metrics {
            observers.push(Arc::new(MarketMetricsObserver::new(
                Arc::clone(&alerts),
                config.monitoring.volatility_window,
            )));
        }
        let dispatcher = Arc::new(Dispatcher::new(observers, Arc::clone(&metrics)));

        let supervisor = TaskSupervisor::new(
            Shutdown::new(),
            config.monitoring.loop_restart_delay(),
            Arc::clone(&health),
            Arc::clone(&metrics),
        );

        Pipeline {
            config,
            metrics,
            health,
            alerts,
            notifier,
            compression,
            dispatcher,
            supervisor,
            connection: Mutex::new(None),
            started: AtomicBool::new(false),
            monitors: self.monitors,
        }
    }
}

pub struct Pipeline {
    config: TelemetryConfig,
    metrics: Arc<MetricsRegistry>,
    health: Arc<HealthState>,
    alerts: Arc<AlertEngine>,
    notifier: Arc<Notifier>,
    compression: Arc<CompressionEngine>,
    dispatcher: Arc<Dispatcher>,
    supervisor: TaskSupervisor,
    connection: Mutex<Option<Arc<ConnectionManager>>>,
    started: AtomicBool,
    monitors: bool,
}

impl Pipeline {
    pub fn builder(config: TelemetryConfig) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    /// Spawn every loop. The pipeline starts at most once.
    pub fn start(&self, connector: Arc<dyn Connector>) -> Result<(), PipelineError> {
        if self.supervisor.is_stopped() {
            return Err(PipelineError::Stopped);
        }
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(PipelineError::AlreadyStarted);
        }

        let (router, consumers) = ChannelRouter::build(&self.config.batching);
        let channels: Vec<String> = router.channels().map(str::to_string).collect();

        for consumer in consumers {
            let processor = Arc::new(BatchProcessor::new(
                consumer,
                &self.config.batching,
                Arc::clone(&self.compression),
                Arc::clone(&self.dispatcher),
                RateLimiter::from_config(&self.config.rate_limit),
                Arc::clone(&self.metrics),
            ));
            self.supervisor
                .spawn_supervised("batch_processor", move |signal| Arc::clone(&processor).run(signal));
        }

        let manager = Arc::new(ConnectionManager::new(
            self.config.connection.clone(),
            connector,
            router,
            Arc::clone(&self.health),
            Arc::clone(&self.metrics),
        ));
        *self.connection.lock() = Some(Arc::clone(&manager));
        self.supervisor.spawn_supervised("connection", move |signal| {
            let manager = Arc::clone(&manager);
            async move {
                let outcome = manager.run(signal).await;
                tracing::info!(?outcome, "Connection loop finished");
            }
        });

        if self.monitors {
            self.spawn_monitors();
        }

        let evaluator = Arc::new(Evaluator {
            alerts: Arc::clone(&self.alerts),
            notifier: Arc::clone(&self.notifier),
            health: Arc::clone(&self.health),
            metrics: Arc::clone(&self.metrics),
            interval: self.config.monitoring.update_interval(),
        });
        self.supervisor
            .spawn_supervised("alert_evaluator", move |signal| Arc::clone(&evaluator).run(signal));

        tracing::info!(
            url = %self.config.connection.url,
            channels = ?channels,
            tasks = self.supervisor.task_count(),
            "Pipeline started"
        );
        Ok(())
    }

    fn spawn_monitors(&self) {
        let config = &self.config.monitors;

        if config.memory_enabled {
            let (monitors_config, alerts, registry) =
                (config.clone(), Arc::clone(&self.alerts), Arc::clone(&self.metrics));
            self.supervisor.spawn_supervised("memory_monitor", move |signal| {
                let monitor = MemoryMonitor::new(&monitors_config, Arc::clone(&registry));
                monitors::run_monitor(monitor, Arc::clone(&alerts), Arc::clone(&registry), signal)
            });
        }

        if config.cpu_enabled {
            let (monitors_config, alerts, registry) =
                (config.clone(), Arc::clone(&self.alerts), Arc::clone(&self.metrics));
            let compression = Arc::clone(&self.compression);
            self.supervisor.spawn_supervised("cpu_monitor", move |signal| {
                let monitor =
                    CpuMonitor::new(&monitors_config, Arc::clone(&compression), Arc::clone(&registry));
                monitors::run_monitor(monitor, Arc::clone(&alerts), Arc::clone(&registry), signal)
            });
        }

        if config.network_enabled {
            let (monitors_config, alerts, registry) =
                (config.clone(), Arc::clone(&self.alerts), Arc::clone(&self.metrics));
            let target = probe_target(config, &self.config.connection);
            self.supervisor.spawn_supervised("network_monitor", move |signal| {
                let monitor =
                    NetworkMonitor::new(&monitors_config, target.clone(), Arc::clone(&registry));
                monitors::run_monitor(monitor, Arc::clone(&alerts), Arc::clone(&registry), signal)
            });
        }

        if config.pause_enabled {
            let (monitors_config, alerts, registry) =
                (config.clone(), Arc::clone(&self.alerts), Arc::clone(&self.metrics));
            self.supervisor.spawn_supervised("pause_monitor", move |signal| {
                let monitor = PauseMonitor::new(&monitors_config, Arc::clone(&registry));
                monitors::run_monitor(monitor, Arc::clone(&alerts), Arc::clone(&registry), signal)
            });
        }
    }

    /// Stop every loop within the configured grace period, close the
    /// connection and enter STOPPED. Later calls do nothing.
    pub async fn stop(&self) -> ShutdownReport {
        if self.supervisor.is_stopped() {
            return ShutdownReport::default();
        }
        tracing::info!("Pipeline stopping");
        let grace = self.config.monitoring.shutdown_grace();
        let report = self.supervisor.shutdown(grace).await;
        // The evaluator is stopped, so no new notifications can start.
        self.notifier.drain(grace).await;

        if let Some(manager) = self.connection.lock().as_ref() {
            manager.close();
        }
        self.health.set_connected(false);
        self.health.set_state(MonitoringState::Stopped);
        report
    }

    /// Current state plus last-known metrics. Never blocks.
    pub fn health(&self) -> HealthReport {
        self.health.snapshot()
    }

    pub fn health_state(&self) -> &Arc<HealthState> {
        &self.health
    }

    pub fn alerts(&self) -> &Arc<AlertEngine> {
        &self.alerts
    }

    pub fn compression(&self) -> &Arc<CompressionEngine> {
        &self.compression
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    /// Consecutive failed connect attempts, 0 before start.
    pub fn connection_attempts(&self) -> u32 {
        self.connection
            .lock()
            .as_ref()
            .map_or(0, |manager| manager.attempts())
    }

    /// Run one evaluation cycle immediately.
    pub fn evaluate_now(&self) -> usize {
        Evaluator {
            alerts: Arc::clone(&self.alerts),
            notifier: Arc::clone(&self.notifier),
            health: Arc::clone(&self.health),
            metrics: Arc::clone(&self.metrics),
            interval: self.config.monitoring.update_interval(),
        }
        .cycle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{ConnectError, FrameStream};
    use async_trait::async_trait;

    struct Refused;

    #[async_trait]
    impl Connector for Refused {
        async fn connect(&self, _url: &str) -> Result<Box<dyn FrameStream>, ConnectError> {
            Err(ConnectError::Transport("refused".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_once_stop_idempotent() {
        let pipeline = Pipeline::builder(TelemetryConfig::default())
            .without_monitors()
            .build();
        pipeline.start(Arc::new(Refused)).unwrap();
        assert_eq!(pipeline.start(Arc::new(Refused)), Err(PipelineError::AlreadyStarted));

        pipeline.stop().await;
        assert_eq!(pipeline.health().state, MonitoringState::Stopped);
        assert_eq!(pipeline.stop().await, ShutdownReport::default());
        assert_eq!(pipeline.start(Arc::new(Refused)), Err(PipelineError::Stopped));
    }
}
