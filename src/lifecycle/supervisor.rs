//! Supervised background loops.
//!
//! # Responsibilities
//! - Own the handle of every long-running loop
//! - Restart a loop after a delay when it panics
//! - Join every loop within a grace period on shutdown, aborting stragglers
//!
//! # Design Decisions
//! - A loop that returns normally is finished and is not restarted
//! - Panics are caught inside the supervised task so `abort` still reaches
//!   the running loop body

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::health::{HealthState, MonitoringState};
use crate::lifecycle::shutdown::{Shutdown, ShutdownSignal};
use crate::observability::metrics::{self, MetricsRegistry};

/// Outcome of a supervisor shutdown.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    pub joined: usize,
    pub aborted: usize,
}

pub struct TaskSupervisor {
    shutdown: Shutdown,
    handles: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
    restart_delay: Duration,
    health: Arc<HealthState>,
    metrics: Arc<MetricsRegistry>,
    stopped: AtomicBool,
}

impl TaskSupervisor {
    pub fn new(
        shutdown: Shutdown,
        restart_delay: Duration,
        health: Arc<HealthState>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            shutdown,
            handles: Mutex::new(Vec::new()),
            restart_delay,
            health,
            metrics,
            stopped: AtomicBool::new(false),
        }
    }

    /// Spawn a loop built by `factory`. The factory is called again for each
    /// restart with a fresh shutdown signal.
    pub fn spawn_supervised<F, Fut>(&self, name: &'static str, factory: F)
    where
        F: Fn(ShutdownSignal) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.stopped.load(Ordering::Acquire) {
            tracing::warn!(task = name, "Supervisor stopped, not spawning task");
            return;
        }

        let shutdown = self.shutdown.clone();
        let delay = self.restart_delay;
        let health = Arc::clone(&self.health);
        let registry = Arc::clone(&self.metrics);

        let handle = tokio::spawn(async move {
            loop {
                let run = AssertUnwindSafe(factory(shutdown.subscribe())).catch_unwind();
                if run.await.is_ok() {
                    tracing::debug!(task = name, "Task exited");
                    break;
                }
                if shutdown.is_triggered() {
                    break;
                }

                tracing::error!(task = name, delay_ms = delay.as_millis() as u64, "Task panicked, restarting");
                registry.increment(metrics::LOOP_RESTARTS, &[("task", name)]);
                health.set_state(MonitoringState::Error);

                let mut signal = shutdown.subscribe();
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = signal.recv() => break,
                }
            }
        });

        tracing::debug!(task = name, "Task spawned");
        self.handles.lock().push((name, handle));
    }

    /// Signal every loop, wait up to `grace` in total, abort the rest.
    /// Only the first call does any work.
    pub async fn shutdown(&self, grace: Duration) -> ShutdownReport {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return ShutdownReport::default();
        }
        self.shutdown.trigger();

        let handles: Vec<_> = std::mem::take(&mut *self.handles.lock());
        let deadline = tokio::time::Instant::now() + grace;
        let mut report = ShutdownReport::default();

        for (name, mut handle) in handles {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(_) => report.joined += 1,
                Err(_) => {
                    tracing::warn!(task = name, "Task did not stop within grace period, aborting");
                    handle.abort();
                    report.aborted += 1;
                }
            }
        }

        tracing::info!(joined = report.joined, aborted = report.aborted, "Supervisor stopped");
        report
    }

    pub fn task_count(&self) -> usize {
        self.handles.lock().len()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn supervisor() -> (TaskSupervisor, Arc<MetricsRegistry>) {
        let metrics = Arc::new(MetricsRegistry::new());
        let supervisor = TaskSupervisor::new(
            Shutdown::new(),
            Duration::from_millis(50),
            Arc::new(HealthState::new()),
            metrics.clone(),
        );
        (supervisor, metrics)
    }

    #[tokio::test(start_paused = true)]
    async fn test_restarts_after_panic() {
        let (supervisor, registry) = supervisor();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();

        supervisor.spawn_supervised("flaky", move |mut signal| {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    panic!("boom");
                }
                signal.recv().await;
            }
        });

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert_eq!(registry.value(metrics::LOOP_RESTARTS), Some(2.0));

        let report = supervisor.shutdown(Duration::from_secs(1)).await;
        assert_eq!(report, ShutdownReport { joined: 1, aborted: 0 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_aborts_stragglers_and_is_idempotent() {
        let (supervisor, _) = supervisor();
        supervisor.spawn_supervised("stubborn", |_signal| async {
            loop {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
        });
        supervisor.spawn_supervised("polite", |mut signal| async move {
            signal.recv().await;
        });

        let report = supervisor.shutdown(Duration::from_millis(100)).await;
        assert_eq!(report, ShutdownReport { joined: 1, aborted: 1 });
        assert_eq!(supervisor.shutdown(Duration::from_millis(100)).await, ShutdownReport::default());

        supervisor.spawn_supervised("late", |_signal| async {});
        assert_eq!(supervisor.task_count(), 0);
    }
}
