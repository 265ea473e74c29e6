//! Upstream connection lifecycle.
//!
//! # Responsibilities
//! - Keep exactly one upstream session open, or one attempt scheduled
//! - Reconnect with exponential backoff until the attempt cap
//! - Parse frames and hand them to the channel queues without blocking
//! - Close idempotently, releasing the transport even mid-reconnect
//!
//! # State Transitions
//! ```text
//! connect ok      → RUNNING, attempts reset
//! connect failure → ERROR, attempts += 1, backoff (terminal at the cap)
//! session lost    → ERROR, reconnect after the base interval
//! close/shutdown  → transport released, loop exits
//! ```

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;

use crate::config::ConnectionConfig;
use crate::health::{HealthState, MonitoringState};
use crate::ingest::{ChannelRouter, EnqueueError};
use crate::lifecycle::ShutdownSignal;
use crate::net::frame::parse_frame;
use crate::net::transport::{ConnectError, Connector, FrameStream};
use crate::observability::metrics::{self, MetricsRegistry};
use crate::resilience::ReconnectPolicy;

/// Why the connection loop returned.
#[derive(Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// Closed or shut down on request.
    Closed,
    /// Gave up after this many consecutive failed attempts.
    Exhausted(u32),
}

enum SessionEnd {
    Stopped,
    Lost(String),
}

pub struct ConnectionManager {
    config: ConnectionConfig,
    connector: Arc<dyn Connector>,
    router: ChannelRouter,
    health: Arc<HealthState>,
    metrics: Arc<MetricsRegistry>,
    close_tx: watch::Sender<bool>,
    attempts: AtomicU32,
}

impl ConnectionManager {
    pub fn new(
        config: ConnectionConfig,
        connector: Arc<dyn Connector>,
        router: ChannelRouter,
        health: Arc<HealthState>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let (close_tx, _) = watch::channel(false);
        Self {
            config,
            connector,
            router,
            health,
            metrics,
            close_tx,
            attempts: AtomicU32::new(0),
        }
    }

    /// Consecutive failed connect attempts since the last success.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        *self.close_tx.borrow()
    }

    /// Request the loop to release the transport and exit. Returns `false`
    /// if already closed.
    pub fn close(&self) -> bool {
        let was_closed = self.close_tx.send_replace(true);
        if !was_closed {
            tracing::info!(url = %self.config.url, "Connection closed");
        }
        !was_closed
    }

    /// Connection loop.
    pub async fn run(self: Arc<Self>, mut shutdown: ShutdownSignal) -> RunOutcome {
        let mut policy = ReconnectPolicy::from_config(&self.config);
        let mut closed = self.close_tx.subscribe();

        loop {
            if self.is_closed() || shutdown.is_triggered() {
                return RunOutcome::Closed;
            }

            let attempt = tokio::select! {
                biased;
                _ = shutdown.recv() => return RunOutcome::Closed,
                _ = wait_closed(&mut closed) => return RunOutcome::Closed,
                attempt = self.connector.connect(&self.config.url) => attempt,
            };

            let delay = match attempt {
                Ok(stream) => {
                    policy.reset();
                    self.attempts.store(0, Ordering::Relaxed);
                    self.health.set_connected(true);
                    self.health.set_state(MonitoringState::Running);
                    self.metrics.set_gauge(metrics::CONNECTION_UP, &[], 1.0);
                    tracing::info!(url = %self.config.url, "Connected upstream");

                    let end = self.read_session(stream, &mut shutdown, &mut closed).await;

                    self.health.set_connected(false);
                    self.metrics.set_gauge(metrics::CONNECTION_UP, &[], 0.0);
                    match end {
                        SessionEnd::Stopped => return RunOutcome::Closed,
                        SessionEnd::Lost(reason) => {
                            self.metrics
                                .increment(metrics::CONNECTION_ERRORS, &[("reason", "lost")]);
                            self.health.set_state(MonitoringState::Error);
                            let delay = policy.reconnect_delay();
                            tracing::warn!(
                                reason = %reason,
                                delay_ms = delay.as_millis() as u64,
                                "Upstream connection lost, reconnecting"
                            );
                            delay
                        }
                    }
                }
                Err(e) => {
                    self.metrics
                        .increment(metrics::CONNECTION_ERRORS, &[("reason", connect_reason(&e))]);
                    self.metrics.increment(metrics::RECONNECT_ATTEMPTS, &[]);
                    let next = policy.record_failure();
                    self.attempts.store(policy.attempts(), Ordering::Relaxed);

                    match next {
                        Some(delay) => {
                            self.health.set_state(MonitoringState::Error);
                            tracing::warn!(
                                error = %e,
                                attempt = policy.attempts(),
                                max_attempts = policy.max_attempts(),
                                delay_ms = delay.as_millis() as u64,
                                "Connect failed, backing off"
                            );
                            delay
                        }
                        None => {
                            let exhausted = ConnectError::Exhausted(policy.attempts());
                            self.health.set_fatal(format!("{exhausted}: {e}"));
                            return RunOutcome::Exhausted(policy.attempts());
                        }
                    }
                }
            };

            tokio::select! {
                biased;
                _ = shutdown.recv() => return RunOutcome::Closed,
                _ = wait_closed(&mut closed) => return RunOutcome::Closed,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn read_session(
        &self,
        mut stream: Box<dyn FrameStream>,
        shutdown: &mut ShutdownSignal,
        closed: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        let end = loop {
            let frame = tokio::select! {
                biased;
                _ = shutdown.recv() => break SessionEnd::Stopped,
                _ = wait_closed(closed) => break SessionEnd::Stopped,
                frame = stream.next_frame() => frame,
            };
            match frame {
                Some(Ok(raw)) => self.handle_frame(&raw).await,
                Some(Err(e)) => break SessionEnd::Lost(e.to_string()),
                None => break SessionEnd::Lost("upstream closed the stream".into()),
            }
        };
        stream.close().await;
        end
    }

    /// Parse and enqueue one frame. Never waits longer than the enqueue timeout.
    pub async fn handle_frame(&self, raw: &[u8]) {
        self.metrics.increment(metrics::MESSAGES_RECEIVED, &[]);

        let message = match parse_frame(raw, Utc::now(), self.config.staleness()) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(error = %e, "Dropping invalid frame");
                self.metrics
                    .increment(metrics::PROTOCOL_ERRORS, &[("reason", e.kind())]);
                return;
            }
        };

        let producer = self.router.route(&message.kind);
        match producer
            .enqueue(message, self.config.enqueue_timeout())
            .await
        {
            Ok(()) => {}
            Err(EnqueueError::Full(channel)) => {
                tracing::debug!(channel = %channel, "Queue full, message dropped");
                self.metrics
                    .increment(metrics::DROPPED_MESSAGES, &[("channel", channel.as_str())]);
            }
            Err(EnqueueError::Closed(channel)) => {
                tracing::warn!(channel = %channel, "Queue closed, message dropped");
                self.metrics
                    .increment(metrics::DROPPED_MESSAGES, &[("channel", channel.as_str())]);
            }
        }
        self.metrics.set_gauge(
            metrics::QUEUE_DEPTH,
            &[("channel", producer.channel())],
            producer.depth() as f64,
        );
    }
}

async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    let _ = closed.wait_for(|closed| *closed).await;
}

fn connect_reason(error: &ConnectError) -> &'static str {
    match error {
        ConnectError::InvalidUrl { .. } => "invalid_url",
        ConnectError::Timeout(_) => "timeout",
        ConnectError::Transport(_) => "transport",
        ConnectError::Exhausted(_) => "exhausted",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BatchingConfig;
    use crate::ingest::QueueConsumer;
    use crate::lifecycle::Shutdown;
    use crate::net::transport::TransportError;
    use async_trait::async_trait;
    use std::time::Duration;

    struct NeverConnects;

    #[async_trait]
    impl Connector for NeverConnects {
        async fn connect(&self, _url: &str) -> Result<Box<dyn FrameStream>, ConnectError> {
            Err(ConnectError::Transport("connection refused".into()))
        }
    }

    struct EmptyStream;

    #[async_trait]
    impl FrameStream for EmptyStream {
        async fn next_frame(&mut self) -> Option<Result<Vec<u8>, TransportError>> {
            std::future::pending().await
        }

        async fn close(&mut self) {}
    }

    struct Idle;

    #[async_trait]
    impl Connector for Idle {
        async fn connect(&self, _url: &str) -> Result<Box<dyn FrameStream>, ConnectError> {
            Ok(Box::new(EmptyStream))
        }
    }

    fn manager(
        connector: Arc<dyn Connector>,
        queue_size: usize,
    ) -> (Arc<ConnectionManager>, Vec<QueueConsumer>, Arc<MetricsRegistry>) {
        let batching = BatchingConfig {
            message_queue_size: queue_size,
            ..Default::default()
        };
        let (router, consumers) = ChannelRouter::build(&batching);
        let config = ConnectionConfig {
            max_reconnect_attempts: 2,
            reconnect_interval_ms: 10,
            ..Default::default()
        };
        let registry = Arc::new(MetricsRegistry::new());
        let manager = ConnectionManager::new(
            config,
            connector,
            router,
            Arc::new(HealthState::new()),
            registry.clone(),
        );
        (Arc::new(manager), consumers, registry)
    }

    fn frame(kind: &str) -> Vec<u8> {
        format!(r#"{{"type":"{kind}","timestamp":"{}"}}"#, Utc::now().to_rfc3339()).into_bytes()
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_drops_within_timeout() {
        let (manager, _consumers, registry) = manager(Arc::new(Idle), 2);
        let started = tokio::time::Instant::now();
        for _ in 0..5 {
            manager.handle_frame(&frame("trade")).await;
        }
        assert!(started.elapsed() <= Duration::from_millis(3 * 100 + 10));
        assert_eq!(registry.value(metrics::DROPPED_MESSAGES), Some(3.0));
        assert_eq!(registry.value(metrics::QUEUE_DEPTH), Some(2.0));
    }

    #[tokio::test]
    async fn test_invalid_frames_are_counted() {
        let (manager, mut consumers, registry) = manager(Arc::new(Idle), 8);
        manager.handle_frame(b"{oops").await;
        manager.handle_frame(&frame("trade")).await;
        assert_eq!(registry.value(metrics::PROTOCOL_ERRORS), Some(1.0));
        assert_eq!(registry.value(metrics::MESSAGES_RECEIVED), Some(2.0));
        assert_eq!(consumers[0].recv().await.unwrap().kind, "trade");
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_at_attempt_cap() {
        let (manager, _consumers, registry) = manager(Arc::new(NeverConnects), 8);
        let outcome = manager.clone().run(Shutdown::new().subscribe()).await;
        assert_eq!(outcome, RunOutcome::Exhausted(2));
        assert_eq!(manager.attempts(), 2);
        assert_eq!(registry.value(metrics::RECONNECT_ATTEMPTS), Some(2.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_is_idempotent_and_stops_session() {
        let (manager, _consumers, _) = manager(Arc::new(Idle), 8);
        let task = tokio::spawn(manager.clone().run(Shutdown::new().subscribe()));
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(manager.close());
        assert!(!manager.close());
        assert_eq!(task.await.unwrap(), RunOutcome::Closed);
    }
}
