//! Shared utilities for pipeline integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::SinkExt;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use telemetry_pipeline::alerts::{Alert, NotificationSink, NotifyError};
use telemetry_pipeline::config::TelemetryConfig;
use telemetry_pipeline::ingest::{Batch, BatchObserver, ObserverError};
use telemetry_pipeline::net::{ConnectError, Connector, FrameStream, TransportError};

/// One scripted connect outcome: a session yielding these frames, or a refusal.
pub type Step = Result<Vec<Vec<u8>>, String>;

/// Connector replaying a fixed script. Once the script runs out every
/// attempt is refused.
pub struct ScriptedConnector {
    script: Mutex<VecDeque<Step>>,
    connects: AtomicU32,
}

impl ScriptedConnector {
    pub fn new(script: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            connects: AtomicU32::new(0),
        })
    }

    pub fn refusing() -> Arc<Self> {
        Self::new(Vec::new())
    }

    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, _url: &str) -> Result<Box<dyn FrameStream>, ConnectError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let step = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err("connection refused".into()));
        match step {
            Ok(frames) => Ok(Box::new(ReplayStream {
                frames: frames.into(),
            })),
            Err(reason) => Err(ConnectError::Transport(reason)),
        }
    }
}

/// Yields its frames, then stays open without producing anything.
struct ReplayStream {
    frames: VecDeque<Vec<u8>>,
}

#[async_trait]
impl FrameStream for ReplayStream {
    async fn next_frame(&mut self) -> Option<Result<Vec<u8>, TransportError>> {
        match self.frames.pop_front() {
            Some(frame) => Some(Ok(frame)),
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) {}
}

/// Records every delivered batch, optionally pausing per batch.
#[derive(Default)]
pub struct CollectingObserver {
    batches: Mutex<Vec<Arc<Batch>>>,
    delay: Duration,
}

impl CollectingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            batches: Mutex::new(Vec::new()),
            delay,
        })
    }

    pub fn batches(&self) -> Vec<Arc<Batch>> {
        self.batches.lock().clone()
    }

    pub fn sizes(&self) -> Vec<usize> {
        self.batches.lock().iter().map(|b| b.len()).collect()
    }

    pub fn message_count(&self) -> usize {
        self.sizes().iter().sum()
    }

    /// Poll until at least `count` messages arrived or `limit` elapsed.
    pub async fn wait_for_messages(&self, count: usize, limit: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        while tokio::time::Instant::now() < deadline {
            if self.message_count() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.message_count() >= count
    }
}

#[async_trait]
impl BatchObserver for CollectingObserver {
    fn name(&self) -> &str {
        "collector"
    }

    async fn deliver(&self, batch: Arc<Batch>) -> Result<(), ObserverError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.batches.lock().push(batch);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingSink {
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    fn name(&self) -> &str {
        "recorder"
    }

    async fn notify(&self, alert: &Alert) -> Result<(), NotifyError> {
        self.alerts.lock().push(alert.clone());
        Ok(())
    }
}

/// Minimal config for tests: fast reconnects, no admin endpoint.
pub fn test_config() -> TelemetryConfig {
    let mut config = TelemetryConfig::default();
    config.connection.reconnect_interval_ms = 10;
    config.connection.max_reconnect_interval_ms = 50;
    config.monitoring.update_interval_ms = 50;
    config.monitoring.shutdown_grace_ms = 500;
    config.observability.metrics_enabled = false;
    config
}

pub fn frame(kind: &str) -> Vec<u8> {
    format!(r#"{{"type":"{kind}","timestamp":"{}"}}"#, Utc::now().to_rfc3339()).into_bytes()
}

/// A frame of exactly `size` bytes, padded with a repetitive field.
pub fn padded_frame(kind: &str, size: usize) -> Vec<u8> {
    let head = format!(
        r#"{{"type":"{kind}","timestamp":"{}","pad":""#,
        Utc::now().to_rfc3339()
    );
    let tail = "\"}";
    let pad = size.saturating_sub(head.len() + tail.len());
    format!("{head}{}{tail}", "x".repeat(pad)).into_bytes()
}

/// Start a websocket server on an ephemeral port that sends `frames` as
/// text to each client and then holds the connection open.
pub async fn start_ws_upstream(frames: Vec<Vec<u8>>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let frames = Arc::new(frames);

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let frames = Arc::clone(&frames);
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(socket).await else {
                    return;
                };
                for frame in frames.iter() {
                    let text = String::from_utf8_lossy(frame).into_owned();
                    if ws.send(WsMessage::Text(text.into())).await.is_err() {
                        return;
                    }
                }
                tokio::time::sleep(Duration::from_secs(60)).await;
            });
        }
    });

    addr
}
