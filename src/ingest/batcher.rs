//! Count-or-timeout batch collection and processing, one loop per channel.
//!
//! # Responsibilities
//! - Pop messages into batches of at most `batch_size`
//! - Close a batch `batch_timeout` after its first message
//! - Replace compressible messages by their compressed form
//! - Gate dispatch through the channel's token bucket
//! - Record size, latency and efficiency per batch
//!
//! # Design Decisions
//! - An idle timeout never produces an empty batch
//! - A failed batch is logged, counted and followed by a fixed pause
//! - Compression runs on the blocking pool, off the async workers

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::time::Instant;

use crate::compression::CompressionEngine;
use crate::config::BatchingConfig;
use crate::ingest::batch::{Batch, BatchEntry};
use crate::ingest::dispatch::{DispatchError, Dispatcher};
use crate::ingest::queue::QueueConsumer;
use crate::ingest::rate_limit::RateLimiter;
use crate::lifecycle::ShutdownSignal;
use crate::net::Message;
use crate::observability::metrics::{self, MetricsRegistry};

const EFFICIENCY_WINDOW: usize = 100;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("compression worker failed: {0}")]
    CompressionWorker(String),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Outcome of one collection attempt.
#[derive(Debug)]
pub enum Collected {
    Batch { messages: Vec<Message>, started_at: Instant },
    /// No message arrived within the timeout.
    Idle,
    /// The producer is gone and the queue is drained.
    Closed,
}

/// Wait up to `batch_timeout` for a first message, then keep popping until
/// `batch_size` messages are held or `batch_timeout` has elapsed since the
/// first pop.
pub async fn collect_batch(
    consumer: &mut QueueConsumer,
    batch_size: usize,
    batch_timeout: Duration,
) -> Collected {
    let first = match tokio::time::timeout(batch_timeout, consumer.recv()).await {
        Ok(Some(message)) => message,
        Ok(None) => return Collected::Closed,
        Err(_) => return Collected::Idle,
    };

    let started_at = Instant::now();
    let deadline = started_at + batch_timeout;
    let mut messages = Vec::with_capacity(batch_size);
    messages.push(first);

    while messages.len() < batch_size {
        match tokio::time::timeout_at(deadline, consumer.recv()).await {
            Ok(Some(message)) => messages.push(message),
            Ok(None) | Err(_) => break,
        }
    }

    Collected::Batch {
        messages,
        started_at,
    }
}

/// Rolling averages behind the efficiency gauge.
#[derive(Debug, Default)]
struct Efficiency {
    sizes: VecDeque<f64>,
    seconds: VecDeque<f64>,
}

impl Efficiency {
    /// Record one batch and return average size ÷ average processing time.
    fn record(&mut self, size: usize, elapsed: Duration) -> Option<f64> {
        if self.sizes.len() == EFFICIENCY_WINDOW {
            self.sizes.pop_front();
            self.seconds.pop_front();
        }
        self.sizes.push_back(size as f64);
        self.seconds.push_back(elapsed.as_secs_f64());

        let n = self.sizes.len() as f64;
        let avg_size = self.sizes.iter().sum::<f64>() / n;
        let avg_secs = self.seconds.iter().sum::<f64>() / n;
        (avg_secs > 0.0).then(|| avg_size / avg_secs)
    }
}

pub struct BatchProcessor {
    channel: String,
    consumer: tokio::sync::Mutex<QueueConsumer>,
    batch_size: usize,
    batch_timeout: Duration,
    error_pause: Duration,
    compression: Arc<CompressionEngine>,
    dispatcher: Arc<Dispatcher>,
    limiter: Option<RateLimiter>,
    metrics: Arc<MetricsRegistry>,
    efficiency: Mutex<Efficiency>,
    sequence: AtomicU64,
}

impl BatchProcessor {
    pub fn new(
        consumer: QueueConsumer,
        config: &BatchingConfig,
        compression: Arc<CompressionEngine>,
        dispatcher: Arc<Dispatcher>,
        limiter: Option<RateLimiter>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            channel: consumer.channel().to_string(),
            consumer: tokio::sync::Mutex::new(consumer),
            batch_size: config.message_batch_size.max(1),
            batch_timeout: config.batch_timeout(),
            error_pause: config.error_pause(),
            compression,
            dispatcher,
            limiter,
            metrics,
            efficiency: Mutex::new(Efficiency::default()),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Batch loop. Exits on shutdown or when the queue closes.
    pub async fn run(self: Arc<Self>, mut shutdown: ShutdownSignal) {
        let mut consumer = self.consumer.lock().await;
        tracing::info!(channel = %self.channel, batch_size = self.batch_size, "Batch processor started");

        loop {
            let collected = tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                collected = collect_batch(&mut consumer, self.batch_size, self.batch_timeout) => collected,
            };

            let (messages, started_at) = match collected {
                Collected::Batch { messages, started_at } => (messages, started_at),
                Collected::Idle => continue,
                Collected::Closed => {
                    tracing::info!(channel = %self.channel, "Queue closed");
                    break;
                }
            };

            match self.process(messages, started_at).await {
                Ok(_) => {}
                Err(BatchError::Dispatch(e)) => {
                    tracing::warn!(channel = %self.channel, error = %e, "Batch refused");
                }
                Err(e) => {
                    tracing::error!(channel = %self.channel, error = %e, "Batch failed, pausing");
                    self.metrics
                        .increment(metrics::BATCH_ERRORS, &[("channel", self.channel.as_str())]);
                    tokio::select! {
                        _ = tokio::time::sleep(self.error_pause) => {}
                        _ = shutdown.recv() => break,
                    }
                }
            }
        }

        tracing::info!(channel = %self.channel, "Batch processor stopped");
    }

    /// Compress, rate-limit and dispatch one collected batch.
    pub async fn process(
        &self,
        messages: Vec<Message>,
        started_at: Instant,
    ) -> Result<Arc<Batch>, BatchError> {
        let count = messages.len();
        let entries = self.build_entries(messages).await?;

        if let Some(limiter) = &self.limiter {
            if !limiter.try_acquire(count) {
                self.metrics
                    .counter(metrics::DISPATCH_REJECTED, &[("channel", self.channel.as_str())])
                    .increment(count as u64);
                return Err(DispatchError::RateLimited {
                    channel: self.channel.clone(),
                    requested: count,
                }
                .into());
            }
        }

        let batch = Arc::new(Batch {
            channel: self.channel.clone(),
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed) + 1,
            entries,
            started_at,
            created_at: Utc::now(),
        });
        let delivered = self.dispatcher.dispatch(Arc::clone(&batch)).await;

        let elapsed = started_at.elapsed();
        let labels = [("channel", self.channel.as_str())];
        self.metrics.increment(metrics::BATCHES_DISPATCHED, &labels);
        self.metrics
            .counter(metrics::MESSAGES_PROCESSED, &labels)
            .increment(count as u64);
        self.metrics.record(metrics::BATCH_SIZE, &labels, count as f64);
        self.metrics
            .record(metrics::BATCH_LATENCY, &labels, elapsed.as_secs_f64());
        if let Some(efficiency) = self.efficiency.lock().record(count, elapsed) {
            self.metrics
                .set_gauge(metrics::BATCH_EFFICIENCY, &labels, efficiency);
        }

        tracing::debug!(
            channel = %self.channel,
            sequence = batch.sequence,
            size = count,
            compressed = batch.compressed_count(),
            delivered,
            latency_ms = elapsed.as_millis() as u64,
            "Batch dispatched"
        );
        Ok(batch)
    }

    async fn build_entries(&self, messages: Vec<Message>) -> Result<Vec<BatchEntry>, BatchError> {
        let engine = Arc::clone(&self.compression);
        let needs_compression = messages
            .iter()
            .any(|m| engine.should_compress(m.size(), &m.kind));
        if !needs_compression {
            return Ok(messages.into_iter().map(BatchEntry::Plain).collect());
        }

        tokio::task::spawn_blocking(move || {
            messages
                .into_iter()
                .map(|message| compress_entry(&engine, message))
                .collect()
        })
        .await
        .map_err(|e| BatchError::CompressionWorker(e.to_string()))
    }
}

fn compress_entry(engine: &CompressionEngine, message: Message) -> BatchEntry {
    if !engine.should_compress(message.size(), &message.kind) {
        return BatchEntry::Plain(message);
    }
    let payload = engine.compress(&message.kind, &message.raw);
    BatchEntry::Compressed {
        kind: message.kind,
        timestamp: message.timestamp,
        fields: message.fields,
        payload,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::queue;
    use serde_json::Map;

    fn message(kind: &str) -> Message {
        Message::new(kind, Utc::now(), Map::new())
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_by_count_then_timeout() {
        let (producer, mut consumer) = queue::bounded("default", 1000);
        for _ in 0..250 {
            producer
                .enqueue(message("trade"), Duration::from_millis(100))
                .await
                .unwrap();
        }

        let timeout = Duration::from_millis(100);
        let mut sizes = Vec::new();
        for _ in 0..3 {
            match collect_batch(&mut consumer, 100, timeout).await {
                Collected::Batch { messages, started_at } => {
                    assert!(started_at.elapsed() <= timeout);
                    sizes.push(messages.len());
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(sizes, vec![100, 100, 50]);
        assert!(matches!(collect_batch(&mut consumer, 100, timeout).await, Collected::Idle));

        drop(producer);
        assert!(matches!(collect_batch(&mut consumer, 100, timeout).await, Collected::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_preserves_arrival_order() {
        let (producer, mut consumer) = queue::bounded("default", 16);
        for kind in ["a", "b", "c"] {
            producer.enqueue(message(kind), Duration::from_millis(10)).await.unwrap();
        }
        let Collected::Batch { messages, .. } =
            collect_batch(&mut consumer, 10, Duration::from_millis(50)).await
        else {
            panic!("expected a batch");
        };
        let kinds: Vec<_> = messages.iter().map(|m| m.kind.as_str()).collect();
        assert_eq!(kinds, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_efficiency_uses_rolling_averages() {
        let mut efficiency = Efficiency::default();
        assert_eq!(efficiency.record(100, Duration::from_millis(100)), Some(1000.0));
        assert_eq!(efficiency.record(50, Duration::from_millis(100)), Some(750.0));
        assert_eq!(efficiency.record(10, Duration::ZERO).map(|e| e.round()), Some(800.0));
    }
}
