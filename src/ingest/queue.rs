//! Bounded single-producer / single-consumer ingestion queue.
//!
//! The producer half is deliberately not `Clone`: exactly one writer (the
//! connection manager) exists per channel.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc::{self, error::SendTimeoutError};

use crate::net::Message;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnqueueError {
    #[error("queue '{0}' full")]
    Full(String),

    #[error("queue '{0}' closed")]
    Closed(String),
}

pub fn bounded(channel: &str, capacity: usize) -> (QueueProducer, QueueConsumer) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        QueueProducer {
            channel: channel.to_string(),
            tx,
        },
        QueueConsumer {
            channel: channel.to_string(),
            rx,
        },
    )
}

#[derive(Debug)]
pub struct QueueProducer {
    channel: String,
    tx: mpsc::Sender<Message>,
}

impl QueueProducer {
    /// Enqueue, waiting at most `timeout` for space.
    pub async fn enqueue(&self, message: Message, timeout: Duration) -> Result<(), EnqueueError> {
        self.tx
            .send_timeout(message, timeout)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => EnqueueError::Full(self.channel.clone()),
                SendTimeoutError::Closed(_) => EnqueueError::Closed(self.channel.clone()),
            })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

#[derive(Debug)]
pub struct QueueConsumer {
    channel: String,
    rx: mpsc::Receiver<Message>,
}

impl QueueConsumer {
    /// Next message; `None` once the producer is gone and the queue drained.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::Map;

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_times_out() {
        let (producer, mut consumer) = bounded("trades", 2);
        let message = Message::new("trade", Utc::now(), Map::new());
        let timeout = Duration::from_millis(100);

        producer.enqueue(message.clone(), timeout).await.unwrap();
        producer.enqueue(message.clone(), timeout).await.unwrap();
        assert_eq!(producer.depth(), 2);

        let started = tokio::time::Instant::now();
        let err = producer.enqueue(message.clone(), timeout).await.unwrap_err();
        assert_eq!(err, EnqueueError::Full("trades".into()));
        assert!(started.elapsed() <= Duration::from_millis(110));

        assert!(consumer.recv().await.is_some());
        producer.enqueue(message, timeout).await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_consumer() {
        let (producer, consumer) = bounded("trades", 2);
        drop(consumer);
        let err = producer
            .enqueue(Message::new("trade", Utc::now(), Map::new()), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert_eq!(err, EnqueueError::Closed("trades".into()));
    }
}
