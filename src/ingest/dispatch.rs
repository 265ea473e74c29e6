//! Batch delivery to downstream observers.
//!
//! # Responsibilities
//! - Deliver every batch to every registered observer
//! - Isolate observer failures (logged, counted per observer)
//! - Provide a broadcast observer for in-process subscribers

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::ingest::batch::Batch;
use crate::observability::metrics::{self, MetricsRegistry};

#[derive(Debug, Error)]
pub enum ObserverError {
    #[error("observer rejected batch: {0}")]
    Rejected(String),

    #[error("observer unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("channel '{channel}' rate limited, {requested} messages refused")]
    RateLimited { channel: String, requested: usize },
}

/// A downstream consumer of completed batches.
#[async_trait]
pub trait BatchObserver: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, batch: Arc<Batch>) -> Result<(), ObserverError>;
}

pub struct Dispatcher {
    observers: Vec<Arc<dyn BatchObserver>>,
    metrics: Arc<MetricsRegistry>,
}

impl Dispatcher {
    pub fn new(observers: Vec<Arc<dyn BatchObserver>>, metrics: Arc<MetricsRegistry>) -> Self {
        Self { observers, metrics }
    }

    /// Deliver to all observers concurrently. Returns how many succeeded.
    pub async fn dispatch(&self, batch: Arc<Batch>) -> usize {
        let deliveries = self.observers.iter().map(|observer| {
            let batch = Arc::clone(&batch);
            async move {
                match observer.deliver(batch).await {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!(observer = observer.name(), error = %e, "Observer failed");
                        self.metrics
                            .increment(metrics::OBSERVER_ERRORS, &[("observer", observer.name())]);
                        false
                    }
                }
            }
        });
        join_all(deliveries).await.into_iter().filter(|ok| *ok).count()
    }
}

/// Re-publishes batches on a tokio broadcast channel.
pub struct BroadcastObserver {
    tx: broadcast::Sender<Arc<Batch>>,
}

impl BroadcastObserver {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Batch>> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl BatchObserver for BroadcastObserver {
    fn name(&self) -> &str {
        "broadcast"
    }

    async fn deliver(&self, batch: Arc<Batch>) -> Result<(), ObserverError> {
        // No subscribers is not a failure.
        let _ = self.tx.send(batch);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tokio::time::Instant;

    struct Broken;

    #[async_trait]
    impl BatchObserver for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn deliver(&self, _batch: Arc<Batch>) -> Result<(), ObserverError> {
            Err(ObserverError::Unavailable("downstream offline".into()))
        }
    }

    fn batch() -> Arc<Batch> {
        Arc::new(Batch {
            channel: "default".into(),
            sequence: 1,
            entries: Vec::new(),
            started_at: Instant::now(),
            created_at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn test_failing_observer_does_not_block_others() {
        let registry = Arc::new(MetricsRegistry::new());
        let broadcast = Arc::new(BroadcastObserver::new(4));
        let mut rx = broadcast.subscribe();
        let dispatcher = Dispatcher::new(vec![Arc::new(Broken), broadcast], registry.clone());

        assert_eq!(dispatcher.dispatch(batch()).await, 1);
        assert_eq!(rx.recv().await.unwrap().sequence, 1);
        assert_eq!(registry.value(metrics::OBSERVER_ERRORS), Some(1.0));
    }
}
