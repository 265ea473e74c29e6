//! Ingestion and batching subsystem.
//!
//! # Data Flow
//! ```text
//! Connection manager (single producer)
//!     → router.rs (message type → channel)
//!     → queue.rs (bounded FIFO per channel, enqueue timeout)
//!     → batcher.rs collect_batch (count or timeout)
//!     → batcher.rs process (compress, token bucket, metrics)
//!     → dispatch.rs (every observer, failures isolated)
//!     → market.rs / broadcast / custom observers
//! ```
//!
//! # Design Decisions
//! - Backpressure drops messages at the queue instead of blocking the reader
//! - Ordering is preserved within a channel, never across channels
//! - Batches are shared immutably (`Arc<Batch>`) between observers

pub mod batch;
pub mod batcher;
pub mod dispatch;
pub mod market;
pub mod queue;
pub mod rate_limit;
pub mod router;

pub use batch::{Batch, BatchEntry};
pub use batcher::{collect_batch, BatchError, BatchProcessor, Collected};
pub use dispatch::{BatchObserver, BroadcastObserver, DispatchError, Dispatcher, ObserverError};
pub use market::MarketMetricsObserver;
pub use queue::{EnqueueError, QueueConsumer, QueueProducer};
pub use rate_limit::RateLimiter;
pub use router::{ChannelRouter, DEFAULT_CHANNEL};
