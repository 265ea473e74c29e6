//! Adaptive compression subsystem.
//!
//! # Data Flow
//! ```text
//! Batch entry (type, bytes)
//!     → engine.rs should_compress (size, type, recent ratio)
//!     → cache.rs lookup (type, content hash) ── hit ──→ cached frame
//!     → engine.rs select_algorithm (history score or size rule)
//!     → algorithm.rs compress (single block or parallel chunks)
//!     → stats.rs record sample, cache.rs insert
//!     → self-describing frame (algorithm tag + chunks)
//! ```
//!
//! # Design Decisions
//! - Compression is an optimization, never a correctness dependency
//! - History and cache live only for the process lifetime
//! - Hash-keyed cache: colliding keys return the first payload (accepted)

pub mod algorithm;
pub mod cache;
pub mod engine;
pub mod stats;

pub use algorithm::{CompressionAlgorithm, CompressionError, DecompressError};
pub use cache::{content_hash, CacheKey, LruCache};
pub use engine::{CompressedPayload, CompressionEngine};
pub use stats::{CompressionSample, CompressionStats, StatsSummary};
