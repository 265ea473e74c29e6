//! Adaptive compression engine.
//!
//! # Responsibilities
//! - Decide per message whether compression is worth it (`should_compress`)
//! - Pick an algorithm from observed history or a static size rule
//! - Serve repeated payloads from the LRU result cache
//! - Split very large payloads into chunks compressed in parallel
//!
//! # Design Decisions
//! - Best effort: a failed compression yields an identity frame, never an error
//! - Cache hits neither recompress nor touch statistics
//! - Cache insert and stats update happen under the cache lock, so two racing
//!   misses for the same key record exactly one sample

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::compression::algorithm::{
    decode_frame, encode_frame, identity_frame, CompressionAlgorithm, CompressionError,
    DecompressError,
};
use crate::compression::cache::{content_hash, CacheKey, LruCache};
use crate::compression::stats::{CompressionSample, CompressionStats, StatsSummary};
use crate::config::CompressionConfig;
use crate::observability::metrics::{self, MetricsRegistry};

const SMALL_PAYLOAD_BYTES: usize = 4 * 1024;
const LARGE_PAYLOAD_BYTES: usize = 256 * 1024;

/// A self-describing compressed frame. Cheap to clone.
#[derive(Debug, Clone, PartialEq)]
pub struct CompressedPayload {
    pub algorithm: CompressionAlgorithm,
    pub original_len: usize,
    pub frame: Arc<[u8]>,
}

impl CompressedPayload {
    fn identity(data: &[u8]) -> Self {
        Self {
            algorithm: CompressionAlgorithm::Identity,
            original_len: data.len(),
            frame: identity_frame(data).into(),
        }
    }

    /// original / compressed size.
    pub fn ratio(&self) -> f64 {
        self.original_len as f64 / self.frame.len().max(1) as f64
    }

    pub fn decompress(&self) -> Result<Vec<u8>, DecompressError> {
        decode_frame(&self.frame)
    }
}

pub struct CompressionEngine {
    config: CompressionConfig,
    cache: Mutex<LruCache<CacheKey, CompressedPayload>>,
    stats: DashMap<String, CompressionStats>,
    metrics: Arc<MetricsRegistry>,
}

impl CompressionEngine {
    pub fn new(config: CompressionConfig, metrics: Arc<MetricsRegistry>) -> Self {
        let cache = Mutex::new(LruCache::new(config.cache_capacity));
        Self {
            config,
            cache,
            stats: DashMap::new(),
            metrics,
        }
    }

    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    /// Policy check by declared type and size.
    pub fn should_compress(&self, size: usize, message_type: &str) -> bool {
        if !self.config.enabled || size < self.config.min_size_bytes {
            return false;
        }
        if !self.config.compressible_types.contains(message_type) {
            return false;
        }
        match self
            .stats
            .get(message_type)
            .and_then(|s| s.recent_average_ratio())
        {
            Some(ratio) => ratio >= self.config.ratio_threshold,
            None => true,
        }
    }

    /// Pick an algorithm: small → lz4, medium → configured default,
    /// large → zstd. When adaptive, the best historical score wins once the
    /// static choice for this size has history of its own; until then the
    /// static choice is used so every candidate gets sampled.
    pub fn select_algorithm(&self, size: usize, message_type: &str) -> CompressionAlgorithm {
        let fallback = self.static_algorithm(size);
        if !self.config.adaptive {
            return fallback;
        }
        self.stats
            .get(message_type)
            .filter(|s| s.has_samples(fallback))
            .and_then(|s| s.best_algorithm(self.config.max_compression_time()))
            .unwrap_or(fallback)
    }

    fn static_algorithm(&self, size: usize) -> CompressionAlgorithm {
        if size < SMALL_PAYLOAD_BYTES {
            CompressionAlgorithm::Lz4
        } else if size < LARGE_PAYLOAD_BYTES {
            match self.config.default_algorithm {
                CompressionAlgorithm::Identity => CompressionAlgorithm::Gzip,
                other => other,
            }
        } else {
            CompressionAlgorithm::Zstd
        }
    }

    /// Compress, keyed by the payload's content hash.
    pub fn compress(&self, message_type: &str, data: &[u8]) -> CompressedPayload {
        self.compress_keyed(CacheKey::new(message_type, content_hash(data)), data)
    }

    /// Compress under an explicit cache key.
    pub fn compress_keyed(&self, key: CacheKey, data: &[u8]) -> CompressedPayload {
        if let Some(hit) = self.cache.lock().get(&key) {
            self.metrics
                .increment(metrics::COMPRESSION_CACHE_HITS, &[("message_type", key.message_type.as_str())]);
            return hit;
        }

        let algorithm = self.select_algorithm(data.len(), &key.message_type);
        let started = Instant::now();
        let result = self.compress_with(algorithm, data);
        let elapsed = started.elapsed();

        let payload = match result {
            Ok(frame) => CompressedPayload {
                algorithm,
                original_len: data.len(),
                frame: frame.into(),
            },
            Err(e) => {
                tracing::warn!(
                    message_type = %key.message_type,
                    algorithm = %algorithm,
                    size = data.len(),
                    error = %e,
                    "Compression failed, forwarding uncompressed"
                );
                self.metrics.increment(
                    metrics::COMPRESSION_ERRORS,
                    &[("message_type", key.message_type.as_str()), ("algorithm", algorithm.as_str())],
                );
                return CompressedPayload::identity(data);
            }
        };

        let mut cache = self.cache.lock();
        if let Some(existing) = cache.get(&key) {
            return existing;
        }
        cache.insert(key.clone(), payload.clone());

        let sample = CompressionSample {
            algorithm,
            ratio: payload.ratio(),
            time: elapsed,
            size: data.len(),
        };
        self.stats
            .entry(key.message_type.clone())
            .or_default()
            .record(sample);
        drop(cache);

        let labels = [("message_type", key.message_type.as_str()), ("algorithm", algorithm.as_str())];
        self.metrics.increment(metrics::COMPRESSION_OPS, &labels);
        self.metrics.record(metrics::COMPRESSION_RATIO, &labels, sample.ratio);
        self.metrics
            .record(metrics::COMPRESSION_DURATION, &labels, elapsed.as_secs_f64());
        self.metrics.record(
            metrics::COMPRESSION_INPUT_BYTES,
            &[("message_type", key.message_type.as_str())],
            data.len() as f64,
        );

        tracing::trace!(
            message_type = %key.message_type,
            algorithm = %algorithm,
            ratio = sample.ratio,
            "Payload compressed"
        );
        payload
    }

    /// Decode any frame produced by this engine.
    pub fn decompress(&self, frame: &[u8]) -> Result<Vec<u8>, DecompressError> {
        decode_frame(frame)
    }

    fn compress_with(
        &self,
        algorithm: CompressionAlgorithm,
        data: &[u8],
    ) -> Result<Vec<u8>, CompressionError> {
        let chunks = if data.len() >= self.config.parallel_threshold_bytes {
            self.compress_chunked(algorithm, data)?
        } else {
            vec![algorithm.compress_block(data, self.config.compression_level)?]
        };
        encode_frame(algorithm, data.len(), &chunks)
    }

    fn compress_chunked(
        &self,
        algorithm: CompressionAlgorithm,
        data: &[u8],
    ) -> Result<Vec<Vec<u8>>, CompressionError> {
        let level = self.config.compression_level;
        let chunks: Vec<&[u8]> = data.chunks(self.config.chunk_size_bytes.max(1)).collect();
        let workers = std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(4);

        let mut compressed = Vec::with_capacity(chunks.len());
        for wave in chunks.chunks(workers) {
            let results: Vec<Result<Vec<u8>, CompressionError>> = std::thread::scope(|scope| {
                let handles: Vec<_> = wave
                    .iter()
                    .map(|chunk| scope.spawn(move || algorithm.compress_block(chunk, level)))
                    .collect();
                handles
                    .into_iter()
                    .map(|h| h.join().unwrap_or(Err(CompressionError::WorkerPanicked)))
                    .collect()
            });
            for result in results {
                compressed.push(result?);
            }
        }
        Ok(compressed)
    }

    pub fn summaries(&self) -> Vec<StatsSummary> {
        let mut summaries: Vec<StatsSummary> = self
            .stats
            .iter()
            .map(|entry| entry.value().summary(entry.key()))
            .collect();
        summaries.sort_by(|a, b| a.message_type.cmp(&b.message_type));
        summaries
    }

    pub fn has_stats_for(&self, message_type: &str) -> bool {
        self.stats
            .get(message_type)
            .is_some_and(|s| !s.is_empty())
    }

    pub fn cache_len(&self) -> usize {
        self.cache.lock().len()
    }

    /// Compaction hint: release spare history capacity.
    pub fn compact(&self) {
        for mut entry in self.stats.iter_mut() {
            entry.value_mut().shrink();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(config: CompressionConfig) -> CompressionEngine {
        CompressionEngine::new(config, Arc::new(MetricsRegistry::new()))
    }

    fn payload(size: usize) -> Vec<u8> {
        let row = br#"{"type":"market_data","symbol":"ETH-USD","px":3150.25,"qty":4.5},"#;
        row.iter().copied().cycle().take(size).collect()
    }

    #[test]
    fn test_should_compress_policy() {
        let engine = engine(CompressionConfig::default());
        assert!(!engine.should_compress(500, "market_data"));
        assert!(engine.should_compress(2000, "market_data"));
        assert!(!engine.should_compress(2000, "heartbeat"));
    }

    #[test]
    fn test_ineffective_type_is_skipped() {
        let mut config = CompressionConfig::default();
        config.ratio_threshold = 1000.0;
        let engine = engine(config);
        engine.compress("market_data", &payload(4096));
        assert!(!engine.should_compress(4096, "market_data"));
    }

    #[test]
    fn test_static_rule_by_size() {
        let mut config = CompressionConfig::default();
        config.adaptive = false;
        let engine = engine(config);
        assert_eq!(engine.select_algorithm(1024, "trade"), CompressionAlgorithm::Lz4);
        assert_eq!(engine.select_algorithm(64 * 1024, "trade"), CompressionAlgorithm::Gzip);
        assert_eq!(engine.select_algorithm(1024 * 1024, "trade"), CompressionAlgorithm::Zstd);
    }

    #[test]
    fn test_adaptive_samples_unscored_static_choice() {
        let engine = engine(CompressionConfig::default());
        let small = engine.compress("trade", &payload(2048));
        assert_eq!(small.algorithm, CompressionAlgorithm::Lz4);

        // Only lz4 has history, yet larger payloads still reach their own tier.
        assert_eq!(engine.select_algorithm(64 * 1024, "trade"), CompressionAlgorithm::Gzip);
        assert_eq!(engine.select_algorithm(1024 * 1024, "trade"), CompressionAlgorithm::Zstd);
        assert_eq!(engine.select_algorithm(2048, "trade"), CompressionAlgorithm::Lz4);

        let large = engine.compress("trade", &payload(300 * 1024));
        assert_eq!(large.algorithm, CompressionAlgorithm::Zstd);
        let scored = engine.select_algorithm(300 * 1024, "trade");
        assert!(matches!(scored, CompressionAlgorithm::Lz4 | CompressionAlgorithm::Zstd));
    }

    #[test]
    fn test_cache_hit_skips_stats() {
        let engine = engine(CompressionConfig::default());
        let data = payload(8192);
        let first = engine.compress("market_data", &data);
        let second = engine.compress("market_data", &data);
        assert_eq!(first, second);
        assert_eq!(engine.summaries()[0].samples, 1);
        assert_eq!(engine.cache_len(), 1);
    }

    #[test]
    fn test_hash_collision_returns_first_payload() {
        let engine = engine(CompressionConfig::default());
        let key = CacheKey::new("market_data", 42);
        let first = engine.compress_keyed(key.clone(), &payload(2048));
        let second = engine.compress_keyed(key, &payload(4096));
        assert_eq!(second, first);
        assert_eq!(second.decompress().unwrap(), payload(2048));
    }

    #[test]
    fn test_parallel_chunks_round_trip() {
        let mut config = CompressionConfig::default();
        config.parallel_threshold_bytes = 64 * 1024;
        config.chunk_size_bytes = 16 * 1024;
        let engine = engine(config);
        let data = payload(200 * 1024);
        let compressed = engine.compress("snapshot", &data);
        assert_ne!(compressed.algorithm, CompressionAlgorithm::Identity);
        assert!(compressed.ratio() > 1.0);
        assert_eq!(engine.decompress(&compressed.frame).unwrap(), data);
    }

    #[test]
    fn test_cache_capacity_bounds_entries() {
        let mut config = CompressionConfig::default();
        config.cache_capacity = 2;
        let engine = engine(config);
        for size in [2000, 3000, 4000] {
            engine.compress("trade", &payload(size));
        }
        assert_eq!(engine.cache_len(), 2);
    }
}
