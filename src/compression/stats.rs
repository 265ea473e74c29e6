//! Per-message-type compression history.

use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;

use crate::compression::algorithm::CompressionAlgorithm;

/// Samples kept per message type; oldest evicted first.
pub const HISTORY_CAPACITY: usize = 1000;

/// Samples considered when deciding whether compression still pays off.
pub const RATIO_LOOKBACK: usize = 100;

const RATIO_WEIGHT: f64 = 0.7;
const SPEED_WEIGHT: f64 = 0.3;

/// Size buckets for the observability histogram.
pub const SIZE_BUCKETS: [&str; 5] = ["<1KiB", "1-10KiB", "10-100KiB", "100KiB-1MiB", ">=1MiB"];

/// One compression outcome.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressionSample {
    pub algorithm: CompressionAlgorithm,
    /// original / compressed; above 1.0 means the payload shrank.
    pub ratio: f64,
    pub time: Duration,
    pub size: usize,
}

/// Rolling history for one message type.
#[derive(Debug, Clone, Default)]
pub struct CompressionStats {
    history: VecDeque<CompressionSample>,
    size_buckets: [u64; 5],
}

impl CompressionStats {
    pub fn record(&mut self, sample: CompressionSample) {
        if self.history.len() == HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(sample);
        self.size_buckets[size_bucket(sample.size)] += 1;
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Mean ratio over the most recent `RATIO_LOOKBACK` samples.
    pub fn recent_average_ratio(&self) -> Option<f64> {
        let recent: Vec<f64> = self
            .history
            .iter()
            .rev()
            .take(RATIO_LOOKBACK)
            .map(|s| s.ratio)
            .collect();
        mean(&recent)
    }

    /// `0.7 * mean(ratio) + 0.3 * (1 - mean(time) / max_time)` for one algorithm,
    /// or `None` when the algorithm has no samples.
    pub fn score(&self, algorithm: CompressionAlgorithm, max_time: Duration) -> Option<f64> {
        let samples: Vec<&CompressionSample> =
            self.history.iter().filter(|s| s.algorithm == algorithm).collect();
        if samples.is_empty() {
            return None;
        }
        let n = samples.len() as f64;
        let mean_ratio = samples.iter().map(|s| s.ratio).sum::<f64>() / n;
        let mean_time = samples.iter().map(|s| s.time.as_secs_f64()).sum::<f64>() / n;
        let budget = max_time.as_secs_f64().max(f64::EPSILON);
        Some(RATIO_WEIGHT * mean_ratio + SPEED_WEIGHT * (1.0 - mean_time / budget))
    }

    pub fn has_samples(&self, algorithm: CompressionAlgorithm) -> bool {
        self.history.iter().any(|s| s.algorithm == algorithm)
    }

    /// Highest scoring algorithm with history; ties go to the faster algorithm.
    pub fn best_algorithm(&self, max_time: Duration) -> Option<CompressionAlgorithm> {
        let mut best: Option<(CompressionAlgorithm, f64)> = None;
        for algorithm in CompressionAlgorithm::CANDIDATES {
            if let Some(score) = self.score(algorithm, max_time) {
                if best.map_or(true, |(_, s)| score > s) {
                    best = Some((algorithm, score));
                }
            }
        }
        best.map(|(algorithm, _)| algorithm)
    }

    pub fn summary(&self, message_type: &str) -> StatsSummary {
        let n = self.history.len();
        let total_time: Duration = self.history.iter().map(|s| s.time).sum();
        StatsSummary {
            message_type: message_type.to_string(),
            samples: n,
            average_ratio: mean(&self.history.iter().map(|s| s.ratio).collect::<Vec<_>>()),
            average_time_us: if n == 0 {
                None
            } else {
                Some(total_time.as_micros() as f64 / n as f64)
            },
            size_buckets: SIZE_BUCKETS
                .iter()
                .zip(self.size_buckets)
                .map(|(label, count)| (label.to_string(), count))
                .collect(),
        }
    }

    /// Release excess capacity after a burst.
    pub fn shrink(&mut self) {
        self.history.shrink_to_fit();
    }
}

/// Serializable view for the admin endpoint.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatsSummary {
    pub message_type: String,
    pub samples: usize,
    pub average_ratio: Option<f64>,
    pub average_time_us: Option<f64>,
    pub size_buckets: Vec<(String, u64)>,
}

pub fn size_bucket(size: usize) -> usize {
    match size {
        s if s < 1024 => 0,
        s if s < 10 * 1024 => 1,
        s if s < 100 * 1024 => 2,
        s if s < 1024 * 1024 => 3,
        _ => 4,
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(algorithm: CompressionAlgorithm, ratio: f64, ms: u64) -> CompressionSample {
        CompressionSample {
            algorithm,
            ratio,
            time: Duration::from_millis(ms),
            size: 2048,
        }
    }

    #[test]
    fn test_history_is_capped() {
        let mut stats = CompressionStats::default();
        for _ in 0..HISTORY_CAPACITY + 10 {
            stats.record(sample(CompressionAlgorithm::Lz4, 2.0, 1));
        }
        assert_eq!(stats.len(), HISTORY_CAPACITY);
    }

    #[test]
    fn test_recent_ratio_only_looks_back_100() {
        let mut stats = CompressionStats::default();
        for _ in 0..200 {
            stats.record(sample(CompressionAlgorithm::Lz4, 5.0, 1));
        }
        for _ in 0..RATIO_LOOKBACK {
            stats.record(sample(CompressionAlgorithm::Lz4, 1.0, 1));
        }
        assert_eq!(stats.recent_average_ratio(), Some(1.0));
    }

    #[test]
    fn test_scoring_prefers_ratio_within_budget() {
        let mut stats = CompressionStats::default();
        stats.record(sample(CompressionAlgorithm::Lz4, 2.0, 1));
        stats.record(sample(CompressionAlgorithm::Zstd, 4.0, 20));
        let max = Duration::from_millis(100);
        // lz4: 1.4 + 0.3 * 0.99; zstd: 2.8 + 0.3 * 0.8
        assert_eq!(stats.best_algorithm(max), Some(CompressionAlgorithm::Zstd));
        assert!(stats.score(CompressionAlgorithm::Gzip, max).is_none());
    }

    #[test]
    fn test_slow_algorithm_loses_when_ratios_tie() {
        let mut stats = CompressionStats::default();
        stats.record(sample(CompressionAlgorithm::Gzip, 3.0, 90));
        stats.record(sample(CompressionAlgorithm::Lz4, 3.0, 2));
        assert_eq!(
            stats.best_algorithm(Duration::from_millis(100)),
            Some(CompressionAlgorithm::Lz4)
        );
    }

    #[test]
    fn test_size_buckets() {
        assert_eq!(size_bucket(10), 0);
        assert_eq!(size_bucket(2000), 1);
        assert_eq!(size_bucket(50 * 1024), 2);
        assert_eq!(size_bucket(2 * 1024 * 1024), 4);
    }
}
