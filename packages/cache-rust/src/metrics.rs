//! Cache metrics: cheap atomic counters plus a duration accumulator.
//!
//! The counters are the core surface; exporters read them through
//! [`CacheMetrics::snapshot`]. Each recording also feeds the `metrics` facade
//! under the `cache.*` names so a process-level exporter picks the same
//! numbers up without extra wiring. Recording is allocation-free; callers
//! compute the hit/miss verdict before calling in.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Streaming counter for requests.
pub const REQUESTS: &str = "cache.requests";
/// Streaming counter for hits, tagged `cache.type` ∈ {local, redis}.
pub const HITS: &str = "cache.hits";
/// Streaming counter for misses.
pub const MISSES: &str = "cache.misses";
/// Streaming histogram for operation durations, tagged `cache.result` or
/// `cache.operation`.
pub const OPERATION_DURATION: &str = "cache.operation.duration";

/// Point-in-time view of the counters.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    /// Read requests observed.
    pub total_requests: u64,
    /// Reads satisfied by either tier.
    pub hits: u64,
    /// Reads satisfied by neither tier.
    pub misses: u64,
    /// Reads satisfied by the near tier.
    pub near_hits: u64,
    /// Reads satisfied by the far tier.
    pub far_hits: u64,
    /// Mean operation duration in milliseconds.
    pub avg_duration_ms: f64,
}

impl MetricsSnapshot {
    /// `hits / total_requests`, or zero before any request.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.hits as f64 / self.total_requests as f64
        }
    }
}

/// Thread-safe metrics aggregator.
///
/// `Ordering::Relaxed` is sufficient: the counters need eventual consistency,
/// not cross-field ordering.
pub struct CacheMetrics {
    enabled: bool,
    total_requests: AtomicU64,
    near_hits: AtomicU64,
    far_hits: AtomicU64,
    misses: AtomicU64,
    duration_sum_us: AtomicU64,
    duration_samples: AtomicU64,
}

impl CacheMetrics {
    /// Creates an aggregator; a disabled one ignores every recording.
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            total_requests: AtomicU64::new(0),
            near_hits: AtomicU64::new(0),
            far_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            duration_sum_us: AtomicU64::new(0),
            duration_samples: AtomicU64::new(0),
        }
    }

    /// Records a read satisfied by the near tier.
    pub fn record_near_hit(&self) {
        if !self.enabled {
            return;
        }
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.near_hits.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(REQUESTS).increment(1);
        metrics::counter!(HITS, "cache.type" => "local").increment(1);
    }

    /// Records a read satisfied by the far tier.
    pub fn record_far_hit(&self) {
        if !self.enabled {
            return;
        }
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.far_hits.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(REQUESTS).increment(1);
        metrics::counter!(HITS, "cache.type" => "redis").increment(1);
    }

    /// Records a read satisfied by neither tier.
    pub fn record_miss(&self) {
        if !self.enabled {
            return;
        }
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(REQUESTS).increment(1);
        metrics::counter!(MISSES).increment(1);
    }

    /// Records a read duration with its hit/miss verdict.
    pub fn record_read_duration(&self, elapsed: Duration, hit: bool) {
        if !self.enabled {
            return;
        }
        self.accumulate(elapsed);
        let result = if hit { "hit" } else { "miss" };
        metrics::histogram!(OPERATION_DURATION, "cache.result" => result)
            .record(duration_ms(elapsed));
    }

    /// Records a write-path duration (`set`, `remove`, `refresh`).
    pub fn record_operation_duration(&self, operation: &'static str, elapsed: Duration) {
        if !self.enabled {
            return;
        }
        self.accumulate(elapsed);
        metrics::histogram!(OPERATION_DURATION, "cache.operation" => operation)
            .record(duration_ms(elapsed));
    }

    /// Returns a consistent view of the counters.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let near_hits = self.near_hits.load(Ordering::Relaxed);
        let far_hits = self.far_hits.load(Ordering::Relaxed);
        let samples = self.duration_samples.load(Ordering::Relaxed);
        let sum_us = self.duration_sum_us.load(Ordering::Relaxed);
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            hits: near_hits + far_hits,
            misses: self.misses.load(Ordering::Relaxed),
            near_hits,
            far_hits,
            avg_duration_ms: if samples == 0 {
                0.0
            } else {
                sum_us as f64 / samples as f64 / 1000.0
            },
        }
    }

    /// Zeroes every counter.
    pub fn reset(&self) {
        self.total_requests.store(0, Ordering::Relaxed);
        self.near_hits.store(0, Ordering::Relaxed);
        self.far_hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.duration_sum_us.store(0, Ordering::Relaxed);
        self.duration_samples.store(0, Ordering::Relaxed);
    }

    fn accumulate(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.duration_sum_us.fetch_add(micros, Ordering::Relaxed);
        self.duration_samples.fetch_add(1, Ordering::Relaxed);
    }
}

fn duration_ms(elapsed: Duration) -> f64 {
    elapsed.as_secs_f64() * 1000.0
}
