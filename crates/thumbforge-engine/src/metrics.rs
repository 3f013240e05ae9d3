//! Thumbnail generation metrics.
//!
//! Counters are atomics; duration samples sit behind a mutex and feed the
//! P50/P95/P99 figures of a [`MetricsSnapshot`].

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::capability::Tool;

/// Maximum number of duration samples to keep in memory.
const MAX_DURATION_SAMPLES: usize = 1000;

/// Engine metrics collector.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    /// Generations that reached the pipeline.
    pub generations_started: AtomicU64,
    /// Generations that produced a thumbnail.
    pub generations_succeeded: AtomicU64,
    /// Generations that failed.
    pub generations_failed: AtomicU64,
    /// Requests answered from an existing cache entry.
    pub cache_hits: AtomicU64,
    /// Requests that joined a generation already in flight.
    pub deduplicated_waits: AtomicU64,
    /// External tool invocations.
    pub tool_invocations: AtomicU64,
    /// External tool invocations that failed (timeouts included).
    pub tool_failures: AtomicU64,
    /// External tool invocations killed by their timeout.
    pub tool_timeouts: AtomicU64,
    /// Times a pipeline moved on to a fallback tier.
    pub fallbacks_used: AtomicU64,
    /// Bytes of thumbnails written.
    pub bytes_written: AtomicU64,
    duration_samples: Mutex<VecDeque<Duration>>,
}

impl EngineMetrics {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a pipeline start.
    pub fn record_started(&self) {
        self.generations_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful generation.
    pub fn record_success(&self, duration: Duration, bytes: u64) {
        self.generations_succeeded.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
        self.add_duration_sample(duration);
    }

    /// Record a failed generation.
    pub fn record_failure(&self) {
        self.generations_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a cache hit.
    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a caller that waited on an in-flight generation.
    pub fn record_deduplicated(&self) {
        self.deduplicated_waits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a tool invocation outcome.
    pub fn record_tool(&self, tool: Tool, ok: bool, timed_out: bool) {
        self.tool_invocations.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.tool_failures.fetch_add(1, Ordering::Relaxed);
        }
        if timed_out {
            self.tool_timeouts.fetch_add(1, Ordering::Relaxed);
        }
        tracing::trace!(%tool, ok, timed_out, "Recorded tool invocation");
    }

    /// Record a move to a fallback tier.
    pub fn record_fallback(&self) {
        self.fallbacks_used.fetch_add(1, Ordering::Relaxed);
    }

    fn add_duration_sample(&self, duration: Duration) {
        if let Ok(mut samples) = self.duration_samples.lock() {
            if samples.len() >= MAX_DURATION_SAMPLES {
                samples.pop_front();
            }
            samples.push_back(duration);
        }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut durations: Vec<Duration> = self
            .duration_samples
            .lock()
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        durations.sort();

        let percentile = |p: usize| -> Option<u64> {
            if durations.is_empty() {
                return None;
            }
            let idx = ((durations.len() - 1) * p / 100).min(durations.len() - 1);
            durations.get(idx).map(|d| d.as_millis() as u64)
        };

        MetricsSnapshot {
            generations_started: self.generations_started.load(Ordering::Relaxed),
            generations_succeeded: self.generations_succeeded.load(Ordering::Relaxed),
            generations_failed: self.generations_failed.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            deduplicated_waits: self.deduplicated_waits.load(Ordering::Relaxed),
            tool_invocations: self.tool_invocations.load(Ordering::Relaxed),
            tool_failures: self.tool_failures.load(Ordering::Relaxed),
            tool_timeouts: self.tool_timeouts.load(Ordering::Relaxed),
            fallbacks_used: self.fallbacks_used.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            duration_p50_ms: percentile(50),
            duration_p95_ms: percentile(95),
            duration_p99_ms: percentile(99),
            sample_count: durations.len() as u64,
        }
    }
}

/// A point-in-time snapshot of engine metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MetricsSnapshot {
    /// Generations that reached the pipeline.
    pub generations_started: u64,
    /// Successful generations.
    pub generations_succeeded: u64,
    /// Failed generations.
    pub generations_failed: u64,
    /// Cache hits.
    pub cache_hits: u64,
    /// Callers that joined an in-flight generation.
    pub deduplicated_waits: u64,
    /// External tool invocations.
    pub tool_invocations: u64,
    /// Failed tool invocations.
    pub tool_failures: u64,
    /// Timed-out tool invocations.
    pub tool_timeouts: u64,
    /// Fallback tiers used.
    pub fallbacks_used: u64,
    /// Bytes of thumbnails written.
    pub bytes_written: u64,
    /// P50 generation duration.
    pub duration_p50_ms: Option<u64>,
    /// P95 generation duration.
    pub duration_p95_ms: Option<u64>,
    /// P99 generation duration.
    pub duration_p99_ms: Option<u64>,
    /// Number of duration samples collected.
    pub sample_count: u64,
}
