//! Background worker and queue configuration.

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Job queue and worker pool configuration.
#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Whether the worker pool drains the queue in this process.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Number of jobs processed at the same time.
    #[serde(default = "default_concurrency")]
    #[validate(range(min = 1, max = 32))]
    pub concurrency: usize,
    /// Interval between queue polls when idle.
    #[serde(default = "default_poll_interval")]
    #[validate(range(min = 10))]
    pub poll_interval_ms: u64,
    /// An active job whose lock is not renewed within this interval is stalled.
    #[serde(default = "default_stall_interval")]
    #[validate(range(min = 1))]
    pub stall_interval_seconds: u64,
    /// How many times a job may stall before it is failed outright.
    #[serde(default = "default_max_stalled")]
    pub max_stalled_count: u32,
    /// Attempts for `normal` priority jobs.
    #[serde(default = "default_attempts")]
    #[validate(range(min = 1, max = 20))]
    pub default_attempts: u32,
    /// Attempts for `high` priority jobs.
    #[serde(default = "default_high_attempts")]
    #[validate(range(min = 1, max = 20))]
    pub high_priority_attempts: u32,
    /// Attempts for `low` priority jobs.
    #[serde(default = "default_low_attempts")]
    #[validate(range(min = 1, max = 20))]
    pub low_priority_attempts: u32,
    /// Initial delay for `normal` priority jobs.
    #[serde(default = "default_normal_delay")]
    pub normal_delay_ms: u64,
    /// Initial delay for `low` priority jobs.
    #[serde(default = "default_low_delay")]
    pub low_delay_ms: u64,
    /// Base of the exponential retry backoff.
    #[serde(default = "default_backoff")]
    pub backoff_ms: u64,
    /// How long finished jobs stay inspectable before automatic cleanup.
    #[serde(default = "default_retention_completed")]
    pub retention_completed_seconds: u64,
    /// How long failed jobs stay inspectable before automatic cleanup.
    #[serde(default = "default_retention_failed")]
    pub retention_failed_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            concurrency: default_concurrency(),
            poll_interval_ms: default_poll_interval(),
            stall_interval_seconds: default_stall_interval(),
            max_stalled_count: default_max_stalled(),
            default_attempts: default_attempts(),
            high_priority_attempts: default_high_attempts(),
            low_priority_attempts: default_low_attempts(),
            normal_delay_ms: default_normal_delay(),
            low_delay_ms: default_low_delay(),
            backoff_ms: default_backoff(),
            retention_completed_seconds: default_retention_completed(),
            retention_failed_seconds: default_retention_failed(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_concurrency() -> usize {
    2
}

fn default_poll_interval() -> u64 {
    500
}

fn default_stall_interval() -> u64 {
    30
}

fn default_max_stalled() -> u32 {
    1
}

fn default_attempts() -> u32 {
    3
}

fn default_high_attempts() -> u32 {
    5
}

fn default_low_attempts() -> u32 {
    2
}

fn default_normal_delay() -> u64 {
    1_000
}

fn default_low_delay() -> u64 {
    10_000
}

fn default_backoff() -> u64 {
    2_000
}

fn default_retention_completed() -> u64 {
    3_600
}

fn default_retention_failed() -> u64 {
    7 * 24 * 3_600
}
