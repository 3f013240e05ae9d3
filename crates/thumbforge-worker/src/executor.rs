//! Job handler contract and the errors that drive retries.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use thumbforge_core::error::AppError;
use thumbforge_core::types::{JobId, ThumbnailJob, ThumbnailResult};

use crate::queue::JobQueue;

/// What a successful job produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutput {
    /// Cached thumbnail path.
    pub thumbnail_path: Option<PathBuf>,
    /// Public thumbnail URL.
    pub thumbnail_url: Option<String>,
}

/// Error from job execution
#[derive(Debug, thiserror::Error)]
pub enum JobExecutionError {
    /// Permanent failure, never retried
    #[error("Permanent job failure: {0}")]
    Permanent(String),

    /// Transient failure, retried while attempts remain
    #[error("Transient job failure: {0}")]
    Transient(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] AppError),
}

impl JobExecutionError {
    /// Classify a failed generation result.
    pub fn from_result(result: &ThumbnailResult) -> Self {
        let (retryable, message) = match &result.error {
            Some(error) => (error.kind.is_retryable(), error.message.clone()),
            None => (true, "Thumbnail generation failed".to_string()),
        };
        if retryable {
            Self::Transient(message)
        } else {
            Self::Permanent(message)
        }
    }

    /// Whether the queue may run the job again.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Permanent(_))
    }
}

/// Per-attempt services handed to a handler.
#[derive(Debug, Clone)]
pub struct JobContext {
    queue: JobQueue,
    /// Queue identifier of the job.
    pub job_id: JobId,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Total attempts allowed.
    pub max_attempts: u32,
}

impl JobContext {
    /// Create a context for one attempt.
    pub fn new(queue: JobQueue, job_id: JobId, attempt: u32, max_attempts: u32) -> Self {
        Self {
            queue,
            job_id,
            attempt,
            max_attempts,
        }
    }

    /// Report progress (0-100). Also keeps the job from being seen as stalled.
    pub async fn progress(&self, percent: u8) {
        self.queue.update_progress(self.job_id, percent).await;
    }

    /// Whether this is the last attempt.
    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// Trait for job handler implementations
#[async_trait]
pub trait JobHandler: Send + Sync + std::fmt::Debug {
    /// Run one attempt of a job.
    async fn execute(
        &self,
        job: &ThumbnailJob,
        ctx: &JobContext,
    ) -> Result<JobOutput, JobExecutionError>;

    /// Called once after the job failed for good.
    async fn on_failed(&self, _job: &ThumbnailJob, _error: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use thumbforge_core::types::{FileId, ThumbnailErrorKind};

    #[test]
    fn test_result_classification() {
        let file_id = FileId::new();

        let missing = ThumbnailResult::failed(file_id, ThumbnailErrorKind::SourceInvalid, "gone", 0);
        assert!(!JobExecutionError::from_result(&missing).is_retryable());

        let crashed = ThumbnailResult::failed(file_id, ThumbnailErrorKind::ToolFailed, "exit 1", 0);
        assert!(JobExecutionError::from_result(&crashed).is_retryable());
    }
}
