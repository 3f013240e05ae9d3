//! Thumbnail job data and status records.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::types::id::{FileId, JobId};
use crate::types::thumbnail::ThumbnailOptions;

/// Scheduling tier of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    /// Deferred work, fewer attempts.
    Low,
    /// Upload-time work.
    #[default]
    Normal,
    /// Explicit retries and interactive requests.
    High,
}

impl JobPriority {
    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        }
    }
}

impl fmt::Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobPriority {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            other => Err(AppError::validation(format!("Unknown job priority '{other}'"))),
        }
    }
}

/// Payload of a queued thumbnail generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThumbnailJob {
    /// File the thumbnail belongs to. One active job per file.
    pub file_id: FileId,
    /// Source path, absolute or relative to the files root.
    pub source_path: PathBuf,
    /// MIME type of the source.
    pub mime_type: String,
    /// Scheduling tier.
    #[serde(default)]
    pub priority: JobPriority,
    /// Number of manual retries that led to this job.
    #[serde(default)]
    pub retry_count: u32,
    /// Target geometry and encoding.
    pub options: ThumbnailOptions,
}

impl ThumbnailJob {
    /// Create a job at normal priority.
    pub fn new(
        file_id: FileId,
        source_path: impl Into<PathBuf>,
        mime_type: impl Into<String>,
        options: ThumbnailOptions,
    ) -> Self {
        Self {
            file_id,
            source_path: source_path.into(),
            mime_type: mime_type.into(),
            priority: JobPriority::Normal,
            retry_count: 0,
            options,
        }
    }

    /// Same job with another priority.
    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThumbnailJobStatus {
    /// Waiting or delayed in the queue.
    Pending,
    /// Claimed by a worker.
    Processing,
    /// Finished with a thumbnail.
    Completed,
    /// Terminal failure after exhausting attempts.
    Failed,
    /// Failed an attempt and is waiting for its backoff to elapse.
    Retrying,
}

impl ThumbnailJobStatus {
    /// Upper-case name as persisted.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Retrying => "RETRYING",
        }
    }

    /// Whether the job will not run again without a manual retry.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for ThumbnailJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThumbnailJobStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "PROCESSING" => Ok(Self::Processing),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "RETRYING" => Ok(Self::Retrying),
            other => Err(AppError::validation(format!("Unknown job status '{other}'"))),
        }
    }
}

/// Observable snapshot of a job, mirrored into job-status storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Queue-assigned id.
    pub job_id: JobId,
    /// Job payload.
    pub job: ThumbnailJob,
    /// Current state.
    pub status: ThumbnailJobStatus,
    /// Last reported progress, 0-100.
    pub progress: u8,
    /// Attempts started so far.
    pub attempts_made: u32,
    /// Attempts allowed before terminal failure.
    pub max_attempts: u32,
    /// Last error message.
    pub error: Option<String>,
    /// Public URL of the produced thumbnail.
    pub thumbnail_url: Option<String>,
    /// When the job was enqueued.
    pub created_at: DateTime<Utc>,
    /// When the latest attempt started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
    /// Last state change.
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// File the job belongs to.
    pub fn file_id(&self) -> FileId {
        self.job.file_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip_names() {
        for status in [
            ThumbnailJobStatus::Pending,
            ThumbnailJobStatus::Processing,
            ThumbnailJobStatus::Completed,
            ThumbnailJobStatus::Failed,
            ThumbnailJobStatus::Retrying,
        ] {
            assert_eq!(status.as_str().parse::<ThumbnailJobStatus>().ok(), Some(status));
        }
        assert!(ThumbnailJobStatus::Failed.is_terminal());
        assert!(!ThumbnailJobStatus::Retrying.is_terminal());
    }

    #[test]
    fn test_priority_ordering() {
        assert!(JobPriority::High > JobPriority::Normal);
        assert!(JobPriority::Normal > JobPriority::Low);
        assert_eq!("HIGH".parse::<JobPriority>().ok(), Some(JobPriority::High));
    }
}
