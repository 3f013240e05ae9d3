//! Observational mirror of job status.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::result::AppResult;
use crate::types::id::FileId;
use crate::types::job::{JobRecord, ThumbnailJobStatus};

/// Best-effort job status storage.
///
/// The queue stays authoritative for scheduling; a store failure is logged
/// and never changes the outcome of a job.
#[async_trait]
pub trait JobStatusStore: Send + Sync + std::fmt::Debug + 'static {
    /// Insert or replace the record for `record.job_id`.
    async fn save(&self, record: &JobRecord) -> AppResult<()>;

    /// Most recently updated record for a file.
    async fn find_by_file(&self, file_id: FileId) -> AppResult<Option<JobRecord>>;

    /// Records that have not reached a terminal state.
    async fn list_unfinished(&self) -> AppResult<Vec<JobRecord>>;

    /// Delete records in `status` last updated before `before`.
    async fn delete_older_than(
        &self,
        status: ThumbnailJobStatus,
        before: DateTime<Utc>,
    ) -> AppResult<u64>;
}
