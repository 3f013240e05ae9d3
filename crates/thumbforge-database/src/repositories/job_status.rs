//! Thumbnail job status repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use thumbforge_core::error::{AppError, ErrorKind};
use thumbforge_core::result::AppResult;
use thumbforge_core::traits::job_store::JobStatusStore;
use thumbforge_core::types::{FileId, JobId, JobRecord, ThumbnailJob, ThumbnailJobStatus};

const COLUMNS: &str = "job_id, file_id, status, priority, payload, progress, attempts_made, \
     max_attempts, error, thumbnail_url, created_at, started_at, finished_at, updated_at";

/// A row of `thumbnail_jobs`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ThumbnailJobRow {
    pub job_id: JobId,
    pub file_id: FileId,
    pub status: String,
    pub priority: String,
    pub payload: serde_json::Value,
    pub progress: i16,
    pub attempts_made: i32,
    pub max_attempts: i32,
    pub error: Option<String>,
    pub thumbnail_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<ThumbnailJobRow> for JobRecord {
    type Error = AppError;

    fn try_from(row: ThumbnailJobRow) -> Result<Self, Self::Error> {
        let job: ThumbnailJob = serde_json::from_value(row.payload).map_err(|e| {
            AppError::with_source(
                ErrorKind::Serialization,
                format!("Corrupt payload for job {}", row.job_id),
                e,
            )
        })?;

        Ok(JobRecord {
            job_id: row.job_id,
            job,
            status: row.status.parse()?,
            progress: row.progress.clamp(0, 100) as u8,
            attempts_made: row.attempts_made.max(0) as u32,
            max_attempts: row.max_attempts.max(0) as u32,
            error: row.error,
            thumbnail_url: row.thumbnail_url,
            created_at: row.created_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
            updated_at: row.updated_at,
        })
    }
}

/// Repository mirroring queue state into `thumbnail_jobs`.
#[derive(Debug, Clone)]
pub struct ThumbnailJobRepository {
    pool: PgPool,
}

impl ThumbnailJobRepository {
    /// Create a new job repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Find a job by ID.
    pub async fn find_by_id(&self, job_id: JobId) -> AppResult<Option<JobRecord>> {
        let row = sqlx::query_as::<_, ThumbnailJobRow>(&format!(
            "SELECT {COLUMNS} FROM thumbnail_jobs WHERE job_id = $1"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to find job", e))?;

        row.map(JobRecord::try_from).transpose()
    }

    /// Count jobs per status.
    pub async fn count_by_status(&self) -> AppResult<Vec<(ThumbnailJobStatus, i64)>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM thumbnail_jobs GROUP BY status ORDER BY status",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to count jobs", e))?;

        rows.into_iter()
            .map(|(status, count)| Ok((status.parse()?, count)))
            .collect()
    }
}

#[async_trait]
impl JobStatusStore for ThumbnailJobRepository {
    async fn save(&self, record: &JobRecord) -> AppResult<()> {
        let payload = serde_json::to_value(&record.job)?;

        sqlx::query(
            "INSERT INTO thumbnail_jobs (job_id, file_id, status, priority, payload, progress, \
             attempts_made, max_attempts, error, thumbnail_url, created_at, started_at, \
             finished_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
             ON CONFLICT (job_id) DO UPDATE SET \
                status = EXCLUDED.status, priority = EXCLUDED.priority, \
                payload = EXCLUDED.payload, progress = EXCLUDED.progress, \
                attempts_made = EXCLUDED.attempts_made, max_attempts = EXCLUDED.max_attempts, \
                error = EXCLUDED.error, thumbnail_url = EXCLUDED.thumbnail_url, \
                started_at = EXCLUDED.started_at, finished_at = EXCLUDED.finished_at, \
                updated_at = EXCLUDED.updated_at",
        )
        .bind(record.job_id)
        .bind(record.file_id())
        .bind(record.status.as_str())
        .bind(record.job.priority.as_str())
        .bind(payload)
        .bind(i16::from(record.progress))
        .bind(i32::try_from(record.attempts_made).unwrap_or(i32::MAX))
        .bind(i32::try_from(record.max_attempts).unwrap_or(i32::MAX))
        .bind(&record.error)
        .bind(&record.thumbnail_url)
        .bind(record.created_at)
        .bind(record.started_at)
        .bind(record.finished_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to save job status", e))?;
        Ok(())
    }

    async fn find_by_file(&self, file_id: FileId) -> AppResult<Option<JobRecord>> {
        let row = sqlx::query_as::<_, ThumbnailJobRow>(&format!(
            "SELECT {COLUMNS} FROM thumbnail_jobs WHERE file_id = $1 \
             ORDER BY updated_at DESC LIMIT 1"
        ))
        .bind(file_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to find job for file", e))?;

        row.map(JobRecord::try_from).transpose()
    }

    async fn list_unfinished(&self) -> AppResult<Vec<JobRecord>> {
        let rows = sqlx::query_as::<_, ThumbnailJobRow>(&format!(
            "SELECT {COLUMNS} FROM thumbnail_jobs \
             WHERE status IN ('PENDING', 'PROCESSING', 'RETRYING') \
             ORDER BY created_at ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to list unfinished jobs", e)
        })?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            match JobRecord::try_from(row) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!("Skipping unreadable job record: {}", e),
            }
        }
        Ok(records)
    }

    async fn delete_older_than(
        &self,
        status: ThumbnailJobStatus,
        before: DateTime<Utc>,
    ) -> AppResult<u64> {
        let result =
            sqlx::query("DELETE FROM thumbnail_jobs WHERE status = $1 AND updated_at <= $2")
                .bind(status.as_str())
                .bind(before)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    AppError::with_source(ErrorKind::Database, "Failed to clean job records", e)
                })?;
        Ok(result.rows_affected())
    }
}
