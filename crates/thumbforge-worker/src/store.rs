//! In-memory job status store, used when no database is configured.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use thumbforge_core::result::AppResult;
use thumbforge_core::traits::job_store::JobStatusStore;
use thumbforge_core::types::{FileId, JobId, JobRecord, ThumbnailJobStatus};

/// Job records kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    records: RwLock<HashMap<JobId, JobRecord>>,
}

impl MemoryJobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl JobStatusStore for MemoryJobStore {
    async fn save(&self, record: &JobRecord) -> AppResult<()> {
        self.records
            .write()
            .await
            .insert(record.job_id, record.clone());
        Ok(())
    }

    async fn find_by_file(&self, file_id: FileId) -> AppResult<Option<JobRecord>> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.file_id() == file_id)
            .max_by_key(|r| r.updated_at)
            .cloned())
    }

    async fn list_unfinished(&self) -> AppResult<Vec<JobRecord>> {
        let mut unfinished: Vec<JobRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| !r.status.is_terminal())
            .cloned()
            .collect();
        unfinished.sort_by_key(|r| r.created_at);
        Ok(unfinished)
    }

    async fn delete_older_than(
        &self,
        status: ThumbnailJobStatus,
        before: DateTime<Utc>,
    ) -> AppResult<u64> {
        let mut records = self.records.write().await;
        let before_len = records.len();
        records.retain(|_, r| !(r.status == status && r.updated_at <= before));
        Ok((before_len - records.len()) as u64)
    }
}
