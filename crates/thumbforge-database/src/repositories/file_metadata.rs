//! File metadata repository: the `files.thumbnail_url` column.

use async_trait::async_trait;
use sqlx::PgPool;

use thumbforge_core::error::{AppError, ErrorKind};
use thumbforge_core::result::AppResult;
use thumbforge_core::traits::metadata::MetadataStore;
use thumbforge_core::types::FileId;

/// Repository for the thumbnail URL stored on file records.
#[derive(Debug, Clone)]
pub struct FileMetadataRepository {
    pool: PgPool,
}

impl FileMetadataRepository {
    /// Create a new file metadata repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MetadataStore for FileMetadataRepository {
    async fn update_thumbnail_url(&self, file_id: FileId, url: &str) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE files SET thumbnail_url = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(file_id)
        .bind(url)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to update thumbnail URL", e)
        })?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("File {file_id} not found")));
        }
        Ok(())
    }

    async fn thumbnail_url(&self, file_id: FileId) -> AppResult<Option<String>> {
        let url: Option<Option<String>> =
            sqlx::query_scalar("SELECT thumbnail_url FROM files WHERE id = $1")
                .bind(file_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    AppError::with_source(ErrorKind::Database, "Failed to read thumbnail URL", e)
                })?;
        Ok(url.flatten())
    }

    async fn clear_thumbnail_url(&self, file_id: FileId) -> AppResult<()> {
        sqlx::query("UPDATE files SET thumbnail_url = NULL, updated_at = NOW() WHERE id = $1")
            .bind(file_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Database, "Failed to clear thumbnail URL", e)
            })?;
        Ok(())
    }
}
