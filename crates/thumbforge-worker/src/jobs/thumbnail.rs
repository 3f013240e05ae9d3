//! Thumbnail generation job handler.

use std::sync::Arc;

use async_trait::async_trait;

use thumbforge_core::traits::metadata::MetadataStore;
use thumbforge_core::types::ThumbnailJob;
use thumbforge_engine::ThumbnailEngine;
use thumbforge_engine::engine::validate_source;

use crate::executor::{JobContext, JobExecutionError, JobHandler, JobOutput};

/// Runs the conversion engine for queued jobs and records the resulting URL.
#[derive(Debug)]
pub struct ThumbnailJobHandler {
    /// Conversion engine
    engine: ThumbnailEngine,
    /// Where thumbnail URLs are persisted
    metadata: Arc<dyn MetadataStore>,
}

impl ThumbnailJobHandler {
    /// Create a new thumbnail job handler
    pub fn new(engine: ThumbnailEngine, metadata: Arc<dyn MetadataStore>) -> Self {
        Self { engine, metadata }
    }
}

#[async_trait]
impl JobHandler for ThumbnailJobHandler {
    async fn execute(
        &self,
        job: &ThumbnailJob,
        ctx: &JobContext,
    ) -> Result<JobOutput, JobExecutionError> {
        ctx.progress(5).await;

        // A deleted source never comes back; fail before touching any tool.
        validate_source(&job.source_path)
            .await
            .map_err(|e| JobExecutionError::Permanent(e.to_string()))?;
        ctx.progress(10).await;

        tracing::info!(
            "Generating thumbnail: file={}, mime='{}', size={}, attempt={}/{}",
            job.file_id,
            job.mime_type,
            job.options.size_spec(),
            ctx.attempt,
            ctx.max_attempts
        );

        let result = self
            .engine
            .generate(&job.source_path, &job.mime_type, job.file_id, job.options)
            .await;
        if !result.success {
            return Err(JobExecutionError::from_result(&result));
        }
        ctx.progress(90).await;

        if let Some(url) = &result.thumbnail_url {
            self.metadata
                .update_thumbnail_url(job.file_id, url)
                .await
                .map_err(|e| {
                    JobExecutionError::Transient(format!("Failed to record thumbnail URL: {e}"))
                })?;
        }

        Ok(JobOutput {
            thumbnail_path: result.thumbnail_path,
            thumbnail_url: result.thumbnail_url,
        })
    }

    async fn on_failed(&self, job: &ThumbnailJob, error: &str) {
        match self
            .engine
            .purge(job.file_id, &job.mime_type, &job.options)
            .await
        {
            Ok(removed) => tracing::info!(
                "Thumbnail job for file {} failed for good ({}), purged {} files",
                job.file_id,
                error,
                removed
            ),
            Err(e) => tracing::warn!(
                "Failed to purge thumbnail files for {}: {}",
                job.file_id,
                e
            ),
        }
    }
}
