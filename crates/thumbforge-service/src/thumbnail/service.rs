//! Thumbnail generation facade and queue administration.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use thumbforge_core::error::AppError;
use thumbforge_core::result::AppResult;
use thumbforge_core::traits::metadata::MetadataStore;
use thumbforge_core::types::{
    FileId, JobRecord, SizePreset, ThumbnailErrorKind, ThumbnailJob, ThumbnailOptions,
    ThumbnailResult,
};
use thumbforge_engine::ThumbnailEngine;
use thumbforge_worker::{JobHandle, JobQueue, QueueStats, StatusClass};

use crate::source::SourceLocator;

/// Entry point for thumbnail generation and job administration.
#[derive(Clone)]
pub struct ThumbnailService {
    /// Conversion engine (cache and lock aware).
    engine: ThumbnailEngine,
    /// Background job queue.
    queue: JobQueue,
    /// Where thumbnail URLs are recorded.
    metadata: Arc<dyn MetadataStore>,
    /// Source path resolution.
    locator: SourceLocator,
}

impl std::fmt::Debug for ThumbnailService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThumbnailService")
            .field("files_root", &self.locator.files_root())
            .finish()
    }
}

impl ThumbnailService {
    /// Creates a new thumbnail service.
    pub fn new(
        engine: ThumbnailEngine,
        queue: JobQueue,
        metadata: Arc<dyn MetadataStore>,
        locator: SourceLocator,
    ) -> Self {
        Self {
            engine,
            queue,
            metadata,
            locator,
        }
    }

    /// The conversion engine.
    pub fn engine(&self) -> &ThumbnailEngine {
        &self.engine
    }

    /// The job queue.
    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// The metadata store.
    pub fn metadata(&self) -> &Arc<dyn MetadataStore> {
        &self.metadata
    }

    /// Options for a preset using the configured defaults.
    pub fn options(&self, preset: SizePreset) -> ThumbnailOptions {
        self.engine.options(preset)
    }

    /// Generate (or fetch from cache) a thumbnail synchronously.
    ///
    /// Never fails outright: problems are reported inside the result.
    pub async fn generate_thumbnail(
        &self,
        source_path: &Path,
        mime_type: &str,
        file_id: FileId,
        options: ThumbnailOptions,
    ) -> ThumbnailResult {
        let source = match self.locator.resolve(source_path) {
            Ok(path) => path,
            Err(e) => {
                return ThumbnailResult::failed(
                    file_id,
                    ThumbnailErrorKind::SourceInvalid,
                    e.message,
                    0,
                );
            }
        };
        self.engine
            .generate(&source, mime_type, file_id, options)
            .await
    }

    /// Queue a job. Returns the existing handle when the file already has an
    /// unfinished job.
    pub async fn enqueue_thumbnail_job(&self, job: ThumbnailJob) -> AppResult<JobHandle> {
        let job = self.prepare(job)?;
        self.queue.enqueue(job).await
    }

    /// Queue several jobs. Nothing is queued if any job is invalid.
    pub async fn enqueue_batch(&self, jobs: Vec<ThumbnailJob>) -> AppResult<Vec<JobHandle>> {
        let jobs = jobs
            .into_iter()
            .map(|job| self.prepare(job))
            .collect::<AppResult<Vec<_>>>()?;
        self.queue.enqueue_batch(jobs).await
    }

    /// Status of the latest job for a file.
    pub async fn get_job_status(&self, file_id: FileId) -> AppResult<Option<JobRecord>> {
        self.queue.status(file_id).await
    }

    /// Job counts by state.
    pub async fn get_queue_stats(&self) -> QueueStats {
        self.queue.stats().await
    }

    /// Stop handing out jobs.
    pub async fn pause_queue(&self) {
        self.queue.pause().await;
    }

    /// Resume handing out jobs.
    pub async fn resume_queue(&self) {
        self.queue.resume().await;
    }

    /// Remove jobs of a status class older than `older_than_ms`.
    pub async fn clean_queue(&self, class: StatusClass, older_than_ms: u64) -> AppResult<usize> {
        self.queue
            .clean(class, Duration::from_millis(older_than_ms))
            .await
    }

    /// Retry the last job of a file at high priority.
    ///
    /// `None` when a job for the file is still unfinished.
    pub async fn retry_job(&self, file_id: FileId) -> AppResult<Option<JobHandle>> {
        self.queue.retry_job(file_id).await
    }

    /// Remove every cached thumbnail of a file and forget its URL.
    pub async fn delete_thumbnails(&self, file_id: FileId) -> AppResult<usize> {
        let removed = self.engine.delete_thumbnails(file_id).await?;
        self.metadata.clear_thumbnail_url(file_id).await?;
        Ok(removed)
    }

    /// Reject jobs that could never succeed and pin the absolute source path.
    fn prepare(&self, mut job: ThumbnailJob) -> AppResult<ThumbnailJob> {
        if !self.engine.supports(&job.mime_type) {
            return Err(AppError::unsupported_media(format!(
                "No thumbnail pipeline for '{}'",
                job.mime_type
            )));
        }
        job.options
            .validate(self.engine.config().thumbnail.max_dimension)?;
        job.source_path = self.locator.resolve(&job.source_path)?;
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thumbnail::fixture::Fixture;
    use thumbforge_core::error::ErrorKind;
    use thumbforge_core::types::{JobPriority, ThumbnailJobStatus};
    use thumbforge_engine::testing::FakeRunner;

    #[tokio::test]
    async fn test_generate_resolves_relative_source() {
        let f = Fixture::new(FakeRunner::new());
        let source = f.png("photos/beach.png", 800, 600);
        let file_id = FileId::new();

        let result = f
            .service
            .generate_thumbnail(&source, "image/png", file_id, f.service.options(SizePreset::Small))
            .await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(
            result.thumbnail_url,
            Some(format!("/thumbnails/150x150/{file_id}_150x150.webp"))
        );
    }

    #[tokio::test]
    async fn test_generate_rejects_escaping_source() {
        let f = Fixture::new(FakeRunner::new());
        let result = f
            .service
            .generate_thumbnail(
                Path::new("../secrets.png"),
                "image/png",
                FileId::new(),
                f.service.options(SizePreset::Small),
            )
            .await;
        assert_eq!(result.error_kind(), Some(ThumbnailErrorKind::SourceInvalid));
    }

    #[tokio::test]
    async fn test_enqueue_validates_and_deduplicates() {
        let f = Fixture::new(FakeRunner::new());
        let options = f.service.options(SizePreset::Large);
        let file_id = FileId::new();

        let err = f
            .service
            .enqueue_thumbnail_job(ThumbnailJob::new(file_id, "a.zip", "application/zip", options))
            .await
            .expect_err("unsupported");
        assert_eq!(err.kind, ErrorKind::UnsupportedMedia);

        let job = ThumbnailJob::new(file_id, "clips/a.mp4", "video/mp4", options);
        let first = f.service.enqueue_thumbnail_job(job.clone()).await.expect("enqueue");
        let second = f.service.enqueue_thumbnail_job(job).await.expect("enqueue");
        assert!(!first.deduplicated);
        assert!(second.deduplicated);
        assert_eq!(first.job_id, second.job_id);

        let record = f
            .service
            .get_job_status(file_id)
            .await
            .expect("status")
            .expect("record");
        assert_eq!(record.status, ThumbnailJobStatus::Pending);
        assert!(record.job.source_path.is_absolute());
        assert!(record.job.source_path.ends_with("files/clips/a.mp4"));
    }

    #[tokio::test]
    async fn test_batch_is_all_or_nothing() {
        let f = Fixture::new(FakeRunner::new());
        let options = f.service.options(SizePreset::Medium);
        let jobs = vec![
            ThumbnailJob::new(FileId::new(), "a.pdf", "application/pdf", options),
            ThumbnailJob::new(FileId::new(), "../b.pdf", "application/pdf", options),
        ];

        assert!(f.service.enqueue_batch(jobs).await.is_err());
        assert_eq!(f.service.get_queue_stats().await, QueueStats::default());
    }

    #[tokio::test]
    async fn test_pause_holds_waiting_jobs() {
        let f = Fixture::new(FakeRunner::new());
        let options = f.service.options(SizePreset::Medium);
        let job = ThumbnailJob::new(FileId::new(), "a.pdf", "application/pdf", options)
            .with_priority(JobPriority::High);
        f.service.enqueue_thumbnail_job(job).await.expect("enqueue");

        f.service.pause_queue().await;
        let stats = f.service.get_queue_stats().await;
        assert_eq!((stats.waiting, stats.paused), (0, 1));
        assert!(f.service.queue().claim().await.is_none());

        f.service.resume_queue().await;
        let stats = f.service.get_queue_stats().await;
        assert_eq!((stats.waiting, stats.paused), (1, 0));
    }

    #[tokio::test]
    async fn test_retry_unknown_file_is_not_found() {
        let f = Fixture::new(FakeRunner::new());
        let err = f.service.retry_job(FileId::new()).await.expect_err("unknown");
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete_thumbnails_clears_metadata() {
        let f = Fixture::new(FakeRunner::new());
        let source = f.png("a.png", 400, 400);
        let file_id = FileId::new();
        for preset in [SizePreset::Small, SizePreset::Medium] {
            let result = f
                .service
                .generate_thumbnail(&source, "image/png", file_id, f.service.options(preset))
                .await;
            assert!(result.success);
        }
        f.metadata
            .update_thumbnail_url(file_id, "/thumbnails/300x300/x.webp")
            .await
            .expect("update");

        let removed = f.service.delete_thumbnails(file_id).await.expect("delete");
        assert_eq!(removed, 2);
        assert_eq!(f.metadata.thumbnail_url(file_id).await.expect("get"), None);
    }
}
