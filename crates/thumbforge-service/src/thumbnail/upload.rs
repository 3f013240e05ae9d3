//! Upload-time thumbnail routing.
//!
//! Raster images and SVGs are cheap enough to render inside the upload
//! request, so their presets are generated and awaited and the caller can
//! embed the URLs in its response. Video, PDF and EPS go to the job queue
//! and the upload returns as soon as the job is accepted.

use std::path::PathBuf;

use futures::future::join_all;

use thumbforge_core::result::AppResult;
use thumbforge_core::traits::metadata::MetadataStore;
use thumbforge_core::types::{FileId, MimeCategory, SizePreset, ThumbnailJob, ThumbnailResult};
use thumbforge_worker::JobHandle;

use super::service::ThumbnailService;

/// A freshly stored file.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// File identifier.
    pub file_id: FileId,
    /// Stored path, absolute or relative to the files root.
    pub source_path: PathBuf,
    /// Declared MIME type.
    pub mime_type: String,
}

/// One preset rendered during the upload.
#[derive(Debug, Clone)]
pub struct GeneratedThumbnail {
    /// Preset that was rendered.
    pub preset: SizePreset,
    /// Generation outcome.
    pub result: ThumbnailResult,
}

/// What the upload produced.
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    /// Pipeline category of the upload.
    pub category: MimeCategory,
    /// Presets rendered inline (fast categories only).
    pub generated: Vec<GeneratedThumbnail>,
    /// Queued job (slow categories only).
    pub job: Option<JobHandle>,
    /// URL recorded as the file's thumbnail.
    pub thumbnail_url: Option<String>,
}

/// Routes uploads to inline generation or the job queue.
#[derive(Debug, Clone)]
pub struct UploadService {
    thumbnails: ThumbnailService,
}

impl UploadService {
    /// Creates a new upload service.
    pub fn new(thumbnails: ThumbnailService) -> Self {
        Self { thumbnails }
    }

    /// Produce or schedule thumbnails for an uploaded file.
    pub async fn handle_upload(&self, upload: &UploadedFile) -> AppResult<UploadOutcome> {
        let category = MimeCategory::from_mime(&upload.mime_type);
        let mut outcome = UploadOutcome {
            category,
            generated: Vec::new(),
            job: None,
            thumbnail_url: None,
        };

        if category == MimeCategory::Unsupported {
            tracing::debug!(
                "No thumbnail for file {} of type '{}'",
                upload.file_id,
                upload.mime_type
            );
            return Ok(outcome);
        }

        let config = &self.thumbnails.engine().config().thumbnail;
        let primary = config.queued_preset;

        if !category.is_fast() {
            let job = ThumbnailJob::new(
                upload.file_id,
                upload.source_path.clone(),
                upload.mime_type.clone(),
                self.thumbnails.options(primary),
            );
            let handle = self.thumbnails.enqueue_thumbnail_job(job).await?;
            tracing::info!(
                "Queued thumbnail job {} for {} upload {}",
                handle.job_id,
                category.as_str(),
                upload.file_id
            );
            outcome.job = Some(handle);
            return Ok(outcome);
        }

        let presets = config.upload_presets.clone();
        let renders = presets.iter().map(|&preset| async move {
            let result = self
                .thumbnails
                .generate_thumbnail(
                    &upload.source_path,
                    &upload.mime_type,
                    upload.file_id,
                    self.thumbnails.options(preset),
                )
                .await;
            GeneratedThumbnail { preset, result }
        });
        outcome.generated = join_all(renders).await;

        for generated in outcome.generated.iter().filter(|g| !g.result.success) {
            tracing::warn!(
                "Upload thumbnail {} for file {} failed: {:?}",
                generated.preset,
                upload.file_id,
                generated.result.error
            );
        }

        let succeeded = || outcome.generated.iter().filter(|g| g.result.success);
        outcome.thumbnail_url = succeeded()
            .find(|g| g.preset == primary)
            .or_else(|| succeeded().next())
            .and_then(|g| g.result.thumbnail_url.clone());

        if let Some(url) = &outcome.thumbnail_url {
            self.thumbnails
                .metadata()
                .update_thumbnail_url(upload.file_id, url)
                .await?;
        }
        Ok(outcome)
    }
}
