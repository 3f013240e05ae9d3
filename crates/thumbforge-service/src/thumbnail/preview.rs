//! On-demand thumbnail serving.

use std::path::{Path, PathBuf};
use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;
use tokio_util::io::ReaderStream;

use thumbforge_core::error::AppError;
use thumbforge_core::result::AppResult;
use thumbforge_core::traits::metadata::MetadataStore;
use thumbforge_core::types::{FileId, ThumbnailOptions};

use super::service::ThumbnailService;

/// Boxed stream of file bytes.
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// A thumbnail ready to be written to a response.
pub struct ThumbnailStream {
    /// Source file.
    pub file_id: FileId,
    /// Cached thumbnail path.
    pub path: PathBuf,
    /// Public URL of the thumbnail.
    pub url: Option<String>,
    /// MIME type for Content-Type header.
    pub content_type: &'static str,
    /// Byte length for Content-Length header.
    pub content_length: u64,
    /// Whether the thumbnail already existed.
    pub from_cache: bool,
    /// File content.
    pub body: ByteStream,
}

impl std::fmt::Debug for ThumbnailStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThumbnailStream")
            .field("file_id", &self.file_id)
            .field("path", &self.path)
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .field("from_cache", &self.from_cache)
            .finish()
    }
}

/// Serves thumbnails, generating missing ones inside the request.
#[derive(Debug, Clone)]
pub struct PreviewService {
    thumbnails: ThumbnailService,
}

impl PreviewService {
    /// Creates a new preview service.
    pub fn new(thumbnails: ThumbnailService) -> Self {
        Self { thumbnails }
    }

    /// Stream the thumbnail of a file, generating it on a cache miss.
    ///
    /// Generation goes through the same per-key lock as queued jobs. Any
    /// generation failure is reported as not found.
    pub async fn serve_thumbnail(
        &self,
        file_id: FileId,
        source_path: &Path,
        mime_type: &str,
        options: ThumbnailOptions,
    ) -> AppResult<ThumbnailStream> {
        let result = self
            .thumbnails
            .generate_thumbnail(source_path, mime_type, file_id, options)
            .await;

        if !result.success {
            tracing::info!(
                %file_id,
                reason = ?result.error,
                "Thumbnail not available"
            );
            return Err(AppError::not_found(format!(
                "Thumbnail not available for file {file_id}"
            )));
        }
        let path = result.thumbnail_path.clone().ok_or_else(|| {
            AppError::not_found(format!("Thumbnail not available for file {file_id}"))
        })?;

        if let Some(url) = &result.thumbnail_url {
            if let Err(e) = self
                .thumbnails
                .metadata()
                .update_thumbnail_url(file_id, url)
                .await
            {
                tracing::warn!(%file_id, error = %e, "Failed to record thumbnail URL");
            }
        }

        let file = tokio::fs::File::open(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AppError::not_found(format!("Thumbnail not available for file {file_id}"))
            } else {
                AppError::storage(format!("Failed to open thumbnail: {e}"))
            }
        })?;
        let content_length = file.metadata().await?.len();

        Ok(ThumbnailStream {
            file_id,
            path,
            content_type: result.content_type(),
            url: result.thumbnail_url,
            content_length,
            from_cache: result.from_cache,
            body: Box::pin(ReaderStream::new(file)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thumbnail::fixture::Fixture;
    use futures::StreamExt;
    use thumbforge_core::types::SizePreset;
    use thumbforge_engine::testing::FakeRunner;

    async fn collect(mut body: ByteStream) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = body.next().await {
            out.extend_from_slice(&chunk.expect("chunk"));
        }
        out
    }

    #[tokio::test]
    async fn test_miss_generates_records_and_streams() {
        let f = Fixture::new(FakeRunner::new());
        let source = f.png("a.png", 640, 480);
        let file_id = FileId::new();
        let preview = PreviewService::new(f.service.clone());
        let options = f.service.options(SizePreset::Medium);

        let served = preview
            .serve_thumbnail(file_id, &source, "image/png", options)
            .await
            .expect("serve");

        assert!(!served.from_cache);
        assert_eq!(served.content_type, "image/webp");
        assert_eq!(
            f.metadata.thumbnail_url(file_id).await.expect("get"),
            served.url.clone()
        );
        let expected_len = served.content_length;
        let bytes = collect(served.body).await;
        assert_eq!(bytes.len() as u64, expected_len);
        assert_eq!(&bytes[..4], b"RIFF");

        let again = preview
            .serve_thumbnail(file_id, &source, "image/png", options)
            .await
            .expect("serve");
        assert!(again.from_cache);
    }

    #[tokio::test]
    async fn test_content_type_matches_installed_bytes() {
        let f = Fixture::new(
            FakeRunner::new()
                .output_dims("gs", "-r300", (16500, 10))
                .failing_with_arg("gs", "-g8250x5")
                .failing("magick"),
        );
        let source = f.source("banner.eps", b"%!PS");
        let preview = PreviewService::new(f.service.clone());

        let served = preview
            .serve_thumbnail(
                FileId::new(),
                &source,
                "application/postscript",
                f.service.options(SizePreset::Small),
            )
            .await
            .expect("serve");

        assert!(served.path.extension().is_some_and(|ext| ext == "webp"));
        assert_eq!(served.content_type, "image/png");
        let bytes = collect(served.body).await;
        assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
    }

    #[tokio::test]
    async fn test_failure_is_not_found() {
        let f = Fixture::new(FakeRunner::new().missing("ffmpeg"));
        let source = f.source("clip.mp4", b"video bytes");
        let preview = PreviewService::new(f.service.clone());

        let err = preview
            .serve_thumbnail(
                FileId::new(),
                &source,
                "video/mp4",
                f.service.options(SizePreset::Small),
            )
            .await
            .expect_err("no tool");
        assert!(err.is_not_found());

        let err = preview
            .serve_thumbnail(
                FileId::new(),
                Path::new("missing.png"),
                "image/png",
                f.service.options(SizePreset::Small),
            )
            .await
            .expect_err("no source");
        assert!(err.is_not_found());
    }
}
