//! Raster images: one in-process resize and re-encode.
//!
//! Formats the decoder cannot read (HEIC, CMYK TIFF, ...) go through the
//! raster processor first.

use std::path::PathBuf;

use async_trait::async_trait;
use thumbforge_core::types::MimeCategory;

use super::{Pipeline, PipelineContext, RenderRequest, Rendered, first_page, png_out};
use crate::capability::Tool;
use crate::error::ConversionError;
use crate::raster::PostProcess;

/// Raster image pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImagePipeline;

impl ImagePipeline {
    /// Convert the source to PNG with the raster processor.
    async fn convert_to_png(
        ctx: &PipelineContext<'_>,
        request: &RenderRequest<'_>,
    ) -> Result<PathBuf, ConversionError> {
        let out = ctx.workspace.file("decoded.png");
        let cmd = ctx
            .command(Tool::RasterProcessor)?
            .arg(first_page(request.source))
            .arg("-auto-orient")
            .arg(png_out(&out))
            .expect_output(&out);
        ctx.run(Tool::RasterProcessor, cmd).await?;
        Ok(out)
    }
}

#[async_trait]
impl Pipeline for ImagePipeline {
    fn category(&self) -> MimeCategory {
        MimeCategory::Image
    }

    #[tracing::instrument(skip_all, fields(file_id = %request.file_id, mime = request.mime_type))]
    async fn render(
        &self,
        ctx: &PipelineContext<'_>,
        request: &RenderRequest<'_>,
    ) -> Result<Rendered, ConversionError> {
        let err = match ctx
            .finish(request.source, request.options, PostProcess::default())
            .await
        {
            Ok(bytes) => return Ok(Rendered::Encoded(bytes)),
            Err(e @ ConversionError::Image(_)) => e,
            Err(e) => return Err(e),
        };

        ctx.fell_back("in-process decode", &err);

        let decoded = Self::convert_to_png(ctx, request)
            .await
            .map_err(ConversionError::all_tiers_failed)?;
        let bytes = ctx
            .finish(&decoded, request.options, PostProcess::default())
            .await
            .map_err(ConversionError::all_tiers_failed)?;
        ctx.workspace.discard(&decoded).await;

        Ok(Rendered::Encoded(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilitySet;
    use crate::pipeline::test_support::Harness;
    use crate::testing::{FakeRunner, write_test_png};
    use thumbforge_core::types::{FitMode, SizePreset, ThumbnailErrorKind};

    #[tokio::test]
    async fn test_decodable_image_needs_no_tools() {
        let h = Harness::new(FakeRunner::new());
        let source = h.dir.path().join("photo.png");
        write_test_png(&source, 800, 600).expect("png");
        let options = Harness::options(SizePreset::Small).with_fit(FitMode::Inside);

        let rendered = ImagePipeline
            .render(
                &h.ctx(),
                &RenderRequest {
                    file_id: h.file_id,
                    source: &source,
                    mime_type: "image/png",
                    options: &options,
                },
            )
            .await
            .expect("render");

        let Rendered::Encoded(bytes) = rendered else {
            panic!("expected encoded bytes");
        };
        let img = ::image::load_from_memory(&bytes).expect("decode webp");
        assert_eq!((img.width(), img.height()), (150, 113));
        assert!(h.runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_image_goes_through_raster_processor() {
        let h = Harness::new(FakeRunner::new());
        let source = h.source("photo.heic", b"ftypheic not really");
        let options = Harness::options(SizePreset::Small);

        let rendered = ImagePipeline
            .render(
                &h.ctx(),
                &RenderRequest {
                    file_id: h.file_id,
                    source: &source,
                    mime_type: "image/heic",
                    options: &options,
                },
            )
            .await
            .expect("render");

        assert!(matches!(rendered, Rendered::Encoded(_)));
        assert_eq!(h.runner.conversions_by("magick"), 1);
    }

    #[tokio::test]
    async fn test_undecodable_without_raster_processor_fails() {
        let h = Harness::new(FakeRunner::new()).with_capabilities(CapabilitySet::none());
        let source = h.source("photo.heic", b"garbage");
        let options = Harness::options(SizePreset::Small);

        let err = ImagePipeline
            .render(
                &h.ctx(),
                &RenderRequest {
                    file_id: h.file_id,
                    source: &source,
                    mime_type: "image/heic",
                    options: &options,
                },
            )
            .await
            .expect_err("must fail");

        assert_eq!(err.kind(), ThumbnailErrorKind::ToolUnavailable);
    }
}
