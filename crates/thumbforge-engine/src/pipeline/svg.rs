//! SVG: render with librsvg, falling back to the raster processor.

use std::path::PathBuf;

use async_trait::async_trait;
use thumbforge_core::types::MimeCategory;

use super::{Pipeline, PipelineContext, RenderRequest, Rendered, png_out};
use crate::capability::Tool;
use crate::error::ConversionError;
use crate::raster::PostProcess;

/// SVG pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct SvgPipeline;

impl SvgPipeline {
    /// Direct vector-to-raster at twice the target box, aspect preserved.
    async fn render_vector(
        ctx: &PipelineContext<'_>,
        request: &RenderRequest<'_>,
    ) -> Result<PathBuf, ConversionError> {
        let out = ctx.workspace.file("vector.png");
        let cmd = ctx
            .command(Tool::VectorRenderer)?
            .arg("-w")
            .arg((request.options.width * 2).to_string())
            .arg("-h")
            .arg((request.options.height * 2).to_string())
            .args(["-a", "-f", "png", "-o"])
            .arg_path(&out)
            .arg_path(request.source)
            .expect_output(&out);
        ctx.run(Tool::VectorRenderer, cmd).await?;
        Ok(out)
    }

    async fn render_density(
        ctx: &PipelineContext<'_>,
        request: &RenderRequest<'_>,
    ) -> Result<PathBuf, ConversionError> {
        let out = ctx.workspace.file("density.png");
        let cmd = ctx
            .command(Tool::RasterProcessor)?
            .arg("-density")
            .arg(ctx.config.svg_fallback_density.to_string())
            .args(["-background", "white"])
            .arg_path(request.source)
            .arg("-flatten")
            .arg(png_out(&out))
            .expect_output(&out);
        ctx.run(Tool::RasterProcessor, cmd).await?;
        Ok(out)
    }

    async fn finish(
        ctx: &PipelineContext<'_>,
        request: &RenderRequest<'_>,
        raster: PathBuf,
    ) -> Result<Vec<u8>, ConversionError> {
        let post = PostProcess {
            flatten: true,
            ..PostProcess::default()
        };
        let result = ctx.finish(&raster, request.options, post).await;
        ctx.workspace.discard(&raster).await;
        result
    }
}

#[async_trait]
impl Pipeline for SvgPipeline {
    fn category(&self) -> MimeCategory {
        MimeCategory::Svg
    }

    #[tracing::instrument(skip_all, fields(file_id = %request.file_id))]
    async fn render(
        &self,
        ctx: &PipelineContext<'_>,
        request: &RenderRequest<'_>,
    ) -> Result<Rendered, ConversionError> {
        let primary = match Self::render_vector(ctx, request).await {
            Ok(raster) => Self::finish(ctx, request, raster).await,
            Err(e) => Err(e),
        };
        let cause = match primary {
            Ok(bytes) => return Ok(Rendered::Encoded(bytes)),
            Err(e) => e,
        };

        ctx.fell_back("svg/vector-renderer", &cause);

        let fallback = match Self::render_density(ctx, request).await {
            Ok(raster) => Self::finish(ctx, request, raster).await,
            Err(ConversionError::ToolUnavailable { .. }) => Err(cause),
            Err(e) => Err(e),
        };
        fallback
            .map(Rendered::Encoded)
            .map_err(ConversionError::all_tiers_failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilitySet;
    use crate::pipeline::test_support::Harness;
    use crate::testing::FakeRunner;
    use thumbforge_core::config::tools::ToolsConfig;
    use thumbforge_core::types::{SizePreset, ThumbnailErrorKind, ThumbnailOptions};

    const SVG: &[u8] = br#"<svg xmlns="http://www.w3.org/2000/svg" width="10" height="10"/>"#;

    fn request<'a>(
        h: &'a Harness,
        source: &'a std::path::Path,
        options: &'a ThumbnailOptions,
    ) -> RenderRequest<'a> {
        RenderRequest {
            file_id: h.file_id,
            source,
            mime_type: "image/svg+xml",
            options,
        }
    }

    #[tokio::test]
    async fn test_renders_with_vector_renderer() {
        let h = Harness::new(FakeRunner::new());
        let source = h.source("logo.svg", SVG);
        let options = Harness::options(SizePreset::Medium);

        SvgPipeline
            .render(&h.ctx(), &request(&h, &source, &options))
            .await
            .expect("render");

        let rsvg = h.runner.calls_to("rsvg-convert");
        assert_eq!(rsvg.len(), 1);
        assert!(rsvg[0].has_arg("600"));
        assert!(rsvg[0].has_arg("-a"));
        assert!(h.runner.calls_to("magick").is_empty());
        assert!(!h.workspace.file("vector.png").exists());
    }

    #[tokio::test]
    async fn test_falls_back_to_density_rasterization() {
        let h = Harness::new(FakeRunner::new().failing("rsvg-convert"));
        let source = h.source("logo.svg", SVG);
        let options = Harness::options(SizePreset::Small);

        SvgPipeline
            .render(&h.ctx(), &request(&h, &source, &options))
            .await
            .expect("fallback must succeed");

        let magick = h.runner.calls_to("magick");
        assert_eq!(magick.len(), 1);
        assert!(magick[0].has_arg("300"));
        assert!(magick[0].has_arg("white"));
    }

    #[tokio::test]
    async fn test_keeps_real_failure_when_fallback_missing() {
        let caps = CapabilitySet::all(&ToolsConfig::default()).without(Tool::RasterProcessor);
        let h = Harness::new(FakeRunner::new().failing("rsvg-convert")).with_capabilities(caps);
        let source = h.source("logo.svg", SVG);
        let options = Harness::options(SizePreset::Small);

        let err = SvgPipeline
            .render(&h.ctx(), &request(&h, &source, &options))
            .await
            .expect_err("must fail");
        assert_eq!(err.kind(), ThumbnailErrorKind::ToolFailed);
    }
}
