//! PDF: rasterize page 1 oversized, then trim, flatten, and resample.
//!
//! Tier A is the raster processor under a memory ceiling. Tier B is
//! Ghostscript with an explicit pixel geometry so the output size is bounded
//! whatever the page box says.

use std::path::PathBuf;

use async_trait::async_trait;
use thumbforge_core::types::MimeCategory;

use super::{Pipeline, PipelineContext, RenderRequest, Rendered, first_page, png_out};
use crate::capability::Tool;
use crate::error::ConversionError;
use crate::raster::PostProcess;

/// PDF pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfPipeline;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    RasterProcessor,
    Ghostscript,
}

impl Tier {
    fn name(&self) -> &'static str {
        match self {
            Self::RasterProcessor => "pdf/raster-processor",
            Self::Ghostscript => "pdf/ghostscript",
        }
    }
}

impl PdfPipeline {
    /// Rasterization box: the target scaled by the configured factor.
    fn raster_box(ctx: &PipelineContext<'_>, request: &RenderRequest<'_>) -> (u32, u32) {
        let factor = ctx.config.pdf_scale_factor.max(1.0);
        let scale = |v: u32| ((v as f32) * factor).ceil() as u32;
        (scale(request.options.width), scale(request.options.height))
    }

    async fn rasterize(
        tier: Tier,
        ctx: &PipelineContext<'_>,
        request: &RenderRequest<'_>,
    ) -> Result<PathBuf, ConversionError> {
        let (w, h) = Self::raster_box(ctx, request);
        let density = ctx.config.pdf_density.to_string();

        match tier {
            Tier::RasterProcessor => {
                let out = ctx.workspace.file("page-a.png");
                let cmd = ctx
                    .command(Tool::RasterProcessor)?
                    .args(["-limit", "memory"])
                    .arg(ctx.tools.magick_memory_limit.clone())
                    .args(["-limit", "map"])
                    .arg(ctx.tools.magick_map_limit.clone())
                    .arg("-density")
                    .arg(density)
                    .arg(first_page(request.source))
                    .arg("-thumbnail")
                    .arg(format!("{w}x{h}"))
                    .arg(png_out(&out))
                    .expect_output(&out);
                ctx.run(Tool::RasterProcessor, cmd).await?;
                Ok(out)
            }
            Tier::Ghostscript => {
                let out = ctx.workspace.file("page-b.png");
                let cmd = ctx
                    .command(Tool::PdfRasterizer)?
                    .args([
                        "-dSAFER",
                        "-dBATCH",
                        "-dNOPAUSE",
                        "-dQUIET",
                        "-sDEVICE=png16m",
                        "-dFirstPage=1",
                        "-dLastPage=1",
                        "-dTextAlphaBits=4",
                        "-dGraphicsAlphaBits=4",
                    ])
                    .arg(format!("-r{density}"))
                    .arg(format!("-g{w}x{h}"))
                    .arg("-dPDFFitPage")
                    .arg(format!("-sOutputFile={}", out.to_string_lossy()))
                    .arg_path(request.source)
                    .expect_output(&out);
                ctx.run(Tool::PdfRasterizer, cmd).await?;
                Ok(out)
            }
        }
    }

    async fn run_tier(
        tier: Tier,
        ctx: &PipelineContext<'_>,
        request: &RenderRequest<'_>,
    ) -> Result<Vec<u8>, ConversionError> {
        let page = Self::rasterize(tier, ctx, request).await?;
        let post = PostProcess {
            trim_dark_borders: Some(ctx.config.black_border_threshold),
            flatten: true,
            enhance: false,
        };
        let result = ctx.finish(&page, request.options, post).await;
        ctx.workspace.discard(&page).await;
        result
    }
}

#[async_trait]
impl Pipeline for PdfPipeline {
    fn category(&self) -> MimeCategory {
        MimeCategory::Pdf
    }

    #[tracing::instrument(skip_all, fields(file_id = %request.file_id))]
    async fn render(
        &self,
        ctx: &PipelineContext<'_>,
        request: &RenderRequest<'_>,
    ) -> Result<Rendered, ConversionError> {
        let mut last = None;

        for tier in [Tier::RasterProcessor, Tier::Ghostscript] {
            if let Some(err) = &last {
                ctx.fell_back(Tier::RasterProcessor.name(), err);
            }
            match Self::run_tier(tier, ctx, request).await {
                Ok(bytes) => {
                    tracing::debug!(tier = tier.name(), "PDF page rendered");
                    return Ok(Rendered::Encoded(bytes));
                }
                // Keep the most informative error: a real failure beats "not installed".
                Err(e) => {
                    if last.is_none() || !matches!(e, ConversionError::ToolUnavailable { .. }) {
                        last = Some(e);
                    }
                }
            }
        }

        Err(ConversionError::all_tiers_failed(last.unwrap_or(
            ConversionError::ToolUnavailable {
                tool: Tool::PdfRasterizer,
            },
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilitySet;
    use crate::pipeline::test_support::Harness;
    use crate::testing::FakeRunner;
    use std::sync::atomic::Ordering;
    use thumbforge_core::config::tools::ToolsConfig;
    use thumbforge_core::types::{SizePreset, ThumbnailErrorKind, ThumbnailOptions};

    fn request<'a>(
        h: &'a Harness,
        source: &'a std::path::Path,
        options: &'a ThumbnailOptions,
    ) -> RenderRequest<'a> {
        RenderRequest {
            file_id: h.file_id,
            source,
            mime_type: "application/pdf",
            options,
        }
    }

    #[tokio::test]
    async fn test_primary_tier_uses_memory_limits() {
        let h = Harness::new(FakeRunner::new());
        let source = h.source("doc.pdf", b"%PDF-1.4");
        let options = Harness::options(SizePreset::Medium);

        PdfPipeline
            .render(&h.ctx(), &request(&h, &source, &options))
            .await
            .expect("render");

        let calls = h.runner.calls_to("magick");
        assert_eq!(calls.len(), 1);
        let cmd = &calls[0];
        assert!(cmd.has_arg("256MiB"));
        assert!(cmd.has_arg("512MiB"));
        assert!(cmd.has_arg("750x750"));
        assert!(cmd.has_arg(&format!("{}[0]", source.display())));
        assert!(h.runner.calls_to("gs").is_empty());
    }

    #[tokio::test]
    async fn test_falls_back_to_ghostscript_when_raster_processor_missing() {
        let caps = CapabilitySet::all(&ToolsConfig::default()).without(Tool::RasterProcessor);
        let h = Harness::new(FakeRunner::new()).with_capabilities(caps);
        let source = h.source("doc.pdf", b"%PDF-1.4");
        let options = Harness::options(SizePreset::Medium);

        let rendered = PdfPipeline
            .render(&h.ctx(), &request(&h, &source, &options))
            .await
            .expect("ghostscript tier must succeed");
        assert!(matches!(rendered, Rendered::Encoded(_)));

        assert!(h.runner.calls_to("magick").is_empty());
        let gs = h.runner.calls_to("gs");
        assert_eq!(gs.len(), 1);
        assert!(gs[0].has_arg("-g750x750"));
        assert!(gs[0].has_arg("-dPDFFitPage"));
        assert_eq!(h.metrics.fallbacks_used.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_falls_back_when_raster_processor_fails() {
        let h = Harness::new(FakeRunner::new().failing("magick"));
        let source = h.source("doc.pdf", b"%PDF-1.4");
        let options = Harness::options(SizePreset::Small);

        PdfPipeline
            .render(&h.ctx(), &request(&h, &source, &options))
            .await
            .expect("render");
        assert_eq!(h.runner.calls_to("gs").len(), 1);
    }

    #[tokio::test]
    async fn test_no_tools_is_tool_unavailable() {
        let h = Harness::new(FakeRunner::new()).with_capabilities(CapabilitySet::none());
        let source = h.source("doc.pdf", b"%PDF-1.4");
        let options = Harness::options(SizePreset::Small);

        let err = PdfPipeline
            .render(&h.ctx(), &request(&h, &source, &options))
            .await
            .expect_err("must fail");
        assert_eq!(err.kind(), ThumbnailErrorKind::ToolUnavailable);
        assert!(h.runner.calls().is_empty());
    }
}
