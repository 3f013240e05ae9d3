//! EPS/PostScript: vectorize with crop-to-content, rasterize, enhance.
//!
//! Rasterizing EPS directly clips artwork whose bounding box extends past the
//! nominal page, so the source is first rewritten as a PDF cropped to its
//! content. The raster is then taken from that intermediate at a DPI chosen
//! from the target size.
//!
//! When the primary path fails the pipeline degrades instead of giving up:
//! a lower-fidelity rasterization is enhanced if possible, plainly converted
//! if not, and accepted as-is as a last resort.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thumbforge_core::types::{MimeCategory, ThumbnailOptions};

use super::{Pipeline, PipelineContext, RenderRequest, Rendered, first_non_empty, first_page, png_out};
use crate::capability::Tool;
use crate::error::ConversionError;
use crate::raster::{self, PostProcess};

const GS_BASE_ARGS: [&str; 4] = ["-dSAFER", "-dBATCH", "-dNOPAUSE", "-dQUIET"];

const ENHANCE: PostProcess = PostProcess {
    trim_dark_borders: None,
    flatten: true,
    enhance: true,
};

/// EPS/PostScript pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct EpsPipeline;

/// Intermediates a later fallback stage may still use.
#[derive(Debug, Default)]
struct Intermediates {
    vector: Option<PathBuf>,
    raster: Option<PathBuf>,
    /// Full-DPI raster past the ceiling, kept until a bounded one exists.
    oversized: Option<PathBuf>,
}

impl Intermediates {
    fn paths(&self) -> impl Iterator<Item = &Path> {
        [&self.vector, &self.raster, &self.oversized]
            .into_iter()
            .filter_map(|p| p.as_deref())
    }
}

/// Rasterization DPI for a target box.
pub fn raster_dpi(options: &ThumbnailOptions, normal: u32, high: u32, threshold: u32) -> u32 {
    if options.width >= threshold || options.height >= threshold {
        high
    } else {
        normal
    }
}

/// Pixel geometry for the bounded re-render: half the oversized raster,
/// clamped to the ceiling.
pub fn bounded_geometry(oversized: (u32, u32), ceiling: u32) -> (u32, u32) {
    let half = |v: u32| v.div_ceil(2).clamp(1, ceiling);
    (half(oversized.0), half(oversized.1))
}

impl EpsPipeline {
    /// Stage (a): EPS to PDF, cropped to the artwork's bounding box.
    async fn vectorize(
        ctx: &PipelineContext<'_>,
        request: &RenderRequest<'_>,
    ) -> Result<PathBuf, ConversionError> {
        let out = ctx.workspace.file("vector.pdf");
        let cmd = ctx
            .command(Tool::PdfRasterizer)?
            .args(GS_BASE_ARGS)
            .args(["-sDEVICE=pdfwrite", "-dEPSCrop"])
            .arg(format!("-sOutputFile={}", out.to_string_lossy()))
            .arg_path(request.source)
            .expect_output(&out);
        ctx.run(Tool::PdfRasterizer, cmd).await?;
        Ok(out)
    }

    /// Rasterize the vector intermediate, optionally into a fixed geometry.
    async fn rasterize(
        ctx: &PipelineContext<'_>,
        vector: &Path,
        dpi: u32,
        geometry: Option<(u32, u32)>,
        name: &str,
    ) -> Result<PathBuf, ConversionError> {
        let out = ctx.workspace.file(name);
        let mut cmd = ctx
            .command(Tool::PdfRasterizer)?
            .args(GS_BASE_ARGS)
            .args([
                "-sDEVICE=png16m",
                "-dFirstPage=1",
                "-dLastPage=1",
                "-dTextAlphaBits=4",
                "-dGraphicsAlphaBits=4",
            ])
            .arg(format!("-r{dpi}"));
        if let Some((w, h)) = geometry {
            cmd = cmd.arg(format!("-g{w}x{h}")).arg("-dPDFFitPage");
        }
        let cmd = cmd
            .arg(format!("-sOutputFile={}", out.to_string_lossy()))
            .arg_path(vector)
            .expect_output(&out);
        ctx.run(Tool::PdfRasterizer, cmd).await?;
        Ok(out)
    }

    /// Stages (a) through (d).
    async fn primary(
        ctx: &PipelineContext<'_>,
        request: &RenderRequest<'_>,
        kept: &mut Intermediates,
    ) -> Result<Vec<u8>, ConversionError> {
        let config = ctx.config;
        let vector = Self::vectorize(ctx, request).await?;
        kept.vector = Some(vector.clone());

        let dpi = raster_dpi(
            request.options,
            config.eps_dpi,
            config.eps_high_dpi,
            config.eps_high_dpi_threshold,
        );
        let mut raster = Self::rasterize(ctx, &vector, dpi, None, "raster.png").await?;
        kept.raster = Some(raster.clone());

        // Header only; the oversized raster is never decoded.
        let dims = raster::dimensions(&raster)?;
        let ceiling = config.max_raster_dimension;
        if dims.0 > ceiling || dims.1 > ceiling {
            let geometry = bounded_geometry(dims, ceiling);
            tracing::info!(
                width = dims.0,
                height = dims.1,
                ceiling,
                dpi = dpi / 2,
                "EPS raster exceeds ceiling, regenerating at half DPI"
            );
            kept.oversized = kept.raster.take();

            let half = (dpi / 2).max(1);
            raster = Self::rasterize(ctx, &vector, half, Some(geometry), "raster-bounded.png").await?;
            kept.raster = Some(raster.clone());
            if let Some(oversized) = kept.oversized.take() {
                ctx.workspace.discard(&oversized).await;
            }
        }

        ctx.finish(&raster, request.options, ENHANCE).await
    }

    /// Lower-fidelity raster for the fallback tiers.
    async fn fallback_raster(
        ctx: &PipelineContext<'_>,
        request: &RenderRequest<'_>,
        kept: &Intermediates,
    ) -> Result<PathBuf, ConversionError> {
        let input = match &kept.vector {
            Some(vector) if super::verify_output(vector).await.is_ok() => vector.as_path(),
            _ => request.source,
        };
        let out = ctx.workspace.file("fallback.png");

        let attempt = async {
            let cmd = ctx
                .command(Tool::RasterProcessor)?
                .arg("-density")
                .arg(ctx.config.eps_fallback_density.to_string())
                .arg(first_page(input))
                .args(["-background", "white", "-flatten"])
                .arg(png_out(&out))
                .expect_output(&out);
            ctx.run(Tool::RasterProcessor, cmd).await
        };

        match attempt.await {
            Ok(_) => Ok(out),
            Err(e) => {
                let earlier = [&kept.raster, &kept.oversized]
                    .into_iter()
                    .filter_map(|p| p.as_deref())
                    .collect::<Vec<_>>();
                match first_non_empty(&earlier).await {
                    Some(raster) => {
                        tracing::debug!(error = %e, "Fallback rasterization failed, reusing earlier raster");
                        Ok(raster)
                    }
                    None => Err(e),
                }
            }
        }
    }

    /// Plain format conversion with the raster processor.
    async fn plain_convert(
        ctx: &PipelineContext<'_>,
        raster: &Path,
        options: &ThumbnailOptions,
    ) -> Result<PathBuf, ConversionError> {
        let ext = options.format.extension();
        let out = ctx.workspace.file(&format!("plain.{ext}"));
        let cmd = ctx
            .command(Tool::RasterProcessor)?
            .arg_path(raster)
            .arg("-resize")
            .arg(options.size_spec())
            .arg(format!("{ext}:{}", out.to_string_lossy()))
            .expect_output(&out);
        ctx.run(Tool::RasterProcessor, cmd).await?;
        Ok(out)
    }

    /// Stage (e): enhance, then plain conversion, then the raster as-is.
    async fn degrade(
        ctx: &PipelineContext<'_>,
        request: &RenderRequest<'_>,
        kept: &Intermediates,
        cause: ConversionError,
    ) -> Result<Rendered, ConversionError> {
        ctx.fell_back("eps/primary", &cause);

        let raster = match Self::fallback_raster(ctx, request, kept).await {
            Ok(raster) => raster,
            Err(e) => {
                // Nothing non-empty was produced anywhere.
                let last = match e {
                    ConversionError::ToolUnavailable { .. } => cause,
                    other => other,
                };
                return Err(ConversionError::all_tiers_failed(last));
            }
        };

        // An unreadable header is left for the decoder to report.
        let ceiling = ctx.config.max_raster_dimension;
        match raster::dimensions(&raster) {
            Ok((w, h)) if w > ceiling || h > ceiling => {
                let e = ConversionError::PostProcessing(format!(
                    "{w}x{h} raster exceeds the {ceiling}px ceiling"
                ));
                ctx.fell_back("eps/enhanced-fallback", &e);
            }
            _ => match ctx.finish(&raster, request.options, ENHANCE).await {
                Ok(bytes) => return Ok(Rendered::Encoded(bytes)),
                Err(e) => ctx.fell_back("eps/enhanced-fallback", &e),
            },
        }

        match Self::plain_convert(ctx, &raster, request.options).await {
            Ok(out) => return Ok(Rendered::File(out)),
            Err(e) => ctx.fell_back("eps/plain-fallback", &e),
        }

        tracing::warn!(
            file_id = %request.file_id,
            "Accepting unenhanced EPS raster as thumbnail"
        );
        Ok(Rendered::File(raster))
    }
}

#[async_trait]
impl Pipeline for EpsPipeline {
    fn category(&self) -> MimeCategory {
        MimeCategory::Eps
    }

    #[tracing::instrument(skip_all, fields(file_id = %request.file_id))]
    async fn render(
        &self,
        ctx: &PipelineContext<'_>,
        request: &RenderRequest<'_>,
    ) -> Result<Rendered, ConversionError> {
        let mut kept = Intermediates::default();

        let result = match Self::primary(ctx, request, &mut kept).await {
            Ok(bytes) => Ok(Rendered::Encoded(bytes)),
            Err(e) => Self::degrade(ctx, request, &kept, e).await,
        };

        for path in kept.paths() {
            // A fallback may hand this file back for installation.
            if !matches!(&result, Ok(Rendered::File(out)) if out == path) {
                ctx.workspace.discard(path).await;
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilitySet;
    use crate::pipeline::test_support::Harness;
    use crate::testing::FakeRunner;
    use thumbforge_core::types::{SizePreset, ThumbnailErrorKind};

    fn request<'a>(
        h: &'a Harness,
        source: &'a Path,
        options: &'a ThumbnailOptions,
    ) -> RenderRequest<'a> {
        RenderRequest {
            file_id: h.file_id,
            source,
            mime_type: "application/postscript",
            options,
        }
    }

    #[test]
    fn test_dpi_tier_by_target_size() {
        let small = Harness::options(SizePreset::Small);
        let xlarge = Harness::options(SizePreset::Xlarge);
        assert_eq!(raster_dpi(&small, 300, 600, 1200), 300);
        assert_eq!(raster_dpi(&xlarge, 300, 600, 1200), 600);
    }

    #[test]
    fn test_bounded_geometry_halves_and_clamps() {
        assert_eq!(bounded_geometry((16500, 10), 16384), (8250, 5));
        assert_eq!(bounded_geometry((40000, 3), 16384), (16384, 2));
    }

    #[tokio::test]
    async fn test_vectorizes_with_crop_to_content() {
        let h = Harness::new(FakeRunner::new());
        let source = h.source("art.eps", b"%!PS-Adobe-3.0 EPSF-3.0");
        let options = Harness::options(SizePreset::Medium);

        let rendered = EpsPipeline
            .render(&h.ctx(), &request(&h, &source, &options))
            .await
            .expect("render");
        assert!(matches!(rendered, Rendered::Encoded(_)));

        let gs = h.runner.calls_to("gs");
        assert_eq!(gs.len(), 2);
        assert!(gs[0].has_arg("-sDEVICE=pdfwrite"));
        assert!(gs[0].has_arg("-dEPSCrop"));
        assert!(!gs[0].has_arg("-dEPSFitPage"));
        assert!(gs[1].has_arg("-r300"));
        assert!(h.runner.calls_to("magick").is_empty());

        for call in &gs {
            let out = call.output.clone().expect("declared output");
            assert!(!out.exists(), "{} left behind", out.display());
        }
    }

    #[tokio::test]
    async fn test_large_targets_use_high_dpi() {
        let h = Harness::new(FakeRunner::new());
        let source = h.source("art.eps", b"%!PS");
        let options = Harness::options(SizePreset::Xlarge);

        EpsPipeline
            .render(&h.ctx(), &request(&h, &source, &options))
            .await
            .expect("render");
        assert!(h.runner.calls_to("gs")[1].has_arg("-r600"));
    }

    #[tokio::test]
    async fn test_oversized_raster_regenerated_at_half_dpi() {
        let h = Harness::new(FakeRunner::new().output_dims("gs", "-r300", (16500, 10)));
        let source = h.source("banner.eps", b"%!PS");
        let options = Harness::options(SizePreset::Small);

        EpsPipeline
            .render(&h.ctx(), &request(&h, &source, &options))
            .await
            .expect("render");

        let gs = h.runner.calls_to("gs");
        assert_eq!(gs.len(), 3);
        let bounded = &gs[2];
        assert!(bounded.has_arg("-r150"));
        assert!(bounded.has_arg("-g8250x5"));
        assert!(bounded.has_arg("-dPDFFitPage"));
        assert!(!h.workspace.file("raster.png").exists());
    }

    #[tokio::test]
    async fn test_oversized_raster_survives_failed_regeneration() {
        let h = Harness::new(
            FakeRunner::new()
                .output_dims("gs", "-r300", (16500, 10))
                .failing_with_arg("gs", "-g8250x5")
                .failing("magick"),
        );
        let source = h.source("banner.eps", b"%!PS");
        let options = Harness::options(SizePreset::Small);

        let rendered = EpsPipeline
            .render(&h.ctx(), &request(&h, &source, &options))
            .await
            .expect("oversized raster must be kept as the last resort");

        let Rendered::File(path) = rendered else {
            panic!("expected the oversized raster");
        };
        assert!(path.ends_with("raster.png"));
        assert_eq!(raster::dimensions(&path).expect("header"), (16500, 10));
        // Fallback rasterization and plain conversion were both tried.
        assert_eq!(h.runner.calls_to("magick").len(), 2);
        assert!(!h.workspace.file("vector.pdf").exists());
    }

    #[tokio::test]
    async fn test_oversized_fallback_raster_is_not_decoded() {
        let h = Harness::new(
            FakeRunner::new()
                .failing("gs")
                .output_dims("magick", "-density", (20000, 10)),
        );
        let source = h.source("banner.eps", b"%!PS");
        let options = Harness::options(SizePreset::Small);

        let rendered = EpsPipeline
            .render(&h.ctx(), &request(&h, &source, &options))
            .await
            .expect("plain conversion must succeed");

        let Rendered::File(path) = rendered else {
            panic!("expected a converted file");
        };
        assert!(path.ends_with("plain.webp"));
        assert_eq!(h.metrics.fallbacks_used.load(std::sync::atomic::Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_failed_vectorization_falls_back_to_raster_processor() {
        let h = Harness::new(FakeRunner::new().failing_with_arg("gs", "pdfwrite"));
        let source = h.source("art.eps", b"%!PS");
        let options = Harness::options(SizePreset::Small);

        let rendered = EpsPipeline
            .render(&h.ctx(), &request(&h, &source, &options))
            .await
            .expect("fallback must succeed");
        assert!(matches!(rendered, Rendered::Encoded(_)));

        let magick = h.runner.calls_to("magick");
        assert_eq!(magick.len(), 1);
        assert!(magick[0].has_arg("-density"));
        assert!(magick[0].has_arg(&format!("{}[0]", source.display())));
    }

    #[tokio::test]
    async fn test_plain_conversion_when_enhancement_fails() {
        let h = Harness::new(FakeRunner::new().failing("gs").corrupt_output("magick"));
        let source = h.source("art.eps", b"%!PS");
        let options = Harness::options(SizePreset::Small);

        let rendered = EpsPipeline
            .render(&h.ctx(), &request(&h, &source, &options))
            .await
            .expect("plain conversion must succeed");

        let Rendered::File(path) = rendered else {
            panic!("expected a converted file");
        };
        assert!(path.ends_with("plain.webp"));
        assert_eq!(h.runner.conversions_by("magick"), 2);
    }

    #[tokio::test]
    async fn test_unenhanced_raster_accepted_as_last_resort() {
        let h = Harness::new(
            FakeRunner::new()
                .failing("gs")
                .corrupt_output("magick")
                .failing_with_arg("magick", "-resize"),
        );
        let source = h.source("art.eps", b"%!PS");
        let options = Harness::options(SizePreset::Small);

        let rendered = EpsPipeline
            .render(&h.ctx(), &request(&h, &source, &options))
            .await
            .expect("last resort must succeed");

        let Rendered::File(path) = rendered else {
            panic!("expected the raw raster");
        };
        assert!(path.ends_with("fallback.png"));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_nothing_produced_is_a_failure() {
        let h = Harness::new(FakeRunner::new()).with_capabilities(CapabilitySet::none());
        let source = h.source("art.eps", b"%!PS");
        let options = Harness::options(SizePreset::Small);

        let err = EpsPipeline
            .render(&h.ctx(), &request(&h, &source, &options))
            .await
            .expect_err("must fail");
        assert_eq!(err.kind(), ThumbnailErrorKind::ToolUnavailable);
    }
}
