//! Video: probe duration, seek past the intro, grab one frame, resize.

use std::time::Duration;

use async_trait::async_trait;
use thumbforge_core::types::MimeCategory;

use super::{Pipeline, PipelineContext, RenderRequest, Rendered};
use crate::capability::Tool;
use crate::error::ConversionError;
use crate::executor::ToolCommand;
use crate::raster::PostProcess;

/// Seek offset that skips black intro frames.
///
/// Ten percent into the video, but at least one second and at most ten,
/// never past the end. A non-finite or non-positive duration means
/// "unknown" and is replaced by `fallback`.
pub fn seek_offset(duration: f64, fallback: f64) -> f64 {
    let d = if duration.is_finite() && duration > 0.0 {
        duration
    } else {
        fallback.max(0.0)
    };
    (d * 0.10).clamp(d.min(1.0), d.min(10.0))
}

/// Video pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct VideoPipeline;

impl VideoPipeline {
    /// Duration in seconds, or `None` when it cannot be determined.
    async fn probe_duration(
        ctx: &PipelineContext<'_>,
        request: &RenderRequest<'_>,
    ) -> Option<f64> {
        let timeout = Duration::from_secs(ctx.tools.timeout_seconds);
        let cmd = ToolCommand::new(ctx.tools.ffprobe.clone(), timeout)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg_path(request.source);

        match ctx.runner.run(&cmd).await {
            Ok(output) => output.stdout.trim().parse::<f64>().ok(),
            Err(e) => {
                tracing::debug!(error = %e, "Duration probe failed");
                None
            }
        }
    }
}

#[async_trait]
impl Pipeline for VideoPipeline {
    fn category(&self) -> MimeCategory {
        MimeCategory::Video
    }

    #[tracing::instrument(skip_all, fields(file_id = %request.file_id, mime = request.mime_type))]
    async fn render(
        &self,
        ctx: &PipelineContext<'_>,
        request: &RenderRequest<'_>,
    ) -> Result<Rendered, ConversionError> {
        // Fail fast before probing when the extractor is missing.
        let extract = ctx.command(Tool::FrameExtractor)?;

        let fallback = ctx.config.default_video_duration_seconds;
        let duration = match Self::probe_duration(ctx, request).await {
            Some(d) => d,
            None => {
                tracing::debug!(fallback, "Video duration unavailable, using default");
                fallback
            }
        };
        let seek = seek_offset(duration, fallback);

        let frame = ctx.workspace.file("frame.png");
        let (w, h) = (request.options.width * 2, request.options.height * 2);
        let cmd = extract
            .args(["-hide_banner", "-loglevel", "error", "-y"])
            .arg("-ss")
            .arg(format!("{seek:.3}"))
            .arg("-i")
            .arg_path(request.source)
            .args(["-frames:v", "1"])
            .arg("-vf")
            .arg(format!("scale={w}:{h}:force_original_aspect_ratio=decrease"))
            .arg_path(&frame)
            .expect_output(&frame);

        let result = match ctx.run(Tool::FrameExtractor, cmd).await {
            Ok(_) => {
                tracing::debug!(duration, seek, "Extracted video frame");
                ctx.finish(&frame, request.options, PostProcess::default())
                    .await
            }
            Err(e) => Err(e),
        };
        ctx.workspace.discard(&frame).await;

        Ok(Rendered::Encoded(result?))
    }
}
