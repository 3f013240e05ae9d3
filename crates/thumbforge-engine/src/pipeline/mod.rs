//! Conversion pipelines, one per MIME category.
//!
//! A pipeline renders a source into either encoded bytes or an encoded file
//! inside the scratch workspace. It never touches the cache; the engine
//! installs whatever the pipeline returns.

pub mod eps;
pub mod image;
pub mod pdf;
pub mod svg;
pub mod video;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use thumbforge_core::config::thumbnail::ThumbnailConfig;
use thumbforge_core::config::tools::ToolsConfig;
use thumbforge_core::types::{FileId, MimeCategory, ThumbnailOptions};

use crate::capability::{CapabilitySet, Tool};
use crate::error::ConversionError;
use crate::executor::{ProcessRunner, ToolCommand, ToolOutput};
use crate::metrics::EngineMetrics;
use crate::raster::{self, PostProcess};
use crate::temp::{TempWorkspace, is_non_empty_file};

/// What a pipeline produced.
#[derive(Debug)]
pub enum Rendered {
    /// Encoded thumbnail bytes.
    Encoded(Vec<u8>),
    /// An encoded file in the workspace, installed as-is.
    File(PathBuf),
}

/// One generation request as seen by a pipeline.
#[derive(Debug, Clone, Copy)]
pub struct RenderRequest<'a> {
    /// File being thumbnailed.
    pub file_id: FileId,
    /// Validated source path.
    pub source: &'a Path,
    /// MIME type of the source.
    pub mime_type: &'a str,
    /// Target options.
    pub options: &'a ThumbnailOptions,
}

/// Shared services available to every pipeline.
#[derive(Debug, Clone, Copy)]
pub struct PipelineContext<'a> {
    /// Tool runner.
    pub runner: &'a dyn ProcessRunner,
    /// Tools detected at startup.
    pub capabilities: &'a CapabilitySet,
    /// Tool configuration.
    pub tools: &'a ToolsConfig,
    /// Thumbnail tuning.
    pub config: &'a ThumbnailConfig,
    /// Metrics sink.
    pub metrics: &'a EngineMetrics,
    /// Scratch space for this generation.
    pub workspace: &'a TempWorkspace,
}

impl PipelineContext<'_> {
    /// Program for `tool`, or `ToolUnavailable`.
    pub fn program(&self, tool: Tool) -> Result<&str, ConversionError> {
        self.capabilities
            .program(tool)
            .ok_or(ConversionError::ToolUnavailable { tool })
    }

    /// Command for `tool` with the configured timeout.
    pub fn command(&self, tool: Tool) -> Result<ToolCommand, ConversionError> {
        let timeout = Duration::from_secs(self.tools.timeout_seconds);
        Ok(ToolCommand::new(self.program(tool)?, timeout))
    }

    /// Run a command built for `tool` and verify its declared output.
    pub async fn run(&self, tool: Tool, command: ToolCommand) -> Result<ToolOutput, ConversionError> {
        let result = self.runner.run(&command).await;

        let output = match result {
            Ok(output) => output,
            Err(e) => {
                let err = ConversionError::from_executor(tool, e);
                self.metrics.record_tool(tool, false, err.is_timeout());
                tracing::debug!(%tool, error = %err, "Tool invocation failed");
                return Err(err);
            }
        };

        if let Some(path) = &command.output {
            if let Err(err) = verify_output(path).await {
                self.metrics.record_tool(tool, false, false);
                return Err(err);
            }
        }

        self.metrics.record_tool(tool, true, false);
        Ok(output)
    }

    /// Decode, post-process, fit, and encode a raster intermediate.
    pub async fn finish(
        &self,
        raster_path: &Path,
        options: &ThumbnailOptions,
        post: PostProcess,
    ) -> Result<Vec<u8>, ConversionError> {
        raster::render_file(raster_path, options, self.config.allow_enlarge, post).await
    }

    /// Note that a tier failed and the next one is being tried.
    pub fn fell_back(&self, from: &str, err: &ConversionError) {
        self.metrics.record_fallback();
        tracing::info!(tier = from, error = %err, "Conversion tier failed, trying next fallback");
    }
}

/// Check that a tool actually wrote a usable file.
pub async fn verify_output(path: &Path) -> Result<(), ConversionError> {
    match tokio::fs::metadata(path).await {
        Ok(m) if m.len() > 0 => Ok(()),
        Ok(_) => Err(ConversionError::OutputEmpty {
            path: path.to_path_buf(),
        }),
        Err(_) => Err(ConversionError::OutputMissing {
            path: path.to_path_buf(),
        }),
    }
}

/// First non-empty file among `candidates`.
pub async fn first_non_empty(candidates: &[&Path]) -> Option<PathBuf> {
    for path in candidates {
        if is_non_empty_file(path).await {
            return Some(path.to_path_buf());
        }
    }
    None
}

/// A conversion pipeline for one MIME category.
#[async_trait]
pub trait Pipeline: Send + Sync + std::fmt::Debug {
    /// Category handled.
    fn category(&self) -> MimeCategory;

    /// Render a thumbnail.
    async fn render(
        &self,
        ctx: &PipelineContext<'_>,
        request: &RenderRequest<'_>,
    ) -> Result<Rendered, ConversionError>;
}

/// The built-in pipelines.
pub fn default_pipelines() -> Vec<Box<dyn Pipeline>> {
    vec![
        Box::new(image::ImagePipeline),
        Box::new(video::VideoPipeline),
        Box::new(pdf::PdfPipeline),
        Box::new(eps::EpsPipeline),
        Box::new(svg::SvgPipeline),
    ]
}

/// `source[0]`: first page or frame, ImageMagick syntax.
pub(crate) fn first_page(path: &Path) -> String {
    format!("{}[0]", path.to_string_lossy())
}

/// `png:path`: force PNG output regardless of extension.
pub(crate) fn png_out(path: &Path) -> String {
    format!("png:{}", path.to_string_lossy())
}
