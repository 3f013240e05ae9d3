//! Startup detection of external conversion tools.
//!
//! Detection runs once. The resulting [`CapabilitySet`] is immutable and
//! shared by reference; pipelines never look at `PATH` themselves.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thumbforge_core::config::tools::ToolsConfig;

use crate::executor::{ProcessRunner, ToolCommand};

/// External tool families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    /// ImageMagick.
    RasterProcessor,
    /// Ghostscript.
    PdfRasterizer,
    /// rsvg-convert.
    VectorRenderer,
    /// ffmpeg.
    FrameExtractor,
}

impl Tool {
    /// All tool families.
    pub const ALL: [Tool; 4] = [
        Self::RasterProcessor,
        Self::PdfRasterizer,
        Self::VectorRenderer,
        Self::FrameExtractor,
    ];

    /// Candidate programs in preference order.
    pub fn candidates(&self, config: &ToolsConfig) -> Vec<String> {
        match self {
            Self::RasterProcessor => std::iter::once(config.magick.clone())
                .chain(config.magick_fallbacks.iter().cloned())
                .collect(),
            Self::PdfRasterizer => vec![config.ghostscript.clone()],
            Self::VectorRenderer => vec![config.rsvg_convert.clone()],
            Self::FrameExtractor => vec![config.ffmpeg.clone()],
        }
    }

    /// Arguments of the harmless version probe.
    fn version_args(&self) -> &'static [&'static str] {
        match self {
            Self::RasterProcessor | Self::FrameExtractor => &["-version"],
            Self::PdfRasterizer | Self::VectorRenderer => &["--version"],
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RasterProcessor => "raster processor",
            Self::PdfRasterizer => "PDF rasterizer",
            Self::VectorRenderer => "vector renderer",
            Self::FrameExtractor => "frame extractor",
        };
        f.write_str(name)
    }
}

/// Tools that answered the startup probe, with the program that answered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet {
    programs: BTreeMap<Tool, String>,
}

impl CapabilitySet {
    /// No tools available.
    pub fn none() -> Self {
        Self::default()
    }

    /// Every tool available under its primary configured name.
    pub fn all(config: &ToolsConfig) -> Self {
        let programs = Tool::ALL
            .iter()
            .filter_map(|tool| {
                tool.candidates(config)
                    .into_iter()
                    .next()
                    .map(|program| (*tool, program))
            })
            .collect();
        Self { programs }
    }

    /// Same set with `tool` available as `program`.
    pub fn with(mut self, tool: Tool, program: impl Into<String>) -> Self {
        self.programs.insert(tool, program.into());
        self
    }

    /// Same set with `tool` removed.
    pub fn without(mut self, tool: Tool) -> Self {
        self.programs.remove(&tool);
        self
    }

    /// Whether `tool` is callable.
    pub fn has(&self, tool: Tool) -> bool {
        self.programs.contains_key(&tool)
    }

    /// Program to invoke for `tool`.
    pub fn program(&self, tool: Tool) -> Option<&str> {
        self.programs.get(&tool).map(String::as_str)
    }

    /// Per-tool availability, in [`Tool::ALL`] order.
    pub fn summary(&self) -> Vec<(Tool, Option<&str>)> {
        Tool::ALL.iter().map(|t| (*t, self.program(*t))).collect()
    }
}

/// Probes the host for tools.
#[derive(Debug, Clone)]
pub struct CapabilityDetector {
    runner: Arc<dyn ProcessRunner>,
    config: ToolsConfig,
}

impl CapabilityDetector {
    /// Create a detector.
    pub fn new(runner: Arc<dyn ProcessRunner>, config: ToolsConfig) -> Self {
        Self { runner, config }
    }

    /// Whether any candidate program of `tool` answers its version probe.
    pub async fn probe(&self, tool: Tool) -> bool {
        self.probe_program(tool).await.is_some()
    }

    /// First candidate program of `tool` that answers, if any.
    pub async fn probe_program(&self, tool: Tool) -> Option<String> {
        let timeout = Duration::from_secs(self.config.probe_timeout_seconds);

        for program in tool.candidates(&self.config) {
            let cmd = ToolCommand::new(program.clone(), timeout).args(tool.version_args().iter().copied());
            match self.runner.run(&cmd).await {
                Ok(_) => return Some(program),
                Err(e) => {
                    tracing::debug!(%tool, %program, error = %e, "Tool probe failed");
                }
            }
        }
        None
    }

    /// Probe every tool and freeze the result.
    ///
    /// A missing tool is logged once and only disables the tiers that need it.
    pub async fn detect(&self) -> CapabilitySet {
        let mut set = CapabilitySet::none();

        for tool in Tool::ALL {
            match self.probe_program(tool).await {
                Some(program) => {
                    tracing::info!(%tool, %program, "Conversion tool available");
                    set = set.with(tool, program);
                }
                None => {
                    tracing::warn!(
                        %tool,
                        candidates = ?tool.candidates(&self.config),
                        "Conversion tool not found; dependent pipeline tiers are disabled"
                    );
                }
            }
        }

        set
    }
}
