//! External conversion tool configuration.

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Locations and limits for the external conversion tools.
///
/// Each binary may be a bare name (looked up on `PATH`) or an absolute path.
#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// ImageMagick binary. IM7 ships `magick`; IM6 only `convert`.
    #[serde(default = "default_magick")]
    pub magick: String,
    /// Alternative raster processor binaries tried when `magick` is missing.
    #[serde(default = "default_magick_fallbacks")]
    pub magick_fallbacks: Vec<String>,
    /// Ghostscript binary.
    #[serde(default = "default_ghostscript")]
    pub ghostscript: String,
    /// librsvg command-line renderer.
    #[serde(default = "default_rsvg")]
    pub rsvg_convert: String,
    /// ffmpeg binary.
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,
    /// ffprobe binary.
    #[serde(default = "default_ffprobe")]
    pub ffprobe: String,
    /// Hard timeout for a single tool invocation.
    #[serde(default = "default_timeout")]
    #[validate(range(min = 1, max = 3600))]
    pub timeout_seconds: u64,
    /// Timeout for the startup version probe of each tool.
    #[serde(default = "default_probe_timeout")]
    #[validate(range(min = 1, max = 60))]
    pub probe_timeout_seconds: u64,
    /// ImageMagick `-limit memory` value.
    #[serde(default = "default_memory_limit")]
    pub magick_memory_limit: String,
    /// ImageMagick `-limit map` value.
    #[serde(default = "default_map_limit")]
    pub magick_map_limit: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            magick: default_magick(),
            magick_fallbacks: default_magick_fallbacks(),
            ghostscript: default_ghostscript(),
            rsvg_convert: default_rsvg(),
            ffmpeg: default_ffmpeg(),
            ffprobe: default_ffprobe(),
            timeout_seconds: default_timeout(),
            probe_timeout_seconds: default_probe_timeout(),
            magick_memory_limit: default_memory_limit(),
            magick_map_limit: default_map_limit(),
        }
    }
}

fn default_magick() -> String {
    "magick".to_string()
}

fn default_magick_fallbacks() -> Vec<String> {
    vec!["convert".to_string()]
}

fn default_ghostscript() -> String {
    "gs".to_string()
}

fn default_rsvg() -> String {
    "rsvg-convert".to_string()
}

fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe() -> String {
    "ffprobe".to_string()
}

fn default_timeout() -> u64 {
    60
}

fn default_probe_timeout() -> u64 {
    5
}

fn default_memory_limit() -> String {
    "256MiB".to_string()
}

fn default_map_limit() -> String {
    "512MiB".to_string()
}
