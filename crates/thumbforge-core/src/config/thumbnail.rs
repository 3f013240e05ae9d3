//! Thumbnail defaults and pipeline tuning.
//!
//! The DPI tiers and the raster dimension ceiling are empirically chosen to
//! keep Ghostscript and ImageMagick under their memory limits.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::types::thumbnail::{FitMode, SizePreset, ThumbnailFormat};

/// Thumbnail generation configuration.
#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
pub struct ThumbnailConfig {
    /// Output format when a request does not name one.
    #[serde(default)]
    pub default_format: ThumbnailFormat,
    /// Encoder quality for lossy formats.
    #[serde(default = "default_quality")]
    #[validate(range(min = 1, max = 100))]
    pub default_quality: u8,
    /// Fit policy when a request does not name one.
    #[serde(default)]
    pub default_fit: FitMode,
    /// Presets generated eagerly for fast categories at upload time.
    #[serde(default = "default_upload_presets")]
    pub upload_presets: Vec<SizePreset>,
    /// Preset enqueued for slow categories at upload time.
    #[serde(default = "default_queued_preset")]
    pub queued_preset: SizePreset,
    /// Largest width/height a caller may request.
    #[serde(default = "default_max_dimension")]
    #[validate(range(min = 16, max = 8192))]
    pub max_dimension: u32,
    /// Whether images smaller than the target box may be upscaled.
    #[serde(default)]
    pub allow_enlarge: bool,

    /// Rasterization density for PDF page 1.
    #[serde(default = "default_pdf_density")]
    #[validate(range(min = 36, max = 1200))]
    pub pdf_density: u32,
    /// PDF page 1 is rasterized at this multiple of the target size.
    #[serde(default = "default_pdf_scale_factor")]
    #[validate(range(min = 1.0, max = 4.0))]
    pub pdf_scale_factor: f32,
    /// Channel value at or below which a border pixel counts as black.
    #[serde(default = "default_black_threshold")]
    pub black_border_threshold: u8,

    /// DPI for EPS rasterization of ordinary targets.
    #[serde(default = "default_eps_dpi")]
    #[validate(range(min = 36, max = 2400))]
    pub eps_dpi: u32,
    /// DPI for EPS rasterization of large targets.
    #[serde(default = "default_eps_high_dpi")]
    #[validate(range(min = 36, max = 2400))]
    pub eps_high_dpi: u32,
    /// Targets with either side at or above this use `eps_high_dpi`.
    #[serde(default = "default_eps_high_threshold")]
    pub eps_high_dpi_threshold: u32,
    /// Hard ceiling on intermediate raster width/height.
    #[serde(default = "default_max_raster")]
    #[validate(range(min = 256, max = 65535))]
    pub max_raster_dimension: u32,
    /// Density for the EPS lower-fidelity fallback rasterization.
    #[serde(default = "default_eps_fallback_density")]
    pub eps_fallback_density: u32,

    /// Density for the SVG fallback rasterization.
    #[serde(default = "default_svg_fallback_density")]
    pub svg_fallback_density: u32,

    /// Duration assumed when a video cannot be probed.
    #[serde(default = "default_video_duration")]
    pub default_video_duration_seconds: f64,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            default_format: ThumbnailFormat::default(),
            default_quality: default_quality(),
            default_fit: FitMode::default(),
            upload_presets: default_upload_presets(),
            queued_preset: default_queued_preset(),
            max_dimension: default_max_dimension(),
            allow_enlarge: false,
            pdf_density: default_pdf_density(),
            pdf_scale_factor: default_pdf_scale_factor(),
            black_border_threshold: default_black_threshold(),
            eps_dpi: default_eps_dpi(),
            eps_high_dpi: default_eps_high_dpi(),
            eps_high_dpi_threshold: default_eps_high_threshold(),
            max_raster_dimension: default_max_raster(),
            eps_fallback_density: default_eps_fallback_density(),
            svg_fallback_density: default_svg_fallback_density(),
            default_video_duration_seconds: default_video_duration(),
        }
    }
}

fn default_quality() -> u8 {
    80
}

fn default_upload_presets() -> Vec<SizePreset> {
    vec![SizePreset::Small, SizePreset::Medium, SizePreset::Large]
}

fn default_queued_preset() -> SizePreset {
    SizePreset::Medium
}

fn default_max_dimension() -> u32 {
    4096
}

fn default_pdf_density() -> u32 {
    150
}

fn default_pdf_scale_factor() -> f32 {
    2.5
}

fn default_black_threshold() -> u8 {
    24
}

fn default_eps_dpi() -> u32 {
    300
}

fn default_eps_high_dpi() -> u32 {
    600
}

fn default_eps_high_threshold() -> u32 {
    1200
}

fn default_max_raster() -> u32 {
    16384
}

fn default_eps_fallback_density() -> u32 {
    150
}

fn default_svg_fallback_density() -> u32 {
    300
}

fn default_video_duration() -> f64 {
    10.0
}
