//! Thumbnail sizes, formats, fit policies, options, and results.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::thumbnail::ThumbnailConfig;
use crate::error::AppError;
use crate::types::id::FileId;

/// Fixed size presets used for proactive generation and request-time lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizePreset {
    /// 150×150.
    Small,
    /// 300×300.
    Medium,
    /// 600×600.
    Large,
    /// 1200×1200.
    Xlarge,
    /// 2400×2400.
    Xxlarge,
}

impl SizePreset {
    /// All presets, smallest first.
    pub const ALL: [SizePreset; 5] = [
        Self::Small,
        Self::Medium,
        Self::Large,
        Self::Xlarge,
        Self::Xxlarge,
    ];

    /// Width and height of the preset box.
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Self::Small => (150, 150),
            Self::Medium => (300, 300),
            Self::Large => (600, 600),
            Self::Xlarge => (1200, 1200),
            Self::Xxlarge => (2400, 2400),
        }
    }

    /// Lowercase preset name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
            Self::Xlarge => "xlarge",
            Self::Xxlarge => "xxlarge",
        }
    }

    /// Look up a preset by name; unknown names fall back to `medium`.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "small" => Self::Small,
            "medium" => Self::Medium,
            "large" => Self::Large,
            "xlarge" => Self::Xlarge,
            "xxlarge" => Self::Xxlarge,
            _ => Self::Medium,
        }
    }
}

impl fmt::Display for SizePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Encoded output format of a thumbnail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThumbnailFormat {
    /// PNG (lossless).
    Png,
    /// JPEG.
    #[serde(alias = "jpeg")]
    Jpg,
    /// WebP.
    #[default]
    Webp,
}

impl ThumbnailFormat {
    /// All formats.
    pub const ALL: [ThumbnailFormat; 3] = [Self::Png, Self::Jpg, Self::Webp];

    /// File extension used in the cache file name.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpg => "jpg",
            Self::Webp => "webp",
        }
    }

    /// MIME type served for this format.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpg => "image/jpeg",
            Self::Webp => "image/webp",
        }
    }

    /// Whether the format can carry an alpha channel.
    pub fn supports_alpha(&self) -> bool {
        !matches!(self, Self::Jpg)
    }
}

impl FromStr for ThumbnailFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "jpg" | "jpeg" => Ok(Self::Jpg),
            "webp" => Ok(Self::Webp),
            other => Err(AppError::validation(format!(
                "Unsupported thumbnail format '{other}'"
            ))),
        }
    }
}

impl fmt::Display for ThumbnailFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// How the source aspect ratio maps onto the target box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitMode {
    /// Fill the box exactly, cropping the overflow from the center.
    #[default]
    Cover,
    /// Fit inside the box and pad the remainder.
    Contain,
    /// Stretch to the box, ignoring aspect ratio.
    Fill,
    /// Fit inside the box without padding.
    Inside,
    /// Smallest size that covers the box, no cropping.
    Outside,
}

impl FromStr for FitMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cover" => Ok(Self::Cover),
            "contain" => Ok(Self::Contain),
            "fill" => Ok(Self::Fill),
            "inside" => Ok(Self::Inside),
            "outside" => Ok(Self::Outside),
            other => Err(AppError::validation(format!("Unknown fit mode '{other}'"))),
        }
    }
}

/// Target geometry and encoding of a thumbnail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThumbnailOptions {
    /// Target box width.
    pub width: u32,
    /// Target box height.
    pub height: u32,
    /// Encoder quality (1-100) for lossy formats.
    pub quality: u8,
    /// Output format.
    pub format: ThumbnailFormat,
    /// Fit policy.
    pub fit: FitMode,
}

impl ThumbnailOptions {
    /// Options for a preset using the configured defaults.
    pub fn from_preset(preset: SizePreset, config: &ThumbnailConfig) -> Self {
        let (width, height) = preset.dimensions();
        Self {
            width,
            height,
            quality: config.default_quality,
            format: config.default_format,
            fit: config.default_fit,
        }
    }

    /// Same options with another format.
    pub fn with_format(mut self, format: ThumbnailFormat) -> Self {
        self.format = format;
        self
    }

    /// Same options with another fit policy.
    pub fn with_fit(mut self, fit: FitMode) -> Self {
        self.fit = fit;
        self
    }

    /// `"{width}x{height}"`.
    pub fn size_spec(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }

    /// Deterministic cache file name: `{fileId}_{width}x{height}.{format}`.
    ///
    /// External callers probe for this name directly, so it must never change.
    pub fn cache_file_name(&self, file_id: FileId) -> String {
        format!(
            "{}_{}x{}.{}",
            file_id,
            self.width,
            self.height,
            self.format.extension()
        )
    }

    /// Reject zero or oversized dimensions and out-of-range quality.
    pub fn validate(&self, max_dimension: u32) -> Result<(), AppError> {
        if self.width == 0 || self.height == 0 {
            return Err(AppError::validation("Thumbnail dimensions must be non-zero"));
        }
        if self.width > max_dimension || self.height > max_dimension {
            return Err(AppError::validation(format!(
                "Thumbnail dimensions {}x{} exceed the {max_dimension}px limit",
                self.width, self.height
            )));
        }
        if !(1..=100).contains(&self.quality) {
            return Err(AppError::validation("Quality must be between 1 and 100"));
        }
        Ok(())
    }
}

/// Pipeline category a MIME type is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MimeCategory {
    /// Raster image.
    Image,
    /// Video container.
    Video,
    /// PDF document.
    Pdf,
    /// Encapsulated PostScript / PostScript.
    Eps,
    /// SVG drawing.
    Svg,
    /// No pipeline exists.
    Unsupported,
}

impl MimeCategory {
    /// Route a MIME type (parameters such as `; charset=` are ignored).
    pub fn from_mime(mime_type: &str) -> Self {
        let essence = mime_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match essence.as_str() {
            "image/svg+xml" => Self::Svg,
            "application/pdf" | "application/x-pdf" => Self::Pdf,
            "application/postscript" | "application/eps" | "application/x-eps" | "image/eps"
            | "image/x-eps" => Self::Eps,
            m if m.starts_with("video/") => Self::Video,
            m if m.starts_with("image/") => Self::Image,
            _ => Self::Unsupported,
        }
    }

    /// Categories cheap enough to generate inside the request.
    pub fn is_fast(&self) -> bool {
        matches!(self, Self::Image | Self::Svg)
    }

    /// Lowercase category name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Pdf => "pdf",
            Self::Eps => "eps",
            Self::Svg => "svg",
            Self::Unsupported => "unsupported",
        }
    }
}

/// Classification of a failed generation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThumbnailErrorKind {
    /// No pipeline for the MIME type.
    UnsupportedType,
    /// Source missing, empty, or not a regular file.
    SourceInvalid,
    /// Requested geometry or quality is invalid.
    InvalidOptions,
    /// Every tier needed a tool that was not detected.
    ToolUnavailable,
    /// Tool invocations failed or timed out on every tier.
    ToolFailed,
    /// Rasterization succeeded but no usable output could be written.
    PostProcessing,
    /// Anything else.
    Internal,
}

impl ThumbnailErrorKind {
    /// Whether a later attempt could succeed without outside changes.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::UnsupportedType | Self::SourceInvalid | Self::InvalidOptions
        )
    }
}

/// Error carried inside a failed [`ThumbnailResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThumbnailError {
    /// Classification.
    pub kind: ThumbnailErrorKind,
    /// Human-readable description.
    pub message: String,
}

impl fmt::Display for ThumbnailError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Outcome of one generation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThumbnailResult {
    /// Source file.
    pub file_id: FileId,
    /// Whether a usable thumbnail exists at `thumbnail_path`.
    pub success: bool,
    /// Absolute path of the cached thumbnail.
    pub thumbnail_path: Option<PathBuf>,
    /// Public URL of the cached thumbnail.
    pub thumbnail_url: Option<String>,
    /// Failure details.
    pub error: Option<ThumbnailError>,
    /// Wall-clock time spent.
    pub processing_time_ms: u64,
    /// Whether the result was served from an existing cache entry.
    #[serde(default)]
    pub from_cache: bool,
    /// Encoding of the file at `thumbnail_path`, when it could be identified.
    ///
    /// Normally the requested format; a last-resort raster installed as-is
    /// keeps its own encoding.
    #[serde(default)]
    pub format: Option<ThumbnailFormat>,
}

impl ThumbnailResult {
    /// A successful result.
    pub fn succeeded(
        file_id: FileId,
        path: PathBuf,
        url: Option<String>,
        processing_time_ms: u64,
        from_cache: bool,
    ) -> Self {
        Self {
            file_id,
            success: true,
            thumbnail_path: Some(path),
            thumbnail_url: url,
            error: None,
            processing_time_ms,
            from_cache,
            format: None,
        }
    }

    /// Record the encoding of the installed file.
    pub fn with_format(mut self, format: Option<ThumbnailFormat>) -> Self {
        self.format = format;
        self
    }

    /// MIME type of the installed file, `application/octet-stream` when
    /// its encoding is unknown.
    pub fn content_type(&self) -> &'static str {
        self.format
            .map(|f| f.mime_type())
            .unwrap_or("application/octet-stream")
    }

    /// A failed result.
    pub fn failed(
        file_id: FileId,
        kind: ThumbnailErrorKind,
        message: impl Into<String>,
        processing_time_ms: u64,
    ) -> Self {
        Self {
            file_id,
            success: false,
            thumbnail_path: None,
            thumbnail_url: None,
            error: Some(ThumbnailError {
                kind,
                message: message.into(),
            }),
            processing_time_ms,
            from_cache: false,
            format: None,
        }
    }

    /// Error kind of a failed result.
    pub fn error_kind(&self) -> Option<ThumbnailErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_preset_falls_back_to_medium() {
        assert_eq!(SizePreset::from_name("giant"), SizePreset::Medium);
        assert_eq!(SizePreset::from_name("LARGE"), SizePreset::Large);
        assert_eq!(SizePreset::Xxlarge.dimensions(), (2400, 2400));
    }

    #[test]
    fn test_cache_file_name() {
        let file_id: FileId = "6f1c3f3e-8a6b-4a52-9d0e-0c8e0a8a3b11".parse().expect("uuid");
        let options = ThumbnailOptions::from_preset(SizePreset::Medium, &ThumbnailConfig::default());
        assert_eq!(
            options.cache_file_name(file_id),
            "6f1c3f3e-8a6b-4a52-9d0e-0c8e0a8a3b11_300x300.webp"
        );
        assert_eq!(
            options.with_format(ThumbnailFormat::Jpg).cache_file_name(file_id),
            "6f1c3f3e-8a6b-4a52-9d0e-0c8e0a8a3b11_300x300.jpg"
        );
    }

    #[test]
    fn test_mime_routing() {
        assert_eq!(MimeCategory::from_mime("image/jpeg"), MimeCategory::Image);
        assert_eq!(MimeCategory::from_mime("image/svg+xml"), MimeCategory::Svg);
        assert_eq!(MimeCategory::from_mime("application/pdf"), MimeCategory::Pdf);
        assert_eq!(
            MimeCategory::from_mime("application/postscript"),
            MimeCategory::Eps
        );
        assert_eq!(MimeCategory::from_mime("image/x-eps"), MimeCategory::Eps);
        assert_eq!(
            MimeCategory::from_mime("video/mp4; codecs=avc1"),
            MimeCategory::Video
        );
        assert_eq!(
            MimeCategory::from_mime("application/zip"),
            MimeCategory::Unsupported
        );
    }

    #[test]
    fn test_options_validation() {
        let mut options =
            ThumbnailOptions::from_preset(SizePreset::Small, &ThumbnailConfig::default());
        assert!(options.validate(4096).is_ok());
        options.width = 0;
        assert!(options.validate(4096).is_err());
        options.width = 5000;
        assert!(options.validate(4096).is_err());
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("JPEG".parse::<ThumbnailFormat>().expect("fmt"), ThumbnailFormat::Jpg);
        assert!("gif".parse::<ThumbnailFormat>().is_err());
    }

    #[test]
    fn test_content_type_follows_installed_format() {
        let file_id = FileId::new();
        let result = ThumbnailResult::succeeded(file_id, PathBuf::from("/t/a.webp"), None, 1, false);
        assert_eq!(result.content_type(), "application/octet-stream");
        assert_eq!(
            result.with_format(Some(ThumbnailFormat::Png)).content_type(),
            "image/png"
        );
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(!ThumbnailErrorKind::SourceInvalid.is_retryable());
        assert!(!ThumbnailErrorKind::UnsupportedType.is_retryable());
        assert!(ThumbnailErrorKind::ToolFailed.is_retryable());
    }
}
