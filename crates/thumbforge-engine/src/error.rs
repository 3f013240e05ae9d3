//! Conversion pipeline errors.
//!
//! Every failure inside a pipeline is a [`ConversionError`]. Pipelines use
//! them to decide whether to move on to the next fallback tier; the engine
//! turns whatever is left into a failed `ThumbnailResult`.

use std::path::PathBuf;

use thiserror::Error;
use thumbforge_core::error::AppError;
use thumbforge_core::types::ThumbnailErrorKind;

use crate::capability::Tool;
use crate::executor::ExecutorError;

/// Unified error type for conversion operations.
#[derive(Debug, Error)]
pub enum ConversionError {
    // --- Input errors ---
    /// No pipeline handles the MIME type.
    #[error("Unsupported media type: {mime_type}")]
    UnsupportedType {
        /// The rejected MIME type.
        mime_type: String,
    },

    /// Source file does not exist.
    #[error("Source file not found: {path}")]
    SourceMissing {
        /// The missing path.
        path: PathBuf,
    },

    /// Source file has zero length.
    #[error("Source file is empty: {path}")]
    SourceEmpty {
        /// The empty file.
        path: PathBuf,
    },

    /// Source path is not a regular file.
    #[error("Source is not a regular file: {path}")]
    SourceNotFile {
        /// The offending path.
        path: PathBuf,
    },

    /// Requested options are unusable.
    #[error("Invalid thumbnail options: {0}")]
    InvalidOptions(String),

    // --- Tool errors ---
    /// A required tool was not detected at startup.
    #[error("{tool} is not available")]
    ToolUnavailable {
        /// The missing tool family.
        tool: Tool,
    },

    /// A tool invocation exceeded its timeout.
    #[error("{tool} timed out after {seconds}s")]
    ToolTimeout {
        /// Tool family.
        tool: Tool,
        /// Timeout that fired.
        seconds: u64,
    },

    /// A tool invocation failed.
    #[error("{tool} failed: {reason}")]
    ToolFailed {
        /// Tool family.
        tool: Tool,
        /// Exit code and stderr excerpt.
        reason: String,
    },

    /// A tool reported success but wrote nothing.
    #[error("Expected output not created: {path}")]
    OutputMissing {
        /// Expected output path.
        path: PathBuf,
    },

    /// A tool reported success but wrote an empty file.
    #[error("Output file is empty (0 bytes): {path}")]
    OutputEmpty {
        /// Path to the empty output.
        path: PathBuf,
    },

    // --- Processing errors ---
    /// In-process resize, enhance, or encode failed.
    #[error("Post-processing failed: {0}")]
    PostProcessing(String),

    /// Every fallback tier failed; carries the last error.
    #[error("All conversion tiers failed, last error: {last}")]
    AllTiersFailed {
        /// The error of the final tier.
        last: Box<ConversionError>,
    },

    // --- Generic errors ---
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decode or encode error.
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Blocking task join error.
    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl ConversionError {
    /// Wrap a runner error for `tool`.
    pub fn from_executor(tool: Tool, err: ExecutorError) -> Self {
        match err {
            ExecutorError::CommandNotFound(_) => Self::ToolUnavailable { tool },
            ExecutorError::Timeout(seconds) => Self::ToolTimeout { tool, seconds },
            ExecutorError::ProcessFailed { code, stderr } => Self::ToolFailed {
                tool,
                reason: format!("exit code {code}: {}", stderr.trim()),
            },
            ExecutorError::Io(e) => Self::ToolFailed {
                tool,
                reason: e.to_string(),
            },
        }
    }

    /// Wrap the error of the last tier that ran.
    pub fn all_tiers_failed(last: ConversionError) -> Self {
        match last {
            already @ Self::AllTiersFailed { .. } => already,
            other => Self::AllTiersFailed {
                last: Box::new(other),
            },
        }
    }

    /// Classification carried in a failed result.
    pub fn kind(&self) -> ThumbnailErrorKind {
        match self {
            Self::UnsupportedType { .. } => ThumbnailErrorKind::UnsupportedType,
            Self::SourceMissing { .. } | Self::SourceEmpty { .. } | Self::SourceNotFile { .. } => {
                ThumbnailErrorKind::SourceInvalid
            }
            Self::InvalidOptions(_) => ThumbnailErrorKind::InvalidOptions,
            Self::ToolUnavailable { .. } => ThumbnailErrorKind::ToolUnavailable,
            Self::ToolTimeout { .. }
            | Self::ToolFailed { .. }
            | Self::OutputMissing { .. }
            | Self::OutputEmpty { .. } => ThumbnailErrorKind::ToolFailed,
            Self::PostProcessing(_) | Self::Image(_) => ThumbnailErrorKind::PostProcessing,
            Self::AllTiersFailed { last } => match last.kind() {
                ThumbnailErrorKind::ToolUnavailable => ThumbnailErrorKind::ToolUnavailable,
                ThumbnailErrorKind::PostProcessing => ThumbnailErrorKind::PostProcessing,
                _ => ThumbnailErrorKind::ToolFailed,
            },
            Self::Io(_) | Self::Join(_) => ThumbnailErrorKind::Internal,
        }
    }

    /// Whether a tool timeout is anywhere in this error.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::ToolTimeout { .. } => true,
            Self::AllTiersFailed { last } => last.is_timeout(),
            _ => false,
        }
    }
}

impl From<ConversionError> for AppError {
    fn from(err: ConversionError) -> Self {
        match err.kind() {
            ThumbnailErrorKind::UnsupportedType => AppError::unsupported_media(err.to_string()),
            ThumbnailErrorKind::SourceInvalid => AppError::not_found(err.to_string()),
            ThumbnailErrorKind::InvalidOptions => AppError::validation(err.to_string()),
            ThumbnailErrorKind::ToolUnavailable => AppError::service_unavailable(err.to_string()),
            ThumbnailErrorKind::ToolFailed => AppError::external_service(err.to_string()),
            ThumbnailErrorKind::PostProcessing | ThumbnailErrorKind::Internal => {
                AppError::internal(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use thumbforge_core::error::ErrorKind;

    #[test]
    fn test_executor_mapping() {
        let err = ConversionError::from_executor(Tool::PdfRasterizer, ExecutorError::Timeout(60));
        assert!(err.is_timeout());
        assert_eq!(err.kind(), ThumbnailErrorKind::ToolFailed);

        let err = ConversionError::from_executor(
            Tool::RasterProcessor,
            ExecutorError::CommandNotFound("magick".into()),
        );
        assert_eq!(err.kind(), ThumbnailErrorKind::ToolUnavailable);
    }

    #[test]
    fn test_all_tiers_failed_does_not_nest() {
        let inner = ConversionError::ToolFailed {
            tool: Tool::PdfRasterizer,
            reason: "boom".into(),
        };
        let once = ConversionError::all_tiers_failed(inner);
        let twice = ConversionError::all_tiers_failed(once);
        match twice {
            ConversionError::AllTiersFailed { last } => {
                assert!(matches!(*last, ConversionError::ToolFailed { .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_source_errors_map_to_not_found() {
        let app: AppError = ConversionError::SourceMissing {
            path: PathBuf::from("/nope"),
        }
        .into();
        assert_eq!(app.kind, ErrorKind::NotFound);
        assert!(!ConversionError::SourceEmpty {
            path: PathBuf::from("/empty")
        }
        .kind()
        .is_retryable());
    }
}
