//! Logical-context to directory mapping.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::result::AppResult;

/// Everything a resolver may use to pick a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRequest {
    /// Logical context, e.g. `"thumbnails"`.
    pub context: String,
    /// MIME type of the source file.
    pub mime_type: String,
    /// `"{width}x{height}"` of the output.
    pub size_spec: String,
    /// Free-form naming hints supplied by the host.
    pub hints: Vec<String>,
}

impl PathRequest {
    /// Request without naming hints.
    pub fn new(
        context: impl Into<String>,
        mime_type: impl Into<String>,
        size_spec: impl Into<String>,
    ) -> Self {
        Self {
            context: context.into(),
            mime_type: mime_type.into(),
            size_spec: size_spec.into(),
            hints: Vec::new(),
        }
    }

    /// Same request with naming hints.
    pub fn with_hints(mut self, hints: Vec<String>) -> Self {
        self.hints = hints;
        self
    }
}

/// Maps a logical context to a physical directory.
///
/// There is exactly one implementation per deployment; the engine never
/// builds output paths on its own.
#[async_trait]
pub trait PathResolver: Send + Sync + std::fmt::Debug + 'static {
    /// Absolute directory for the given request.
    fn resolve(&self, request: &PathRequest) -> AppResult<PathBuf>;

    /// Create the directory (and parents) if missing.
    async fn ensure_directory(&self, path: &Path) -> AppResult<()>;

    /// Public URL for a file below a resolved directory.
    fn public_url(&self, path: &Path) -> AppResult<String>;
}
