//! Resolution of stored source paths to absolute file paths.

use std::path::{Component, Path, PathBuf};

use thumbforge_core::config::storage::StorageConfig;
use thumbforge_core::error::AppError;
use thumbforge_core::result::AppResult;

/// Turns the source path recorded for a file into an absolute path.
///
/// Relative paths are taken relative to the configured files root and may
/// not climb out of it. Absolute paths are used as given.
#[derive(Debug, Clone)]
pub struct SourceLocator {
    files_root: PathBuf,
}

impl SourceLocator {
    /// Create a locator rooted at `files_root`.
    pub fn new(files_root: impl Into<PathBuf>) -> Self {
        Self {
            files_root: files_root.into(),
        }
    }

    /// Build from storage configuration.
    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(config.files_root.clone())
    }

    /// Root that relative paths are resolved against.
    pub fn files_root(&self) -> &Path {
        &self.files_root
    }

    /// Absolute path of a source file.
    pub fn resolve(&self, source_path: &Path) -> AppResult<PathBuf> {
        if source_path.as_os_str().is_empty() {
            return Err(AppError::validation("Source path is empty"));
        }
        if source_path.is_absolute() {
            return Ok(source_path.to_path_buf());
        }
        if source_path
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(AppError::validation(format!(
                "Source path '{}' escapes the files root",
                source_path.display()
            )));
        }
        Ok(self.files_root.join(source_path))
    }
}
