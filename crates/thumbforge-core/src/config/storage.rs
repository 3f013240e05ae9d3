//! Storage layout configuration: where originals live, where thumbnails go,
//! and how logical contexts map onto directories.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Logical context used for thumbnail output directories.
pub const THUMBNAIL_CONTEXT: &str = "thumbnails";

/// Filesystem layout configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Base directory that relative source paths are resolved against.
    #[serde(default = "default_files_root")]
    pub files_root: PathBuf,
    /// Root directory of the thumbnail cache.
    #[serde(default = "default_thumbnails_root")]
    pub thumbnails_root: PathBuf,
    /// URL prefix under which `thumbnails_root` is served.
    #[serde(default = "default_public_url_prefix")]
    pub public_url_prefix: String,
    /// Scratch directory for pipeline intermediates (defaults to the OS temp dir).
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
    /// Version tag of the mapping table, bumped when the layout changes.
    #[serde(default = "default_mapping_version")]
    pub mapping_version: u32,
    /// Logical context -> directory template relative to `thumbnails_root`.
    ///
    /// Templates may use `{size}`, `{category}` and `{hint0}`, `{hint1}`, ...
    #[serde(default = "default_path_mappings")]
    pub path_mappings: HashMap<String, String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            files_root: default_files_root(),
            thumbnails_root: default_thumbnails_root(),
            public_url_prefix: default_public_url_prefix(),
            temp_dir: None,
            mapping_version: default_mapping_version(),
            path_mappings: default_path_mappings(),
        }
    }
}

impl StorageConfig {
    /// Resolve the effective scratch directory.
    pub fn effective_temp_dir(&self) -> PathBuf {
        self.temp_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("thumbforge"))
    }
}

fn default_files_root() -> PathBuf {
    PathBuf::from("./data/files")
}

fn default_thumbnails_root() -> PathBuf {
    PathBuf::from("./data/thumbnails")
}

fn default_public_url_prefix() -> String {
    "/thumbnails".to_string()
}

fn default_mapping_version() -> u32 {
    1
}

fn default_path_mappings() -> HashMap<String, String> {
    HashMap::from([(THUMBNAIL_CONTEXT.to_string(), "{size}".to_string())])
}
