//! Configuration-driven [`PathResolver`].
//!
//! One versioned mapping table, keyed by logical context, replaces
//! per-backend path builders. Templates are relative to the thumbnail root
//! and may use `{size}`, `{category}` and `{hint0}`, `{hint1}`, ...

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use thumbforge_core::config::storage::StorageConfig;
use thumbforge_core::error::AppError;
use thumbforge_core::result::AppResult;
use thumbforge_core::traits::path_resolver::{PathRequest, PathResolver};
use thumbforge_core::types::MimeCategory;

/// Resolves directories below a single root from a mapping table.
#[derive(Debug, Clone)]
pub struct ConfigPathResolver {
    root: PathBuf,
    url_prefix: String,
    mappings: HashMap<String, String>,
    version: u32,
}

impl ConfigPathResolver {
    /// Build from storage configuration.
    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(
            config.thumbnails_root.clone(),
            config.public_url_prefix.clone(),
            config.path_mappings.clone(),
            config.mapping_version,
        )
    }

    /// Build from parts.
    pub fn new(
        root: PathBuf,
        url_prefix: impl Into<String>,
        mappings: HashMap<String, String>,
        version: u32,
    ) -> Self {
        Self {
            root,
            url_prefix: url_prefix.into().trim_end_matches('/').to_string(),
            mappings,
            version,
        }
    }

    /// Root every resolved directory lives under.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Version tag of the mapping table.
    pub fn version(&self) -> u32 {
        self.version
    }

    fn expand(template: &str, request: &PathRequest) -> String {
        let category = MimeCategory::from_mime(&request.mime_type);
        let mut out = template
            .replace("{size}", &request.size_spec)
            .replace("{category}", category.as_str());
        for (i, hint) in request.hints.iter().enumerate() {
            out = out.replace(&format!("{{hint{i}}}"), hint);
        }
        out
    }
}

/// Reject anything that could escape the root.
fn checked_relative(path: &str) -> AppResult<PathBuf> {
    let rel = PathBuf::from(path);
    for component in rel.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => {
                return Err(AppError::validation(format!(
                    "Mapped path '{path}' must stay below the thumbnail root"
                )));
            }
        }
    }
    Ok(rel)
}

#[async_trait]
impl PathResolver for ConfigPathResolver {
    fn resolve(&self, request: &PathRequest) -> AppResult<PathBuf> {
        let template = self.mappings.get(&request.context).ok_or_else(|| {
            AppError::configuration(format!(
                "No path mapping for context '{}' (mapping version {})",
                request.context, self.version
            ))
        })?;

        let expanded = Self::expand(template, request);
        if expanded.contains('{') {
            return Err(AppError::validation(format!(
                "Unresolved placeholder in path mapping '{template}' for context '{}'",
                request.context
            )));
        }

        Ok(self.root.join(checked_relative(&expanded)?))
    }

    async fn ensure_directory(&self, path: &Path) -> AppResult<()> {
        tokio::fs::create_dir_all(path).await.map_err(|e| {
            AppError::with_source(
                thumbforge_core::error::ErrorKind::Storage,
                format!("Failed to create directory '{}'", path.display()),
                e,
            )
        })
    }

    fn public_url(&self, path: &Path) -> AppResult<String> {
        let rel = path.strip_prefix(&self.root).map_err(|_| {
            AppError::validation(format!(
                "'{}' is not below the thumbnail root '{}'",
                path.display(),
                self.root.display()
            ))
        })?;

        let segments: Vec<String> = rel
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();

        Ok(format!("{}/{}", self.url_prefix, segments.join("/")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use thumbforge_core::config::storage::THUMBNAIL_CONTEXT;

    fn resolver() -> ConfigPathResolver {
        let mappings = HashMap::from([
            (THUMBNAIL_CONTEXT.to_string(), "{size}".to_string()),
            ("previews".to_string(), "{category}/{hint0}/{size}".to_string()),
            ("escape".to_string(), "../{size}".to_string()),
        ]);
        ConfigPathResolver::new(PathBuf::from("/srv/thumbs"), "/thumbnails/", mappings, 2)
    }

    #[test]
    fn test_resolve_default_context() {
        let dir = resolver()
            .resolve(&PathRequest::new(THUMBNAIL_CONTEXT, "image/png", "300x300"))
            .expect("resolve");
        assert_eq!(dir, PathBuf::from("/srv/thumbs/300x300"));
    }

    #[test]
    fn test_resolve_with_hints() {
        let request = PathRequest::new("previews", "application/pdf", "150x150")
            .with_hints(vec!["tenant-a".to_string()]);
        let dir = resolver().resolve(&request).expect("resolve");
        assert_eq!(dir, PathBuf::from("/srv/thumbs/pdf/tenant-a/150x150"));
    }

    #[test]
    fn test_rejects_unknown_context_and_escapes() {
        let r = resolver();
        assert!(r.resolve(&PathRequest::new("nope", "image/png", "1x1")).is_err());
        assert!(r.resolve(&PathRequest::new("escape", "image/png", "1x1")).is_err());
        assert!(r.resolve(&PathRequest::new("previews", "image/png", "1x1")).is_err());
    }

    #[test]
    fn test_public_url() {
        let url = resolver()
            .public_url(Path::new("/srv/thumbs/300x300/abc_300x300.webp"))
            .expect("url");
        assert_eq!(url, "/thumbnails/300x300/abc_300x300.webp");
        assert!(resolver().public_url(Path::new("/etc/passwd")).is_err());
    }
}
