//! Filesystem thumbnail cache.
//!
//! The cache key is the path itself: `{dir}/{fileId}_{w}x{h}.{format}` with
//! `dir` chosen by the [`PathResolver`]. A hit is a regular file with
//! non-zero length. Writers go through a `.partial` sibling and a rename,
//! so readers never see a half-written entry.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thumbforge_core::config::storage::THUMBNAIL_CONTEXT;
use thumbforge_core::error::{AppError, ErrorKind};
use thumbforge_core::result::AppResult;
use thumbforge_core::traits::path_resolver::{PathRequest, PathResolver};
use thumbforge_core::types::{FileId, ThumbnailOptions};
use uuid::Uuid;

use crate::temp::is_non_empty_file;

/// Suffix of in-progress writes.
const PARTIAL_SUFFIX: &str = ".partial";

/// Location of one cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Directory holding the entry.
    pub dir: PathBuf,
    /// Final path of the entry.
    pub path: PathBuf,
    /// File name, i.e. the cache key.
    pub file_name: String,
}

/// Thumbnail cache over a [`PathResolver`].
#[derive(Debug, Clone)]
pub struct ThumbnailCache {
    resolver: Arc<dyn PathResolver>,
    root: PathBuf,
}

impl ThumbnailCache {
    /// Create a cache. `root` must contain every directory `resolver` returns.
    pub fn new(resolver: Arc<dyn PathResolver>, root: PathBuf) -> Self {
        Self { resolver, root }
    }

    /// Resolver in use.
    pub fn resolver(&self) -> &Arc<dyn PathResolver> {
        &self.resolver
    }

    /// Deterministic location for `(file, size, format)`.
    pub fn locate(
        &self,
        file_id: FileId,
        mime_type: &str,
        options: &ThumbnailOptions,
    ) -> AppResult<CacheEntry> {
        let request = PathRequest::new(THUMBNAIL_CONTEXT, mime_type, options.size_spec());
        let dir = self.resolver.resolve(&request)?;
        let file_name = options.cache_file_name(file_id);
        Ok(CacheEntry {
            path: dir.join(&file_name),
            dir,
            file_name,
        })
    }

    /// Whether the entry exists with content.
    pub async fn is_hit(&self, entry: &CacheEntry) -> bool {
        is_non_empty_file(&entry.path).await
    }

    /// Public URL of an entry.
    pub fn url(&self, entry: &CacheEntry) -> AppResult<String> {
        self.resolver.public_url(&entry.path)
    }

    fn partial_path(entry: &CacheEntry) -> PathBuf {
        entry.dir.join(format!(
            "{}.{}{PARTIAL_SUFFIX}",
            entry.file_name,
            Uuid::new_v4().simple()
        ))
    }

    /// Atomically write encoded bytes as the entry. Returns bytes written.
    pub async fn store_bytes(&self, entry: &CacheEntry, bytes: &[u8]) -> AppResult<u64> {
        if bytes.is_empty() {
            return Err(AppError::validation("Refusing to cache an empty thumbnail"));
        }
        self.resolver.ensure_directory(&entry.dir).await?;

        let partial = Self::partial_path(entry);
        let result = async {
            tokio::fs::write(&partial, bytes).await?;
            tokio::fs::rename(&partial, &entry.path).await
        }
        .await;

        self.finish(entry, &partial, result, bytes.len() as u64).await
    }

    /// Atomically install an already-encoded file as the entry.
    pub async fn store_file(&self, entry: &CacheEntry, source: &Path) -> AppResult<u64> {
        if !is_non_empty_file(source).await {
            return Err(AppError::validation(format!(
                "Refusing to cache missing or empty file '{}'",
                source.display()
            )));
        }
        self.resolver.ensure_directory(&entry.dir).await?;

        let partial = Self::partial_path(entry);
        let result = async {
            let copied = tokio::fs::copy(source, &partial).await?;
            tokio::fs::rename(&partial, &entry.path).await?;
            Ok::<u64, std::io::Error>(copied)
        }
        .await;

        match result {
            Ok(copied) => Ok(copied),
            Err(e) => self.finish(entry, &partial, Err(e), 0).await,
        }
    }

    async fn finish(
        &self,
        entry: &CacheEntry,
        partial: &Path,
        result: std::io::Result<()>,
        written: u64,
    ) -> AppResult<u64> {
        match result {
            Ok(()) => {
                tracing::debug!(path = %entry.path.display(), bytes = written, "Cached thumbnail");
                Ok(written)
            }
            Err(e) => {
                remove_quietly(partial).await;
                Err(AppError::with_source(
                    ErrorKind::Storage,
                    format!("Failed to write thumbnail '{}'", entry.path.display()),
                    e,
                ))
            }
        }
    }

    /// Remove an entry and any orphaned `.partial` siblings.
    pub async fn purge(&self, entry: &CacheEntry) -> AppResult<usize> {
        let mut removed = 0;
        let prefix = format!("{}.", entry.file_name);

        let mut dir = match tokio::fs::read_dir(&entry.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        while let Some(item) = dir.next_entry().await? {
            let name = item.file_name().to_string_lossy().into_owned();
            let is_target = name == entry.file_name
                || (name.starts_with(&prefix) && name.ends_with(PARTIAL_SUFFIX));
            if is_target && remove_quietly(&item.path()).await {
                removed += 1;
            }
        }

        Ok(removed)
    }

    /// Remove every cached size and format of a file. Returns files removed.
    pub async fn delete_all(&self, file_id: FileId) -> AppResult<usize> {
        let prefix = format!("{file_id}_");
        let mut removed = 0;
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(item) = entries.next_entry().await? {
                let file_type = item.file_type().await?;
                if file_type.is_dir() {
                    pending.push(item.path());
                } else if item.file_name().to_string_lossy().starts_with(&prefix)
                    && remove_quietly(&item.path()).await
                {
                    removed += 1;
                }
            }
        }

        tracing::debug!(%file_id, removed, "Deleted cached thumbnails");
        Ok(removed)
    }
}

/// Remove a file, logging failures. Returns whether a file was removed.
async fn remove_quietly(path: &Path) -> bool {
    match tokio::fs::remove_file(path).await {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove cache file");
            false
        }
    }
}
