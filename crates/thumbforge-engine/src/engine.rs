//! Conversion engine: cache check, generation lock, pipeline dispatch,
//! atomic install.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use thumbforge_core::config::AppConfig;
use thumbforge_core::config::thumbnail::ThumbnailConfig;
use thumbforge_core::config::tools::ToolsConfig;
use thumbforge_core::result::AppResult;
use thumbforge_core::traits::path_resolver::PathResolver;
use thumbforge_core::types::{
    FileId, MimeCategory, SizePreset, ThumbnailErrorKind, ThumbnailOptions, ThumbnailResult,
};
use tracing::{debug, info, instrument, warn};

use crate::cache::{CacheEntry, ThumbnailCache};
use crate::capability::{CapabilityDetector, CapabilitySet};
use crate::error::ConversionError;
use crate::executor::{ProcessRunner, SystemRunner};
use crate::lock::{GenerationLocks, LockKey, LockOutcome};
use crate::metrics::EngineMetrics;
use crate::pipeline::{self, Pipeline, PipelineContext, RenderRequest, Rendered};
use crate::raster::{self, PostProcess};
use crate::temp::TempWorkspace;

/// Engine settings, taken from the application configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Thumbnail defaults and pipeline tuning.
    pub thumbnail: ThumbnailConfig,
    /// External tool locations and limits.
    pub tools: ToolsConfig,
    /// Root for per-generation scratch directories.
    pub temp_dir: PathBuf,
    /// Root of the thumbnail cache.
    pub thumbnails_root: PathBuf,
}

impl EngineConfig {
    /// Extract engine settings from the full configuration.
    pub fn from_app(config: &AppConfig) -> Self {
        Self {
            thumbnail: config.thumbnail.clone(),
            tools: config.tools.clone(),
            temp_dir: config.storage.effective_temp_dir(),
            thumbnails_root: config.storage.thumbnails_root.clone(),
        }
    }
}

/// Fail unless `path` is a non-empty regular file.
pub async fn validate_source(path: &Path) -> Result<(), ConversionError> {
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|_| ConversionError::SourceMissing {
            path: path.to_path_buf(),
        })?;
    if !meta.is_file() {
        return Err(ConversionError::SourceNotFile {
            path: path.to_path_buf(),
        });
    }
    if meta.len() == 0 {
        return Err(ConversionError::SourceEmpty {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

struct Inner {
    config: EngineConfig,
    runner: Arc<dyn ProcessRunner>,
    capabilities: CapabilitySet,
    cache: ThumbnailCache,
    locks: GenerationLocks,
    metrics: Arc<EngineMetrics>,
    pipelines: Vec<Box<dyn Pipeline>>,
}

/// The thumbnail generation engine.
///
/// Cheap to clone; clones share the cache, the lock table, and the metrics.
#[derive(Clone)]
pub struct ThumbnailEngine {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ThumbnailEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThumbnailEngine")
            .field("capabilities", &self.inner.capabilities)
            .field("locks", &self.inner.locks)
            .finish()
    }
}

impl ThumbnailEngine {
    /// Create an engine from explicit parts.
    pub fn new(
        config: EngineConfig,
        runner: Arc<dyn ProcessRunner>,
        capabilities: CapabilitySet,
        resolver: Arc<dyn PathResolver>,
    ) -> Self {
        let cache = ThumbnailCache::new(resolver, config.thumbnails_root.clone());
        Self {
            inner: Arc::new(Inner {
                config,
                runner,
                capabilities,
                cache,
                locks: GenerationLocks::new(),
                metrics: Arc::new(EngineMetrics::new()),
                pipelines: pipeline::default_pipelines(),
            }),
        }
    }

    /// Probe the host for tools and create an engine that spawns real processes.
    pub async fn start(config: EngineConfig, resolver: Arc<dyn PathResolver>) -> Self {
        let runner: Arc<dyn ProcessRunner> = Arc::new(SystemRunner::new());
        let capabilities = CapabilityDetector::new(Arc::clone(&runner), config.tools.clone())
            .detect()
            .await;
        Self::new(config, runner, capabilities, resolver)
    }

    /// Engine settings.
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Tools detected at startup.
    pub fn capabilities(&self) -> &CapabilitySet {
        &self.inner.capabilities
    }

    /// Metrics collector.
    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.inner.metrics
    }

    /// Thumbnail cache.
    pub fn cache(&self) -> &ThumbnailCache {
        &self.inner.cache
    }

    /// In-flight generation table.
    pub fn locks(&self) -> &GenerationLocks {
        &self.inner.locks
    }

    /// Options for a preset using the configured format, quality, and fit.
    pub fn options(&self, preset: SizePreset) -> ThumbnailOptions {
        ThumbnailOptions::from_preset(preset, &self.inner.config.thumbnail)
    }

    /// Whether a pipeline exists for `mime_type`.
    pub fn supports(&self, mime_type: &str) -> bool {
        self.pipeline(MimeCategory::from_mime(mime_type)).is_some()
    }

    fn pipeline(&self, category: MimeCategory) -> Option<&dyn Pipeline> {
        self.inner
            .pipelines
            .iter()
            .find(|p| p.category() == category)
            .map(|p| p.as_ref())
    }

    /// Cache location for `(file, options)`.
    pub fn locate(
        &self,
        file_id: FileId,
        mime_type: &str,
        options: &ThumbnailOptions,
    ) -> AppResult<CacheEntry> {
        self.inner.cache.locate(file_id, mime_type, options)
    }

    /// The cache entry for `(file, options)` if it is a hit.
    pub async fn cached(
        &self,
        file_id: FileId,
        mime_type: &str,
        options: &ThumbnailOptions,
    ) -> AppResult<Option<CacheEntry>> {
        let entry = self.locate(file_id, mime_type, options)?;
        Ok(self.inner.cache.is_hit(&entry).await.then_some(entry))
    }

    /// Public URL of a cache entry, `None` when it cannot be derived.
    pub fn url_for(&self, entry: &CacheEntry) -> Option<String> {
        match self.inner.cache.url(entry) {
            Ok(url) => Some(url),
            Err(e) => {
                warn!(path = %entry.path.display(), error = %e, "Cannot derive thumbnail URL");
                None
            }
        }
    }

    /// Generate a thumbnail, or return the cached one.
    ///
    /// Concurrent calls for the same file, size, and format share one
    /// pipeline run. Never fails: errors are carried in the result.
    #[instrument(skip(self, source, options), fields(size = %options.size_spec(), format = %options.format))]
    pub async fn generate(
        &self,
        source: &Path,
        mime_type: &str,
        file_id: FileId,
        options: ThumbnailOptions,
    ) -> ThumbnailResult {
        let started = Instant::now();
        let elapsed = || started.elapsed().as_millis() as u64;

        if let Err(e) = options.validate(self.inner.config.thumbnail.max_dimension) {
            return ThumbnailResult::failed(
                file_id,
                ThumbnailErrorKind::InvalidOptions,
                e.to_string(),
                elapsed(),
            );
        }

        let category = MimeCategory::from_mime(mime_type);
        if self.pipeline(category).is_none() {
            let err = ConversionError::UnsupportedType {
                mime_type: mime_type.to_string(),
            };
            debug!(mime_type, "No pipeline for MIME type");
            return ThumbnailResult::failed(file_id, err.kind(), err.to_string(), elapsed());
        }

        let entry = match self.locate(file_id, mime_type, &options) {
            Ok(entry) => entry,
            Err(e) => {
                return ThumbnailResult::failed(
                    file_id,
                    ThumbnailErrorKind::Internal,
                    e.to_string(),
                    elapsed(),
                );
            }
        };

        if self.inner.cache.is_hit(&entry).await {
            self.inner.metrics.record_cache_hit();
            let url = self.url_for(&entry);
            let format = raster::sniff_format(&entry.path).await;
            return ThumbnailResult::succeeded(file_id, entry.path, url, elapsed(), true)
                .with_format(format);
        }

        let key = LockKey::new(file_id, &options);
        let engine = self.clone();
        let source = source.to_path_buf();
        let mime_type = mime_type.to_string();

        let (result, outcome) = self
            .inner
            .locks
            .run(key, move || {
                async move {
                    engine
                        .generate_locked(&source, &mime_type, category, file_id, options, entry, started)
                        .await
                }
                .boxed()
            })
            .await;

        if outcome == LockOutcome::Joined {
            self.inner.metrics.record_deduplicated();
        }
        result
    }

    /// Body of a generation, run while holding the key.
    #[allow(clippy::too_many_arguments)]
    async fn generate_locked(
        &self,
        source: &Path,
        mime_type: &str,
        category: MimeCategory,
        file_id: FileId,
        options: ThumbnailOptions,
        entry: CacheEntry,
        started: Instant,
    ) -> ThumbnailResult {
        // The previous holder of this key may have finished after our check.
        if self.inner.cache.is_hit(&entry).await {
            self.inner.metrics.record_cache_hit();
            let url = self.url_for(&entry);
            let ms = started.elapsed().as_millis() as u64;
            let format = raster::sniff_format(&entry.path).await;
            return ThumbnailResult::succeeded(file_id, entry.path, url, ms, true).with_format(format);
        }

        self.inner.metrics.record_started();
        let outcome = self
            .produce(source, mime_type, category, file_id, &options, &entry)
            .await;
        let duration = started.elapsed();
        let ms = duration.as_millis() as u64;

        match outcome {
            Ok(bytes) => {
                self.inner.metrics.record_success(duration, bytes);
                info!(
                    %file_id,
                    category = category.as_str(),
                    path = %entry.path.display(),
                    bytes,
                    duration_ms = ms,
                    "Thumbnail generated"
                );
                let url = self.url_for(&entry);
                let format = raster::sniff_format(&entry.path).await;
                if format != Some(options.format) {
                    warn!(
                        %file_id,
                        requested = %options.format,
                        actual = ?format,
                        "Installed thumbnail is not in the requested format"
                    );
                }
                ThumbnailResult::succeeded(file_id, entry.path, url, ms, false).with_format(format)
            }
            Err(e) => {
                self.inner.metrics.record_failure();
                warn!(
                    %file_id,
                    category = category.as_str(),
                    error = %e,
                    duration_ms = ms,
                    "Thumbnail generation failed"
                );
                ThumbnailResult::failed(file_id, e.kind(), e.to_string(), ms)
            }
        }
    }

    /// Validate, render, and install. Returns bytes written to the cache.
    async fn produce(
        &self,
        source: &Path,
        mime_type: &str,
        category: MimeCategory,
        file_id: FileId,
        options: &ThumbnailOptions,
        entry: &CacheEntry,
    ) -> Result<u64, ConversionError> {
        validate_source(source).await?;

        let pipeline = self
            .pipeline(category)
            .ok_or_else(|| ConversionError::UnsupportedType {
                mime_type: mime_type.to_string(),
            })?;

        let workspace = TempWorkspace::create(&self.inner.config.temp_dir).await?;
        let ctx = PipelineContext {
            runner: self.inner.runner.as_ref(),
            capabilities: &self.inner.capabilities,
            tools: &self.inner.config.tools,
            config: &self.inner.config.thumbnail,
            metrics: &self.inner.metrics,
            workspace: &workspace,
        };
        let request = RenderRequest {
            file_id,
            source,
            mime_type,
            options,
        };

        let installed = match pipeline.render(&ctx, &request).await {
            Ok(Rendered::Encoded(bytes)) => self.inner.cache.store_bytes(entry, &bytes).await,
            Ok(Rendered::File(path)) => self.install_file(entry, options, &path).await,
            Err(e) => {
                workspace.close();
                return Err(e);
            }
        };
        workspace.close();

        installed.map_err(|e| {
            ConversionError::PostProcessing(format!("Failed to install thumbnail: {e}"))
        })
    }

    /// Install a file-backed result, re-encoding it in process first when
    /// it is not in the requested format.
    ///
    /// Files past the raster ceiling or that cannot be decoded are installed
    /// as they are.
    async fn install_file(
        &self,
        entry: &CacheEntry,
        options: &ThumbnailOptions,
        path: &Path,
    ) -> AppResult<u64> {
        if raster::sniff_format(path).await != Some(options.format) {
            match self.reencode(path, options).await {
                Ok(bytes) => return self.inner.cache.store_bytes(entry, &bytes).await,
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "Cannot re-encode rendered file, installing as-is");
                }
            }
        }
        self.inner.cache.store_file(entry, path).await
    }

    async fn reencode(&self, path: &Path, options: &ThumbnailOptions) -> Result<Vec<u8>, ConversionError> {
        let config = &self.inner.config.thumbnail;
        let (width, height) = raster::dimensions(path)?;
        let ceiling = config.max_raster_dimension;
        if width > ceiling || height > ceiling {
            return Err(ConversionError::PostProcessing(format!(
                "{width}x{height} raster exceeds the {ceiling}px ceiling"
            )));
        }
        let post = PostProcess {
            flatten: true,
            ..PostProcess::default()
        };
        raster::render_file(path, options, config.allow_enlarge, post).await
    }

    /// Remove every cached size and format of a file.
    pub async fn delete_thumbnails(&self, file_id: FileId) -> AppResult<usize> {
        let removed = self.inner.cache.delete_all(file_id).await?;
        info!(%file_id, removed, "Deleted thumbnails");
        Ok(removed)
    }

    /// Remove one cache entry and its orphaned partial writes.
    pub async fn purge(
        &self,
        file_id: FileId,
        mime_type: &str,
        options: &ThumbnailOptions,
    ) -> AppResult<usize> {
        let entry = self.locate(file_id, mime_type, options)?;
        self.inner.cache.purge(&entry).await
    }
}
