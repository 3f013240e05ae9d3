//! Thumbnail services: generation facade, upload routing, on-demand serving.

pub mod preview;
pub mod service;
pub mod upload;

pub use preview::{ByteStream, PreviewService, ThumbnailStream};
pub use service::ThumbnailService;
pub use upload::{GeneratedThumbnail, UploadOutcome, UploadService, UploadedFile};

#[cfg(test)]
pub(crate) mod fixture {
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    use thumbforge_core::config::storage::THUMBNAIL_CONTEXT;
    use thumbforge_core::config::thumbnail::ThumbnailConfig;
    use thumbforge_core::config::tools::ToolsConfig;
    use thumbforge_core::config::worker::WorkerConfig;
    use thumbforge_engine::testing::{FakeRunner, write_test_png};
    use thumbforge_engine::{CapabilitySet, ConfigPathResolver, EngineConfig, ThumbnailEngine};
    use thumbforge_worker::JobQueue;

    use crate::metadata::MemoryMetadataStore;
    use crate::source::SourceLocator;

    use super::ThumbnailService;

    pub struct Fixture {
        pub service: ThumbnailService,
        pub runner: Arc<FakeRunner>,
        pub metadata: Arc<MemoryMetadataStore>,
        pub dir: tempfile::TempDir,
    }

    impl Fixture {
        pub fn new(runner: FakeRunner) -> Self {
            let dir = tempfile::tempdir().expect("tempdir");
            let root = dir.path().join("thumbnails");
            let config = EngineConfig {
                thumbnail: ThumbnailConfig::default(),
                tools: ToolsConfig::default(),
                temp_dir: dir.path().join("tmp"),
                thumbnails_root: root.clone(),
            };
            let resolver = ConfigPathResolver::new(
                root,
                "/thumbnails",
                HashMap::from([(THUMBNAIL_CONTEXT.to_string(), "{size}".to_string())]),
                1,
            );
            let runner = Arc::new(runner);
            let capabilities = CapabilitySet::all(&config.tools);
            let engine =
                ThumbnailEngine::new(config, runner.clone(), capabilities, Arc::new(resolver));
            let metadata = Arc::new(MemoryMetadataStore::new());
            let service = ThumbnailService::new(
                engine,
                JobQueue::new(WorkerConfig::default(), None),
                metadata.clone(),
                SourceLocator::new(dir.path().join("files")),
            );
            Self {
                service,
                runner,
                metadata,
                dir,
            }
        }

        /// Write an arbitrary source below the files root, returning its relative path.
        pub fn source(&self, name: &str, bytes: &[u8]) -> PathBuf {
            let path = self.dir.path().join("files").join(name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).expect("mkdir");
            }
            std::fs::write(&path, bytes).expect("write source");
            PathBuf::from(name)
        }

        /// Write a synthetic PNG below the files root, returning its relative path.
        pub fn png(&self, name: &str, width: u32, height: u32) -> PathBuf {
            write_test_png(&self.dir.path().join("files").join(name), width, height).expect("png");
            Path::new(name).to_path_buf()
        }
    }
}
