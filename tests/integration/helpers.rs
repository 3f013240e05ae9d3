//! Shared test helpers for integration tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::{ImageFormat, Rgb, RgbImage};

use thumbforge_core::config::storage::THUMBNAIL_CONTEXT;
use thumbforge_core::config::thumbnail::ThumbnailConfig;
use thumbforge_core::config::tools::ToolsConfig;
use thumbforge_core::config::worker::WorkerConfig;
use thumbforge_engine::testing::FakeRunner;
use thumbforge_engine::{CapabilitySet, ConfigPathResolver, EngineConfig, ThumbnailEngine};
use thumbforge_service::{MemoryMetadataStore, SourceLocator, ThumbnailService};
use thumbforge_worker::{JobQueue, ThumbnailJobHandler, WorkerRunner};

/// A fully wired thumbnail stack over a temporary directory and a fake
/// process runner.
pub struct TestApp {
    /// Generation facade and queue administration
    pub service: ThumbnailService,
    /// Worker draining the service's queue
    pub worker: WorkerRunner,
    /// Records every tool invocation
    pub runner: Arc<FakeRunner>,
    /// Recorded thumbnail URLs
    pub metadata: Arc<MemoryMetadataStore>,
    /// Holds files, thumbnails and scratch space
    pub dir: tempfile::TempDir,
}

impl TestApp {
    /// Every tool available, default worker settings
    pub fn new(runner: FakeRunner) -> Self {
        Self::build(
            runner,
            CapabilitySet::all(&ToolsConfig::default()),
            WorkerConfig::default(),
        )
    }

    /// Custom capabilities and worker settings
    pub fn build(runner: FakeRunner, capabilities: CapabilitySet, worker: WorkerConfig) -> Self {
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
        let engine = ThumbnailEngine::new(config, runner.clone(), capabilities, Arc::new(resolver));
        let metadata = Arc::new(MemoryMetadataStore::new());
        let queue = JobQueue::new(worker, None);

        let handler = Arc::new(ThumbnailJobHandler::new(engine.clone(), metadata.clone()));
        let worker = WorkerRunner::new(queue.clone(), handler, "integration-worker");
        let service = ThumbnailService::new(
            engine,
            queue,
            metadata.clone(),
            SourceLocator::new(dir.path().join("files")),
        );

        Self {
            service,
            worker,
            runner,
            metadata,
            dir,
        }
    }

    /// Absolute path of a stored file
    pub fn file_path(&self, name: &str) -> PathBuf {
        self.dir.path().join("files").join(name)
    }

    /// Store a file below the files root, returning its relative path
    pub fn store(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.file_path(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("mkdir");
        }
        std::fs::write(&path, bytes).expect("write source");
        PathBuf::from(name)
    }

    /// Store a synthetic JPEG photo, returning its relative path
    pub fn store_jpeg(&self, name: &str, width: u32, height: u32) -> PathBuf {
        let path = self.file_path(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("mkdir");
        }
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        });
        img.save_with_format(&path, ImageFormat::Jpeg)
            .expect("write jpeg");
        Path::new(name).to_path_buf()
    }
}
