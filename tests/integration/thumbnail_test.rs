//! Integration tests for synchronous generation.

use std::time::Duration;

use thumbforge_core::config::tools::ToolsConfig;
use thumbforge_core::config::worker::WorkerConfig;
use thumbforge_core::types::{FileId, FitMode, SizePreset};
use thumbforge_engine::testing::FakeRunner;
use thumbforge_engine::{CapabilitySet, Tool};

use crate::helpers::TestApp;

#[tokio::test]
async fn test_large_jpeg_contained_in_medium_box() {
    let app = TestApp::new(FakeRunner::new());
    let source = app.store_jpeg("photos/large.jpg", 4000, 3000);
    let file_id = FileId::new();
    let options = app
        .service
        .options(SizePreset::Medium)
        .with_fit(FitMode::Contain);

    let result = app
        .service
        .generate_thumbnail(&source, "image/jpeg", file_id, options)
        .await;

    assert!(result.success, "{:?}", result.error);
    let path = result.thumbnail_path.expect("path");
    assert_eq!(
        path.file_name().and_then(|n| n.to_str()),
        Some(format!("{file_id}_300x300.webp").as_str())
    );
    let img = image::open(&path).expect("decode thumbnail");
    assert!(img.width() <= 300 && img.height() <= 300);
    assert!(app.runner.calls().is_empty());
}

#[tokio::test]
async fn test_pdf_falls_back_when_primary_rasterizer_disabled() {
    let caps = CapabilitySet::all(&ToolsConfig::default()).without(Tool::RasterProcessor);
    let app = TestApp::build(FakeRunner::new(), caps, WorkerConfig::default());
    let source = app.store("docs/one-page.pdf", b"%PDF-1.4\n1 0 obj\n");

    let result = app
        .service
        .generate_thumbnail(
            &source,
            "application/pdf",
            FileId::new(),
            app.service.options(SizePreset::Medium),
        )
        .await;

    assert!(result.success, "{:?}", result.error);
    assert!(app.runner.calls_to("magick").is_empty());
    assert_eq!(app.runner.conversions_by("gs"), 1);
}

#[tokio::test]
async fn test_eps_is_cropped_to_content_not_page() {
    let app = TestApp::new(FakeRunner::new());
    let source = app.store("art/logo.eps", b"%!PS-Adobe-3.0 EPSF-3.0\n%%BoundingBox: -50 -50 700 900\n");

    let result = app
        .service
        .generate_thumbnail(
            &source,
            "application/postscript",
            FileId::new(),
            app.service.options(SizePreset::Medium),
        )
        .await;

    assert!(result.success, "{:?}", result.error);
    let gs = app.runner.calls_to("gs");
    let vectorize = gs.first().expect("vectorization stage");
    assert!(vectorize.has_arg("-dEPSCrop"));
    assert!(!vectorize.has_arg("-dEPSFitPage"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_video_requests_extract_one_frame() {
    let app = TestApp::new(
        FakeRunner::new()
            .stdout("ffprobe", "42.0")
            .delay(Duration::from_millis(100)),
    );
    let source = app.store("clips/intro.mp4", b"video bytes");
    let file_id = FileId::new();
    let options = app.service.options(SizePreset::Large);

    let (first, second) = tokio::join!(
        app.service
            .generate_thumbnail(&source, "video/mp4", file_id, options),
        app.service
            .generate_thumbnail(&source, "video/mp4", file_id, options),
    );

    assert!(first.success, "{:?}", first.error);
    assert!(second.success, "{:?}", second.error);
    assert_eq!(first.thumbnail_path, second.thumbnail_path);
    assert_eq!(app.runner.conversions_by("ffmpeg"), 1);
}

#[tokio::test]
async fn test_second_request_is_served_from_cache() {
    let app = TestApp::new(FakeRunner::new().stdout("ffprobe", "12.5"));
    let source = app.store("clips/short.mp4", b"video bytes");
    let file_id = FileId::new();
    let options = app.service.options(SizePreset::Small);

    let first = app
        .service
        .generate_thumbnail(&source, "video/mp4", file_id, options)
        .await;
    assert!(first.success, "{:?}", first.error);

    app.runner.reset_calls();
    let second = app
        .service
        .generate_thumbnail(&source, "video/mp4", file_id, options)
        .await;

    assert!(second.from_cache);
    assert_eq!(first.thumbnail_path, second.thumbnail_path);
    assert!(app.runner.calls().is_empty());
}
