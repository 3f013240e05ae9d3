//! Integration tests for queued generation through the worker.

use thumbforge_core::config::tools::ToolsConfig;
use thumbforge_core::config::worker::WorkerConfig;
use thumbforge_core::traits::metadata::MetadataStore;
use thumbforge_core::types::{FileId, SizePreset, ThumbnailJob, ThumbnailJobStatus};
use thumbforge_engine::CapabilitySet;
use thumbforge_engine::testing::FakeRunner;

use crate::helpers::TestApp;

fn single_attempt() -> WorkerConfig {
    WorkerConfig {
        default_attempts: 1,
        normal_delay_ms: 0,
        ..WorkerConfig::default()
    }
}

#[tokio::test]
async fn test_queued_video_job_records_thumbnail_url() {
    let app = TestApp::build(
        FakeRunner::new().stdout("ffprobe", "30.0"),
        CapabilitySet::all(&ToolsConfig::default()),
        single_attempt(),
    );
    let source = app.store("clips/talk.mp4", b"video bytes");
    let file_id = FileId::new();
    let job = ThumbnailJob::new(
        file_id,
        source,
        "video/mp4",
        app.service.options(SizePreset::Medium),
    );

    app.service.enqueue_thumbnail_job(job).await.expect("enqueue");
    assert!(app.worker.process_one().await);

    let record = app
        .service
        .get_job_status(file_id)
        .await
        .expect("status")
        .expect("record");
    assert_eq!(record.status, ThumbnailJobStatus::Completed);
    let url = record.thumbnail_url.expect("url");
    assert!(url.ends_with(&format!("{file_id}_300x300.webp")));
    assert_eq!(
        app.metadata.thumbnail_url(file_id).await.expect("get"),
        Some(url)
    );
    assert_eq!(app.runner.conversions_by("ffmpeg"), 1);
}

#[tokio::test]
async fn test_retry_after_source_deleted_fails_without_tools() {
    let app = TestApp::build(
        FakeRunner::new().failing("ffmpeg"),
        CapabilitySet::all(&ToolsConfig::default()),
        single_attempt(),
    );
    let source = app.store("clips/broken.mp4", b"video bytes");
    let file_id = FileId::new();
    let job = ThumbnailJob::new(
        file_id,
        source,
        "video/mp4",
        app.service.options(SizePreset::Small),
    );

    app.service.enqueue_thumbnail_job(job).await.expect("enqueue");
    assert!(app.worker.process_one().await);
    let failed = app
        .service
        .get_job_status(file_id)
        .await
        .expect("status")
        .expect("record");
    assert_eq!(failed.status, ThumbnailJobStatus::Failed);

    std::fs::remove_file(app.file_path("clips/broken.mp4")).expect("delete source");
    app.runner.reset_calls();

    let handle = app
        .service
        .retry_job(file_id)
        .await
        .expect("retry")
        .expect("new job");
    assert_ne!(handle.job_id, failed.job_id);
    assert!(app.worker.process_one().await);

    let record = app
        .service
        .get_job_status(file_id)
        .await
        .expect("status")
        .expect("record");
    assert_eq!(record.job_id, handle.job_id);
    assert_eq!(record.status, ThumbnailJobStatus::Failed);
    assert_eq!(record.attempts_made, 1);
    assert!(
        record.error.as_deref().is_some_and(|e| e.contains("not found")),
        "{:?}",
        record.error
    );
    assert!(app.runner.calls().is_empty());
}

#[tokio::test]
async fn test_low_priority_waits_longer_and_gives_up_sooner() {
    let app = TestApp::new(FakeRunner::new());
    let options = app.service.options(SizePreset::Small);
    let low = ThumbnailJob::new(FileId::new(), "a.pdf", "application/pdf", options)
        .with_priority(thumbforge_core::types::JobPriority::Low);
    let high = ThumbnailJob::new(FileId::new(), "b.pdf", "application/pdf", options)
        .with_priority(thumbforge_core::types::JobPriority::High);
    let (low_id, high_id) = (low.file_id, high.file_id);

    app.service
        .enqueue_batch(vec![low, high])
        .await
        .expect("enqueue");

    let stats = app.service.get_queue_stats().await;
    assert_eq!((stats.waiting, stats.delayed), (1, 1));

    let low = app.service.get_job_status(low_id).await.expect("status").expect("record");
    let high = app.service.get_job_status(high_id).await.expect("status").expect("record");
    assert!(low.max_attempts < high.max_attempts);
    assert_eq!(low.status, ThumbnailJobStatus::Pending);
}
