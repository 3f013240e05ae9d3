//! Thumbforge server: runs the thumbnail worker pool against the job queue.
//!
//! Wires configuration, logging, the conversion engine, the status stores
//! and the worker together, then drains the queue until shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, fmt};

use thumbforge_core::config::AppConfig;
use thumbforge_core::error::AppError;
use thumbforge_core::traits::job_store::JobStatusStore;
use thumbforge_core::traits::metadata::MetadataStore;
use thumbforge_database::DatabasePool;
use thumbforge_engine::{ConfigPathResolver, EngineConfig, ThumbnailEngine};
use thumbforge_service::{MemoryMetadataStore, SourceLocator, ThumbnailService};
use thumbforge_worker::{JobQueue, MemoryJobStore, StatusClass, ThumbnailJobHandler, WorkerRunner};

/// How often finished jobs past their retention are removed.
const RETENTION_SWEEP: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() {
    let config = match load_configuration() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = run(config).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}

/// Load configuration from file and environment
fn load_configuration() -> Result<AppConfig, AppError> {
    let config_path =
        std::env::var("THUMBFORGE_CONFIG").unwrap_or_else(|_| "config/default.toml".to_string());

    AppConfig::load(&config_path)
        .map_err(|e| AppError::configuration(format!("Config load error: {}", e)))
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

/// Main server run function
async fn run(config: AppConfig) -> Result<(), AppError> {
    tracing::info!("Starting Thumbforge v{}", env!("CARGO_PKG_VERSION"));

    // ── Step 1: Create data directories ──────────────────────────
    create_data_directories(&config).await?;

    // ── Step 2: Conversion engine ────────────────────────────────
    tracing::info!("Detecting conversion tools...");
    let resolver = ConfigPathResolver::from_config(&config.storage);
    let engine = ThumbnailEngine::start(EngineConfig::from_app(&config), Arc::new(resolver)).await;

    // ── Step 3: Status stores ────────────────────────────────────
    let db_pool = match &config.database.url {
        Some(_) => {
            tracing::info!("Connecting to database...");
            let pool = DatabasePool::connect(&config.database).await?;

            tracing::info!("Running database migrations...");
            thumbforge_database::migration::run_migrations(pool.pool()).await?;
            tracing::info!("Database migrations complete");
            Some(pool)
        }
        None => {
            tracing::info!("No database configured, job status and thumbnail URLs stay in memory");
            None
        }
    };

    let (job_store, metadata): (Arc<dyn JobStatusStore>, Arc<dyn MetadataStore>) = match &db_pool
    {
        Some(pool) => (
            Arc::new(thumbforge_database::ThumbnailJobRepository::new(
                pool.pool().clone(),
            )),
            Arc::new(thumbforge_database::FileMetadataRepository::new(
                pool.pool().clone(),
            )),
        ),
        None => (
            Arc::new(MemoryJobStore::new()),
            Arc::new(MemoryMetadataStore::new()),
        ),
    };

    // ── Step 4: Job queue ────────────────────────────────────────
    let queue = JobQueue::new(config.worker.clone(), Some(job_store));
    let restored = queue.restore().await?;
    if restored > 0 {
        tracing::info!("Restored {} unfinished thumbnail jobs", restored);
    }

    let service = ThumbnailService::new(
        engine.clone(),
        queue.clone(),
        Arc::clone(&metadata),
        SourceLocator::from_config(&config.storage),
    );

    // ── Step 5: Shutdown channel ─────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Step 6: Start background worker ──────────────────────────
    let worker_handle = if config.worker.enabled {
        let worker_id = format!("worker-{}", &uuid::Uuid::new_v4().to_string()[..8]);
        tracing::info!(
            "Starting worker {} (concurrency {})...",
            worker_id,
            config.worker.concurrency
        );

        let handler = Arc::new(ThumbnailJobHandler::new(engine.clone(), Arc::clone(&metadata)));
        let worker_runner = WorkerRunner::new(queue.clone(), handler, worker_id);

        let worker_cancel = shutdown_rx.clone();
        let handle = tokio::spawn(async move {
            worker_runner.run(worker_cancel).await;
        });

        tracing::info!("Background worker started");
        Some(handle)
    } else {
        tracing::info!("Background worker disabled, jobs are only queued");
        None
    };

    // ── Step 7: Retention sweep ──────────────────────────────────
    let sweep_handle = {
        let service = service.clone();
        let completed_ms = config.worker.retention_completed_seconds.saturating_mul(1000);
        let failed_ms = config.worker.retention_failed_seconds.saturating_mul(1000);
        let mut cancel = shutdown_rx.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(RETENTION_SWEEP);
            loop {
                tokio::select! {
                    changed = cancel.changed() => {
                        if changed.is_err() || *cancel.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        for (class, age) in [
                            (StatusClass::Completed, completed_ms),
                            (StatusClass::Failed, failed_ms),
                        ] {
                            match service.clean_queue(class, age).await {
                                Ok(0) => {}
                                Ok(n) => tracing::debug!("Cleaned {} {} jobs", n, class),
                                Err(e) => tracing::warn!("Failed to clean {} jobs: {}", class, e),
                            }
                        }
                    }
                }
            }
        })
    };

    tracing::info!("Thumbforge running, press Ctrl+C to stop");

    // ── Step 8: Graceful shutdown ────────────────────────────────
    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown...");
    let _ = shutdown_tx.send(true);

    tracing::info!("Waiting for background tasks to complete...");
    if let Some(handle) = worker_handle {
        let _ = tokio::time::timeout(Duration::from_secs(35), handle).await;
    }
    let _ = tokio::time::timeout(Duration::from_secs(5), sweep_handle).await;

    let stats = service.get_queue_stats().await;
    let metrics = engine.metrics().snapshot();
    tracing::info!(queue = ?stats, metrics = ?metrics, "Final statistics");

    if let Some(pool) = db_pool {
        pool.close().await;
    }

    tracing::info!("Thumbforge shut down gracefully");
    Ok(())
}

/// Create required data directories
async fn create_data_directories(config: &AppConfig) -> Result<(), AppError> {
    let dirs = [
        config.storage.thumbnails_root.clone(),
        config.storage.effective_temp_dir(),
    ];

    for dir in &dirs {
        tokio::fs::create_dir_all(dir).await.map_err(|e| {
            AppError::storage(format!("Failed to create dir '{}': {}", dir.display(), e))
        })?;
    }

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
