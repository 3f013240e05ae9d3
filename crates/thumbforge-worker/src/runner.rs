//! Worker runner: claims jobs from the queue and executes them.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, watch};
use tokio::time::{self, MissedTickBehavior};

use thumbforge_core::config::worker::WorkerConfig;

use crate::executor::{JobContext, JobHandler};
use crate::queue::{ActiveJob, FailOutcome, JobQueue};

/// How long shutdown waits for in-flight jobs.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Main worker runner that polls the queue and executes jobs
#[derive(Debug)]
pub struct WorkerRunner {
    /// Job queue for polling
    queue: JobQueue,
    /// Handler that executes claimed jobs
    handler: Arc<dyn JobHandler>,
    /// Worker configuration
    config: WorkerConfig,
    /// Worker identifier
    worker_id: String,
}

impl WorkerRunner {
    /// Create a new worker runner
    pub fn new(queue: JobQueue, handler: Arc<dyn JobHandler>, worker_id: impl Into<String>) -> Self {
        let config = queue.config().clone();
        Self {
            queue,
            handler,
            config,
            worker_id: worker_id.into(),
        }
    }

    /// Start the worker runner. Runs until the cancel signal is received.
    pub async fn run(&self, mut cancel: watch::Receiver<bool>) {
        tracing::info!(
            "Worker '{}' started with concurrency={}, poll_interval={}ms, stall_interval={}s",
            self.worker_id,
            self.config.concurrency,
            self.config.poll_interval_ms,
            self.config.stall_interval_seconds
        );

        let concurrency = self.config.concurrency.max(1);
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms.max(1));

        let mut stall_check = time::interval(self.stall_interval());
        stall_check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            self.dispatch(&semaphore).await;

            tokio::select! {
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        tracing::info!("Worker '{}' received shutdown signal", self.worker_id);
                        break;
                    }
                }
                _ = stall_check.tick() => {
                    let stalled = self.queue.check_stalled().await;
                    if !stalled.is_empty() {
                        tracing::warn!(
                            "Worker '{}' recovered {} stalled jobs",
                            self.worker_id,
                            stalled.len()
                        );
                    }
                }
                _ = self.queue.notified() => {}
                _ = time::sleep(poll_interval) => {}
            }
        }

        tracing::info!(
            "Worker '{}' waiting for in-flight jobs to complete...",
            self.worker_id
        );

        let _ = time::timeout(SHUTDOWN_GRACE, semaphore.acquire_many(concurrency as u32)).await;

        tracing::info!("Worker '{}' shut down complete", self.worker_id);
    }

    /// Claim and execute a single job inline. Returns `false` when nothing
    /// was ready.
    pub async fn process_one(&self) -> bool {
        match self.queue.claim().await {
            Some(job) => {
                Self::process(
                    self.queue.clone(),
                    Arc::clone(&self.handler),
                    job,
                    self.stall_interval(),
                )
                .await;
                true
            }
            None => false,
        }
    }

    /// Fill every free slot with a ready job.
    async fn dispatch(&self, semaphore: &Arc<Semaphore>) {
        loop {
            let permit = match semaphore.clone().try_acquire_owned() {
                Ok(p) => p,
                Err(_) => {
                    tracing::trace!("All worker slots occupied, waiting...");
                    return;
                }
            };

            let Some(job) = self.queue.claim().await else {
                tracing::trace!("No thumbnail jobs ready");
                return;
            };

            let queue = self.queue.clone();
            let handler = Arc::clone(&self.handler);
            let stall = self.stall_interval();
            tokio::spawn(async move {
                let _permit = permit;
                Self::process(queue, handler, job, stall).await;
            });
        }
    }

    /// Run one attempt and report the outcome to the queue.
    async fn process(queue: JobQueue, handler: Arc<dyn JobHandler>, job: ActiveJob, stall: Duration) {
        let job_id = job.job_id;
        tracing::info!(
            "Processing job: id={}, file={}, attempt={}/{}",
            job_id,
            job.data.file_id,
            job.attempt,
            job.max_attempts
        );

        let ctx = JobContext::new(queue.clone(), job_id, job.attempt, job.max_attempts);

        // Renew the lock at half the stall interval while the handler runs.
        let execution = handler.execute(&job.data, &ctx);
        tokio::pin!(execution);
        let mut heartbeat = time::interval(stall / 2);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.tick().await;
        let result = loop {
            tokio::select! {
                result = &mut execution => break result,
                _ = heartbeat.tick() => queue.extend_lock(job_id).await,
            }
        };

        match result {
            Ok(output) => {
                if let Err(e) = queue.complete(job_id, output.thumbnail_url).await {
                    tracing::error!("Failed to mark job {} as completed: {}", job_id, e);
                    return;
                }
                tracing::info!("Job {} completed successfully", job_id);
            }
            Err(err) => {
                let message = err.to_string();
                match queue.fail(job_id, &message, err.is_retryable()).await {
                    Ok(FailOutcome::Retrying { delay }) => {
                        tracing::warn!(
                            "Job {} failed (attempt {}/{}), retrying in {:?}: {}",
                            job_id,
                            job.attempt,
                            job.max_attempts,
                            delay,
                            message
                        );
                    }
                    Ok(FailOutcome::Failed) => {
                        tracing::error!("Job {} failed permanently: {}", job_id, message);
                        handler.on_failed(&job.data, &message).await;
                    }
                    Ok(FailOutcome::Stale) => {
                        tracing::debug!("Job {} was requeued while running, dropping its failure", job_id);
                    }
                    Err(e) => {
                        tracing::error!("Failed to mark job {} as failed: {}", job_id, e);
                    }
                }
            }
        }
    }

    fn stall_interval(&self) -> Duration {
        Duration::from_secs(self.config.stall_interval_seconds.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use thumbforge_core::config::thumbnail::ThumbnailConfig;
    use thumbforge_core::types::{
        FileId, JobPriority, SizePreset, ThumbnailJob, ThumbnailJobStatus, ThumbnailOptions,
    };

    use crate::executor::{JobExecutionError, JobOutput};
    use crate::queue::QueueEvent;

    #[derive(Debug, Default)]
    struct ScriptedHandler {
        failures: Mutex<VecDeque<JobExecutionError>>,
        executed: AtomicUsize,
        given_up: AtomicUsize,
    }

    impl ScriptedHandler {
        fn failing_with(errors: Vec<JobExecutionError>) -> Self {
            Self {
                failures: Mutex::new(errors.into()),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl JobHandler for ScriptedHandler {
        async fn execute(
            &self,
            job: &ThumbnailJob,
            ctx: &JobContext,
        ) -> Result<JobOutput, JobExecutionError> {
            self.executed.fetch_add(1, Ordering::SeqCst);
            ctx.progress(50).await;
            if let Some(err) = self.failures.lock().expect("lock").pop_front() {
                return Err(err);
            }
            Ok(JobOutput {
                thumbnail_path: None,
                thumbnail_url: Some(format!("/thumbnails/{}.webp", job.file_id)),
            })
        }

        async fn on_failed(&self, _job: &ThumbnailJob, _error: &str) {
            self.given_up.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn job() -> ThumbnailJob {
        let options = ThumbnailOptions::from_preset(SizePreset::Small, &ThumbnailConfig::default());
        ThumbnailJob::new(FileId::new(), "/data/clip.mp4", "video/mp4", options)
            .with_priority(JobPriority::High)
    }

    fn runner(handler: Arc<ScriptedHandler>) -> (WorkerRunner, JobQueue) {
        let queue = JobQueue::new(WorkerConfig::default(), None);
        (WorkerRunner::new(queue.clone(), handler, "test-worker"), queue)
    }

    #[tokio::test]
    async fn test_process_one_completes_job() {
        let handler = Arc::new(ScriptedHandler::default());
        let (runner, queue) = runner(handler.clone());
        let job = job();
        let file_id = job.file_id;
        queue.enqueue(job).await.expect("enqueue");

        assert!(runner.process_one().await);
        assert!(!runner.process_one().await);

        let record = queue.status(file_id).await.expect("status").expect("record");
        assert_eq!(record.status, ThumbnailJobStatus::Completed);
        assert_eq!(record.progress, 100);
        assert_eq!(
            record.thumbnail_url,
            Some(format!("/thumbnails/{file_id}.webp"))
        );
    }

    #[tokio::test]
    async fn test_permanent_failure_gives_up_once() {
        let handler = Arc::new(ScriptedHandler::failing_with(vec![
            JobExecutionError::Permanent("Source file not found".into()),
        ]));
        let (runner, queue) = runner(handler.clone());
        let job = job();
        let file_id = job.file_id;
        queue.enqueue(job).await.expect("enqueue");

        assert!(runner.process_one().await);

        let record = queue.status(file_id).await.expect("status").expect("record");
        assert_eq!(record.status, ThumbnailJobStatus::Failed);
        assert_eq!(record.attempts_made, 1);
        assert_eq!(handler.given_up.load(Ordering::SeqCst), 1);
        assert!(!runner.process_one().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_retries_after_backoff() {
        let handler = Arc::new(ScriptedHandler::failing_with(vec![
            JobExecutionError::Transient("ffmpeg exited with status 1".into()),
        ]));
        let (runner, queue) = runner(handler.clone());
        let job = job();
        let file_id = job.file_id;
        queue.enqueue(job).await.expect("enqueue");

        assert!(runner.process_one().await);
        let record = queue.status(file_id).await.expect("status").expect("record");
        assert_eq!(record.status, ThumbnailJobStatus::Retrying);
        assert!(!runner.process_one().await);

        time::advance(Duration::from_millis(WorkerConfig::default().backoff_ms + 1)).await;
        assert!(runner.process_one().await);

        let record = queue.status(file_id).await.expect("status").expect("record");
        assert_eq!(record.status, ThumbnailJobStatus::Completed);
        assert_eq!(record.attempts_made, 2);
        assert_eq!(handler.executed.load(Ordering::SeqCst), 2);
        assert_eq!(handler.given_up.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_run_processes_until_cancelled() {
        let handler = Arc::new(ScriptedHandler::default());
        let (runner, queue) = runner(handler.clone());
        let mut events = queue.subscribe();
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let worker = tokio::spawn(async move { runner.run(cancel_rx).await });

        let job = job();
        let file_id = job.file_id;
        queue.enqueue(job).await.expect("enqueue");

        let completed = time::timeout(Duration::from_secs(5), async {
            loop {
                match events.recv().await {
                    Ok(QueueEvent::Completed { file_id: done, .. }) if done == file_id => break,
                    Ok(_) => continue,
                    Err(e) => panic!("event stream closed: {e}"),
                }
            }
        })
        .await;
        assert!(completed.is_ok());

        cancel_tx.send(true).expect("send");
        time::timeout(Duration::from_secs(5), worker)
            .await
            .expect("worker stops")
            .expect("join");
        assert_eq!(handler.executed.load(Ordering::SeqCst), 1);
    }
}
