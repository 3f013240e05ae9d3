//! In-memory priority queue of thumbnail jobs.
//!
//! Job identity is the file: while a file has a waiting, delayed, or active
//! job, enqueueing it again returns that job. Every state change is mirrored
//! to an optional [`JobStatusStore`] and announced as a [`QueueEvent`].

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify, broadcast};
use tokio::time::Instant;

use thumbforge_core::config::worker::WorkerConfig;
use thumbforge_core::error::AppError;
use thumbforge_core::result::AppResult;
use thumbforge_core::traits::job_store::JobStatusStore;
use thumbforge_core::types::{FileId, JobId, JobPriority, JobRecord, ThumbnailJob, ThumbnailJobStatus};

/// Capacity of the event channel; slow subscribers miss older events.
const EVENT_CAPACITY: usize = 256;

/// Scheduling options derived from a job's priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Total attempts before the job fails for good.
    pub attempts: u32,
    /// Delay before the first attempt.
    pub delay_ms: u64,
    /// Base of the exponential retry backoff.
    pub backoff_ms: u64,
}

impl JobOptions {
    /// Options for a priority tier.
    ///
    /// Low priority jobs wait longer and give up sooner so bursts of slow
    /// conversions do not starve the pool.
    pub fn for_priority(priority: JobPriority, config: &WorkerConfig) -> Self {
        let (attempts, delay_ms) = match priority {
            JobPriority::High => (config.high_priority_attempts, 0),
            JobPriority::Normal => (config.default_attempts, config.normal_delay_ms),
            JobPriority::Low => (config.low_priority_attempts, config.low_delay_ms),
        };
        Self {
            attempts: attempts.max(1),
            delay_ms,
            backoff_ms: config.backoff_ms,
        }
    }

    /// Delay before the retry that follows attempt number `attempts_made`.
    pub fn backoff(&self, attempts_made: u32) -> Duration {
        let exponent = attempts_made.saturating_sub(1).min(16);
        Duration::from_millis(self.backoff_ms.saturating_mul(1u64 << exponent))
    }
}

/// Returned by enqueue operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    /// Queue identifier of the job.
    pub job_id: JobId,
    /// File the job is for.
    pub file_id: FileId,
    /// Priority the job was enqueued at.
    pub priority: JobPriority,
    /// Scheduling options in effect.
    pub options: JobOptions,
    /// `true` when an existing active job was returned instead of a new one.
    pub deduplicated: bool,
}

/// Job counts by state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Jobs being processed.
    pub active: usize,
    /// Jobs ready to run.
    pub waiting: usize,
    /// Jobs finished successfully.
    pub completed: usize,
    /// Jobs failed for good.
    pub failed: usize,
    /// Jobs waiting out an initial delay or a retry backoff.
    pub delayed: usize,
    /// Ready jobs held back because the queue is paused.
    pub paused: usize,
}

/// State classes accepted by [`JobQueue::clean`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusClass {
    /// Finished successfully.
    Completed,
    /// Failed for good.
    Failed,
    /// Ready to run.
    Waiting,
    /// Waiting out a delay.
    Delayed,
    /// Ready but held by a paused queue.
    Paused,
}

impl StatusClass {
    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Waiting => "waiting",
            Self::Delayed => "delayed",
            Self::Paused => "paused",
        }
    }
}

impl fmt::Display for StatusClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatusClass {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "wait" | "waiting" => Ok(Self::Waiting),
            "delayed" => Ok(Self::Delayed),
            "paused" => Ok(Self::Paused),
            other => Err(AppError::validation(format!("Unknown job state class '{other}'"))),
        }
    }
}

/// Queue lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    /// A job was enqueued.
    Added { job_id: JobId, file_id: FileId, priority: JobPriority },
    /// A worker picked up a job.
    Active { job_id: JobId, file_id: FileId, attempt: u32 },
    /// A job reported progress.
    Progress { job_id: JobId, progress: u8 },
    /// A job finished successfully.
    Completed { job_id: JobId, file_id: FileId },
    /// An attempt failed and the job will run again after `delay_ms`.
    Retrying { job_id: JobId, file_id: FileId, attempt: u32, delay_ms: u64 },
    /// A job failed for good.
    Failed { job_id: JobId, file_id: FileId, error: String },
    /// An active job's lock expired.
    Stalled { job_id: JobId, file_id: FileId },
    /// Processing was paused.
    Paused,
    /// Processing was resumed.
    Resumed,
    /// Old jobs were removed.
    Cleaned { class: StatusClass, count: usize },
}

/// What happened to a job after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// The job will run again after `delay`.
    Retrying { delay: Duration },
    /// The job is terminally failed.
    Failed,
    /// The job was no longer active, e.g. requeued after stalling; nothing
    /// was recorded.
    Stale,
}

/// A job claimed by a worker.
#[derive(Debug, Clone)]
pub struct ActiveJob {
    /// Queue identifier.
    pub job_id: JobId,
    /// Job data.
    pub data: ThumbnailJob,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Total attempts allowed.
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobState {
    Waiting,
    Delayed,
    Active,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
struct QueuedJob {
    id: JobId,
    data: ThumbnailJob,
    options: JobOptions,
    state: JobState,
    seq: u64,
    run_at: Instant,
    lock_until: Option<Instant>,
    attempts_made: u32,
    stalled_count: u32,
    progress: u8,
    error: Option<String>,
    thumbnail_url: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl QueuedJob {
    fn is_unfinished(&self) -> bool {
        matches!(self.state, JobState::Waiting | JobState::Delayed | JobState::Active)
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    fn status(&self) -> ThumbnailJobStatus {
        match self.state {
            JobState::Waiting | JobState::Delayed if self.attempts_made > 0 => {
                ThumbnailJobStatus::Retrying
            }
            JobState::Waiting | JobState::Delayed => ThumbnailJobStatus::Pending,
            JobState::Active => ThumbnailJobStatus::Processing,
            JobState::Completed => ThumbnailJobStatus::Completed,
            JobState::Failed => ThumbnailJobStatus::Failed,
        }
    }

    fn record(&self) -> JobRecord {
        JobRecord {
            job_id: self.id,
            job: self.data.clone(),
            status: self.status(),
            progress: self.progress,
            attempts_made: self.attempts_made,
            max_attempts: self.options.attempts,
            error: self.error.clone(),
            thumbnail_url: self.thumbnail_url.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            updated_at: self.updated_at,
        }
    }

    fn fail(&mut self, error: String) {
        self.state = JobState::Failed;
        self.error = Some(error);
        self.lock_until = None;
        self.finished_at = Some(Utc::now());
        self.touch();
    }
}

#[derive(Debug, Default)]
struct QueueState {
    jobs: HashMap<JobId, QueuedJob>,
    by_file: HashMap<FileId, JobId>,
    paused: bool,
    seq: u64,
}

impl QueueState {
    fn unfinished_for(&self, file_id: FileId) -> Option<&QueuedJob> {
        self.by_file
            .get(&file_id)
            .and_then(|id| self.jobs.get(id))
            .filter(|job| job.is_unfinished())
    }

    fn promote_due(&mut self, now: Instant) {
        for job in self.jobs.values_mut() {
            if job.state == JobState::Delayed && job.run_at <= now {
                job.state = JobState::Waiting;
            }
        }
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }
}

struct Inner {
    config: WorkerConfig,
    state: Mutex<QueueState>,
    events: broadcast::Sender<QueueEvent>,
    store: Option<Arc<dyn JobStatusStore>>,
    notify: Notify,
}

/// Thumbnail job queue. Cheap to clone.
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<Inner>,
}

impl fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobQueue")
            .field("has_store", &self.inner.store.is_some())
            .finish()
    }
}

impl JobQueue {
    /// Create an empty queue.
    pub fn new(config: WorkerConfig, store: Option<Arc<dyn JobStatusStore>>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(QueueState::default()),
                events,
                store,
                notify: Notify::new(),
            }),
        }
    }

    /// Worker configuration in effect.
    pub fn config(&self) -> &WorkerConfig {
        &self.inner.config
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.inner.events.subscribe()
    }

    /// Wait until a job may have become ready.
    pub async fn notified(&self) {
        self.inner.notify.notified().await;
    }

    fn emit(&self, event: QueueEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    async fn mirror(&self, record: &JobRecord) {
        if let Some(store) = &self.inner.store {
            if let Err(e) = store.save(record).await {
                tracing::warn!(
                    job_id = %record.job_id,
                    status = %record.status,
                    error = %e,
                    "Failed to mirror job status"
                );
            }
        }
    }

    /// Enqueue a job, or return the unfinished job already queued for its file.
    pub async fn enqueue(&self, job: ThumbnailJob) -> AppResult<JobHandle> {
        let options = JobOptions::for_priority(job.priority, &self.inner.config);
        let now = Instant::now();

        let (handle, record) = {
            let mut state = self.inner.state.lock().await;

            if let Some(existing) = state.unfinished_for(job.file_id) {
                tracing::debug!(
                    "Job for file {} already queued as {}, not adding another",
                    job.file_id,
                    existing.id
                );
                return Ok(JobHandle {
                    job_id: existing.id,
                    file_id: existing.data.file_id,
                    priority: existing.data.priority,
                    options: existing.options,
                    deduplicated: true,
                });
            }

            let seq = state.next_seq();
            let created = Utc::now();
            let queued = QueuedJob {
                id: JobId::new(),
                state: if options.delay_ms > 0 {
                    JobState::Delayed
                } else {
                    JobState::Waiting
                },
                seq,
                run_at: now + Duration::from_millis(options.delay_ms),
                lock_until: None,
                attempts_made: 0,
                stalled_count: 0,
                progress: 0,
                error: None,
                thumbnail_url: None,
                created_at: created,
                started_at: None,
                finished_at: None,
                updated_at: created,
                options,
                data: job,
            };
            let handle = JobHandle {
                job_id: queued.id,
                file_id: queued.data.file_id,
                priority: queued.data.priority,
                options,
                deduplicated: false,
            };
            let record = queued.record();
            state.by_file.insert(handle.file_id, handle.job_id);
            state.jobs.insert(handle.job_id, queued);
            (handle, record)
        };

        tracing::debug!(
            job_id = %handle.job_id,
            file_id = %handle.file_id,
            priority = %handle.priority,
            attempts = options.attempts,
            delay_ms = options.delay_ms,
            "Enqueued thumbnail job"
        );
        self.emit(QueueEvent::Added {
            job_id: handle.job_id,
            file_id: handle.file_id,
            priority: handle.priority,
        });
        self.mirror(&record).await;
        self.inner.notify.notify_one();

        Ok(handle)
    }

    /// Enqueue several jobs.
    pub async fn enqueue_batch(&self, jobs: Vec<ThumbnailJob>) -> AppResult<Vec<JobHandle>> {
        let mut handles = Vec::with_capacity(jobs.len());
        for job in jobs {
            handles.push(self.enqueue(job).await?);
        }
        Ok(handles)
    }

    /// Claim the next ready job: highest priority, then earliest due.
    pub async fn claim(&self) -> Option<ActiveJob> {
        let now = Instant::now();
        let stall = Duration::from_secs(self.inner.config.stall_interval_seconds);

        let (active, record) = {
            let mut state = self.inner.state.lock().await;
            if state.paused {
                return None;
            }
            state.promote_due(now);

            let next = state
                .jobs
                .values()
                .filter(|j| j.state == JobState::Waiting)
                .max_by(|a, b| {
                    a.data
                        .priority
                        .cmp(&b.data.priority)
                        .then_with(|| b.run_at.cmp(&a.run_at))
                        .then_with(|| b.seq.cmp(&a.seq))
                })
                .map(|j| j.id)?;

            let job = state.jobs.get_mut(&next)?;
            job.state = JobState::Active;
            job.attempts_made += 1;
            job.progress = 0;
            job.lock_until = Some(now + stall);
            job.started_at = Some(Utc::now());
            job.touch();

            let active = ActiveJob {
                job_id: job.id,
                data: job.data.clone(),
                attempt: job.attempts_made,
                max_attempts: job.options.attempts,
            };
            (active, job.record())
        };

        self.emit(QueueEvent::Active {
            job_id: active.job_id,
            file_id: active.data.file_id,
            attempt: active.attempt,
        });
        self.mirror(&record).await;
        Some(active)
    }

    /// Renew the lock of an active job.
    pub async fn extend_lock(&self, job_id: JobId) {
        let stall = Duration::from_secs(self.inner.config.stall_interval_seconds);
        let mut state = self.inner.state.lock().await;
        if let Some(job) = state.jobs.get_mut(&job_id) {
            if job.state == JobState::Active {
                job.lock_until = Some(Instant::now() + stall);
            }
        }
    }

    /// Record progress (0-100) of an active job. Also renews its lock.
    pub async fn update_progress(&self, job_id: JobId, progress: u8) {
        let progress = progress.min(100);
        let stall = Duration::from_secs(self.inner.config.stall_interval_seconds);

        let record = {
            let mut state = self.inner.state.lock().await;
            let Some(job) = state.jobs.get_mut(&job_id) else {
                return;
            };
            if job.state != JobState::Active {
                return;
            }
            job.progress = progress;
            job.lock_until = Some(Instant::now() + stall);
            job.touch();
            job.record()
        };

        self.emit(QueueEvent::Progress { job_id, progress });
        self.mirror(&record).await;
    }

    /// Mark an active job as completed.
    ///
    /// A job that is no longer active is left untouched.
    pub async fn complete(&self, job_id: JobId, thumbnail_url: Option<String>) -> AppResult<()> {
        let record = {
            let mut state = self.inner.state.lock().await;
            let job = state
                .jobs
                .get_mut(&job_id)
                .ok_or_else(|| AppError::not_found(format!("Job {job_id} not found")))?;
            if job.state != JobState::Active {
                tracing::debug!(
                    "Ignoring completion of job {} in state {:?}",
                    job_id,
                    job.state
                );
                return Ok(());
            }
            job.state = JobState::Completed;
            job.progress = 100;
            job.error = None;
            job.thumbnail_url = thumbnail_url;
            job.lock_until = None;
            job.finished_at = Some(Utc::now());
            job.touch();
            job.record()
        };

        tracing::debug!("Job completed: id={}", job_id);
        self.emit(QueueEvent::Completed {
            job_id,
            file_id: record.file_id(),
        });
        self.mirror(&record).await;
        Ok(())
    }

    /// Record a failed attempt.
    ///
    /// A retryable failure with attempts left schedules the job again after
    /// an exponential backoff; anything else fails it for good. A job that is
    /// no longer active is left untouched.
    pub async fn fail(&self, job_id: JobId, error: &str, retryable: bool) -> AppResult<FailOutcome> {
        let now = Instant::now();

        let (outcome, record) = {
            let mut state = self.inner.state.lock().await;
            let job = state
                .jobs
                .get_mut(&job_id)
                .ok_or_else(|| AppError::not_found(format!("Job {job_id} not found")))?;
            if job.state != JobState::Active {
                tracing::debug!(
                    "Ignoring failure of job {} in state {:?}: {}",
                    job_id,
                    job.state,
                    error
                );
                return Ok(FailOutcome::Stale);
            }

            let outcome = if retryable && job.attempts_made < job.options.attempts {
                let delay = job.options.backoff(job.attempts_made);
                job.state = JobState::Delayed;
                job.run_at = now + delay;
                job.lock_until = None;
                job.error = Some(error.to_string());
                job.touch();
                FailOutcome::Retrying { delay }
            } else {
                job.fail(error.to_string());
                FailOutcome::Failed
            };
            (outcome, job.record())
        };

        match outcome {
            FailOutcome::Retrying { delay } => {
                tracing::debug!(
                    "Job {} attempt {}/{} failed, retrying in {:?}",
                    job_id,
                    record.attempts_made,
                    record.max_attempts,
                    delay
                );
                self.emit(QueueEvent::Retrying {
                    job_id,
                    file_id: record.file_id(),
                    attempt: record.attempts_made,
                    delay_ms: delay.as_millis() as u64,
                });
            }
            FailOutcome::Failed => {
                tracing::debug!("Job failed: id={}, error='{}'", job_id, error);
                self.emit(QueueEvent::Failed {
                    job_id,
                    file_id: record.file_id(),
                    error: error.to_string(),
                });
            }
            FailOutcome::Stale => {}
        }
        self.mirror(&record).await;
        Ok(outcome)
    }

    /// Requeue or fail active jobs whose lock expired.
    ///
    /// Returns the stalled job ids. A stalled job is failed when it has no
    /// attempts left or has stalled more often than allowed.
    pub async fn check_stalled(&self) -> Vec<JobId> {
        let now = Instant::now();
        let max_stalled = self.inner.config.max_stalled_count;

        let (stalled, records) = {
            let mut state = self.inner.state.lock().await;
            let mut stalled = Vec::new();
            let mut records = Vec::new();

            for job in state.jobs.values_mut() {
                let expired = job.state == JobState::Active
                    && job.lock_until.is_some_and(|until| until <= now);
                if !expired {
                    continue;
                }
                job.stalled_count += 1;
                if job.attempts_made >= job.options.attempts || job.stalled_count > max_stalled {
                    job.fail("Job stalled and cannot be retried".to_string());
                } else {
                    job.state = JobState::Waiting;
                    job.lock_until = None;
                    job.run_at = now;
                    job.touch();
                }
                stalled.push((job.id, job.data.file_id));
                records.push(job.record());
            }
            (stalled, records)
        };

        for (job_id, file_id) in &stalled {
            tracing::warn!(%job_id, %file_id, "Job stalled");
            self.emit(QueueEvent::Stalled {
                job_id: *job_id,
                file_id: *file_id,
            });
        }
        for record in &records {
            self.mirror(record).await;
        }
        if !stalled.is_empty() {
            self.inner.notify.notify_one();
        }

        stalled.into_iter().map(|(id, _)| id).collect()
    }

    /// Stop handing out jobs. Active jobs run to completion.
    pub async fn pause(&self) {
        self.inner.state.lock().await.paused = true;
        tracing::info!("Thumbnail queue paused");
        self.emit(QueueEvent::Paused);
    }

    /// Resume handing out jobs.
    pub async fn resume(&self) {
        self.inner.state.lock().await.paused = false;
        tracing::info!("Thumbnail queue resumed");
        self.emit(QueueEvent::Resumed);
        self.inner.notify.notify_waiters();
    }

    /// Whether the queue is paused.
    pub async fn is_paused(&self) -> bool {
        self.inner.state.lock().await.paused
    }

    /// Job counts by state.
    pub async fn stats(&self) -> QueueStats {
        let mut state = self.inner.state.lock().await;
        state.promote_due(Instant::now());

        let mut stats = QueueStats::default();
        for job in state.jobs.values() {
            match job.state {
                JobState::Waiting if state.paused => stats.paused += 1,
                JobState::Waiting => stats.waiting += 1,
                JobState::Delayed => stats.delayed += 1,
                JobState::Active => stats.active += 1,
                JobState::Completed => stats.completed += 1,
                JobState::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// Remove jobs of a state class last touched more than `older_than` ago.
    pub async fn clean(&self, class: StatusClass, older_than: Duration) -> AppResult<usize> {
        let age = TimeDelta::from_std(older_than)
            .map_err(|e| AppError::validation(format!("Invalid age threshold: {e}")))?;
        let cutoff = Utc::now() - age;

        let removed = {
            let mut state = self.inner.state.lock().await;
            state.promote_due(Instant::now());
            let paused = state.paused;

            let matches = |job: &QueuedJob| match class {
                StatusClass::Completed => job.state == JobState::Completed,
                StatusClass::Failed => job.state == JobState::Failed,
                StatusClass::Waiting => job.state == JobState::Waiting && !paused,
                StatusClass::Paused => job.state == JobState::Waiting && paused,
                StatusClass::Delayed => job.state == JobState::Delayed,
            };
            let ids: Vec<JobId> = state
                .jobs
                .values()
                .filter(|job| matches(job) && job.finished_at.unwrap_or(job.updated_at) <= cutoff)
                .map(|job| job.id)
                .collect();

            for id in &ids {
                state.jobs.remove(id);
            }
            state.by_file.retain(|_, id| !ids.contains(id));
            ids.len()
        };

        let store_status = match class {
            StatusClass::Completed => Some(ThumbnailJobStatus::Completed),
            StatusClass::Failed => Some(ThumbnailJobStatus::Failed),
            _ => None,
        };
        if let (Some(store), Some(status)) = (&self.inner.store, store_status) {
            if let Err(e) = store.delete_older_than(status, cutoff).await {
                tracing::warn!(error = %e, "Failed to clean job status store");
            }
        }

        tracing::info!(class = %class, removed, "Cleaned thumbnail jobs");
        self.emit(QueueEvent::Cleaned {
            class,
            count: removed,
        });
        Ok(removed)
    }

    /// Status of the latest job for a file, from the queue or the store.
    pub async fn status(&self, file_id: FileId) -> AppResult<Option<JobRecord>> {
        {
            let state = self.inner.state.lock().await;
            if let Some(job) = state.by_file.get(&file_id).and_then(|id| state.jobs.get(id)) {
                return Ok(Some(job.record()));
            }
        }
        match &self.inner.store {
            Some(store) => store.find_by_file(file_id).await,
            None => Ok(None),
        }
    }

    /// Status of a job by id.
    pub async fn job(&self, job_id: JobId) -> Option<JobRecord> {
        self.inner.state.lock().await.jobs.get(&job_id).map(QueuedJob::record)
    }

    /// Re-enqueue the last job of a file at high priority.
    ///
    /// Returns `None` when the file already has an unfinished job, and a
    /// not-found error when no job for the file is known.
    pub async fn retry_job(&self, file_id: FileId) -> AppResult<Option<JobHandle>> {
        let previous = match self.status(file_id).await? {
            Some(record) if !record.status.is_terminal() => {
                tracing::debug!("Retry for file {} skipped, job {} is unfinished", file_id, record.job_id);
                return Ok(None);
            }
            Some(record) => record,
            None => {
                return Err(AppError::not_found(format!(
                    "No thumbnail job known for file {file_id}"
                )));
            }
        };

        let mut job = previous.job;
        job.retry_count += 1;
        job.priority = JobPriority::High;

        let handle = self.enqueue(job).await?;
        if handle.deduplicated {
            return Ok(None);
        }
        tracing::info!(
            %file_id,
            job_id = %handle.job_id,
            previous = %previous.job_id,
            "Thumbnail job retried"
        );
        Ok(Some(handle))
    }

    /// Re-enqueue unfinished jobs recorded in the status store.
    ///
    /// Jobs that were processing when the previous process died count as
    /// stalled: they are failed if no attempts remain.
    pub async fn restore(&self) -> AppResult<usize> {
        let Some(store) = &self.inner.store else {
            return Ok(0);
        };
        let unfinished = store.list_unfinished().await?;
        let now = Instant::now();

        let records = {
            let mut state = self.inner.state.lock().await;
            let mut records = Vec::new();

            for record in unfinished {
                let file_id = record.file_id();
                if state.jobs.contains_key(&record.job_id) || state.unfinished_for(file_id).is_some() {
                    continue;
                }

                let seq = state.next_seq();
                let mut queued = QueuedJob {
                    id: record.job_id,
                    options: JobOptions {
                        attempts: record.max_attempts.max(1),
                        ..JobOptions::for_priority(record.job.priority, &self.inner.config)
                    },
                    data: record.job,
                    state: JobState::Waiting,
                    seq,
                    run_at: now,
                    lock_until: None,
                    attempts_made: record.attempts_made,
                    stalled_count: 0,
                    progress: 0,
                    error: record.error,
                    thumbnail_url: None,
                    created_at: record.created_at,
                    started_at: record.started_at,
                    finished_at: None,
                    updated_at: Utc::now(),
                };
                if record.status == ThumbnailJobStatus::Processing {
                    queued.stalled_count = 1;
                    if queued.attempts_made >= queued.options.attempts {
                        queued.fail("Job was interrupted and cannot be retried".to_string());
                    }
                }

                records.push(queued.record());
                state.by_file.insert(file_id, queued.id);
                state.jobs.insert(queued.id, queued);
            }
            records
        };

        for record in &records {
            self.mirror(record).await;
        }
        let restored = records
            .iter()
            .filter(|r| !r.status.is_terminal())
            .count();
        if restored > 0 {
            tracing::info!("Restored {} unfinished thumbnail jobs", restored);
            self.inner.notify.notify_one();
        }
        Ok(restored)
    }
}
