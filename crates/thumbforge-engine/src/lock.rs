//! Per-key generation locks.
//!
//! A table of in-flight generations keyed by `(file, size.format)`. The
//! first caller for a key spawns the work and registers a shared handle;
//! later callers await that handle. The spawned task removes its own entry
//! once the work settles, whatever the outcome.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use thumbforge_core::types::{FileId, ThumbnailErrorKind, ThumbnailOptions, ThumbnailResult};

/// Identity of one generation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey {
    /// Source file.
    pub file_id: FileId,
    /// `"{w}x{h}.{format}"`.
    pub size_spec: String,
}

impl LockKey {
    /// Key for a file and target options.
    pub fn new(file_id: FileId, options: &ThumbnailOptions) -> Self {
        Self {
            file_id,
            size_spec: format!("{}.{}", options.size_spec(), options.format.extension()),
        }
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file_id, self.size_spec)
    }
}

type InFlight = Shared<BoxFuture<'static, ThumbnailResult>>;

/// How a caller obtained its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    /// This caller started the work.
    Led,
    /// This caller joined work another caller started.
    Joined,
}

/// Table of in-flight generations.
#[derive(Clone, Default)]
pub struct GenerationLocks {
    inflight: Arc<DashMap<LockKey, InFlight>>,
}

impl fmt::Debug for GenerationLocks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationLocks")
            .field("in_flight", &self.inflight.len())
            .finish()
    }
}

impl GenerationLocks {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of generations currently running.
    pub fn in_flight(&self) -> usize {
        self.inflight.len()
    }

    /// Whether a generation for `key` is running.
    pub fn is_running(&self, key: &LockKey) -> bool {
        self.inflight.contains_key(key)
    }

    /// Run `work` for `key`, or join the run already in flight.
    ///
    /// `make` is only called by the caller that wins registration. The work
    /// runs on its own task, so it completes and caches its output even if
    /// every caller stops waiting.
    pub async fn run<F>(&self, key: LockKey, make: F) -> (ThumbnailResult, LockOutcome)
    where
        F: FnOnce() -> BoxFuture<'static, ThumbnailResult>,
    {
        // The entry guard holds the shard lock, so check-then-register is
        // atomic with respect to other callers.
        let (shared, outcome) = match self.inflight.entry(key.clone()) {
            Entry::Occupied(entry) => (entry.get().clone(), LockOutcome::Joined),
            Entry::Vacant(entry) => {
                let table = Arc::clone(&self.inflight);
                let work = make();
                let task_key = key.clone();
                let handle = tokio::spawn(async move {
                    let result = work.await;
                    table.remove(&task_key);
                    result
                });

                let file_id = key.file_id;
                let shared = async move {
                    match handle.await {
                        Ok(result) => result,
                        Err(e) => ThumbnailResult::failed(
                            file_id,
                            ThumbnailErrorKind::Internal,
                            format!("Generation task aborted: {e}"),
                            0,
                        ),
                    }
                }
                .boxed()
                .shared();

                entry.insert(shared.clone());
                (shared, LockOutcome::Led)
            }
        };

        if outcome == LockOutcome::Joined {
            tracing::debug!(key = %key, "Joined in-flight thumbnail generation");
        }

        (shared.await, outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use thumbforge_core::config::thumbnail::ThumbnailConfig;
    use thumbforge_core::types::SizePreset;

    fn key(file_id: FileId) -> LockKey {
        LockKey::new(
            file_id,
            &ThumbnailOptions::from_preset(SizePreset::Large, &ThumbnailConfig::default()),
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_share_one_execution() {
        let locks = GenerationLocks::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let file_id = FileId::new();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let runs = Arc::clone(&runs);
            handles.push(tokio::spawn(async move {
                locks
                    .run(key(file_id), move || {
                        async move {
                            runs.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(100)).await;
                            ThumbnailResult::succeeded(
                                file_id,
                                PathBuf::from("/tmp/x.webp"),
                                None,
                                100,
                                false,
                            )
                        }
                        .boxed()
                    })
                    .await
            }));
        }

        let mut led = 0;
        for handle in handles {
            let (result, outcome) = handle.await.expect("join");
            assert!(result.success);
            assert_eq!(result.thumbnail_path, Some(PathBuf::from("/tmp/x.webp")));
            if outcome == LockOutcome::Led {
                led += 1;
            }
        }

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(led, 1);
        assert_eq!(locks.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_entry_removed_after_failure() {
        let locks = GenerationLocks::new();
        let file_id = FileId::new();

        let (result, _) = locks
            .run(key(file_id), move || {
                async move {
                    ThumbnailResult::failed(file_id, ThumbnailErrorKind::ToolFailed, "boom", 1)
                }
                .boxed()
            })
            .await;

        assert!(!result.success);
        assert!(!locks.is_running(&key(file_id)));

        // A new run for the same key starts fresh work.
        let (result, outcome) = locks
            .run(key(file_id), move || {
                async move {
                    ThumbnailResult::succeeded(file_id, PathBuf::from("/tmp/y"), None, 1, false)
                }
                .boxed()
            })
            .await;
        assert!(result.success);
        assert_eq!(outcome, LockOutcome::Led);
    }

    #[tokio::test]
    async fn test_distinct_sizes_do_not_collide() {
        let a = key(FileId::new());
        let mut b = a.clone();
        b.size_spec = "150x150.webp".to_string();
        assert_ne!(a, b);
        assert_eq!(a.size_spec, "600x600.webp");
    }
}
