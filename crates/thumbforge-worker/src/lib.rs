//! Background thumbnail generation for Thumbforge.
//!
//! This crate provides:
//! - An in-memory priority job queue with delays, exponential backoff,
//!   per-file deduplication, pause/resume, cleaning and stall recovery
//! - A job status store mirroring queue state for inspection
//! - A job handler that runs the conversion engine for one queued job
//! - A worker runner that drains the queue with bounded concurrency

pub mod executor;
pub mod jobs;
pub mod queue;
pub mod runner;
pub mod store;

pub use executor::{JobContext, JobExecutionError, JobHandler, JobOutput};
pub use jobs::thumbnail::ThumbnailJobHandler;
pub use queue::{JobHandle, JobQueue, QueueEvent, QueueStats, StatusClass};
pub use runner::WorkerRunner;
pub use store::MemoryJobStore;
