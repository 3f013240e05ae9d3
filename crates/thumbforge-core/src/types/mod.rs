//! Shared domain types.

pub mod id;
pub mod job;
pub mod thumbnail;

pub use id::{FileId, JobId};
pub use job::{JobPriority, JobRecord, ThumbnailJob, ThumbnailJobStatus};
pub use thumbnail::{
    FitMode, MimeCategory, SizePreset, ThumbnailError, ThumbnailErrorKind, ThumbnailFormat,
    ThumbnailOptions, ThumbnailResult,
};
