//! Repository implementations for the Thumbforge stores.

pub mod file_metadata;
pub mod job_status;

pub use file_metadata::FileMetadataRepository;
pub use job_status::ThumbnailJobRepository;
