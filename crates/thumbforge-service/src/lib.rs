//! # thumbforge-service
//!
//! Service layer for Thumbforge. [`ThumbnailService`] exposes generation and
//! queue administration, [`UploadService`] decides per upload whether
//! thumbnails are produced inline or queued, and [`PreviewService`] serves
//! thumbnails on demand as byte streams.
//!
//! Services follow constructor injection: all collaborators are provided
//! at construction time.

pub mod metadata;
pub mod source;
pub mod thumbnail;

pub use metadata::MemoryMetadataStore;
pub use source::SourceLocator;
pub use thumbnail::{
    ByteStream, GeneratedThumbnail, PreviewService, ThumbnailService, ThumbnailStream,
    UploadOutcome, UploadService, UploadedFile,
};
