//! # thumbforge-database
//!
//! PostgreSQL connection management and the `sqlx` implementations of the
//! job status and file metadata stores.

pub mod connection;
pub mod migration;
pub mod repositories;

pub use connection::DatabasePool;
pub use repositories::{FileMetadataRepository, ThumbnailJobRepository};
