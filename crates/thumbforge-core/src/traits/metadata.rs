//! Persistence of thumbnail URLs against file records.

use async_trait::async_trait;

use crate::result::AppResult;
use crate::types::id::FileId;

/// Stores the thumbnail URL of a file so later lookups can short-circuit.
#[async_trait]
pub trait MetadataStore: Send + Sync + std::fmt::Debug + 'static {
    /// Record the thumbnail URL for a file.
    async fn update_thumbnail_url(&self, file_id: FileId, url: &str) -> AppResult<()>;

    /// Current thumbnail URL of a file, if any.
    async fn thumbnail_url(&self, file_id: FileId) -> AppResult<Option<String>>;

    /// Forget the thumbnail URL of a file.
    async fn clear_thumbnail_url(&self, file_id: FileId) -> AppResult<()>;
}
