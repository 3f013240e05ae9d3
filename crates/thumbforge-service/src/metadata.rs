//! In-memory metadata store, used when no database is configured.

use async_trait::async_trait;
use dashmap::DashMap;

use thumbforge_core::result::AppResult;
use thumbforge_core::traits::metadata::MetadataStore;
use thumbforge_core::types::FileId;

/// Thumbnail URLs kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryMetadataStore {
    urls: DashMap<FileId, String>,
}

impl MemoryMetadataStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of files with a thumbnail URL.
    pub fn len(&self) -> usize {
        self.urls.len()
    }

    /// Whether no file has a thumbnail URL.
    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn update_thumbnail_url(&self, file_id: FileId, url: &str) -> AppResult<()> {
        self.urls.insert(file_id, url.to_string());
        Ok(())
    }

    async fn thumbnail_url(&self, file_id: FileId) -> AppResult<Option<String>> {
        Ok(self.urls.get(&file_id).map(|url| url.value().clone()))
    }

    async fn clear_thumbnail_url(&self, file_id: FileId) -> AppResult<()> {
        self.urls.remove(&file_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_update_and_clear() {
        let store = MemoryMetadataStore::new();
        let file_id = FileId::new();

        store
            .update_thumbnail_url(file_id, "/thumbnails/150x150/a.webp")
            .await
            .expect("update");
        store
            .update_thumbnail_url(file_id, "/thumbnails/300x300/a.webp")
            .await
            .expect("update");
        assert_eq!(
            store.thumbnail_url(file_id).await.expect("get").as_deref(),
            Some("/thumbnails/300x300/a.webp")
        );

        store.clear_thumbnail_url(file_id).await.expect("clear");
        assert!(store.is_empty());
    }
}
