//! Scoped scratch directories for pipeline intermediates.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// A per-generation scratch directory.
///
/// Intermediates stay here until the pipeline is done with them, including
/// ones a later fallback tier still needs. The directory is removed when the
/// workspace is closed or dropped, on every exit path.
#[derive(Debug)]
pub struct TempWorkspace {
    dir: TempDir,
}

impl TempWorkspace {
    /// Create a fresh workspace below `root`, creating `root` if needed.
    pub async fn create(root: &Path) -> std::io::Result<Self> {
        tokio::fs::create_dir_all(root).await?;
        let root = root.to_path_buf();
        tokio::task::spawn_blocking(move || Self::create_in(&root))
            .await
            .map_err(std::io::Error::other)?
    }

    /// Create a workspace inside an existing directory.
    pub(crate) fn create_in(root: &Path) -> std::io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("thumb-").tempdir_in(root)?;
        Ok(Self { dir })
    }

    /// Workspace directory.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Path of a named intermediate inside the workspace.
    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Delete one intermediate that no later tier needs.
    ///
    /// Failures are logged and otherwise ignored.
    pub async fn discard(&self, path: &Path) {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove intermediate file");
            }
        }
    }

    /// Remove the workspace now, logging instead of failing.
    pub fn close(self) {
        let path = self.dir.path().to_path_buf();
        if let Err(e) = self.dir.close() {
            tracing::warn!(dir = %path.display(), error = %e, "Failed to clean up scratch directory");
        }
    }
}

/// Whether `path` is a regular file with content.
pub async fn is_non_empty_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_workspace_removed_on_close_and_drop() {
        let root = tempfile::tempdir().expect("root");

        let ws = TempWorkspace::create(root.path()).await.expect("workspace");
        let dir = ws.path().to_path_buf();
        tokio::fs::write(ws.file("frame.png"), b"x").await.expect("write");
        ws.close();
        assert!(!dir.exists());

        let dir = {
            let ws = TempWorkspace::create(root.path()).await.expect("workspace");
            tokio::fs::write(ws.file("page.png"), b"x").await.expect("write");
            ws.path().to_path_buf()
        };
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_discard_missing_is_silent() {
        let root = tempfile::tempdir().expect("root");
        let ws = TempWorkspace::create(root.path()).await.expect("workspace");
        let path = ws.file("nothing.png");
        ws.discard(&path).await;
        assert!(!is_non_empty_file(&path).await);
    }

    #[tokio::test]
    async fn test_missing_root_is_created() {
        let base = tempfile::tempdir().expect("base");
        let root = base.path().join("scratch").join("thumbs");

        let ws = TempWorkspace::create(&root).await.expect("workspace");
        assert!(ws.path().starts_with(&root));
        assert!(ws.path().is_dir());
    }
}
