//! Filesystem access used by the orchestrator.

use std::path::Path;

use async_trait::async_trait;

#[async_trait]
pub trait FileStore: Send + Sync {
    async fn exists(&self, path: &str) -> bool;

    async fn read_text(&self, path: &Path) -> std::io::Result<String>;

    /// Write `content`, creating parent directories. Returns false on any
    /// I/O error.
    async fn write_text(&self, path: &str, content: &str) -> bool;
}

/// `FileStore` backed by the local disk.
#[derive(Debug, Clone, Default)]
pub struct LocalFileStore;

impl LocalFileStore {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn exists(&self, path: &str) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn read_text(&self, path: &Path) -> std::io::Result<String> {
        tokio::fs::read_to_string(path).await
    }

    async fn write_text(&self, path: &str, content: &str) -> bool {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    tracing::warn!(path, error = %e, "failed to create output directory");
                    return false;
                }
            }
        }
        match tokio::fs::write(path, content).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(path, error = %e, "failed to write output file");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_into_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a/b/c.test.ts");
        let target = target.to_string_lossy().to_string();
        let store = LocalFileStore::new();

        assert!(!store.exists(&target).await);
        assert!(store.write_text(&target, "hello").await);
        assert!(store.exists(&target).await);
        assert_eq!(store.read_text(Path::new(&target)).await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn write_failure_returns_false() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        let target = blocker.join("nested.txt").to_string_lossy().to_string();

        assert!(!LocalFileStore::new().write_text(&target, "content").await);
    }
}
