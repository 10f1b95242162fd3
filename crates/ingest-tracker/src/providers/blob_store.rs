//! Blob storage for source documents and extracted text

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// Key/value blob storage
///
/// Implementations:
/// - `LocalBlobStore`: Local filesystem
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store a blob, returning its URI
    async fn put(&self, key: &str, data: &[u8]) -> Result<String>;

    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Delete a blob; missing blobs are not an error
    async fn delete(&self, key: &str) -> Result<()>;

    async fn health_check(&self) -> Result<bool>;

    /// Store name for logging
    fn name(&self) -> &str;
}

/// Blobs as files under a root directory
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a key under the root, refusing keys that escape it
    fn blob_path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(Error::BlobStore(format!("invalid blob key '{}'", key)));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, key: &str, data: &[u8]) -> Result<String> {
        let path = self.blob_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data).await?;
        Ok(path.to_string_lossy().to_string())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.blob_path(key)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| Error::BlobStore(format!("Failed to read blob {}: {}", key, e)))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.blob_path(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.blob_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.root.is_dir())
    }

    fn name(&self) -> &str {
        "local-filesystem"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path()).unwrap();

        let uri = store.put("extracted/uploads/a.pdf.txt", b"hello").await.unwrap();
        assert!(uri.ends_with("a.pdf.txt"));
        assert!(store.exists("extracted/uploads/a.pdf.txt").await.unwrap());
        assert_eq!(store.get("extracted/uploads/a.pdf.txt").await.unwrap(), b"hello");

        store.delete("extracted/uploads/a.pdf.txt").await.unwrap();
        assert!(!store.exists("extracted/uploads/a.pdf.txt").await.unwrap());
        // second delete is a no-op
        store.delete("extracted/uploads/a.pdf.txt").await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path()).unwrap();

        for key in ["../etc/passwd", "/abs/path", "a/../../b", ""] {
            assert!(matches!(
                store.put(key, b"x").await,
                Err(Error::BlobStore(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_missing_blob_is_blob_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path()).unwrap();
        assert!(matches!(store.get("nope").await, Err(Error::BlobStore(_))));
        assert!(store.health_check().await.unwrap());
    }
}
