use std::path::{Path, PathBuf};

use async_trait::async_trait;

/// External collaborator: wherever attachment bytes actually live (S3,
/// GCS, ...). Treated as out-of-scope per spec §1 — this crate only needs
/// "put these bytes under this key", "fetch them back", "delete them".
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> anyhow::Result<()>;
    async fn get(&self, key: &str) -> anyhow::Result<Vec<u8>>;
    /// Idempotent: deleting a key that's already gone is not an error.
    async fn delete(&self, key: &str) -> anyhow::Result<()>;
}

/// Local-disk `BlobStore` for single-operator deployments and tests,
/// mirroring `StaticKmsProvider`'s role as the one concrete implementation
/// shipped for an interface spec.md treats as an external collaborator.
pub struct FilesystemBlobStore {
    root: PathBuf,
}

impl FilesystemBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> anyhow::Result<PathBuf> {
        if key.is_empty() || key.contains("..") || Path::new(key).is_absolute() {
            anyhow::bail!("invalid storage key: {key}");
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> anyhow::Result<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> anyhow::Result<Vec<u8>> {
        let path = self.resolve(key)?;
        Ok(tokio::fs::read(&path).await?)
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        let path = self.resolve(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemBlobStore::new(dir.path());
        store.put("groups/g1/a.bin", b"hello".to_vec()).await.unwrap();
        let back = store.get("groups/g1/a.bin").await.unwrap();
        assert_eq!(back, b"hello");
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemBlobStore::new(dir.path());
        store.delete("never-existed").await.unwrap();
        store.put("a", b"x".to_vec()).await.unwrap();
        store.delete("a").await.unwrap();
        store.delete("a").await.unwrap();
    }

    #[tokio::test]
    async fn traversal_outside_root_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemBlobStore::new(dir.path());
        assert!(store.put("../escape", b"x".to_vec()).await.is_err());
    }
}
