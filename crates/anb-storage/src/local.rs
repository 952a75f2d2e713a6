//! Filesystem-backed blob store.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use crate::config::StorageKind;
use crate::error::{StorageError, StorageResult};
use crate::store::{BlobStore, Locator};

/// Stores blobs as files under a root directory.
///
/// Locators are the stored file's path (`{root}/{key}`), matching what the
/// upload side has always persisted for local deployments.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    /// Create a store rooted at `root`, creating the directory if needed.
    pub async fn new(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Join a relative key onto the root, rejecting absolute paths and `..`.
    fn key_path(&self, key: &str) -> StorageResult<PathBuf> {
        let relative = Path::new(key);
        if key.is_empty()
            || relative.is_absolute()
            || relative.components().any(|component| {
                matches!(
                    component,
                    Component::ParentDir | Component::Prefix(_) | Component::RootDir
                )
            })
        {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }

    /// Map a locator back to a file under the root.
    ///
    /// Accepts both full locators (`{root}/{key}`) and bare keys.
    fn resolve(&self, locator: &Locator) -> StorageResult<PathBuf> {
        let path = Path::new(locator.as_str());
        match path.strip_prefix(&self.root) {
            Ok(relative) => self.key_path(&relative.to_string_lossy()),
            Err(_) if path.is_absolute() => {
                Err(StorageError::ForeignLocator(locator.to_string()))
            }
            Err(_) => self.key_path(locator.as_str()),
        }
    }

    fn locator_for(&self, path: &Path) -> Locator {
        Locator::new(path.to_string_lossy().to_string())
    }

    /// Temporary sibling used to make writes appear atomically.
    fn staging_path(dest: &Path) -> PathBuf {
        let name = dest
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        dest.with_file_name(format!(".{}.{}.partial", name, uuid::Uuid::new_v4().simple()))
    }

    async fn commit(staging: &Path, dest: &Path) -> StorageResult<()> {
        if let Err(e) = fs::rename(staging, dest).await {
            let _ = fs::remove_file(staging).await;
            return Err(StorageError::upload_failed(format!(
                "Failed to move {} into place: {}",
                dest.display(),
                e
            )));
        }
        Ok(())
    }

    async fn prepare_dest(&self, key: &str) -> StorageResult<PathBuf> {
        let dest = self.key_path(key)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(dest)
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    fn kind(&self) -> StorageKind {
        StorageKind::Local
    }

    async fn put(&self, local_path: &Path, key: &str) -> StorageResult<Locator> {
        let dest = self.prepare_dest(key).await?;
        let staging = Self::staging_path(&dest);
        debug!("Storing {} at {}", local_path.display(), dest.display());

        if let Err(e) = fs::copy(local_path, &staging).await {
            let _ = fs::remove_file(&staging).await;
            return Err(StorageError::upload_failed(format!(
                "Failed to copy {}: {}",
                local_path.display(),
                e
            )));
        }
        Self::commit(&staging, &dest).await?;

        info!(key, "Stored {}", local_path.display());
        Ok(self.locator_for(&dest))
    }

    async fn put_bytes(&self, data: Vec<u8>, key: &str) -> StorageResult<Locator> {
        let dest = self.prepare_dest(key).await?;
        let staging = Self::staging_path(&dest);
        debug!("Storing {} bytes at {}", data.len(), dest.display());

        if let Err(e) = fs::write(&staging, &data).await {
            let _ = fs::remove_file(&staging).await;
            return Err(StorageError::upload_failed(e.to_string()));
        }
        Self::commit(&staging, &dest).await?;

        Ok(self.locator_for(&dest))
    }

    async fn get(&self, locator: &Locator, local_path: &Path) -> StorageResult<()> {
        let src = self.resolve(locator)?;
        if !fs::try_exists(&src).await? {
            return Err(StorageError::not_found(locator.as_str()));
        }

        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        if let Err(e) = fs::copy(&src, local_path).await {
            let _ = fs::remove_file(local_path).await;
            return Err(StorageError::download_failed(format!(
                "Failed to copy {}: {}",
                src.display(),
                e
            )));
        }

        debug!("Fetched {} to {}", locator, local_path.display());
        Ok(())
    }

    async fn delete(&self, locator: &Locator) -> StorageResult<bool> {
        let path = self.resolve(locator)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::delete_failed(e.to_string())),
        }
    }

    async fn exists(&self, locator: &Locator) -> StorageResult<bool> {
        let path = self.resolve(locator)?;
        Ok(fs::try_exists(&path).await?)
    }

    fn url_for(&self, key: &str) -> String {
        self.root.join(key).to_string_lossy().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store(dir: &TempDir) -> LocalBlobStore {
        LocalBlobStore::new(dir.path().join("uploads")).await.unwrap()
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;

        let src = dir.path().join("clip.mp4");
        fs::write(&src, b"video bytes").await.unwrap();

        let locator = store.put(&src, "videos/v1/clip.mp4").await.unwrap();
        assert_eq!(locator.as_str(), store.url_for("videos/v1/clip.mp4"));
        assert!(store.exists(&locator).await.unwrap());

        let out = dir.path().join("work").join("source.mp4");
        store.get(&locator, &out).await.unwrap();
        assert_eq!(fs::read(&out).await.unwrap(), b"video bytes");
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;

        let missing = Locator::from("videos/none/clip.mp4");
        let err = store
            .get(&missing, &dir.path().join("out.mp4"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(!dir.path().join("out.mp4").exists());
    }

    #[tokio::test]
    async fn test_failed_put_leaves_nothing_behind() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;

        let err = store
            .put(&dir.path().join("does-not-exist.mp4"), "processed/v1/out.mp4")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::UploadFailed(_)));

        let mut entries = fs::read_dir(store.root().join("processed/v1")).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_reports_presence() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;

        let locator = store
            .put_bytes(b"abc".to_vec(), "videos/v2/a.mp4")
            .await
            .unwrap();
        assert!(store.delete(&locator).await.unwrap());
        assert!(!store.delete(&locator).await.unwrap());
        assert!(!store.exists(&locator).await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_traversal() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;

        let err = store
            .put_bytes(b"x".to_vec(), "../escape.mp4")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)));

        let foreign = Locator::from("/etc/passwd");
        assert!(matches!(
            store.exists(&foreign).await,
            Err(StorageError::ForeignLocator(_))
        ));
    }
}
