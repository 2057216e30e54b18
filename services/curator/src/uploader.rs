//! Idempotent transfer of validated local images to the object store.

use crate::store::ObjectStore;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Errors that can occur while uploading a single image
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Local file {0} is missing")]
    LocalFileMissing(PathBuf),

    #[error("Failed to check {key} in the store: {source:#}")]
    ExistenceCheck {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to upload {key}: {source:#}")]
    Put {
        key: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Successful upload outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    /// Object written and local copy reclaimed
    Uploaded,
    /// Key already present remotely; local copy reclaimed
    Duplicate,
}

/// Pushes files from the working directory to the store
pub struct Uploader {
    store: Arc<dyn ObjectStore>,
    work_dir: PathBuf,
}

impl Uploader {
    pub fn new(store: Arc<dyn ObjectStore>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            work_dir: work_dir.into(),
        }
    }

    /// Upload `filename` under the same key unless the store already has it.
    ///
    /// The existence check goes to the store itself rather than the run's
    /// inventory snapshot. On failure the local file is kept for inspection.
    #[instrument(skip(self))]
    pub async fn upload(&self, filename: &str) -> Result<UploadStatus, UploadError> {
        let local_path = self.work_dir.join(filename);
        if !tokio::fs::try_exists(&local_path).await.unwrap_or(false) {
            return Err(UploadError::LocalFileMissing(local_path));
        }

        let exists = self
            .store
            .exists(filename)
            .await
            .map_err(|source| UploadError::ExistenceCheck {
                key: filename.to_string(),
                source,
            })?;

        if exists {
            debug!("Object already stored, discarding local copy");
            remove_local(&local_path).await;
            return Ok(UploadStatus::Duplicate);
        }

        self.store
            .put_file(filename, &local_path)
            .await
            .map_err(|source| UploadError::Put {
                key: filename.to_string(),
                source,
            })?;

        remove_local(&local_path).await;
        info!(store = %self.store.describe(), "Image uploaded");

        Ok(UploadStatus::Uploaded)
    }
}

async fn remove_local(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove local file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MockObjectStore;

    fn staged(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"png").unwrap();
        path
    }

    #[tokio::test]
    async fn test_upload_then_reclaim() {
        let dir = tempfile::tempdir().unwrap();
        let local = staged(dir.path(), "a cat.png");

        let mut store = MockObjectStore::new();
        store
            .expect_exists()
            .withf(|key| key == "a cat.png")
            .returning(|_| Ok(false));
        store
            .expect_put_file()
            .withf(|key, path| key == "a cat.png" && path.ends_with("a cat.png"))
            .times(1)
            .returning(|_, _| Ok(()));
        store.expect_describe().returning(|| "mock://bucket".to_string());

        let uploader = Uploader::new(Arc::new(store), dir.path());
        assert_eq!(uploader.upload("a cat.png").await.unwrap(), UploadStatus::Uploaded);
        assert!(!local.exists());
    }

    #[tokio::test]
    async fn test_existing_key_is_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let local = staged(dir.path(), "a cat.png");

        let mut store = MockObjectStore::new();
        store.expect_exists().returning(|_| Ok(true));
        store.expect_put_file().never();

        let uploader = Uploader::new(Arc::new(store), dir.path());
        assert_eq!(uploader.upload("a cat.png").await.unwrap(), UploadStatus::Duplicate);
        assert!(!local.exists());
    }

    #[tokio::test]
    async fn test_put_failure_keeps_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let local = staged(dir.path(), "a cat.png");

        let mut store = MockObjectStore::new();
        store.expect_exists().returning(|_| Ok(false));
        store
            .expect_put_file()
            .returning(|_, _| Err(anyhow::anyhow!("connection reset")));

        let uploader = Uploader::new(Arc::new(store), dir.path());
        let err = uploader.upload("a cat.png").await.unwrap_err();

        assert!(matches!(err, UploadError::Put { .. }));
        assert!(err.to_string().contains("connection reset"));
        assert!(local.exists());
    }

    #[tokio::test]
    async fn test_missing_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = MockObjectStore::new();
        store.expect_exists().never();

        let uploader = Uploader::new(Arc::new(store), dir.path());
        assert!(matches!(
            uploader.upload("never-fetched.png").await,
            Err(UploadError::LocalFileMissing(_))
        ));
    }
}
