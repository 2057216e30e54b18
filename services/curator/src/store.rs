//! Object store backends.
//!
//! The pipeline consumes three capabilities from the destination store: list
//! every key, check a single key, and put a local file under a key. S3 (or any
//! S3-compatible endpoint) is the production backend; a directory-backed store
//! serves local dataset builds.

use crate::config::{StoreBackend, StoreConfig};
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Capabilities consumed from the destination store
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Enumerate every key currently stored, following pagination to the end
    async fn list_keys(&self) -> Result<Vec<String>>;

    /// Authoritative existence check for a single key
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Store the contents of a local file under the given key
    async fn put_file(&self, key: &str, path: &Path) -> Result<()>;

    /// Human-readable destination, for logs
    fn describe(&self) -> String;
}

/// Build the backend selected by configuration
pub async fn from_config(config: &StoreConfig) -> Result<Arc<dyn ObjectStore>> {
    match config.backend {
        StoreBackend::S3 => Ok(Arc::new(S3Store::new(config).await?)),
        StoreBackend::Local => {
            let root = config
                .local_root
                .clone()
                .context("store.local_root is required for the local backend")?;
            Ok(Arc::new(FilesystemStore::new(root)?))
        }
    }
}

/// S3 bucket backend
pub struct S3Store {
    client: S3Client,
    bucket: String,
}

impl S3Store {
    /// Create a new S3 store client
    pub async fn new(config: &StoreConfig) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 store initialized"
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn list_keys(&self) -> Result<Vec<String>> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .into_paginator()
            .send();

        let mut keys = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.context("Failed to list objects")?;
            keys.extend(
                page.contents()
                    .iter()
                    .filter_map(|obj| obj.key().map(String::from)),
            );
        }

        debug!(keys = keys.len(), "Listed bucket");
        Ok(keys)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                {
                    Ok(false)
                } else {
                    Err(e).context("Failed to check object existence")
                }
            }
        }
    }

    #[instrument(skip(self, path), fields(bucket = %self.bucket))]
    async fn put_file(&self, key: &str, path: &Path) -> Result<()> {
        let body = ByteStream::from_path(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(content_type(key))
            .send()
            .await
            .context("Failed to upload object to S3")?;

        Ok(())
    }

    fn describe(&self) -> String {
        format!("s3://{}", self.bucket)
    }
}

/// Suffix of objects still being written to a `FilesystemStore`
const PARTIAL_SUFFIX: &str = ".part";

/// Directory-backed store; keys are file names under the root.
///
/// Objects are copied to `<key>.part` and renamed into place, so a key is only
/// visible once its contents are complete.
pub struct FilesystemStore {
    root: PathBuf,
}

impl FilesystemStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create store root {}", root.display()))?;
        Ok(Self { root })
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn partial_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}{}", key, PARTIAL_SUFFIX))
    }
}

#[async_trait]
impl ObjectStore for FilesystemStore {
    async fn list_keys(&self) -> Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .with_context(|| format!("Failed to list {}", self.root.display()))?;

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.ends_with(PARTIAL_SUFFIX) {
                keys.push(name);
            }
        }
        Ok(keys)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        tokio::fs::try_exists(self.object_path(key))
            .await
            .context("Failed to check object existence")
    }

    async fn put_file(&self, key: &str, path: &Path) -> Result<()> {
        let partial = self.partial_path(key);

        if let Err(e) = tokio::fs::copy(path, &partial).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e)
                .with_context(|| format!("Failed to store {} as {}", path.display(), key));
        }

        tokio::fs::rename(&partial, self.object_path(key))
            .await
            .with_context(|| format!("Failed to publish {}", key))?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("file://{}", self.root.display())
    }
}

/// Get content type for an object key
fn content_type(key: &str) -> &'static str {
    let extension = key.rsplit_once('.').map(|(_, ext)| ext.to_lowercase());
    match extension.as_deref() {
        Some("png") => "image/png",
        Some("jpeg") | Some("jpg") => "image/jpeg",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type() {
        assert_eq!(content_type("a cat.png"), "image/png");
        assert_eq!(content_type("photo.JPG"), "image/jpeg");
        assert_eq!(content_type("no-extension"), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_filesystem_store_roundtrip() {
        let root = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(root.path()).unwrap();

        let local = scratch.path().join("a cat.png");
        std::fs::write(&local, b"png bytes").unwrap();

        assert!(!store.exists("a cat.png").await.unwrap());
        store.put_file("a cat.png", &local).await.unwrap();
        assert!(store.exists("a cat.png").await.unwrap());
        assert_eq!(store.list_keys().await.unwrap(), vec!["a cat.png".to_string()]);
        assert_eq!(
            std::fs::read(root.path().join("a cat.png")).unwrap(),
            b"png bytes"
        );
    }

    #[tokio::test]
    async fn test_filesystem_store_ignores_interrupted_writes() {
        let root = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(root.path()).unwrap();

        // Left behind by a run stopped mid-copy.
        std::fs::write(root.path().join("a cat.png.part"), b"png by").unwrap();

        assert!(store.list_keys().await.unwrap().is_empty());
        assert!(!store.exists("a cat.png").await.unwrap());

        let local = scratch.path().join("a cat.png");
        std::fs::write(&local, b"png bytes").unwrap();
        store.put_file("a cat.png", &local).await.unwrap();

        assert_eq!(store.list_keys().await.unwrap(), vec!["a cat.png".to_string()]);
        assert_eq!(
            std::fs::read(root.path().join("a cat.png")).unwrap(),
            b"png bytes"
        );
        assert!(!root.path().join("a cat.png.part").exists());
    }

    #[tokio::test]
    async fn test_from_config_local_backend() {
        let root = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            backend: StoreBackend::Local,
            local_root: Some(root.path().to_path_buf()),
            ..StoreConfig::default()
        };

        let store = from_config(&config).await.unwrap();
        assert!(store.describe().starts_with("file://"));
        assert!(store.list_keys().await.unwrap().is_empty());
    }
}
