//! Image download and validation.
//!
//! A fetch streams the remote body into `<filename>.part` inside the working
//! directory, decodes and checks it against the image policy, then re-encodes
//! the accepted image as PNG under the final filename. A file present under the
//! final name is therefore always a completed, validated image, which is what
//! lets an interrupted run resume without downloading it again.

use crate::config::FetchConfig;
use crate::image_policy::{probe_exif, write_png, ImagePolicy, RejectReason};
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

const PARTIAL_SUFFIX: &str = ".part";

/// Errors that can occur while fetching a single image
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Unexpected HTTP status {0}")]
    HttpStatus(StatusCode),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Image worker failed: {0}")]
    Worker(String),
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> FetchError + '_ {
    move |source| FetchError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// One unit of work: where to get an image and what to call it
#[derive(Debug, Clone)]
pub struct FetchTask {
    /// Object key and local basename; the task identity
    pub filename: String,
    /// Remote location of the image
    pub url: String,
    /// Policy snapshot applied to the downloaded image
    pub policy: Arc<ImagePolicy>,
}

/// Result of a fetch that did not error
#[derive(Debug, Clone, PartialEq)]
pub enum FetchStatus {
    /// Downloaded, accepted and written as PNG
    Fetched { width: u32, height: u32 },
    /// A completed local file from an earlier attempt was found
    AlreadyPresent,
    /// Downloaded but refused by policy; nothing is left on disk
    Rejected(RejectReason),
}

/// Downloads images with a pooled HTTP client owned for the whole run
pub struct ImageFetcher {
    client: Client,
    work_dir: PathBuf,
}

impl ImageFetcher {
    /// Create a fetcher with a connection pool sized for the worker count
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .connect_timeout(config.connection_timeout())
            .read_timeout(config.read_timeout())
            .pool_max_idle_per_host(config.num_workers)
            .build()?;

        std::fs::create_dir_all(&config.temporary_folder)
            .map_err(io_error(&config.temporary_folder))?;

        Ok(Self {
            client,
            work_dir: config.temporary_folder.clone(),
        })
    }

    /// Local path of a task's completed image
    pub fn local_path(&self, filename: &str) -> PathBuf {
        self.work_dir.join(filename)
    }

    /// Download, validate and transform one image
    #[instrument(skip(self, task), fields(filename = %task.filename))]
    pub async fn fetch(&self, task: &FetchTask) -> Result<FetchStatus, FetchError> {
        let target = self.local_path(&task.filename);
        if tokio::fs::try_exists(&target)
            .await
            .map_err(io_error(&target))?
        {
            debug!("Local file already present, skipping download");
            return Ok(FetchStatus::AlreadyPresent);
        }

        let partial = self
            .work_dir
            .join(format!("{}{}", task.filename, PARTIAL_SUFFIX));

        let result = self.download_and_process(task, &partial, &target).await;

        // The partial file never outlives the attempt.
        if let Err(e) = tokio::fs::remove_file(&partial).await {
            if e.kind() != io::ErrorKind::NotFound {
                debug!(error = %e, "Failed to remove partial download");
            }
        }

        result
    }

    async fn download_and_process(
        &self,
        task: &FetchTask,
        partial: &Path,
        target: &Path,
    ) -> Result<FetchStatus, FetchError> {
        let response = self.client.get(&task.url).send().await?;
        if response.status() != StatusCode::OK {
            return Err(FetchError::HttpStatus(response.status()));
        }

        let mut file = tokio::fs::File::create(partial)
            .await
            .map_err(io_error(partial))?;
        let mut body = response.bytes_stream();
        let mut size = 0usize;
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            size += chunk.len();
            file.write_all(&chunk).await.map_err(io_error(partial))?;
        }
        file.flush().await.map_err(io_error(partial))?;
        drop(file);

        debug!(url = %task.url, size_bytes = size, "Downloaded image");

        let policy = task.policy.clone();
        let partial = partial.to_path_buf();
        let target = target.to_path_buf();
        tokio::task::spawn_blocking(move || validate_and_store(&partial, &target, &policy))
            .await
            .map_err(|e| FetchError::Worker(e.to_string()))?
    }
}

/// Decode the downloaded file, apply the policy and persist the PNG
fn validate_and_store(
    partial: &Path,
    target: &Path,
    policy: &ImagePolicy,
) -> Result<FetchStatus, FetchError> {
    let encoded = std::fs::read(partial).map_err(io_error(partial))?;
    let image = image::load_from_memory(&encoded)?;

    let exif = if policy.requires_exif() {
        match probe_exif(&encoded) {
            Ok(summary) => Some(summary),
            Err(e) => {
                debug!(error = %e, "No readable EXIF block");
                None
            }
        }
    } else {
        None
    };

    if let Err(reason) = policy.evaluate(&image, exif.as_ref()) {
        debug!(reason = %reason, "Image rejected by policy");
        return Ok(FetchStatus::Rejected(reason));
    }

    let image = policy.condition(image);
    let (width, height) = (image.width(), image.height());

    // Overwrite the download in place, then publish under the final name.
    write_png(&image, partial)?;
    std::fs::rename(partial, target).map_err(io_error(target))?;

    Ok(FetchStatus::Fetched { width, height })
}
