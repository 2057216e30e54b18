//! Per-catalog driver: load, resolve, filter, name, dedup, dispatch.

use crate::catalog::{discover_catalogs, load_catalog, Catalog, CatalogFormat, Value};
use crate::config::{CatalogConfig, Config};
use crate::fetcher::{FetchTask, ImageFetcher};
use crate::filename::{derive_filename, derive_from_text, FilenameError};
use crate::image_policy::ImagePolicy;
use crate::inventory::Inventory;
use crate::orchestrator::{BatchSummary, Orchestrator, TaskOutcome};
use crate::row_filter::RowFilter;
use crate::schema::{self, ColumnOverrides, ResolvedSchema};
use crate::store::ObjectStore;
use crate::uploader::Uploader;
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Caption markers of Midjourney exports: only upscaled, non-variation images are kept
const MIDJOURNEY_UPSCALED: &str = "Upscaled";
const MIDJOURNEY_VARIATIONS: &str = "Variations";

/// Find catalog files in the configured folders, sorted and capped
pub fn discover(config: &CatalogConfig) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    if let Some(folder) = &config.parquet_folder {
        files.extend(
            discover_catalogs(folder, CatalogFormat::Parquet)
                .with_context(|| format!("Failed to list {}", folder.display()))?,
        );
    }
    if let Some(folder) = &config.csv_folder {
        files.extend(
            discover_catalogs(folder, CatalogFormat::Csv)
                .with_context(|| format!("Failed to list {}", folder.display()))?,
        );
    }

    files.sort();
    files.truncate(config.max_num_files);

    info!(files = files.len(), "Discovered catalog files");
    Ok(files)
}

/// Runs catalog files through the pipeline one at a time
pub struct Pipeline {
    store: Arc<dyn ObjectStore>,
    overrides: ColumnOverrides,
    row_filter: RowFilter,
    policy: Arc<ImagePolicy>,
    orchestrator: Orchestrator,
    midjourney_data_checks: bool,
    delete_after_processing: bool,
}

impl Pipeline {
    /// Wire the stages together. The HTTP client is created here and lives as
    /// long as the pipeline.
    pub fn new(config: &Config, store: Arc<dyn ObjectStore>) -> Result<Self> {
        let fetcher = Arc::new(
            ImageFetcher::new(&config.fetch).context("Failed to initialize image fetcher")?,
        );
        let uploader = Arc::new(Uploader::new(
            store.clone(),
            config.fetch.temporary_folder.clone(),
        ));

        let orchestrator = Orchestrator::new(
            fetcher,
            uploader,
            config.fetch.num_workers,
            config.fetch.log_nonfatal_errors,
        );

        Ok(Self {
            store,
            overrides: ColumnOverrides::from(&config.catalog),
            row_filter: RowFilter::new(config.filters.clone()),
            policy: Arc::new(ImagePolicy::from_config(&config.filters, &config.image)),
            orchestrator,
            midjourney_data_checks: config.catalog.midjourney_data_checks,
            delete_after_processing: config.catalog.delete_after_processing,
        })
    }

    /// Process every catalog file in order.
    ///
    /// The store inventory is listed once before the first file; failing to
    /// list it aborts the run. A file that cannot be processed is skipped.
    pub async fn run(&self, files: &[PathBuf]) -> Result<BatchSummary> {
        let inventory = Inventory::build(self.store.as_ref()).await?;
        let mut total = BatchSummary::default();

        for (index, path) in files.iter().enumerate() {
            info!(
                file = index + 1,
                of = files.len(),
                path = %path.display(),
                "Processing catalog"
            );

            match self.process_catalog(path, &inventory).await {
                Ok(summary) => total.merge(&summary),
                Err(e) => warn!(
                    path = %path.display(),
                    error = %format!("{:#}", e),
                    "Skipping catalog"
                ),
            }
        }

        info!(
            files = files.len(),
            rows_read = total.rows_read,
            rows_accepted = total.rows_accepted,
            summary = %total,
            "Run complete"
        );

        Ok(total)
    }

    /// Process a single catalog file and wait for all of its tasks
    #[instrument(skip(self, inventory), fields(path = %path.display()))]
    pub async fn process_catalog(
        &self,
        path: &Path,
        inventory: &Inventory,
    ) -> Result<BatchSummary> {
        let owned = path.to_path_buf();
        let catalog = tokio::task::spawn_blocking(move || load_catalog(&owned))
            .await
            .context("Catalog loader panicked")??;

        let schema = schema::resolve(&catalog.columns, &self.overrides);
        schema.require_uri()?;

        let mut summary = BatchSummary {
            rows_read: catalog.len(),
            ..BatchSummary::default()
        };

        let catalog = self.row_filter.apply(catalog, &schema);
        summary.rows_accepted = catalog.len();

        let tasks = self.plan_tasks(&catalog, &schema, inventory, &mut summary)?;
        info!(
            rows = summary.rows_accepted,
            tasks = tasks.len(),
            duplicates = summary.duplicates,
            "Dispatching tasks"
        );

        let batch = self.orchestrator.run_batch(tasks).await;
        summary.merge(&batch);

        if self.delete_after_processing {
            match tokio::fs::remove_file(path).await {
                Ok(()) => debug!("Deleted processed catalog"),
                Err(e) => warn!(error = %e, "Failed to delete processed catalog"),
            }
        }

        info!(summary = %summary, "Catalog complete");
        Ok(summary)
    }

    /// Turn accepted rows into fetch tasks, recording rows that never become one
    fn plan_tasks(
        &self,
        catalog: &Catalog,
        schema: &ResolvedSchema,
        inventory: &Inventory,
        summary: &mut BatchSummary,
    ) -> Result<Vec<FetchTask>> {
        let uri_column = schema.require_uri()?;
        let mut planned = HashSet::new();
        let mut tasks = Vec::new();

        for row in &catalog.rows {
            let Some(url) = row.text(uri_column).filter(|u| !u.trim().is_empty()) else {
                summary.rows_dropped += 1;
                continue;
            };

            let caption = schema.caption_column.as_deref().map(|column| {
                row.get(column).cloned().unwrap_or(Value::Null)
            });

            if self.midjourney_data_checks {
                let text = caption.as_ref().and_then(Value::as_text).unwrap_or_default();
                if text.contains(MIDJOURNEY_VARIATIONS) || !text.contains(MIDJOURNEY_UPSCALED) {
                    summary.record(&TaskOutcome::SkippedFilteredOut);
                    continue;
                }
            }

            let filename = match derive_identity(caption.as_ref(), &url) {
                Ok(filename) => filename,
                Err(e) => {
                    debug!(url = %url, error = %e, "No filename for row");
                    summary.rows_dropped += 1;
                    continue;
                }
            };

            if inventory.contains(&filename) || !planned.insert(filename.clone()) {
                debug!(filename = %filename, "Already stored or planned");
                summary.record(&TaskOutcome::SkippedDuplicate);
                continue;
            }

            tasks.push(FetchTask {
                filename,
                url,
                policy: self.policy.clone(),
            });
        }

        Ok(tasks)
    }
}

/// Filename from the caption cell, or from the URI when no caption column exists
fn derive_identity(caption: Option<&Value>, url: &str) -> Result<String, FilenameError> {
    match caption {
        Some(value) => derive_filename(value),
        None => derive_from_text(uri_stem(url)),
    }
}

/// Last path segment of a URI without query, fragment or extension
fn uri_stem(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let segment = path.trim_end_matches('/').rsplit('/').next().unwrap_or(path);
    segment
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .filter(|stem| !stem.is_empty())
        .unwrap_or(segment)
}
