//! Configuration management for the curator service.
//!
//! Configuration is layered: serde defaults, then optional config files, then
//! environment variables prefixed with `CURATOR` (`CURATOR__FETCH__NUM_WORKERS`
//! maps to `fetch.num_workers`).

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the curator service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Catalog input configuration
    #[serde(default)]
    pub catalog: CatalogConfig,
    /// Row quality thresholds
    #[serde(default)]
    pub filters: FilterConfig,
    /// Decoded image policy
    #[serde(default)]
    pub image: ImageConfig,
    /// Download worker configuration
    pub fetch: FetchConfig,
    /// Destination object store
    #[serde(default)]
    pub store: StoreConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (json or pretty)
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Prometheus exporter port; the exporter is disabled when unset
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

/// Catalog discovery and column override configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    /// Directory scanned for `*.parquet` catalogs
    #[serde(default)]
    pub parquet_folder: Option<PathBuf>,
    /// Directory scanned for `*.csv` catalogs
    #[serde(default)]
    pub csv_folder: Option<PathBuf>,
    /// Explicit caption column, bypassing auto-detection
    #[serde(default)]
    pub caption_field: Option<String>,
    /// Explicit width column, bypassing auto-detection
    #[serde(default)]
    pub width_field: Option<String>,
    /// Explicit height column, bypassing auto-detection
    #[serde(default)]
    pub height_field: Option<String>,
    /// Remove a catalog file once all of its tasks completed
    #[serde(default)]
    pub delete_after_processing: bool,
    /// Keep only upscaled, non-variation rows (Midjourney exports)
    #[serde(default)]
    pub midjourney_data_checks: bool,
    /// Maximum number of catalog files handled per run
    #[serde(default = "default_max_num_files")]
    pub max_num_files: usize,
}

/// Thresholds applied to catalog quality columns
#[derive(Debug, Clone, Deserialize)]
pub struct FilterConfig {
    /// Rows with `pwatermark` above this are dropped
    #[serde(default = "default_watermark_threshold")]
    pub watermark_threshold: f64,
    /// Rows with `aesthetic` below this are dropped
    #[serde(default = "default_aesthetic_threshold")]
    pub aesthetic_threshold: f64,
    /// Rows with `similarity` below this are dropped
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    /// Rows with `punsafe` above this are dropped (below, when inverted)
    #[serde(default = "default_unsafe_threshold")]
    pub unsafe_threshold: f64,
    /// Keep unsafe rows instead of safe ones
    #[serde(default)]
    pub invert_unsafe_threshold: bool,
    /// Minimum width and height in pixels (0 disables)
    #[serde(default)]
    pub minimum_resolution: u32,
    /// Minimum pixel area in megapixels (0 disables)
    #[serde(default = "default_minimum_pixel_area")]
    pub minimum_pixel_area: f64,
}

/// Policy applied to each downloaded image
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageConfig {
    /// Edge length for conditioning resize (0 keeps the original size)
    #[serde(default)]
    pub condition_image_size: u32,
    /// Require camera EXIF tags
    #[serde(default)]
    pub only_exif_images: bool,
    /// Inclusive lower luminance bound
    #[serde(default)]
    pub min_luminance: Option<f64>,
    /// Inclusive upper luminance bound
    #[serde(default)]
    pub max_luminance: Option<f64>,
}

/// Download worker configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    /// Number of concurrent fetch/upload workers
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,
    /// HTTP connect timeout in seconds
    #[serde(default = "default_connection_timeout_secs")]
    pub connection_timeout_secs: u64,
    /// HTTP read timeout in seconds
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    /// Working directory for in-flight and not yet uploaded images
    pub temporary_folder: PathBuf,
    /// Log per-task errors at warn level instead of debug
    #[serde(default)]
    pub log_nonfatal_errors: bool,
}

/// Object store backend selection
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    S3,
    Local,
}

/// Destination object store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Backend used to materialize accepted images
    #[serde(default)]
    pub backend: StoreBackend,
    /// S3 bucket name
    #[serde(default)]
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Root directory for the local backend
    #[serde(default)]
    pub local_root: Option<PathBuf>,
}

// Default value functions
fn default_service_name() -> String {
    "curator".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_max_num_files() -> usize {
    1_000_000
}

fn default_watermark_threshold() -> f64 {
    0.7
}

fn default_aesthetic_threshold() -> f64 {
    5.0
}

fn default_similarity_threshold() -> f64 {
    0.33
}

fn default_unsafe_threshold() -> f64 {
    0.5
}

fn default_minimum_pixel_area() -> f64 {
    1.0
}

fn default_num_workers() -> usize {
    8
}

fn default_connection_timeout_secs() -> u64 {
    3
}

fn default_read_timeout_secs() -> u64 {
    30
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            metrics_port: None,
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            parquet_folder: None,
            csv_folder: None,
            caption_field: None,
            width_field: None,
            height_field: None,
            delete_after_processing: false,
            midjourney_data_checks: false,
            max_num_files: default_max_num_files(),
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            watermark_threshold: default_watermark_threshold(),
            aesthetic_threshold: default_aesthetic_threshold(),
            similarity_threshold: default_similarity_threshold(),
            unsafe_threshold: default_unsafe_threshold(),
            invert_unsafe_threshold: false,
            minimum_resolution: 0,
            minimum_pixel_area: default_minimum_pixel_area(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            bucket: String::new(),
            region: default_region(),
            endpoint_url: None,
            force_path_style: false,
            local_root: None,
        }
    }
}

impl FetchConfig {
    /// Build a fetch configuration with defaults around a working directory.
    pub fn with_temporary_folder(temporary_folder: impl Into<PathBuf>) -> Self {
        Self {
            num_workers: default_num_workers(),
            connection_timeout_secs: default_connection_timeout_secs(),
            read_timeout_secs: default_read_timeout_secs(),
            temporary_folder: temporary_folder.into(),
            log_nonfatal_errors: false,
        }
    }

    /// Get HTTP connect timeout as Duration
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    /// Get HTTP read timeout as Duration
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

impl Config {
    /// Load configuration from config files and environment
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/curator").required(false))
            .add_source(config::File::with_name("/etc/curator/curator").required(false))
            // CURATOR__STORE__BUCKET -> store.bucket
            .add_source(
                config::Environment::with_prefix("CURATOR")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.fetch.temporary_folder.as_os_str().is_empty() {
            return Err(ConfigValidationError::MissingField(
                "fetch.temporary_folder".to_string(),
            ));
        }

        if self.fetch.num_workers == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "fetch.num_workers".to_string(),
                message: "At least one worker is required".to_string(),
            });
        }

        for (field, bound) in [
            ("image.min_luminance", self.image.min_luminance),
            ("image.max_luminance", self.image.max_luminance),
        ] {
            if let Some(value) = bound {
                if !(0.0..=1.0).contains(&value) {
                    return Err(ConfigValidationError::InvalidValue {
                        field: field.to_string(),
                        message: format!("Luminance must be within [0, 1], got {}", value),
                    });
                }
            }
        }

        if let (Some(min), Some(max)) = (self.image.min_luminance, self.image.max_luminance) {
            if min > max {
                return Err(ConfigValidationError::InvalidValue {
                    field: "image.min_luminance".to_string(),
                    message: format!("Minimum {} exceeds maximum {}", min, max),
                });
            }
        }

        match self.store.backend {
            StoreBackend::S3 if self.store.bucket.is_empty() => {
                return Err(ConfigValidationError::MissingField("store.bucket".to_string()));
            }
            StoreBackend::Local if self.store.local_root.is_none() => {
                return Err(ConfigValidationError::MissingField(
                    "store.local_root".to_string(),
                ));
            }
            _ => {}
        }

        if self.catalog.parquet_folder.is_none() && self.catalog.csv_folder.is_none() {
            return Err(ConfigValidationError::MissingField(
                "catalog.parquet_folder or catalog.csv_folder".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
