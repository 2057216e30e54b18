//! Curator Service
//!
//! Builds image datasets from catalog files. Each catalog (Parquet or CSV) lists
//! remotely hosted images with optional quality scores; the service keeps the rows
//! that pass the configured thresholds, names every image after its caption,
//! downloads and validates it, and stores it in an object store exactly once.
//!
//! ## Features
//!
//! - **Column Resolution**: URI, size and caption columns are found by ordered
//!   candidate names, with explicit overrides from configuration
//! - **Threshold Filtering**: watermark, aesthetic, similarity, unsafe, resolution
//!   and pixel-area stages, each applied only when its column exists
//! - **Idempotent Storage**: caption-derived keys, a store inventory pre-check and
//!   an authoritative existence check before every upload
//! - **Image Policy**: minimum resolution, camera EXIF, luminance window and
//!   conditioning resize, re-encoded as PNG
//! - **Bounded Concurrency**: a fixed worker pool per catalog file
//!
//! ## Architecture
//!
//! ```text
//! Catalog files               HTTP origins               Object store
//! ┌──────────────┐           ┌──────────────┐          ┌──────────────┐
//! │ *.parquet    │           │ image URLs   │          │ S3 bucket or │
//! │ *.csv        │           └──────────────┘          │ local folder │
//! └──────────────┘                  │                  └──────────────┘
//!        │                          │                     ▲        │
//!        ▼                          │                     │        │ list
//!  ┌──────────────┐                 │                     │        ▼
//!  │ Column       │                 │                     │  ┌──────────────┐
//!  │ Resolver     │                 │                     │  │ Inventory    │
//!  └──────────────┘                 │                     │  └──────────────┘
//!        │                          │                     │        │
//!        ▼                          │                     │        ▼
//!  ┌──────────────┐   ┌──────────────┐            ┌──────────────┐
//!  │ Row Filter   │──▶│ Filename     │───────────▶│ Orchestrator │
//!  └──────────────┘   │ Deriver      │  tasks     │ (N workers)  │
//!                     └──────────────┘            └──────────────┘
//!                                                   │         │
//!                                                   ▼         ▼
//!                                           ┌───────────┐ ┌───────────┐
//!                                           │ Fetcher + │▶│ Uploader  │
//!                                           │ Policy    │ └───────────┘
//!                                           └───────────┘
//! ```

pub mod catalog;
pub mod config;
pub mod fetcher;
pub mod filename;
pub mod image_policy;
pub mod inventory;
pub mod orchestrator;
pub mod pipeline;
pub mod row_filter;
pub mod schema;
pub mod store;
pub mod uploader;

#[cfg(test)]
pub(crate) mod test_support;

pub use catalog::{load_catalog, Catalog, CatalogError, CatalogRow, Value};
pub use config::Config;
pub use fetcher::{FetchError, FetchStatus, FetchTask, ImageFetcher};
pub use filename::{derive_filename, FilenameError};
pub use image_policy::{ImagePolicy, RejectReason};
pub use inventory::Inventory;
pub use orchestrator::{BatchSummary, Orchestrator, TaskOutcome};
pub use pipeline::Pipeline;
pub use row_filter::RowFilter;
pub use schema::{resolve, ColumnOverrides, ResolvedSchema};
pub use store::{FilesystemStore, ObjectStore, S3Store};
pub use uploader::{UploadError, UploadStatus, Uploader};
