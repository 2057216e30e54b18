//! Threshold filtering over catalog quality columns.
//!
//! Stages run in a fixed order and each one only applies when the columns it
//! reads are present in the catalog. Rows with a missing or non-numeric value in
//! an active stage's column are dropped by that stage.

use crate::catalog::{Catalog, CatalogRow};
use crate::config::FilterConfig;
use crate::schema::ResolvedSchema;
use tracing::info;

pub const WATERMARK_COLUMN: &str = "pwatermark";
pub const AESTHETIC_COLUMN: &str = "aesthetic";
pub const SIMILARITY_COLUMN: &str = "similarity";
pub const UNSAFE_COLUMN: &str = "punsafe";

const PIXELS_PER_MEGAPIXEL: f64 = 1_000_000.0;

/// Comparison applied to a single column
#[derive(Debug, Clone, Copy, PartialEq)]
enum Bound {
    AtMost(f64),
    AtLeast(f64),
}

impl Bound {
    fn admits(&self, value: f64) -> bool {
        match *self {
            Bound::AtMost(limit) => value <= limit,
            Bound::AtLeast(limit) => value >= limit,
        }
    }
}

/// What a stage reads from each row
#[derive(Debug, Clone, PartialEq)]
enum Measure {
    Column(String),
    Area { width: String, height: String },
}

impl Measure {
    fn columns(&self) -> Vec<&str> {
        match self {
            Measure::Column(c) => vec![c.as_str()],
            Measure::Area { width, height } => vec![width.as_str(), height.as_str()],
        }
    }

    fn read(&self, row: &CatalogRow) -> Option<f64> {
        match self {
            Measure::Column(c) => row.number(c),
            Measure::Area { width, height } => Some(row.number(width)? * row.number(height)?),
        }
    }
}

/// One filter stage
#[derive(Debug, Clone, PartialEq)]
struct Stage {
    name: &'static str,
    measure: Measure,
    bound: Bound,
}

impl Stage {
    fn new(name: &'static str, column: &str, bound: Bound) -> Self {
        Self {
            name,
            measure: Measure::Column(column.to_string()),
            bound,
        }
    }

    fn applies_to(&self, catalog: &Catalog) -> bool {
        self.measure.columns().iter().all(|c| catalog.has_column(c))
    }

    fn keeps(&self, row: &CatalogRow) -> bool {
        self.measure
            .read(row)
            .map(|v| self.bound.admits(v))
            .unwrap_or(false)
    }
}

/// Ordered chain of threshold stages
pub struct RowFilter {
    config: FilterConfig,
}

impl RowFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    /// Apply every active stage, returning survivors in their original order
    pub fn apply(&self, mut catalog: Catalog, schema: &ResolvedSchema) -> Catalog {
        info!(rows = catalog.len(), "Rows before filtering");

        for stage in self.stages(schema) {
            if !stage.applies_to(&catalog) {
                continue;
            }

            let before = catalog.len();
            catalog.retain(|row| stage.keeps(row));
            let removed = before - catalog.len();

            metrics::counter!("curator.rows.filtered", "stage" => stage.name)
                .increment(removed as u64);
            info!(
                stage = stage.name,
                bound = ?stage.bound,
                rows = catalog.len(),
                removed,
                "Applied row filter"
            );
        }

        catalog
    }

    fn stages(&self, schema: &ResolvedSchema) -> Vec<Stage> {
        let config = &self.config;
        let mut stages = vec![
            Stage::new("watermark", WATERMARK_COLUMN, Bound::AtMost(config.watermark_threshold)),
            Stage::new("aesthetic", AESTHETIC_COLUMN, Bound::AtLeast(config.aesthetic_threshold)),
        ];

        let min_resolution = f64::from(config.minimum_resolution);
        if config.minimum_resolution > 0 {
            if let Some(width) = &schema.width_column {
                stages.push(Stage::new("min_width", width, Bound::AtLeast(min_resolution)));
            }
            if let Some(height) = &schema.height_column {
                stages.push(Stage::new("min_height", height, Bound::AtLeast(min_resolution)));
            }
        }

        if config.minimum_pixel_area > 0.0 {
            if let (Some(width), Some(height)) = (&schema.width_column, &schema.height_column) {
                stages.push(Stage {
                    name: "min_pixel_area",
                    measure: Measure::Area {
                        width: width.clone(),
                        height: height.clone(),
                    },
                    bound: Bound::AtLeast(config.minimum_pixel_area * PIXELS_PER_MEGAPIXEL),
                });
            }
        }

        stages.push(Stage::new(
            "similarity",
            SIMILARITY_COLUMN,
            Bound::AtLeast(config.similarity_threshold),
        ));

        let unsafe_bound = if config.invert_unsafe_threshold {
            Bound::AtLeast(config.unsafe_threshold)
        } else {
            Bound::AtMost(config.unsafe_threshold)
        };
        stages.push(Stage::new("unsafe", UNSAFE_COLUMN, unsafe_bound));

        stages
    }
}
