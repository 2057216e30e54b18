//! Catalog loading.
//!
//! Catalogs are tabular files (Parquet or CSV) listing remotely hosted images
//! with optional quality metadata. Both formats are decoded through Arrow record
//! batches into the same row representation.

use arrow::array::{Array, ArrayRef, AsArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Float64Type, Schema};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use arrow::util::display::array_value_to_string;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::errors::ParquetError;
use std::collections::HashMap;
use std::fs::File;
use std::io::Seek;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that can occur while reading a catalog file
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Unsupported catalog format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to open catalog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to decode Parquet catalog: {0}")]
    Parquet(#[from] ParquetError),

    #[error("Failed to decode catalog records: {0}")]
    Arrow(#[from] ArrowError),

    #[error("Catalog has no recognized URI column")]
    MissingUriColumn,
}

/// A single scalar cell of a catalog
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Number(f64),
    Null,
}

impl Value {
    /// Numeric view of the cell; text is parsed when it holds a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Text(s) => s.trim().parse().ok(),
            Value::Null => None,
        }
    }

    /// Text view of the cell; null has none.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Value::Text(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Null => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

/// One candidate image: column name to cell value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogRow {
    cells: HashMap<String, Value>,
}

impl CatalogRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style cell insertion
    pub fn with(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.cells.insert(column.to_string(), value.into());
        self
    }

    pub fn insert(&mut self, column: String, value: Value) {
        self.cells.insert(column, value);
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.cells.get(column)
    }

    pub fn number(&self, column: &str) -> Option<f64> {
        self.get(column).and_then(Value::as_f64)
    }

    pub fn text(&self, column: &str) -> Option<String> {
        self.get(column).and_then(Value::as_text)
    }
}

/// A loaded catalog: ordered column names and rows in file order
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub columns: Vec<String>,
    pub rows: Vec<CatalogRow>,
}

impl Catalog {
    pub fn new(columns: Vec<String>, rows: Vec<CatalogRow>) -> Self {
        Self { columns, rows }
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Keep only rows satisfying the predicate, preserving order
    pub fn retain(&mut self, predicate: impl FnMut(&CatalogRow) -> bool) {
        self.rows.retain(predicate);
    }
}

/// Supported on-disk catalog formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogFormat {
    Parquet,
    Csv,
}

impl CatalogFormat {
    /// Determine the format from the file extension
    pub fn from_path(path: &Path) -> Result<Self, CatalogError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();

        match extension.as_str() {
            "parquet" => Ok(CatalogFormat::Parquet),
            "csv" => Ok(CatalogFormat::Csv),
            other => Err(CatalogError::UnsupportedFormat(other.to_string())),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            CatalogFormat::Parquet => "parquet",
            CatalogFormat::Csv => "csv",
        }
    }
}

/// Load a catalog file, picking the decoder from its extension
pub fn load_catalog(path: &Path) -> Result<Catalog, CatalogError> {
    let format = CatalogFormat::from_path(path)?;
    let open = |path: &Path| {
        File::open(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })
    };

    let (columns, batches) = match format {
        CatalogFormat::Parquet => {
            let builder = ParquetRecordBatchReaderBuilder::try_new(open(path)?)?;
            let columns = column_names(builder.schema().fields().iter().map(|f| f.name()));
            let batches = builder.build()?.collect::<Result<Vec<_>, _>>()?;
            (columns, batches)
        }
        CatalogFormat::Csv => {
            let mut file = open(path)?;
            // Header only; every column is read as text and parsed on access.
            let (header, _) = arrow::csv::reader::Format::default()
                .with_header(true)
                .infer_schema(&mut file, Some(0))?;
            file.rewind().map_err(|source| CatalogError::Io {
                path: path.to_path_buf(),
                source,
            })?;

            let columns = column_names(header.fields().iter().map(|f| f.name()));
            let schema = Schema::new(
                columns
                    .iter()
                    .map(|name| Field::new(name, DataType::Utf8, true))
                    .collect::<Vec<_>>(),
            );
            let batches = arrow::csv::ReaderBuilder::new(Arc::new(schema))
                .with_header(true)
                .build(file)?
                .collect::<Result<Vec<_>, _>>()?;
            (columns, batches)
        }
    };

    let mut rows = Vec::new();
    for batch in &batches {
        append_rows(batch, &mut rows)?;
    }

    debug!(
        path = %path.display(),
        format = format.extension(),
        columns = columns.len(),
        rows = rows.len(),
        "Catalog loaded"
    );

    Ok(Catalog::new(columns, rows))
}

/// List catalog files of the given format in a directory, sorted by path
pub fn discover_catalogs(folder: &Path, format: CatalogFormat) -> std::io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();

    for entry in std::fs::read_dir(folder)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        match CatalogFormat::from_path(&path) {
            Ok(f) if f == format => found.push(path),
            _ => {}
        }
    }

    found.sort();
    Ok(found)
}

fn column_names<'a>(names: impl Iterator<Item = &'a String>) -> Vec<String> {
    names.cloned().collect()
}

fn append_rows(batch: &RecordBatch, rows: &mut Vec<CatalogRow>) -> Result<(), CatalogError> {
    let schema = batch.schema();
    let start = rows.len();
    rows.resize_with(start + batch.num_rows(), CatalogRow::new);

    for (field, array) in schema.fields().iter().zip(batch.columns()) {
        let values = column_values(array)?;
        for (offset, value) in values.into_iter().enumerate() {
            rows[start + offset].insert(field.name().clone(), value);
        }
    }

    Ok(())
}

fn column_values(array: &ArrayRef) -> Result<Vec<Value>, CatalogError> {
    let len = array.len();

    match array.data_type() {
        DataType::Null => Ok(vec![Value::Null; len]),
        DataType::Utf8 | DataType::LargeUtf8 => {
            let strings = cast(array, &DataType::Utf8)?;
            let strings = strings.as_string::<i32>();
            Ok((0..len)
                .map(|i| {
                    if strings.is_null(i) {
                        Value::Null
                    } else {
                        Value::Text(strings.value(i).to_string())
                    }
                })
                .collect())
        }
        dt if dt.is_numeric() => {
            let numbers = cast(array, &DataType::Float64)?;
            let numbers = numbers.as_primitive::<Float64Type>();
            Ok((0..len)
                .map(|i| {
                    if numbers.is_null(i) {
                        Value::Null
                    } else {
                        Value::Number(numbers.value(i))
                    }
                })
                .collect())
        }
        other => {
            warn!(data_type = %other, "Non-scalar catalog column rendered as text");
            (0..len)
                .map(|i| {
                    if array.is_null(i) {
                        Ok(Value::Null)
                    } else {
                        Ok(Value::Text(array_value_to_string(array, i)?))
                    }
                })
                .collect()
        }
    }
}
