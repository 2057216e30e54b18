//! Column role resolution.
//!
//! Catalog producers name their columns differently. Each semantic role has an
//! ordered list of candidate column names; the first one present wins unless the
//! configuration names a column explicitly.

use crate::catalog::CatalogError;
use crate::config::CatalogConfig;
use tracing::debug;

/// Candidate columns holding the image URI, in priority order
pub const URI_CANDIDATES: &[&str] = &["URL", "Attachments"];
/// Candidate columns holding the image width, in priority order
pub const WIDTH_CANDIDATES: &[&str] = &["WIDTH", "width"];
/// Candidate columns holding the image height, in priority order
pub const HEIGHT_CANDIDATES: &[&str] = &["HEIGHT", "height"];
/// Candidate columns holding the caption text, in priority order
pub const CAPTION_CANDIDATES: &[&str] = &["top_caption", "Content", "TEXT", "all_captions"];

/// Explicit column names that bypass auto-detection
#[derive(Debug, Clone, Default)]
pub struct ColumnOverrides {
    pub uri: Option<String>,
    pub width: Option<String>,
    pub height: Option<String>,
    pub caption: Option<String>,
}

impl From<&CatalogConfig> for ColumnOverrides {
    fn from(config: &CatalogConfig) -> Self {
        Self {
            uri: None,
            width: config.width_field.clone(),
            height: config.height_field.clone(),
            caption: config.caption_field.clone(),
        }
    }
}

/// Column names resolved for one catalog file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedSchema {
    pub uri_column: Option<String>,
    pub width_column: Option<String>,
    pub height_column: Option<String>,
    pub caption_column: Option<String>,
}

impl ResolvedSchema {
    /// The URI column, without which a catalog cannot be processed
    pub fn require_uri(&self) -> Result<&str, CatalogError> {
        self.uri_column
            .as_deref()
            .ok_or(CatalogError::MissingUriColumn)
    }
}

/// Map the columns present in a catalog to semantic roles
pub fn resolve(columns: &[String], overrides: &ColumnOverrides) -> ResolvedSchema {
    let schema = ResolvedSchema {
        uri_column: resolve_role(columns, overrides.uri.as_deref(), URI_CANDIDATES),
        width_column: resolve_role(columns, overrides.width.as_deref(), WIDTH_CANDIDATES),
        height_column: resolve_role(columns, overrides.height.as_deref(), HEIGHT_CANDIDATES),
        caption_column: resolve_role(columns, overrides.caption.as_deref(), CAPTION_CANDIDATES),
    };

    debug!(
        uri = ?schema.uri_column,
        width = ?schema.width_column,
        height = ?schema.height_column,
        caption = ?schema.caption_column,
        "Resolved catalog columns"
    );

    schema
}

fn resolve_role(columns: &[String], explicit: Option<&str>, candidates: &[&str]) -> Option<String> {
    if let Some(name) = explicit {
        return Some(name.to_string());
    }

    candidates
        .iter()
        .find(|candidate| columns.iter().any(|c| c == *candidate))
        .map(|c| c.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_first_candidate_wins() {
        let schema = resolve(
            &columns(&["Attachments", "URL", "width", "WIDTH", "TEXT", "Content"]),
            &ColumnOverrides::default(),
        );

        assert_eq!(schema.uri_column.as_deref(), Some("URL"));
        assert_eq!(schema.width_column.as_deref(), Some("WIDTH"));
        assert_eq!(schema.height_column, None);
        assert_eq!(schema.caption_column.as_deref(), Some("Content"));
    }

    #[test]
    fn test_fallback_candidates() {
        let schema = resolve(
            &columns(&["Attachments", "height", "all_captions"]),
            &ColumnOverrides::default(),
        );

        assert_eq!(schema.uri_column.as_deref(), Some("Attachments"));
        assert_eq!(schema.height_column.as_deref(), Some("height"));
        assert_eq!(schema.caption_column.as_deref(), Some("all_captions"));
    }

    #[test]
    fn test_override_takes_precedence() {
        let overrides = ColumnOverrides {
            caption: Some("prompt".to_string()),
            ..ColumnOverrides::default()
        };
        let schema = resolve(&columns(&["URL", "TEXT", "prompt"]), &overrides);

        assert_eq!(schema.caption_column.as_deref(), Some("prompt"));
    }

    #[test]
    fn test_missing_uri_column() {
        let schema = resolve(&columns(&["TEXT", "width"]), &ColumnOverrides::default());

        assert!(matches!(
            schema.require_uri(),
            Err(CatalogError::MissingUriColumn)
        ));
    }
}
