//! Caption to object-key derivation.
//!
//! The derived filename is both the object store key and the local basename, so
//! it doubles as the deduplication identity: identical captions always map to the
//! same key, even across catalogs.

use crate::catalog::Value;
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

/// Extension appended to every derived filename
pub const IMAGE_EXTENSION: &str = ".png";

/// Maximum length of the identifier before the extension
pub const MAX_STEM_CHARS: usize = 251;

/// Suffixes that carry provenance or model parameters, not identity
const PROVENANCE_MARKERS: &[&str] = &[" - Upscaled by", "--"];

/// Characters removed outright
const REMOVED_CHARS: &[char] = &['*', ',', '"', '/', '>', '<', '|', '.'];

static URL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://\S*").expect("valid URL pattern"));
static NON_WORD_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_]").expect("valid non-word pattern"));
static WHITESPACE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace pattern"));

/// Reasons a row yields no filename
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FilenameError {
    #[error("Caption value is missing")]
    MissingContent,

    #[error("Caption {0:?} reduces to an empty identifier")]
    EmptyIdentifier(String),
}

/// Derive a filename from a catalog cell
pub fn derive_filename(value: &Value) -> Result<String, FilenameError> {
    let content = value.as_text().ok_or(FilenameError::MissingContent)?;
    derive_from_text(&content)
}

/// Derive a filename from free text
pub fn derive_from_text(content: &str) -> Result<String, FilenameError> {
    let text = URL_PATTERN.replace_all(strip_provenance(content), "");

    // Only sanitized when an underscore is already present.
    let text = if text.contains('_') {
        NON_WORD_PATTERN.replace_all(&text, "_").into_owned()
    } else {
        text.into_owned()
    };

    // Removals can join two dashes into a new marker.
    let text: String = text.chars().filter(|c| !REMOVED_CHARS.contains(c)).collect();
    let text = WHITESPACE_PATTERN.replace_all(strip_provenance(&text), " ");

    let stem: String = trim_stem(&text)
        .to_lowercase()
        .chars()
        .take(MAX_STEM_CHARS)
        .collect();
    let stem = trim_stem(&stem);

    if stem.is_empty() {
        return Err(FilenameError::EmptyIdentifier(content.to_string()));
    }

    Ok(format!("{}{}", stem, IMAGE_EXTENSION))
}

fn strip_provenance(text: &str) -> &str {
    PROVENANCE_MARKERS.iter().fold(text, |text, marker| {
        text.split_once(marker).map_or(text, |(head, _)| head)
    })
}

fn trim_stem(text: &str) -> &str {
    text.trim_matches(|c: char| c == '_' || c.is_whitespace())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn derive(text: &str) -> String {
        derive_from_text(text).unwrap()
    }

    #[test]
    fn test_parameter_suffix_and_commas() {
        assert_eq!(derive("a cat, --v5"), "a cat.png");
    }

    #[test]
    fn test_upscaled_suffix() {
        assert_eq!(
            derive("Castle on a hill - Upscaled by @someone (fast)"),
            "castle on a hill.png"
        );
    }

    #[test]
    fn test_urls_removed() {
        assert_eq!(
            derive("https://s.mj.run/abc a red fox http://example.com/x.png"),
            "a red fox.png"
        );
    }

    #[test]
    fn test_underscore_triggers_sanitization() {
        assert_eq!(derive("my_photo (final)!"), "my_photo__final.png");
        assert_eq!(derive("my photo (final)!"), "my photo (final)!.png");
    }

    #[test]
    fn test_punctuation_removed_and_whitespace_collapsed() {
        assert_eq!(
            derive("  \"Sunset\"   over <the> sea|lake.  "),
            "sunset over the sealake.png"
        );
        assert_eq!(derive("a/b*c"), "abc.png");
    }

    #[test]
    fn test_truncation() {
        let long = "x".repeat(400);
        let name = derive(&long);
        assert_eq!(name.len(), MAX_STEM_CHARS + IMAGE_EXTENSION.len());
        assert!(name.ends_with(IMAGE_EXTENSION));
    }

    #[test]
    fn test_deterministic_and_idempotent() {
        let long = format!("{} b", "a".repeat(250));
        for caption in [
            "A Cat, --v5",
            "portrait_of a WOMAN, 8k",
            "Castle - Upscaled by bot",
            "  many    spaces  ",
            "a-*-b",
            "a-,-b",
            long.as_str(),
        ] {
            let first = derive(caption);
            assert_eq!(first, derive(caption));

            let stem = first.strip_suffix(IMAGE_EXTENSION).unwrap();
            assert_eq!(derive(stem), first);
        }
    }

    #[test]
    fn test_removals_that_form_a_marker() {
        assert_eq!(derive("a-*-b"), "a.png");
        assert_eq!(derive("a-,-b"), "a.png");
    }

    #[test]
    fn test_truncation_does_not_leave_trailing_space() {
        let name = derive(&format!("{} b", "a".repeat(250)));
        assert_eq!(name, format!("{}.png", "a".repeat(250)));
    }

    #[test]
    fn test_soft_failures() {
        assert_eq!(derive_filename(&Value::Null), Err(FilenameError::MissingContent));
        assert!(matches!(
            derive_from_text("--v5 only parameters"),
            Err(FilenameError::EmptyIdentifier(_))
        ));
        assert!(matches!(
            derive_from_text("https://example.com/only-a-link"),
            Err(FilenameError::EmptyIdentifier(_))
        ));
    }

    #[test]
    fn test_numeric_cells_are_coerced() {
        assert_eq!(derive_filename(&Value::Number(42.0)).unwrap(), "42.png");
    }
}
