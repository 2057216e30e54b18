//! Snapshot of the keys already present in the destination store.

use crate::store::ObjectStore;
use anyhow::{Context, Result};
use std::collections::HashSet;
use tracing::info;

/// Keys present in the destination store at run start.
///
/// Built once and shared read-only by every worker. It is a fast pre-check only;
/// the uploader still asks the store right before writing.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    keys: HashSet<String>,
}

impl Inventory {
    /// List the whole store
    pub async fn build(store: &dyn ObjectStore) -> Result<Self> {
        let keys: HashSet<String> = store
            .list_keys()
            .await
            .with_context(|| format!("Failed to build inventory of {}", store.describe()))?
            .into_iter()
            .collect();

        info!(
            store = %store.describe(),
            existing = keys.len(),
            "Found existing files in the store"
        );

        Ok(Self { keys })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl FromIterator<String> for Inventory {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().collect(),
        }
    }
}
