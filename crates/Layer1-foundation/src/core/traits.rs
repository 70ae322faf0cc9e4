//! Shared traits

use crate::storage::JsonStore;
use crate::Result;
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;

// ============================================================================
// Configurable Trait
// ============================================================================

/// Settings stored as a JSON file, both per-user and per-repository.
///
/// Loading merges the per-repository file over the per-user file.
pub trait Configurable: Serialize + DeserializeOwned + Default {
    /// Settings file name inside the store directory
    const FILE_NAME: &'static str;

    /// Fold `other` into `self`; values set in `other` win.
    fn merge(&mut self, other: Self) {
        *self = other;
    }

    fn load_global() -> Result<Self> {
        let store = JsonStore::global()?;
        Ok(store.load_or_default(Self::FILE_NAME))
    }

    fn load_project(root: &Path) -> Result<Self> {
        let store = JsonStore::project(root);
        Ok(store.load_or_default(Self::FILE_NAME))
    }

    /// Defaults, then every store in order. Missing files are skipped,
    /// malformed files are an error.
    fn load_from(stores: &[JsonStore]) -> Result<Self> {
        let mut config = Self::default();
        for store in stores {
            if let Some(layer) = store.load_optional::<Self>(Self::FILE_NAME)? {
                config.merge(layer);
            }
        }
        Ok(config)
    }

    /// Per-user settings merged with those of the repository at `root`
    fn load(root: &Path) -> Result<Self> {
        let mut stores = Vec::with_capacity(2);
        if let Ok(global) = JsonStore::global() {
            stores.push(global);
        }
        stores.push(JsonStore::project(root));
        Self::load_from(&stores)
    }

    fn save_global(&self) -> Result<()> {
        let store = JsonStore::global()?;
        store.save(Self::FILE_NAME, self)
    }

    fn save_project(&self, root: &Path) -> Result<()> {
        JsonStore::project(root).save(Self::FILE_NAME, self)
    }
}
