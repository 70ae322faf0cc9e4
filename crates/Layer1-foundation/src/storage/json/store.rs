//! JSON file store

use crate::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name of the per-user and per-repository settings directory
pub const STORE_DIR_NAME: &str = "branchwork";

/// Directory holding JSON settings files
#[derive(Debug, Clone)]
pub struct JsonStore {
    base_dir: PathBuf,
}

impl JsonStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Per-user settings (`<config_dir>/branchwork/`)
    pub fn global() -> Result<Self> {
        let dir = dirs::config_dir()
            .ok_or_else(|| Error::Config("No per-user config directory on this system".to_string()))?
            .join(STORE_DIR_NAME);
        Ok(Self::new(dir))
    }

    /// Per-repository settings (`<workdir>/.branchwork/`)
    pub fn project(workdir: impl Into<PathBuf>) -> Self {
        Self::new(workdir.into().join(format!(".{}", STORE_DIR_NAME)))
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn file_path(&self, filename: &str) -> PathBuf {
        self.base_dir.join(filename)
    }

    /// `Ok(None)` when the file does not exist; unreadable or malformed
    /// files are an error.
    pub fn load_optional<T: DeserializeOwned>(&self, filename: &str) -> Result<Option<T>> {
        let path = self.file_path(filename);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Storage(format!("{}: {}", path.display(), e))),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| Error::Config(format!("{} is not valid settings JSON: {}", path.display(), e)))
    }

    /// Settings that fall back to defaults on any problem
    pub fn load_or_default<T: DeserializeOwned + Default>(&self, filename: &str) -> T {
        match self.load_optional(filename) {
            Ok(Some(value)) => value,
            Ok(None) => T::default(),
            Err(e) => {
                debug!("Ignoring {}: {}", filename, e);
                T::default()
            }
        }
    }

    /// Write `data` next to its final location, then rename it in place so a
    /// reader never sees a half-written file.
    pub fn save<T: Serialize>(&self, filename: &str, data: &T) -> Result<()> {
        std::fs::create_dir_all(&self.base_dir)
            .map_err(|e| Error::Storage(format!("{}: {}", self.base_dir.display(), e)))?;

        let path = self.file_path(filename);
        let staging = self.file_path(&format!(".{}.tmp", filename));
        let content = serde_json::to_string_pretty(data)?;
        std::fs::write(&staging, content)
            .and_then(|_| std::fs::rename(&staging, &path))
            .map_err(|e| {
                let _ = std::fs::remove_file(&staging);
                Error::Storage(format!("{}: {}", path.display(), e))
            })?;
        debug!("Saved {}", path.display());
        Ok(())
    }
}
