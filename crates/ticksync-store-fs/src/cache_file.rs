//! JSON file holding the durable task cache.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ticksync_app::{CacheBackend, CacheData, ProjectConfig};
use tracing::debug;

use crate::write_atomic;

const CACHE_FILE: &str = "cache.json";

/// Cache backend persisting [`CacheData`] as pretty-printed JSON.
#[derive(Debug, Clone)]
pub struct JsonCacheFile {
    path: PathBuf,
}

impl JsonCacheFile {
    /// Backend at an explicit file path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backend at `<vault>/.ticksync/cache.json`.
    #[must_use]
    pub fn in_vault(root: impl AsRef<Path>) -> Self {
        Self::new(ProjectConfig::state_dir(root).join(CACHE_FILE))
    }

    /// Location of the cache file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CacheBackend for JsonCacheFile {
    fn load(&self) -> Result<CacheData> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no cache file yet, starting empty");
                return Ok(CacheData::default());
            }
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", self.path.display()));
            }
        };
        serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse {}", self.path.display()))
    }

    fn save(&self, data: &CacheData) -> Result<()> {
        let body = serde_json::to_vec_pretty(data).context("failed to encode task cache")?;
        write_atomic(&self.path, &body)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        debug!(path = %self.path.display(), tasks = data.tasks.len(), "saved task cache");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_loads_empty_cache() {
        let dir = tempdir().unwrap();
        let backend = JsonCacheFile::in_vault(dir.path());
        assert_eq!(backend.load().unwrap(), CacheData::default());
        assert!(backend.path().ends_with(".ticksync/cache.json"));
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(&path, "{not json").unwrap();
        let err = JsonCacheFile::new(&path).load().unwrap_err();
        assert!(err.to_string().contains("failed to parse"));
    }

    #[test]
    fn save_creates_state_directory() {
        let dir = tempdir().unwrap();
        let backend = JsonCacheFile::in_vault(dir.path());
        backend.save(&CacheData::default()).unwrap();
        assert!(backend.path().is_file());
        assert_eq!(backend.load().unwrap(), CacheData::default());
    }
}
