//! Filesystem storage for ticksync: a vault directory of Markdown documents
//! and the JSON file that persists the task cache.

mod cache_file;
mod error;
mod vault;

pub use cache_file::JsonCacheFile;
pub use error::StoreError;
pub use vault::FsVault;

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

/// Write `bytes` to `path` through a synced temporary file in the same
/// directory, so readers see either the old or the new content.
fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|err| err.error)?;
    Ok(())
}
