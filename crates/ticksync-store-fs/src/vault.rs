//! A vault directory of Markdown documents.

use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use ticksync_app::{DocumentError, DocumentStore};
use tracing::debug;

use crate::error::StoreError;
use crate::write_atomic;

const DOCUMENT_EXTENSION: &str = "md";

/// Documents addressed by `/`-separated paths relative to the vault root.
///
/// Hidden entries (names starting with `.`) are never listed, which keeps
/// `.ticksync/` and editor state out of scans.
#[derive(Debug, Clone)]
pub struct FsVault {
    root: PathBuf,
}

impl FsVault {
    /// Open an existing vault directory.
    ///
    /// # Errors
    /// Returns an error when `root` is not a directory.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(StoreError::InvalidPath(root.display().to_string()));
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Vault root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(path);
        let plain = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
        if path.is_empty() || !plain {
            return Err(StoreError::InvalidPath(path.to_owned()));
        }
        Ok(self.root.join(relative))
    }

    /// Read a document synchronously.
    ///
    /// # Errors
    /// [`StoreError::NotFound`] for a missing document.
    pub fn read(&self, path: &str) -> Result<String, StoreError> {
        let full = self.resolve(path)?;
        fs::read_to_string(&full).map_err(|err| match err.kind() {
            ErrorKind::NotFound => StoreError::NotFound(path.to_owned()),
            _ => StoreError::IoError(err),
        })
    }

    /// Replace a document atomically, creating parent directories.
    ///
    /// # Errors
    /// Returns an error when the path is invalid or the write fails.
    pub fn write(&self, path: &str, content: &str) -> Result<(), StoreError> {
        let full = self.resolve(path)?;
        write_atomic(&full, content.as_bytes())?;
        debug!(path, bytes = content.len(), "wrote document");
        Ok(())
    }

    /// Every visible Markdown document, sorted.
    ///
    /// # Errors
    /// Returns an error when a directory cannot be read.
    pub fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut documents = Vec::new();
        let mut pending = vec![(self.root.clone(), String::new())];
        while let Some((dir, prefix)) = pending.pop() {
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                    continue;
                };
                if name.starts_with('.') {
                    continue;
                }
                let relative = if prefix.is_empty() {
                    name
                } else {
                    format!("{prefix}/{name}")
                };
                let file_type = entry.file_type()?;
                if file_type.is_dir() {
                    pending.push((entry.path(), relative));
                } else if file_type.is_file()
                    && Path::new(&relative)
                        .extension()
                        .is_some_and(|ext| ext.eq_ignore_ascii_case(DOCUMENT_EXTENSION))
                {
                    documents.push(relative);
                }
            }
        }
        documents.sort();
        Ok(documents)
    }
}

impl DocumentStore for FsVault {
    async fn read_document(&self, path: &str) -> Result<String, DocumentError> {
        let vault = self.clone();
        let owned = path.to_owned();
        tokio::task::spawn_blocking(move || vault.read(&owned))
            .await
            .map_err(StoreError::from)
            .and_then(|result| result)
            .map_err(|err| err.into_document_error(path))
    }

    async fn write_document(&self, path: &str, content: &str) -> Result<(), DocumentError> {
        let vault = self.clone();
        let owned = path.to_owned();
        let content = content.to_owned();
        tokio::task::spawn_blocking(move || vault.write(&owned, &content))
            .await
            .map_err(StoreError::from)
            .and_then(|result| result)
            .map_err(|err| err.into_document_error(path))
    }

    async fn list_documents(&self) -> Result<Vec<String>, DocumentError> {
        let vault = self.clone();
        tokio::task::spawn_blocking(move || vault.list())
            .await
            .map_err(StoreError::from)
            .and_then(|result| result)
            .map_err(|err| err.into_document_error(&self.root.display().to_string()))
    }
}
