//! Error types for filesystem store operations.

use thiserror::Error;
use ticksync_app::DocumentError;

/// Errors that can occur while touching the vault directory.
#[derive(Error, Debug)]
pub enum StoreError {
    /// No document at the given vault-relative path.
    #[error("Document not found: {0}")]
    NotFound(String),

    /// Path escapes the vault or is otherwise unusable.
    #[error("Invalid document path: {0}")]
    InvalidPath(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// The blocking worker was cancelled or panicked.
    #[error("Background task failed: {0}")]
    JoinError(#[from] tokio::task::JoinError),
}

impl StoreError {
    /// Convert into the engine-facing error for `path`.
    pub(crate) fn into_document_error(self, path: &str) -> DocumentError {
        match self {
            Self::NotFound(path) => DocumentError::NotFound(path),
            other => DocumentError::Io {
                path: path.to_owned(),
                message: other.to_string(),
            },
        }
    }
}
