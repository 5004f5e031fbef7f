//! Capability interface of the document surface.

use std::future::Future;

use thiserror::Error;

/// Failure reported by a [`DocumentStore`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DocumentError {
    /// No document at that path.
    #[error("document {0} does not exist")]
    NotFound(String),
    /// Reading or writing failed.
    #[error("failed to access document {path}: {message}")]
    Io {
        /// Document path.
        path: String,
        /// Underlying failure.
        message: String,
    },
}

impl DocumentError {
    /// The document is missing.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Reads and writes whole documents addressed by vault-relative path.
pub trait DocumentStore: Send + Sync {
    /// Full text of a document.
    ///
    /// # Errors
    /// Returns [`DocumentError::NotFound`] for a missing document.
    fn read_document(&self, path: &str)
    -> impl Future<Output = Result<String, DocumentError>> + Send;

    /// Replace a document's text, creating it when missing.
    ///
    /// # Errors
    /// Returns [`DocumentError::Io`] when the write fails.
    fn write_document(
        &self,
        path: &str,
        content: &str,
    ) -> impl Future<Output = Result<(), DocumentError>> + Send;

    /// Paths of every Markdown document.
    ///
    /// # Errors
    /// Returns [`DocumentError::Io`] when listing fails.
    fn list_documents(&self) -> impl Future<Output = Result<Vec<String>, DocumentError>> + Send;
}
