//! Capability interface of the remote task service.

use std::future::Future;

use thiserror::Error;
use ticksync_core::{DeletedTask, Project, ProjectId, Task, TaskId};

/// Failure reported by a [`RemoteTaskClient`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// The task does not exist remotely (deleted or never created).
    #[error("task {0} not found on the remote service")]
    NotFound(String),
    /// Transport or server failure; the operation may succeed on retry.
    #[error("remote request failed: {0}")]
    Request(String),
    /// The service refused the payload.
    #[error("remote service rejected the request: {0}")]
    Rejected(String),
}

impl RemoteError {
    /// The remote side confirmed the task is gone.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Remote task service. Authentication, pagination and timeouts are the
/// implementor's concern.
pub trait RemoteTaskClient: Send + Sync {
    /// Every open or recently modified task.
    ///
    /// # Errors
    /// Returns [`RemoteError`] when the listing fails.
    fn list_tasks(&self) -> impl Future<Output = Result<Vec<Task>, RemoteError>> + Send;

    /// Deletion log.
    ///
    /// # Errors
    /// Returns [`RemoteError`] when the listing fails.
    fn list_deleted_tasks(
        &self,
    ) -> impl Future<Output = Result<Vec<DeletedTask>, RemoteError>> + Send;

    /// All projects.
    ///
    /// # Errors
    /// Returns [`RemoteError`] when the listing fails.
    fn list_projects(&self) -> impl Future<Output = Result<Vec<Project>, RemoteError>> + Send;

    /// Create a task; the returned copy carries the assigned id.
    ///
    /// # Errors
    /// Returns [`RemoteError`] when the task cannot be created.
    fn create_task(&self, task: &Task) -> impl Future<Output = Result<Task, RemoteError>> + Send;

    /// Replace a task's content; the returned copy carries the new modified time.
    ///
    /// # Errors
    /// Returns [`RemoteError::NotFound`] when the task no longer exists.
    fn update_task(&self, task: &Task) -> impl Future<Output = Result<Task, RemoteError>> + Send;

    /// Delete a task. `Ok(false)` means the service had nothing to delete.
    ///
    /// # Errors
    /// Returns [`RemoteError`] when the request fails.
    fn delete_task(
        &self,
        id: &TaskId,
        project: Option<&ProjectId>,
    ) -> impl Future<Output = Result<bool, RemoteError>> + Send;

    /// Mark a task completed.
    ///
    /// # Errors
    /// Returns [`RemoteError`] when the request fails.
    fn complete_task(
        &self,
        id: &TaskId,
        project: Option<&ProjectId>,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// Mark a task open again.
    ///
    /// # Errors
    /// Returns [`RemoteError`] when the request fails.
    fn reopen_task(
        &self,
        id: &TaskId,
        project: Option<&ProjectId>,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;
}
