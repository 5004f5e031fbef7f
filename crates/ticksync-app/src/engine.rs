//! Bidirectional reconciliation between documents, cache and remote service.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use ticksync_core::line::{canonical_task, normalize_priority};
use ticksync_core::{ItemId, Task, TaskId};
use tracing::{debug, info, warn};

use crate::cache::TaskCache;
use crate::config::SyncConfig;
use crate::document::{DocumentError, DocumentStore};
use crate::edit::{find_task_line, insert_task, remove_task_block, replace_task_block, split_lines};
use crate::notify::{Notice, Notifier};
use crate::plan::RemotePlan;
use crate::remote::{RemoteError, RemoteTaskClient};

pub(crate) const FETCH_FAILED: &str =
    "Failed to fetch resources from the task service, please try again later";

/// Errors surfaced by [`SyncEngine`] operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Another pass holds the sync lock.
    #[error("a sync pass is already running, try again later")]
    Busy,
    /// Remote state could not be fetched; nothing was applied.
    #[error("failed to fetch remote state: {0}")]
    Fetch(RemoteError),
    /// The remote service listed no tasks although the cache holds some.
    #[error("remote service returned no tasks while {0} are cached")]
    EmptyRemote(usize),
    /// The task is not in the cache.
    #[error("task {0} is not in the local cache")]
    UnknownTask(TaskId),
    /// Document access failed.
    #[error(transparent)]
    Document(#[from] DocumentError),
    /// A single remote call failed.
    #[error(transparent)]
    Remote(#[from] RemoteError),
    /// Cache persistence failed.
    #[error(transparent)]
    Cache(#[from] anyhow::Error),
}

impl SyncError {
    /// The pass aborted before touching anything because remote state was unavailable.
    #[must_use]
    pub const fn is_fetch_failure(&self) -> bool {
        matches!(self, Self::Fetch(_) | Self::EmptyRemote(_))
    }
}

/// Releases the sync lock when dropped.
struct SyncGuard<'a>(&'a AtomicBool);

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Reconciles documents, the cache and the remote service.
///
/// Full passes are serialized by a lock; a second request while one runs is
/// rejected with [`SyncError::Busy`]. Document checks do not take the lock and
/// may interleave with a pass.
pub struct SyncEngine<R, D, N> {
    pub(crate) remote: R,
    pub(crate) documents: D,
    pub(crate) notifier: N,
    pub(crate) cache: TaskCache,
    pub(crate) config: SyncConfig,
    syncing: AtomicBool,
}

impl<R, D, N> std::fmt::Debug for SyncEngine<R, D, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &self.config)
            .field("syncing", &self.syncing.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<R, D, N> SyncEngine<R, D, N>
where
    R: RemoteTaskClient,
    D: DocumentStore,
    N: Notifier,
{
    /// Assemble an engine from its collaborators.
    pub const fn new(remote: R, documents: D, notifier: N, cache: TaskCache, config: SyncConfig) -> Self {
        Self {
            remote,
            documents,
            notifier,
            cache,
            config,
            syncing: AtomicBool::new(false),
        }
    }

    /// Shared cache.
    pub const fn cache(&self) -> &TaskCache {
        &self.cache
    }

    /// Engine settings.
    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Remote client.
    pub const fn remote(&self) -> &R {
        &self.remote
    }

    /// Document store.
    pub const fn documents(&self) -> &D {
        &self.documents
    }

    /// Whether a pass currently holds the lock.
    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    fn try_lock(&self) -> Result<SyncGuard<'_>, SyncError> {
        self.syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SyncError::Busy)?;
        Ok(SyncGuard(&self.syncing))
    }

    /// Run one full remote pass.
    ///
    /// Returns whether any document text changed.
    ///
    /// # Errors
    /// [`SyncError::Busy`] when a pass is running, [`SyncError::Fetch`] or
    /// [`SyncError::EmptyRemote`] when remote state is unavailable, and
    /// [`SyncError::Cache`] when the cache cannot be persisted.
    pub async fn sync_remote(&self) -> Result<bool, SyncError> {
        let _guard = self.try_lock()?;
        self.remote_pass().await
    }

    /// Check every tracked document, then run the remote pass.
    ///
    /// # Errors
    /// Same as [`sync_remote`](Self::sync_remote).
    pub async fn scheduled_sync(&self) -> Result<bool, SyncError> {
        let _guard = self.try_lock()?;
        let paths: Vec<String> = self.cache.read(|cache| cache.files.keys().cloned().collect()).await;
        let mut changed = false;
        for path in paths {
            match self.check_file(&path).await {
                Ok(written) => changed |= written,
                Err(err) => warn!(path, error = %err, "document check failed"),
            }
        }
        Ok(self.remote_pass().await? || changed)
    }

    /// Purge stale metadata and re-check every tracked document.
    ///
    /// Tracked documents that no longer exist lose their metadata. In
    /// full-vault mode every listed document is checked too. Returns the
    /// number of documents checked.
    ///
    /// # Errors
    /// [`SyncError::Busy`] when a pass is running, [`SyncError::Document`]
    /// when documents cannot be listed.
    pub async fn check_database(&self) -> Result<usize, SyncError> {
        let _guard = self.try_lock()?;
        let retained = self.cache.check_file_metadata().await;
        debug!(retained, "purged stale file metadata");

        let mut paths: BTreeSet<String> =
            self.cache.read(|cache| cache.files.keys().cloned().collect()).await;
        if self.config.full_vault_sync {
            paths.extend(self.documents.list_documents().await?);
        }
        let mut checked = 0;
        for path in &paths {
            match self.check_file(path).await {
                Ok(_) => checked += 1,
                Err(err) => warn!(path = %path, error = %err, "document check failed"),
            }
        }
        self.cache.persist().await?;
        info!(checked, "database check finished");
        Ok(checked)
    }

    /// Move cached state of a renamed document.
    ///
    /// # Errors
    /// Returns [`SyncError::Cache`] when the cache cannot be persisted.
    pub async fn rename_file(&self, old: &str, new: &str) -> Result<bool, SyncError> {
        let moved = self.cache.rename_file(old, new).await;
        if moved {
            self.cache.persist().await?;
            debug!(old, new, "moved file metadata");
        }
        Ok(moved)
    }

    async fn remote_pass(&self) -> Result<bool, SyncError> {
        let fetched = tokio::try_join!(
            self.remote.list_projects(),
            self.remote.list_tasks(),
            self.remote.list_deleted_tasks(),
        );
        let (projects, remote, deleted) = match fetched {
            Ok(fetched) => fetched,
            Err(err) => {
                self.notifier.notify(Notice::error(FETCH_FAILED));
                return Err(SyncError::Fetch(err));
            }
        };
        let cached = self.cache.tasks().await;
        if remote.is_empty() && !cached.is_empty() {
            self.notifier.notify(Notice::error(FETCH_FAILED));
            return Err(SyncError::EmptyRemote(cached.len()));
        }

        self.cache.update(|cache| cache.set_projects(&projects)).await;
        let mut plan = RemotePlan::classify(remote, &cached, &deleted);
        // Parents first so children can nest under them.
        plan.pull_new.sort_by_key(|task| task.parent_id.is_some());
        debug!(
            pull = plan.pull_new.len(),
            delete = plan.delete_local.len(),
            remote_newer = plan.remote_newer.len(),
            local_newer = plan.local_newer.len(),
            unconfirmed = plan.unconfirmed.len(),
            "classified remote state"
        );

        let mut changed = false;
        for task in plan.pull_new {
            let id = task.id.clone();
            match self.pull_remote_task(task).await {
                Ok(written) => changed |= written,
                Err(err) => warn!(%id, error = %err, "failed to pull remote task"),
            }
        }
        for task in plan.delete_local {
            let id = task.id.clone();
            match self.remove_local_task(&task).await {
                Ok(written) => changed |= written,
                Err(err) => warn!(%id, error = %err, "failed to remove deleted task"),
            }
        }
        for task in plan.remote_newer {
            let id = task.id.clone();
            match self.overwrite_local(task).await {
                Ok(written) => changed |= written,
                Err(err) => warn!(%id, error = %err, "failed to apply remote change"),
            }
        }
        for task in plan.local_newer {
            let id = task.id.clone();
            match self.push_local(&task).await {
                Ok(written) => changed |= written,
                Err(err) => warn!(%id, error = %err, "failed to push local change"),
            }
        }

        self.cache.persist().await?;
        info!(changed, "remote pass finished");
        Ok(changed)
    }

    /// Normalize a task received from the remote side.
    async fn ingest(&self, mut task: Task) -> Task {
        task.tags = task.tags.iter().map(|tag| tag.to_lowercase()).collect();
        task.priority = normalize_priority(task.priority);
        task.path = None;
        for item in &mut task.items {
            if !ItemId::is_valid_token(item.id.as_str()) {
                item.id = ItemId::generate();
            }
        }
        // Cache what the document line will parse back to.
        let mut task = canonical_task(&task, &self.config.tag);
        if let Some(parent) = &task.parent_id {
            let parent_known = self.cache.read(|cache| cache.task(parent).is_some()).await;
            if !parent_known {
                task.parent_id = None;
            }
        }
        task
    }

    async fn target_document(&self, task: &Task) -> String {
        let inbox = self.config.inbox_document.clone();
        let default_project = self.config.default_project_id.clone();
        self.cache
            .read(|cache| {
                if let Some(path) = task
                    .parent_id
                    .as_ref()
                    .and_then(|parent| cache.task(parent))
                    .and_then(|parent| parent.path.clone())
                {
                    return path;
                }
                let Some(project) = task.project_id.as_ref() else {
                    return inbox;
                };
                if default_project.as_ref() == Some(project) {
                    return inbox;
                }
                cache
                    .project_name(project)
                    .map(sanitize_file_name)
                    .filter(|name| !name.is_empty())
                    .map_or(inbox, |name| format!("{name}.md"))
            })
            .await
    }

    async fn read_or_empty(&self, path: &str) -> Result<String, DocumentError> {
        match self.documents.read_document(path).await {
            Ok(content) => Ok(content),
            Err(err) if err.is_not_found() => Ok(String::new()),
            Err(err) => Err(err),
        }
    }

    async fn pull_remote_task(&self, task: Task) -> Result<bool, SyncError> {
        let task = self.ingest(task).await;
        if self.cache.task(&task.id).await.is_some() {
            debug!(id = %task.id, "task already cached, skipping pull");
            return Ok(false);
        }
        let path = self.target_document(&task).await;
        let content = self.read_or_empty(&path).await?;

        let written = if find_task_line(&split_lines(&content), &task.id).is_some() {
            false
        } else {
            let updated = insert_task(&content, &task, &self.config.tag);
            self.documents.write_document(&path, &updated).await?;
            true
        };
        info!(id = %task.id, path, "pulled remote task");
        self.cache.update(|cache| cache.append_task(task, &path)).await;
        Ok(written)
    }

    pub(crate) async fn remove_local_task(&self, task: &Task) -> Result<bool, SyncError> {
        let path = self
            .cache
            .read(|cache| cache.task(&task.id).and_then(|cached| cached.path.clone()))
            .await
            .or_else(|| task.path.clone());
        let mut written = false;
        if let Some(path) = path {
            let content = self.read_or_empty(&path).await?;
            if let Some(updated) = remove_task_block(&content, &task.id, &self.config.tag)
                && updated != content
            {
                self.documents.write_document(&path, &updated).await?;
                written = true;
            }
        }
        self.cache.update(|cache| cache.remove_tasks([&task.id])).await;
        self.notifier.notify(Notice::info(format!("Task {} is deleted.", task.id)));
        Ok(written)
    }

    async fn overwrite_local(&self, task: Task) -> Result<bool, SyncError> {
        let mut task = self.ingest(task).await;
        let Some(cached) = self.cache.task(&task.id).await else {
            return Ok(false);
        };
        task.path.clone_from(&cached.path);

        let mut written = false;
        if let Some(path) = cached.path.as_deref() {
            let content = self.read_or_empty(path).await?;
            match replace_task_block(&content, &task, &self.config.tag) {
                Some(updated) if updated != content => {
                    self.documents.write_document(path, &updated).await?;
                    written = true;
                }
                Some(_) => {}
                None => debug!(id = %task.id, path, "task line not found, cache updated only"),
            }
        }
        if self.config.debug {
            info!(id = %task.id, title = %task.title, status = ?task.status, "remote copy is newer");
        }
        self.cache.update(|cache| cache.update_task(task)).await;
        Ok(written)
    }

    async fn push_local(&self, task: &Task) -> Result<bool, SyncError> {
        let locator = task
            .path
            .as_deref()
            .and_then(|path| self.config.locator_for(path));
        let updated = match self.remote.update_task(&task.for_remote(locator.as_deref())).await {
            Ok(updated) => updated,
            Err(err) if err.is_not_found() => {
                debug!(id = %task.id, "task gone remotely, removing local copy");
                return self.remove_local_task(task).await;
            }
            Err(err) => return Err(err.into()),
        };
        self.sync_remote_status(task, &updated).await;
        self.cache
            .update(|cache| cache.set_modified_time(&task.id, updated.modified_time))
            .await;
        debug!(id = %task.id, "pushed local copy");
        Ok(false)
    }

    /// Complete or reopen remotely when `remote` disagrees with `local`'s status.
    pub(crate) async fn sync_remote_status(&self, local: &Task, remote: &Task) {
        if local.status.is_closed() != remote.status.is_closed() {
            self.push_status(local).await;
        }
    }

    /// Complete or reopen `task` remotely to match its status; failures are logged.
    pub(crate) async fn push_status(&self, task: &Task) {
        let project = task.project_id.as_ref();
        let result = if task.status.is_closed() {
            self.remote.complete_task(&task.id, project).await
        } else {
            self.remote.reopen_task(&task.id, project).await
        };
        if let Err(err) = result {
            warn!(id = %task.id, error = %err, "failed to push status");
        }
    }
}

fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect::<String>()
        .trim()
        .to_owned()
}
