//! Per-document entry points: line edits, file checks, deletions and
//! completion toggles. None of these contact the remote listing endpoints.

use std::collections::BTreeSet;

use ticksync_core::line::{parse_line, render_task_link};
use ticksync_core::{ItemId, Task, TaskId, TaskStatus};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::cache::{CacheData, TrackedTask};
use crate::document::DocumentStore;
use crate::edit::{
    LineEdit, apply_edits, find_task_line, item_lines, remove_task_block, set_task_status,
    split_lines, tag_untagged_tasks,
};
use crate::engine::{SyncEngine, SyncError};
use crate::notify::{Notice, Notifier};
use crate::remote::RemoteTaskClient;
use crate::scanner::{
    ItemOp, LineScan, ModifiedTask, NewTask, find_deletions, scan, scan_line, tracked_tasks,
};

impl<R, D, N> SyncEngine<R, D, N>
where
    R: RemoteTaskClient,
    D: DocumentStore,
    N: Notifier,
{
    /// Reconcile one document against the cache.
    ///
    /// Returns whether the document text was rewritten. A missing document
    /// drops its metadata.
    ///
    /// # Errors
    /// Returns [`SyncError::Document`] when the document cannot be read or
    /// written and [`SyncError::Cache`] when the cache cannot be persisted.
    pub async fn check_file(&self, path: &str) -> Result<bool, SyncError> {
        let mut content = match self.documents.read_document(path).await {
            Ok(content) => content,
            Err(err) if err.is_not_found() => {
                if self.cache.update(|cache| cache.remove_file(path)).await.is_some() {
                    debug!(path, "dropped metadata of missing document");
                    self.cache.persist().await?;
                }
                return Ok(false);
            }
            Err(err) => return Err(err.into()),
        };

        let mut written = false;
        if self.config.full_vault_sync {
            let tag_edits = tag_untagged_tasks(&content, &self.config.tag);
            if !tag_edits.is_empty() {
                content = apply_edits(&content, &tag_edits).0;
                self.documents.write_document(path, &content).await?;
                written = true;
            }
        }

        let result = self
            .cache
            .read(|cache| scan(&content, path, cache, &self.config))
            .await;
        if result.is_empty() {
            if self.refresh_metadata(path, &content).await {
                self.cache.persist().await?;
            }
            return Ok(written);
        }

        if !result.orphaned.is_empty() {
            let ids: Vec<TaskId> = result.orphaned.iter().map(|o| o.task_id.clone()).collect();
            written |= self.remove_orphans(path, &ids).await?;
        }

        for new in result.new_tasks {
            written |= self.create_new_task(path, new).await?;
        }
        for modified in result.modified_tasks {
            written |= self.push_modified(modified).await?;
        }
        if !result.item_ops.is_empty() {
            written |= self.apply_item_ops(path, result.item_ops).await?;
        }
        for id in &result.moved_task_ids {
            let path = path.to_owned();
            self.cache
                .update(|cache| {
                    if let Some(mut task) = cache.task(id).cloned() {
                        task.path = Some(path);
                        cache.update_task(task);
                    }
                })
                .await;
        }
        let content = match self.documents.read_document(path).await {
            Ok(content) => content,
            Err(err) if err.is_not_found() => String::new(),
            Err(err) => return Err(err.into()),
        };
        // A create finished by this pass may have stamped a listed id again.
        let lines = split_lines(&content);
        let deleted: Vec<TaskId> = result
            .deleted_task_ids
            .into_iter()
            .filter(|id| find_task_line(&lines, id).is_none())
            .collect();
        if !deleted.is_empty() {
            self.delete_tasks(&deleted).await;
        }
        self.refresh_metadata(path, &content).await;
        self.cache.persist().await?;
        Ok(written)
    }

    /// Classify a single edited line and act on it.
    ///
    /// `content` is the document text the editor holds; stamping re-reads
    /// the stored document. Returns whether the document was rewritten.
    ///
    /// # Errors
    /// Returns [`SyncError::Document`] when the document cannot be accessed.
    pub async fn check_line(&self, path: &str, line: usize, content: &str) -> Result<bool, SyncError> {
        let lines = split_lines(content);
        let classified = self
            .cache
            .read(|cache| scan_line(&lines, line, path, cache, &self.config))
            .await;
        let written = match classified {
            LineScan::Ignored | LineScan::Unchanged(_) => return Ok(false),
            LineScan::New(new) => self.create_new_task(path, new).await?,
            LineScan::Modified(modified) => self.push_modified(modified).await?,
            LineScan::Orphan(orphan) => self.remove_orphans(path, &[orphan.task_id]).await?,
            LineScan::Item(op) => self.apply_item_ops(path, vec![op]).await?,
        };
        self.cache.persist().await?;
        Ok(written)
    }

    /// Delete tasks that vanished from a document.
    ///
    /// `None` or empty content deletes every task the document tracked.
    /// Returns the ids removed from the cache.
    ///
    /// # Errors
    /// Returns [`SyncError::Cache`] when the cache cannot be persisted.
    pub async fn check_deleted(&self, path: &str, content: Option<&str>) -> Result<Vec<TaskId>, SyncError> {
        let content = content.filter(|text| !text.trim().is_empty());
        let ids = match content {
            None => {
                self.cache
                    .read(|cache| {
                        cache
                            .file(path)
                            .map(|meta| meta.task_ids().cloned().collect())
                            .unwrap_or_default()
                    })
                    .await
            }
            Some(text) => self.cache.read(|cache| find_deletions(text, path, cache)).await,
        };
        let removed = self.delete_tasks(&ids).await;

        if let Some(text) = content {
            let deleted_items: Vec<ItemOp> = self
                .cache
                .read(|cache| scan(text, path, cache, &self.config).item_ops)
                .await
                .into_iter()
                .filter(|op| matches!(op, ItemOp::Deleted { .. }))
                .collect();
            if !deleted_items.is_empty() {
                self.apply_item_ops(path, deleted_items).await?;
            }
        }
        self.cache.persist().await?;
        Ok(removed)
    }

    /// Delete tasks remotely and purge them from the cache.
    ///
    /// A task the remote side no longer has counts as deleted; any other
    /// failure keeps the task cached so a later check retries. Returns the
    /// ids removed.
    pub async fn delete_tasks(&self, ids: &[TaskId]) -> Vec<TaskId> {
        let mut removed = Vec::new();
        for id in ids {
            let project = self
                .cache
                .read(|cache| cache.task(id).and_then(|task| task.project_id.clone()))
                .await;
            match self.remote.delete_task(id, project.as_ref()).await {
                Ok(_) => {}
                Err(err) if err.is_not_found() => debug!(%id, "task already gone remotely"),
                Err(err) => {
                    warn!(%id, error = %err, "failed to delete task, keeping it cached");
                    continue;
                }
            }
            self.notifier.notify(Notice::info(format!("Task {id} is deleted.")));
            removed.push(id.clone());
        }
        if !removed.is_empty() {
            self.cache.update(|cache| cache.remove_tasks(&removed)).await;
        }
        removed
    }

    /// Mark a task completed in the cache, remotely and in its document.
    ///
    /// # Errors
    /// [`SyncError::UnknownTask`] for an uncached id, [`SyncError::Remote`]
    /// when the service refuses.
    pub async fn close_task(&self, id: &TaskId) -> Result<(), SyncError> {
        self.toggle_status(id, TaskStatus::Completed).await?;
        self.notifier.notify(Notice::info(format!("Task {id} is closed.")));
        Ok(())
    }

    /// Mark a task open again in the cache, remotely and in its document.
    ///
    /// # Errors
    /// [`SyncError::UnknownTask`] for an uncached id, [`SyncError::Remote`]
    /// when the service refuses.
    pub async fn reopen_task(&self, id: &TaskId) -> Result<(), SyncError> {
        self.toggle_status(id, TaskStatus::Open).await?;
        self.notifier.notify(Notice::info(format!("Task {id} is reopened.")));
        Ok(())
    }

    async fn toggle_status(&self, id: &TaskId, status: TaskStatus) -> Result<(), SyncError> {
        let task = self
            .cache
            .task(id)
            .await
            .ok_or_else(|| SyncError::UnknownTask(id.clone()))?;
        let project = task.project_id.as_ref();
        if status.is_closed() {
            self.remote.complete_task(id, project).await?;
        } else {
            self.remote.reopen_task(id, project).await?;
        }
        self.cache.update(|cache| cache.set_status(id, status)).await;

        if let Some(path) = task.path.as_deref() {
            let content = self.documents.read_document(path).await?;
            if let Some(updated) = set_task_status(&content, id, status)
                && updated != content
            {
                self.documents.write_document(path, &updated).await?;
            }
        }
        self.cache.persist().await?;
        Ok(())
    }

    /// Create a pending task remotely and stamp its id into the document.
    ///
    /// The created task is cached before the document is written, so a retry
    /// after a failed write stamps the cached id instead of creating again.
    async fn create_new_task(&self, path: &str, new: NewTask) -> Result<bool, SyncError> {
        // Another flow may have stamped or removed the line since the scan.
        let fresh = split_lines(&self.documents.read_document(path).await?);
        if !fresh.contains(&new.text) {
            debug!(path, line = new.line, "pending task line changed, skipping create");
            return Ok(false);
        }

        let unstamped = self
            .cache
            .read(|cache| unstamped_task(cache, path, &fresh, &new.task))
            .await;
        let task = match unstamped {
            Some(task) => {
                debug!(id = %task.id, path, "stamping task created by an interrupted check");
                task
            }
            None => {
                let locator = self.config.locator_for(path);
                let created = match self.remote.create_task(&new.task.for_remote(locator.as_deref())).await {
                    Ok(created) => created,
                    Err(err) => {
                        warn!(path, title = %new.task.title, error = %err, "failed to create task");
                        return Ok(false);
                    }
                };
                let mut task = new.task;
                task.id = created.id.clone();
                task.modified_time = created.modified_time;
                self.sync_remote_status(&task, &created).await;

                info!(id = %task.id, path, "created task");
                self.cache.update(|cache| cache.append_task(task.clone(), path)).await;
                self.cache.persist().await?;
                self.notifier.notify(Notice::info(format!(
                    "new task {} id is {}",
                    task.title, task.id
                )));
                task
            }
        };

        let mut edits = vec![LineEdit::new(
            new.line,
            new.text.clone(),
            render_task_link(&new.text, &task.id),
        )];
        edits.extend(new.item_edits);
        self.apply_document_edits(path, &edits).await
    }

    /// Remove lines carrying ids the cache does not know, with their items.
    async fn remove_orphans(&self, path: &str, ids: &[TaskId]) -> Result<bool, SyncError> {
        let original = self.documents.read_document(path).await?;
        let mut content = original.clone();
        for id in ids {
            while let Some(updated) = remove_task_block(&content, id, &self.config.tag) {
                content = updated;
            }
            warn!(%id, path, "removed line with unknown task id");
            self.notifier.notify(Notice::warning(format!(
                "There is no task {id} in the local cache. It will be deleted"
            )));
        }
        if content == original {
            return Ok(false);
        }
        self.documents.write_document(path, &content).await?;
        Ok(true)
    }

    /// Record a document-side edit and push it.
    ///
    /// A task the remote side no longer has is removed from the cache and its
    /// document. Returns whether a document was rewritten.
    async fn push_modified(&self, modified: ModifiedTask) -> Result<bool, SyncError> {
        let ModifiedTask { task, changes, .. } = modified;
        let mut task = task;
        // A failed push leaves the cache newer, so the next remote pass retries.
        task.modified_time = Some(OffsetDateTime::now_utc());
        self.cache.update(|cache| cache.update_task(task.clone())).await;

        if changes.content_changed() {
            let locator = task.path.as_deref().and_then(|path| self.config.locator_for(path));
            match self.remote.update_task(&task.for_remote(locator.as_deref())).await {
                Ok(updated) => {
                    self.cache
                        .update(|cache| cache.set_modified_time(&task.id, updated.modified_time))
                        .await;
                }
                Err(err) if err.is_not_found() => {
                    warn!(id = %task.id, "edited task no longer exists remotely");
                    return self.remove_local_task(&task).await;
                }
                Err(err) => {
                    warn!(id = %task.id, error = %err, "failed to push task update");
                    return Ok(false);
                }
            }
        }
        if changes.status {
            self.push_status(&task).await;
        }

        if self.config.debug {
            info!(id = %task.id, ?changes, "pushed document edit");
        } else {
            debug!(id = %task.id, "pushed document edit");
        }
        self.notifier.notify(Notice::info(format!(
            "Task {} is updated. {}",
            task.id,
            changes.describe()
        )));
        Ok(false)
    }

    /// Apply checklist item changes to the cache and document, then push
    /// each touched parent once.
    async fn apply_item_ops(&self, path: &str, ops: Vec<ItemOp>) -> Result<bool, SyncError> {
        let mut parents = BTreeSet::new();
        let mut edits = Vec::new();
        for op in ops {
            parents.insert(op.parent().clone());
            if let ItemOp::Added { line, original, text, .. } = &op {
                edits.push(LineEdit::new(*line, original.clone(), text.clone()));
            }
            self.cache.update(|cache| apply_item_op(cache, op)).await;
        }

        let written = if edits.is_empty() {
            false
        } else {
            self.apply_document_edits(path, &edits).await?
        };
        let content = match self.documents.read_document(path).await {
            Ok(content) => content,
            Err(err) if err.is_not_found() => String::new(),
            Err(err) => return Err(err.into()),
        };

        let now = OffsetDateTime::now_utc();
        for parent in parents {
            let task = self
                .cache
                .update(|cache| {
                    let order = document_item_order(&content, &parent, &self.config.tag);
                    let task = cache.tasks.get_mut(&parent)?;
                    task.items.sort_by_key(|item| {
                        order.iter().position(|id| id == &item.id).unwrap_or(usize::MAX)
                    });
                    task.modified_time = Some(now);
                    Some(task.clone())
                })
                .await;
            let Some(task) = task else {
                continue;
            };
            let locator = self.config.locator_for(path);
            match self.remote.update_task(&task.for_remote(locator.as_deref())).await {
                Ok(updated) => {
                    self.cache
                        .update(|cache| cache.set_modified_time(&task.id, updated.modified_time))
                        .await;
                    self.notifier.notify(Notice::info(format!(
                        "Task {} is updated. Checklist items were changed.",
                        task.id
                    )));
                }
                Err(err) => warn!(id = %task.id, error = %err, "failed to push checklist items"),
            }
        }
        Ok(written)
    }

    /// Re-read the document, apply `edits` and write it back when it changed.
    async fn apply_document_edits(&self, path: &str, edits: &[LineEdit]) -> Result<bool, SyncError> {
        let content = self.documents.read_document(path).await?;
        let (updated, applied) = apply_edits(&content, edits);
        if applied < edits.len() {
            debug!(path, applied, total = edits.len(), "some edits no longer matched");
        }
        if updated == content {
            return Ok(false);
        }
        self.documents.write_document(path, &updated).await?;
        Ok(true)
    }

    /// Rebuild a document's metadata from its text, keeping cached tasks
    /// whose remote deletion is still pending. Returns whether it changed.
    async fn refresh_metadata(&self, path: &str, content: &str) -> bool {
        let tag = self.config.tag.clone();
        self.cache
            .update(|cache| {
                let mut tracked = tracked_tasks(content, &tag, cache);
                let pending: Vec<TrackedTask> = cache
                    .file(path)
                    .map(|meta| {
                        meta.tasks
                            .iter()
                            .filter(|old| !tracked.iter().any(|t| t.task_id == old.task_id))
                            .filter(|old| {
                                cache
                                    .task(&old.task_id)
                                    .is_some_and(|task| task.path.as_deref() == Some(path))
                            })
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default();
                tracked.extend(pending);
                let before = cache.file(path).map(|meta| meta.tasks.clone()).unwrap_or_default();
                let changed = before != tracked;
                cache.set_file_tasks(path, tracked);
                changed
            })
            .await
    }
}

/// Cached task of `path` that no line carries yet, matching a pending line.
fn unstamped_task(cache: &CacheData, path: &str, lines: &[String], pending: &Task) -> Option<Task> {
    cache
        .tasks
        .values()
        .find(|task| {
            task.path.as_deref() == Some(path)
                && task.title == pending.title
                && find_task_line(lines, &task.id).is_none()
        })
        .cloned()
}

fn apply_item_op(cache: &mut CacheData, op: ItemOp) {
    match op {
        ItemOp::Added { parent, item, .. } => {
            if let Some(task) = cache.tasks.get_mut(&parent)
                && task.item(&item.id).is_none()
            {
                task.items.push(item);
            }
        }
        ItemOp::Modified { parent, item } => {
            if let Some(existing) = cache
                .tasks
                .get_mut(&parent)
                .and_then(|task| task.item_mut(&item.id))
            {
                existing.title = item.title;
                existing.status = item.status;
            }
        }
        ItemOp::Deleted { parent, item_id } => {
            if let Some(task) = cache.tasks.get_mut(&parent) {
                task.items.retain(|item| item.id != item_id);
            }
        }
    }
}

fn document_item_order(content: &str, parent: &TaskId, tag: &str) -> Vec<ItemId> {
    let lines = split_lines(content);
    let Some(start) = find_task_line(&lines, parent) else {
        return Vec::new();
    };
    item_lines(&lines, start, tag)
        .into_iter()
        .filter_map(|idx| parse_line(&lines[idx], tag).embedded_item_id)
        .collect()
}
