//! Last-agreed task state, shared by the sync engine and document checks.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use ticksync_core::{ItemId, Project, ProjectId, Task, TaskId, TaskStatus};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::debug;

/// Task recorded in a document at its last scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedTask {
    /// Task id.
    pub task_id: TaskId,
    /// Checklist item ids, in document order.
    #[serde(default)]
    pub item_ids: Vec<ItemId>,
}

impl TrackedTask {
    /// Record for a task and its current items.
    #[must_use]
    pub fn of(task: &Task) -> Self {
        Self {
            task_id: task.id.clone(),
            item_ids: task.items.iter().map(|item| item.id.clone()).collect(),
        }
    }
}

/// Per-document record of tracked tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Tracked tasks, in document order.
    #[serde(default)]
    pub tasks: Vec<TrackedTask>,
}

impl FileMetadata {
    /// Whether the document tracks `id`.
    #[must_use]
    pub fn contains(&self, id: &TaskId) -> bool {
        self.tasks.iter().any(|tracked| &tracked.task_id == id)
    }

    /// Ids of every tracked task.
    pub fn task_ids(&self) -> impl Iterator<Item = &TaskId> {
        self.tasks.iter().map(|tracked| &tracked.task_id)
    }
}

/// Persisted cache contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheData {
    /// Tasks keyed by id.
    #[serde(default)]
    pub tasks: BTreeMap<TaskId, Task>,
    /// File metadata keyed by document path.
    #[serde(default)]
    pub files: BTreeMap<String, FileMetadata>,
    /// Project names keyed by id.
    #[serde(default)]
    pub projects: BTreeMap<ProjectId, String>,
}

impl CacheData {
    /// Cached task.
    #[must_use]
    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }

    /// Project whose name matches `name`, ignoring case.
    #[must_use]
    pub fn project_id_by_name(&self, name: &str) -> Option<ProjectId> {
        self.projects
            .iter()
            .find(|(_, project)| project.to_lowercase() == name.to_lowercase())
            .map(|(id, _)| id.clone())
    }

    /// Display name of a project.
    #[must_use]
    pub fn project_name(&self, id: &ProjectId) -> Option<&str> {
        self.projects.get(id).map(String::as_str)
    }

    /// Metadata of a document.
    #[must_use]
    pub fn file(&self, path: &str) -> Option<&FileMetadata> {
        self.files.get(path)
    }

    /// Insert a task created or pulled into `path`.
    pub fn append_task(&mut self, mut task: Task, path: &str) {
        task.path = Some(path.to_owned());
        let tracked = TrackedTask::of(&task);
        let meta = self.files.entry(path.to_owned()).or_default();
        match meta.tasks.iter_mut().find(|t| t.task_id == task.id) {
            Some(existing) => *existing = tracked,
            None => meta.tasks.push(tracked),
        }
        debug!(id = %task.id, path, "cached task");
        self.tasks.insert(task.id.clone(), task);
    }

    /// Replace a cached task.
    ///
    /// A task without a path keeps the cached one. A changed path moves the
    /// task's metadata entry to the new document.
    pub fn update_task(&mut self, mut task: Task) {
        let previous_path = self.tasks.get(&task.id).and_then(|t| t.path.clone());
        if task.path.is_none() {
            task.path.clone_from(&previous_path);
        }
        if let Some(old) = previous_path.as_deref()
            && task.path.as_deref() != Some(old)
            && let Some(meta) = self.files.get_mut(old)
        {
            meta.tasks.retain(|tracked| tracked.task_id != task.id);
        }
        if let Some(path) = task.path.clone() {
            let tracked = TrackedTask::of(&task);
            let meta = self.files.entry(path).or_default();
            match meta.tasks.iter_mut().find(|t| t.task_id == task.id) {
                Some(existing) => *existing = tracked,
                None => meta.tasks.push(tracked),
            }
        }
        self.files.retain(|_, meta| !meta.tasks.is_empty());
        self.tasks.insert(task.id.clone(), task);
    }

    /// Set a task's status. Returns false for an unknown task.
    pub fn set_status(&mut self, id: &TaskId, status: TaskStatus) -> bool {
        let Some(task) = self.tasks.get_mut(id) else {
            return false;
        };
        task.status = status;
        true
    }

    /// Store the modification time reported by the remote side.
    pub fn set_modified_time(&mut self, id: &TaskId, time: Option<OffsetDateTime>) {
        if let Some(task) = self.tasks.get_mut(id) {
            task.modified_time = time;
        }
    }

    /// Drop tasks and every metadata reference to them; returns the ids that were cached.
    pub fn remove_tasks<'a>(&mut self, ids: impl IntoIterator<Item = &'a TaskId>) -> Vec<TaskId> {
        let ids: BTreeSet<&TaskId> = ids.into_iter().collect();
        let removed: Vec<TaskId> = ids
            .iter()
            .filter_map(|id| self.tasks.remove(*id).map(|task| task.id))
            .collect();
        for meta in self.files.values_mut() {
            meta.tasks.retain(|tracked| !ids.contains(&tracked.task_id));
        }
        self.files.retain(|_, meta| !meta.tasks.is_empty());
        removed
    }

    /// Replace a document's tracked task list; an empty list drops the entry.
    pub fn set_file_tasks(&mut self, path: &str, tasks: Vec<TrackedTask>) {
        if tasks.is_empty() {
            self.files.remove(path);
        } else {
            self.files.insert(path.to_owned(), FileMetadata { tasks });
        }
    }

    /// Forget a document's metadata.
    pub fn remove_file(&mut self, path: &str) -> Option<FileMetadata> {
        self.files.remove(path)
    }

    /// Move a document's metadata and its tasks' paths to `new`.
    ///
    /// Tasks already tracked under `new` stay; the moved ones are appended.
    pub fn rename_file(&mut self, old: &str, new: &str) -> bool {
        let Some(meta) = self.files.remove(old) else {
            return false;
        };
        for id in meta.task_ids() {
            if let Some(task) = self.tasks.get_mut(id) {
                task.path = Some(new.to_owned());
            }
        }
        let target = self.files.entry(new.to_owned()).or_default();
        for tracked in meta.tasks {
            if !target.tasks.iter().any(|t| t.task_id == tracked.task_id) {
                target.tasks.push(tracked);
            }
        }
        true
    }

    /// Replace the project list.
    pub fn set_projects(&mut self, projects: &[Project]) {
        self.projects = projects
            .iter()
            .map(|project| (project.id.clone(), project.name.clone()))
            .collect();
    }

    /// Purge metadata ids without a task entry and documents left empty.
    ///
    /// Returns the number of documents retained.
    pub fn check_file_metadata(&mut self) -> usize {
        let tasks = &self.tasks;
        for meta in self.files.values_mut() {
            meta.tasks.retain(|tracked| tasks.contains_key(&tracked.task_id));
        }
        self.files.retain(|_, meta| !meta.tasks.is_empty());
        self.files.len()
    }
}

/// Durable storage for [`CacheData`].
pub trait CacheBackend: Send + Sync {
    /// Read the stored cache; a missing store yields an empty cache.
    ///
    /// # Errors
    /// Returns an error when the stored data cannot be read or decoded.
    fn load(&self) -> Result<CacheData>;

    /// Replace the stored cache.
    ///
    /// # Errors
    /// Returns an error when the data cannot be written.
    fn save(&self, data: &CacheData) -> Result<()>;
}

/// Backend keeping the cache in memory.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    data: std::sync::Mutex<CacheData>,
}

impl MemoryBackend {
    /// Backend pre-filled with `data`.
    #[must_use]
    pub fn with_data(data: CacheData) -> Self {
        Self {
            data: std::sync::Mutex::new(data),
        }
    }

    /// Last saved data.
    ///
    /// # Errors
    /// Returns an error when the lock is poisoned.
    pub fn saved(&self) -> Result<CacheData> {
        self.data
            .lock()
            .map(|data| data.clone())
            .map_err(|_| anyhow!("memory backend lock poisoned"))
    }
}

impl CacheBackend for MemoryBackend {
    fn load(&self) -> Result<CacheData> {
        self.saved()
    }

    fn save(&self, data: &CacheData) -> Result<()> {
        let mut guard = self
            .data
            .lock()
            .map_err(|_| anyhow!("memory backend lock poisoned"))?;
        *guard = data.clone();
        Ok(())
    }
}

/// Cache shared between the sync engine and document checks.
///
/// Every access is one critical section on an async mutex; the closures passed
/// to [`read`](Self::read) and [`update`](Self::update) cannot await, so no
/// borrow of the cache survives a remote call.
#[derive(Clone)]
pub struct TaskCache {
    state: Arc<Mutex<CacheData>>,
    backend: Arc<dyn CacheBackend>,
}

impl std::fmt::Debug for TaskCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskCache").finish_non_exhaustive()
    }
}

impl TaskCache {
    /// Load the cache from its backend.
    ///
    /// # Errors
    /// Propagates backend read failures.
    pub fn load(backend: Arc<dyn CacheBackend>) -> Result<Self> {
        let data = backend.load().context("failed to load task cache")?;
        debug!(
            tasks = data.tasks.len(),
            files = data.files.len(),
            "loaded task cache"
        );
        Ok(Self {
            state: Arc::new(Mutex::new(data)),
            backend,
        })
    }

    /// Empty cache persisted to memory only.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            state: Arc::new(Mutex::new(CacheData::default())),
            backend: Arc::new(MemoryBackend::default()),
        }
    }

    /// Run `f` against the current state.
    pub async fn read<T>(&self, f: impl FnOnce(&CacheData) -> T) -> T {
        let guard = self.state.lock().await;
        f(&guard)
    }

    /// Run `f` with exclusive access to the state.
    pub async fn update<T>(&self, f: impl FnOnce(&mut CacheData) -> T) -> T {
        let mut guard = self.state.lock().await;
        f(&mut guard)
    }

    /// Cached copy of one task.
    pub async fn task(&self, id: &TaskId) -> Option<Task> {
        self.read(|cache| cache.task(id).cloned()).await
    }

    /// Cached copy of every task.
    pub async fn tasks(&self) -> Vec<Task> {
        self.read(|cache| cache.tasks.values().cloned().collect())
            .await
    }

    /// Full copy of the state.
    pub async fn snapshot(&self) -> CacheData {
        self.read(Clone::clone).await
    }

    /// Write the current state through the backend.
    ///
    /// # Errors
    /// Propagates backend write failures.
    pub async fn persist(&self) -> Result<()> {
        let data = self.snapshot().await;
        let backend = Arc::clone(&self.backend);
        tokio::task::spawn_blocking(move || backend.save(&data))
            .await
            .map_err(|e| anyhow!("cache persist task failed: {e}"))?
    }

    /// See [`CacheData::check_file_metadata`].
    pub async fn check_file_metadata(&self) -> usize {
        self.update(CacheData::check_file_metadata).await
    }

    /// See [`CacheData::rename_file`].
    pub async fn rename_file(&self, old: &str, new: &str) -> bool {
        self.update(|cache| cache.rename_file(old, new)).await
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use super::*;
    use ticksync_core::ChecklistItem;

    fn task(id: &str) -> Task {
        Task::new(TaskId::new(id), format!("task {id}"))
    }

    #[test]
    fn append_task_records_metadata() {
        let mut cache = CacheData::default();
        let mut t = task("t1");
        t.items.push(ChecklistItem {
            id: ItemId::new("i1"),
            title: "step".into(),
            status: TaskStatus::Open,
        });
        cache.append_task(t, "a.md");

        assert_eq!(cache.task(&TaskId::new("t1")).unwrap().path.as_deref(), Some("a.md"));
        let meta = cache.file("a.md").unwrap();
        assert_eq!(meta.tasks, vec![TrackedTask {
            task_id: TaskId::new("t1"),
            item_ids: vec![ItemId::new("i1")],
        }]);
    }

    #[test]
    fn update_task_keeps_path_when_absent() {
        let mut cache = CacheData::default();
        cache.append_task(task("t1"), "a.md");
        let mut updated = task("t1");
        updated.title = "renamed".into();
        cache.update_task(updated);

        let cached = cache.task(&TaskId::new("t1")).unwrap();
        assert_eq!(cached.title, "renamed");
        assert_eq!(cached.path.as_deref(), Some("a.md"));
    }

    #[test]
    fn update_task_moves_metadata_between_documents() {
        let mut cache = CacheData::default();
        cache.append_task(task("t1"), "a.md");
        let mut moved = task("t1");
        moved.path = Some("b.md".into());
        cache.update_task(moved);

        assert!(cache.file("a.md").is_none());
        assert!(cache.file("b.md").unwrap().contains(&TaskId::new("t1")));
    }

    #[test]
    fn remove_tasks_purges_metadata() {
        let mut cache = CacheData::default();
        cache.append_task(task("t1"), "a.md");
        cache.append_task(task("t2"), "a.md");
        let removed = cache.remove_tasks([&TaskId::new("t1"), &TaskId::new("zz")]);

        assert_eq!(removed, vec![TaskId::new("t1")]);
        let ids: Vec<_> = cache.file("a.md").unwrap().task_ids().cloned().collect();
        assert_eq!(ids, vec![TaskId::new("t2")]);
    }

    #[test]
    fn check_file_metadata_drops_stale_ids() {
        let mut cache = CacheData::default();
        cache.append_task(task("t1"), "a.md");
        cache.files.insert(
            "b.md".into(),
            FileMetadata {
                tasks: vec![TrackedTask {
                    task_id: TaskId::new("ghost"),
                    item_ids: Vec::new(),
                }],
            },
        );
        assert_eq!(cache.check_file_metadata(), 1);
        assert!(cache.file("b.md").is_none());
    }

    #[test]
    fn rename_file_moves_task_paths() {
        let mut cache = CacheData::default();
        cache.append_task(task("t1"), "old.md");
        assert!(cache.rename_file("old.md", "new.md"));
        assert!(!cache.rename_file("missing.md", "x.md"));
        assert_eq!(cache.task(&TaskId::new("t1")).unwrap().path.as_deref(), Some("new.md"));
        assert!(cache.file("new.md").is_some());
    }

    #[test]
    fn rename_onto_tracked_document_merges_metadata() {
        let mut cache = CacheData::default();
        cache.append_task(task("t1"), "old.md");
        cache.append_task(task("t2"), "new.md");
        assert!(cache.rename_file("old.md", "new.md"));

        let ids: Vec<_> = cache.file("new.md").unwrap().task_ids().cloned().collect();
        assert_eq!(ids, vec![TaskId::new("t2"), TaskId::new("t1")]);
        assert!(cache.file("old.md").is_none());
    }

    #[test]
    fn project_lookup_ignores_case() {
        let mut cache = CacheData::default();
        cache.set_projects(&[Project {
            id: ProjectId::new("p1"),
            name: "Groceries".into(),
        }]);
        assert_eq!(cache.project_id_by_name("groceries"), Some(ProjectId::new("p1")));
        assert_eq!(cache.project_name(&ProjectId::new("p1")), Some("Groceries"));
        assert!(cache.project_id_by_name("work").is_none());
    }

    #[tokio::test]
    async fn persist_writes_through_backend() {
        let backend = Arc::new(MemoryBackend::default());
        let cache = TaskCache::load(backend.clone()).unwrap();
        cache.update(|data| data.append_task(task("t1"), "a.md")).await;
        cache.persist().await.unwrap();

        let saved = backend.saved().unwrap();
        assert!(saved.tasks.contains_key(&TaskId::new("t1")));
    }
}
