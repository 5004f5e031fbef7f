#![allow(missing_docs, clippy::expect_used)]

use std::sync::Arc;

use anyhow::Result;
use tempfile::tempdir;
use ticksync_app::{CacheBackend, DocumentStore, TaskCache};
use ticksync_core::{Project, ProjectId, Task, TaskId};
use ticksync_store_fs::{FsVault, JsonCacheFile};

#[tokio::test]
async fn cache_survives_reload_from_disk() -> Result<()> {
    let dir = tempdir()?;
    let backend: Arc<dyn CacheBackend> = Arc::new(JsonCacheFile::in_vault(dir.path()));

    let cache = TaskCache::load(Arc::clone(&backend))?;
    cache
        .update(|data| {
            data.append_task(Task::new(TaskId::new("r1"), "Buy milk"), "daily/today.md");
            data.set_projects(&[Project {
                id: ProjectId::new("p1"),
                name: "Groceries".into(),
            }]);
        })
        .await;
    cache.persist().await?;

    let reloaded = TaskCache::load(backend)?.snapshot().await;
    assert_eq!(reloaded, cache.snapshot().await);
    let task = reloaded.task(&TaskId::new("r1")).expect("task is persisted");
    assert_eq!(task.path.as_deref(), Some("daily/today.md"));
    assert_eq!(reloaded.project_id_by_name("groceries"), Some(ProjectId::new("p1")));
    Ok(())
}

#[tokio::test]
async fn state_directory_is_not_listed() -> Result<()> {
    let dir = tempdir()?;
    let vault = FsVault::open(dir.path())?;
    vault.write_document("inbox.md", "- [ ] a #ticktick\n").await?;
    JsonCacheFile::in_vault(dir.path()).save(&ticksync_app::CacheData::default())?;

    assert_eq!(vault.list_documents().await?, vec!["inbox.md"]);
    Ok(())
}
