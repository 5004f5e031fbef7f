use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use ticksync_app::{DocumentStore, ItemOp, ProjectConfig, ScanResult, TaskCache, scan};
use ticksync_store_fs::{FsVault, JsonCacheFile};
use tracing::info;

use crate::Command;

/// Everything a command needs from one vault.
pub struct Vault {
    config: ProjectConfig,
    documents: FsVault,
    cache: TaskCache,
}

impl Vault {
    /// Load configuration, document store and cache of the vault at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let config = ProjectConfig::from_vault(root)?;
        let documents =
            FsVault::open(root).with_context(|| format!("Failed to open vault {}", root.display()))?;
        let cache = TaskCache::load(Arc::new(JsonCacheFile::in_vault(root)))?;
        Ok(Self {
            config,
            documents,
            cache,
        })
    }
}

pub async fn run(command: Command, vault: &Vault, out: &mut (impl Write + Send)) -> Result<()> {
    match command {
        Command::Scan { path } => scan_document(vault, &path, out).await,
        Command::Status => status(vault, out).await,
        Command::Prune => prune(vault, out).await,
        Command::Config => {
            let rendered = toml::to_string_pretty(&vault.config).context("Failed to render config")?;
            write!(out, "{rendered}")?;
            Ok(())
        }
    }
}

async fn scan_document(vault: &Vault, path: &str, out: &mut (impl Write + Send)) -> Result<()> {
    let content = vault.documents.read_document(path).await?;
    let config = &vault.config.sync;
    let result = vault
        .cache
        .read(|cache| scan(&content, path, cache, config))
        .await;
    write_scan(&result, out)?;
    Ok(())
}

fn write_scan(result: &ScanResult, out: &mut (impl Write + Send)) -> std::io::Result<()> {
    if result.is_empty() {
        return writeln!(out, "no changes");
    }
    for new in &result.new_tasks {
        writeln!(out, "new       line {}: {}", new.line + 1, new.task.title)?;
    }
    for modified in &result.modified_tasks {
        writeln!(
            out,
            "modified  {}: {}",
            modified.task.id,
            modified.changes.describe()
        )?;
    }
    for orphan in &result.orphaned {
        writeln!(out, "orphaned  line {}: {}", orphan.line + 1, orphan.task_id)?;
    }
    for id in &result.deleted_task_ids {
        writeln!(out, "deleted   {id}")?;
    }
    for id in &result.moved_task_ids {
        writeln!(out, "moved     {id}")?;
    }
    for op in &result.item_ops {
        match op {
            ItemOp::Added { parent, item, .. } => {
                writeln!(out, "item+     {parent}: {}", item.title)?;
            }
            ItemOp::Modified { parent, item } => {
                writeln!(out, "item~     {parent}: {} {}", item.id, item.title)?;
            }
            ItemOp::Deleted { parent, item_id } => writeln!(out, "item-     {parent}: {item_id}")?,
        }
    }
    Ok(())
}

async fn status(vault: &Vault, out: &mut (impl Write + Send)) -> Result<()> {
    let data = vault.cache.snapshot().await;
    writeln!(out, "tasks:    {}", data.tasks.len())?;
    writeln!(out, "files:    {}", data.files.len())?;
    writeln!(out, "projects: {}", data.projects.len())?;
    for (path, meta) in &data.files {
        writeln!(out, "  {path} ({} tasks)", meta.tasks.len())?;
    }
    Ok(())
}

async fn prune(vault: &Vault, out: &mut (impl Write + Send)) -> Result<()> {
    let before = vault.cache.read(|cache| cache.files.len()).await;
    let retained = vault.cache.check_file_metadata().await;
    vault.cache.persist().await?;
    info!(before, retained, "pruned file metadata");
    writeln!(out, "retained {retained} of {before} files")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use super::*;
    use tempfile::tempdir;
    use ticksync_app::{CacheBackend, CacheData};
    use ticksync_core::{Task, TaskId};

    async fn output(command: Command, vault: &Vault) -> String {
        let mut out = Vec::new();
        run(command, vault, &mut out).await.unwrap();
        String::from_utf8(out).unwrap()
    }

    fn seed_cache(root: &Path) {
        let mut data = CacheData::default();
        data.append_task(Task::new(TaskId::new("r1"), "Buy milk"), "inbox.md");
        data.append_task(Task::new(TaskId::new("r2"), "Gone"), "old.md");
        data.tasks.remove(&TaskId::new("r2"));
        JsonCacheFile::in_vault(root).save(&data).unwrap();
    }

    #[tokio::test]
    async fn scan_reports_pending_work_without_writing() {
        let dir = tempdir().unwrap();
        let doc = "- [ ] Write report #ticktick\n- [ ] Ghost #ticktick %%[ticktick_id:: zz]%%\n";
        std::fs::write(dir.path().join("todo.md"), doc).unwrap();
        let vault = Vault::open(dir.path()).unwrap();

        let report = output(Command::Scan { path: "todo.md".into() }, &vault).await;
        assert_eq!(report, "new       line 1: Write report\norphaned  line 2: zz\n");
        assert_eq!(std::fs::read_to_string(dir.path().join("todo.md")).unwrap(), doc);
    }

    #[tokio::test]
    async fn scan_of_missing_document_fails() {
        let dir = tempdir().unwrap();
        let vault = Vault::open(dir.path()).unwrap();
        let mut out = Vec::new();
        assert!(run(Command::Scan { path: "nope.md".into() }, &vault, &mut out).await.is_err());
    }

    #[tokio::test]
    async fn status_counts_cache_contents() {
        let dir = tempdir().unwrap();
        seed_cache(dir.path());
        let vault = Vault::open(dir.path()).unwrap();

        let report = output(Command::Status, &vault).await;
        assert!(report.starts_with("tasks:    1\nfiles:    2\nprojects: 0\n"));
        assert!(report.contains("  inbox.md (1 tasks)"));
    }

    #[tokio::test]
    async fn prune_drops_stale_metadata_and_persists() {
        let dir = tempdir().unwrap();
        seed_cache(dir.path());
        let vault = Vault::open(dir.path()).unwrap();

        assert_eq!(output(Command::Prune, &vault).await, "retained 1 of 2 files\n");
        let saved = JsonCacheFile::in_vault(dir.path()).load().unwrap();
        assert_eq!(saved.files.keys().collect::<Vec<_>>(), vec!["inbox.md"]);
    }

    #[tokio::test]
    async fn config_prints_effective_settings() {
        let dir = tempdir().unwrap();
        let vault = Vault::open(dir.path()).unwrap();
        let report = output(Command::Config, &vault).await;
        assert!(report.contains("interval_secs = 300"));
        assert!(report.contains("inbox_document = \"TickTick.md\""));
    }
}
