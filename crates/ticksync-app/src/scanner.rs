//! Classification of document lines against the cache.
//!
//! Scanning is synchronous and works on a borrowed [`CacheData`], so callers
//! run it inside a single [`TaskCache::read`](crate::cache::TaskCache::read).
//! Lines are matched by id and position only, never by text.

use std::collections::BTreeSet;

use ticksync_core::line::{ParsedLine, parse_line, render_item_link, task_id_of};
use ticksync_core::{ChecklistItem, ItemId, Task, TaskChanges, TaskId};
use tracing::debug;

use crate::cache::{CacheData, TrackedTask};
use crate::config::SyncConfig;
use crate::edit::{LineEdit, item_lines, parent_of, split_lines};

/// Tagged line without an id, pending remote creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    /// Line index.
    pub line: usize,
    /// Line text at scan time.
    pub text: String,
    /// Task to create; its id is unassigned.
    pub task: Task,
    /// Item lines that need an id marker before the task is stamped.
    pub item_edits: Vec<LineEdit>,
}

/// Tracked line that differs from its cached copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifiedTask {
    /// Line index.
    pub line: usize,
    /// Cached task with the document's changes applied.
    pub task: Task,
    /// Fields that differ.
    pub changes: TaskChanges,
}

/// Line carrying an id the cache does not know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Orphan {
    /// Line index.
    pub line: usize,
    /// Line text at scan time.
    pub text: String,
    /// Unknown id.
    pub task_id: TaskId,
}

/// Change to one checklist item of a tracked task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOp {
    /// Item line without an id; `text` is the line with its new marker.
    Added {
        /// Line index.
        line: usize,
        /// Line text at scan time.
        original: String,
        /// Line text carrying the item marker.
        text: String,
        /// Owning task.
        parent: TaskId,
        /// New item.
        item: ChecklistItem,
    },
    /// Known item whose title or status changed.
    Modified {
        /// Owning task.
        parent: TaskId,
        /// Item as it now reads.
        item: ChecklistItem,
    },
    /// Cached item no longer under its parent.
    Deleted {
        /// Owning task.
        parent: TaskId,
        /// Removed item.
        item_id: ItemId,
    },
}

impl ItemOp {
    /// Task owning the item.
    #[must_use]
    pub const fn parent(&self) -> &TaskId {
        match self {
            Self::Added { parent, .. } | Self::Modified { parent, .. } | Self::Deleted { parent, .. } => {
                parent
            }
        }
    }
}

/// Everything a full document scan found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    /// Lines to create remotely.
    pub new_tasks: Vec<NewTask>,
    /// Lines to push remotely.
    pub modified_tasks: Vec<ModifiedTask>,
    /// Lines whose id marker must be stripped.
    pub orphaned: Vec<Orphan>,
    /// Tracked tasks that vanished from the document.
    pub deleted_task_ids: Vec<TaskId>,
    /// Checklist item changes.
    pub item_ops: Vec<ItemOp>,
    /// Tracked tasks that now live in this document but were cached elsewhere.
    pub moved_task_ids: Vec<TaskId>,
}

impl ScanResult {
    /// Nothing to do.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.new_tasks.is_empty()
            && self.modified_tasks.is_empty()
            && self.orphaned.is_empty()
            && self.deleted_task_ids.is_empty()
            && self.item_ops.is_empty()
            && self.moved_task_ids.is_empty()
    }
}

/// Classification of a single line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineScan {
    /// Not a task, empty, or nothing to track.
    Ignored,
    /// Tagged line without an id.
    New(NewTask),
    /// Tracked line matching the cache.
    Unchanged(TaskId),
    /// Tracked line differing from the cache.
    Modified(ModifiedTask),
    /// Line with an id unknown to the cache.
    Orphan(Orphan),
    /// Checklist item line that was added or changed.
    Item(ItemOp),
}

/// Scan a whole document.
#[must_use]
pub fn scan(content: &str, path: &str, cache: &CacheData, config: &SyncConfig) -> ScanResult {
    let lines = split_lines(content);
    let mut result = ScanResult::default();

    for idx in 0..lines.len() {
        match scan_line(&lines, idx, path, cache, config) {
            LineScan::Ignored => {}
            LineScan::New(task) => result.new_tasks.push(task),
            LineScan::Orphan(orphan) => result.orphaned.push(orphan),
            LineScan::Item(op) => result.item_ops.push(op),
            LineScan::Unchanged(id) => {
                track_parent(&lines, idx, &id, path, cache, config, &mut result);
            }
            LineScan::Modified(modified) => {
                let id = modified.task.id.clone();
                result.modified_tasks.push(modified);
                track_parent(&lines, idx, &id, path, cache, config, &mut result);
            }
        }
    }

    result.deleted_task_ids = find_deletions(content, path, cache);
    result
}

fn track_parent(
    lines: &[String],
    idx: usize,
    id: &TaskId,
    path: &str,
    cache: &CacheData,
    config: &SyncConfig,
    result: &mut ScanResult,
) {
    let Some(cached) = cache.task(id) else {
        return;
    };
    if cached.path.as_deref() != Some(path) {
        result.moved_task_ids.push(id.clone());
    }
    let present: BTreeSet<ItemId> = item_lines(lines, idx, &config.tag)
        .into_iter()
        .filter_map(|line| parse_line(&lines[line], &config.tag).embedded_item_id)
        .collect();
    result.item_ops.extend(
        cached
            .items
            .iter()
            .filter(|item| !present.contains(&item.id))
            .map(|item| ItemOp::Deleted {
                parent: id.clone(),
                item_id: item.id.clone(),
            }),
    );
}

/// Classify the line at `idx`.
#[must_use]
pub fn scan_line(
    lines: &[String],
    idx: usize,
    path: &str,
    cache: &CacheData,
    config: &SyncConfig,
) -> LineScan {
    let Some(text) = lines.get(idx) else {
        return LineScan::Ignored;
    };
    let parsed = parse_line(text, &config.tag);
    if !parsed.is_task || parsed.description.is_empty() {
        return LineScan::Ignored;
    }

    if parsed.is_checklist_item {
        return scan_item(lines, idx, &parsed, cache, config).map_or(LineScan::Ignored, LineScan::Item);
    }
    if !parsed.has_tag {
        return LineScan::Ignored;
    }

    let Some(id) = parsed.embedded_task_id.clone() else {
        return LineScan::New(new_task(lines, idx, &parsed, cache, config));
    };
    let Some(cached) = cache.task(&id) else {
        return LineScan::Orphan(Orphan {
            line: idx,
            text: text.clone(),
            task_id: id,
        });
    };

    let local = local_task(lines, idx, &parsed, id.clone(), Some(cached), cache, config);
    let changes = TaskChanges::between(&local, cached);
    if changes.is_empty() {
        return LineScan::Unchanged(id);
    }
    let mut task = cached.clone();
    task.apply_changes(&local, changes);
    task.path = Some(path.to_owned());
    LineScan::Modified(ModifiedTask {
        line: idx,
        task,
        changes,
    })
}

fn local_task(
    lines: &[String],
    idx: usize,
    parsed: &ParsedLine,
    id: TaskId,
    cached: Option<&Task>,
    cache: &CacheData,
    config: &SyncConfig,
) -> Task {
    let mut task = parsed.to_task(id);
    task.title = parsed.description.trim().to_owned();

    let project_tag = task
        .tags
        .iter()
        .find_map(|tag| cache.project_id_by_name(tag).map(|project| (tag.clone(), project)));
    task.project_id = match project_tag {
        Some((tag, project)) => {
            task.tags.remove(&tag);
            Some(project)
        }
        None => match cached {
            Some(cached) => cached.project_id.clone(),
            None => config.default_project_id.clone(),
        },
    };

    task.parent_id = parent_of(lines, idx, &config.tag).and_then(|line| task_id_of(&lines[line]));
    task
}

fn new_task(
    lines: &[String],
    idx: usize,
    parsed: &ParsedLine,
    cache: &CacheData,
    config: &SyncConfig,
) -> NewTask {
    let mut task = local_task(lines, idx, parsed, TaskId::unassigned(), None, cache, config);
    let mut item_edits = Vec::new();
    for line in item_lines(lines, idx, &config.tag) {
        let item = parse_line(&lines[line], &config.tag);
        if item.description.is_empty() {
            continue;
        }
        let id = item.embedded_item_id.unwrap_or_else(|| {
            let id = ItemId::generate();
            item_edits.push(LineEdit::new(
                line,
                lines[line].clone(),
                render_item_link(&lines[line], &id),
            ));
            id
        });
        task.items.push(ChecklistItem {
            id,
            title: item.description,
            status: item.status,
        });
    }
    NewTask {
        line: idx,
        text: lines[idx].clone(),
        task,
        item_edits,
    }
}

fn scan_item(
    lines: &[String],
    idx: usize,
    parsed: &ParsedLine,
    cache: &CacheData,
    config: &SyncConfig,
) -> Option<ItemOp> {
    let parent_line = parent_of(lines, idx, &config.tag)?;
    let parent_id = task_id_of(&lines[parent_line])?;
    let parent = cache.task(&parent_id)?;

    let Some(item_id) = parsed.embedded_item_id.clone() else {
        let item = ChecklistItem::new(parsed.description.clone(), parsed.status);
        return Some(ItemOp::Added {
            line: idx,
            original: lines[idx].clone(),
            text: render_item_link(&lines[idx], &item.id),
            parent: parent_id,
            item,
        });
    };

    let Some(cached) = parent.item(&item_id) else {
        debug!(item = %item_id, parent = %parent_id, "ignoring item id unknown to its parent");
        return None;
    };
    if cached.title.trim() == parsed.description && cached.status == parsed.status {
        return None;
    }
    Some(ItemOp::Modified {
        parent: parent_id,
        item: ChecklistItem {
            id: item_id,
            title: parsed.description.clone(),
            status: parsed.status,
        },
    })
}

/// Strip a leading `---` front matter block.
#[must_use]
pub fn strip_front_matter(content: &str) -> &str {
    let Some(rest) = content.strip_prefix("---\n") else {
        return content;
    };
    rest.find("\n---")
        .map_or(content, |end| {
            let after = &rest[end + 4..];
            after.strip_prefix('\n').unwrap_or(after)
        })
}

/// Tracked ids of `path` that no longer occur anywhere in its body.
///
/// A task cached under another document moved there and is not deleted.
#[must_use]
pub fn find_deletions(content: &str, path: &str, cache: &CacheData) -> Vec<TaskId> {
    let Some(meta) = cache.file(path) else {
        return Vec::new();
    };
    let body = strip_front_matter(content).to_lowercase();
    meta.task_ids()
        .filter(|id| !body.contains(&id.as_str().to_lowercase()))
        .filter(|id| {
            cache
                .task(id)
                .and_then(|task| task.path.as_deref())
                .is_none_or(|cached_path| cached_path == path)
        })
        .cloned()
        .collect()
}

/// Tracked tasks of a document, with the item ids their cached copies know.
#[must_use]
pub fn tracked_tasks(content: &str, tag: &str, cache: &CacheData) -> Vec<TrackedTask> {
    let lines = split_lines(content);
    let mut seen = BTreeSet::new();
    let mut tracked = Vec::new();
    for (idx, text) in lines.iter().enumerate() {
        let parsed = parse_line(text, tag);
        if !parsed.is_tracked_task() {
            continue;
        }
        let Some(id) = parsed.embedded_task_id else {
            continue;
        };
        let Some(cached) = cache.task(&id) else {
            continue;
        };
        if !seen.insert(id.clone()) {
            continue;
        }
        let item_ids = item_lines(&lines, idx, tag)
            .into_iter()
            .filter_map(|line| parse_line(&lines[line], tag).embedded_item_id)
            .filter(|item| cached.item(item).is_some())
            .collect();
        tracked.push(TrackedTask {
            task_id: id,
            item_ids,
        });
    }
    tracked
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use super::*;
    use ticksync_core::{Project, ProjectId, TaskStatus};

    fn config() -> SyncConfig {
        SyncConfig {
            default_project_id: Some(ProjectId::new("inbox")),
            ..SyncConfig::default()
        }
    }

    fn cache_with(tasks: Vec<Task>, path: &str) -> CacheData {
        let mut cache = CacheData::default();
        cache.set_projects(&[Project {
            id: ProjectId::new("p-work"),
            name: "Work".into(),
        }]);
        for task in tasks {
            cache.append_task(task, path);
        }
        cache
    }

    fn cached(id: &str, title: &str) -> Task {
        let mut task = Task::new(TaskId::new(id), title);
        task.project_id = Some(ProjectId::new("inbox"));
        task
    }

    #[test]
    fn tagged_line_without_id_is_new() {
        let result = scan("- [ ] Buy milk #ticktick\n", "a.md", &CacheData::default(), &config());
        assert_eq!(result.new_tasks.len(), 1);
        let new = &result.new_tasks[0];
        assert_eq!(new.line, 0);
        assert_eq!(new.task.title, "Buy milk");
        assert!(new.task.id.is_unassigned());
        assert_eq!(new.task.project_id, Some(ProjectId::new("inbox")));
    }

    #[test]
    fn project_tag_sets_project_and_is_not_a_tag() {
        let cache = cache_with(Vec::new(), "a.md");
        let result = scan("- [ ] Report #work #urgent #ticktick", "a.md", &cache, &config());
        let task = &result.new_tasks[0].task;
        assert_eq!(task.project_id, Some(ProjectId::new("p-work")));
        assert_eq!(task.tags, BTreeSet::from(["urgent".to_owned()]));
    }

    #[test]
    fn new_task_collects_items_and_stamps_missing_ids() {
        let doc = "- [ ] Trip #ticktick\n\t- [ ] passport\n\t- [x] tickets %%abc%%";
        let result = scan(doc, "a.md", &CacheData::default(), &config());
        let new = &result.new_tasks[0];
        assert_eq!(new.task.items.len(), 2);
        assert_eq!(new.task.items[1].id, ItemId::new("abc"));
        assert_eq!(new.task.items[1].status, TaskStatus::Completed);
        assert_eq!(new.item_edits.len(), 1);
        assert_eq!(new.item_edits[0].line, 1);
        assert!(new.item_edits[0].replacement.ends_with(&format!("%%{}%%", new.task.items[0].id)));
    }

    #[test]
    fn unchanged_tracked_line_yields_nothing() {
        let cache = cache_with(vec![cached("t1", "Buy milk")], "a.md");
        let result = scan("- [ ] Buy milk #ticktick %%[ticktick_id:: t1]%%", "a.md", &cache, &config());
        assert!(result.is_empty(), "{result:?}");
    }

    #[test]
    fn edited_fields_are_reported() {
        let cache = cache_with(vec![cached("t1", "Buy milk")], "a.md");
        let doc = "- [x] Buy oat milk ⏫ #ticktick %%[ticktick_id:: t1]%%";
        let result = scan(doc, "a.md", &cache, &config());
        let modified = &result.modified_tasks[0];
        assert!(modified.changes.title);
        assert!(modified.changes.status);
        assert!(modified.changes.priority);
        assert!(!modified.changes.project);
        assert_eq!(modified.task.title, "Buy oat milk");
        assert_eq!(modified.task.status, TaskStatus::Completed);
    }

    #[test]
    fn unknown_id_is_orphaned() {
        let result = scan("- [ ] Stray #ticktick %%[ticktick_id:: zz]%%", "a.md", &CacheData::default(), &config());
        assert_eq!(result.orphaned.len(), 1);
        assert_eq!(result.orphaned[0].task_id, TaskId::new("zz"));
    }

    #[test]
    fn missing_tracked_id_is_deleted_only_from_its_own_document() {
        let cache = cache_with(vec![cached("t1", "Buy milk")], "a.md");
        assert_eq!(scan("nothing here", "a.md", &cache, &config()).deleted_task_ids, vec![TaskId::new("t1")]);

        let mut moved = cache.clone();
        moved.tasks.get_mut(&TaskId::new("t1")).unwrap().path = Some("b.md".into());
        assert!(scan("nothing here", "a.md", &moved, &config()).deleted_task_ids.is_empty());
    }

    #[test]
    fn id_inside_front_matter_does_not_count() {
        let cache = cache_with(vec![cached("t1", "Buy milk")], "a.md");
        let doc = "---\nref: t1\n---\n# body";
        assert_eq!(find_deletions(doc, "a.md", &cache), vec![TaskId::new("t1")]);
    }

    #[test]
    fn item_ops_follow_ids_not_text() {
        let mut parent = cached("t1", "Trip");
        parent.items = vec![
            ChecklistItem { id: ItemId::new("i1"), title: "same".into(), status: TaskStatus::Open },
            ChecklistItem { id: ItemId::new("i2"), title: "same".into(), status: TaskStatus::Open },
            ChecklistItem { id: ItemId::new("i3"), title: "edit me".into(), status: TaskStatus::Open },
        ];
        let cache = cache_with(vec![parent], "a.md");
        let doc = "- [ ] Trip #ticktick %%[ticktick_id:: t1]%%\n\
\t- [ ] same %%i2%%\n\
\t- [x] edited %%i3%%\n\
\t- [ ] brand new";
        let result = scan(doc, "a.md", &cache, &config());

        assert!(result.item_ops.contains(&ItemOp::Deleted {
            parent: TaskId::new("t1"),
            item_id: ItemId::new("i1"),
        }));
        assert!(result.item_ops.contains(&ItemOp::Modified {
            parent: TaskId::new("t1"),
            item: ChecklistItem { id: ItemId::new("i3"), title: "edited".into(), status: TaskStatus::Completed },
        }));
        let added = result
            .item_ops
            .iter()
            .find_map(|op| match op {
                ItemOp::Added { line, item, .. } => Some((*line, item.title.clone())),
                _ => None,
            })
            .unwrap();
        assert_eq!(added, (3, "brand new".to_owned()));
        assert_eq!(result.item_ops.len(), 3);
    }

    #[test]
    fn nested_tracked_task_resolves_parent() {
        let cache = cache_with(vec![cached("t1", "Trip"), cached("t2", "Pack")], "a.md");
        let doc = "- [ ] Trip #ticktick %%[ticktick_id:: t1]%%\n\t- [ ] Pack #ticktick %%[ticktick_id:: t2]%%";
        let result = scan(doc, "a.md", &cache, &config());
        let modified = &result.modified_tasks[0];
        assert_eq!(modified.task.id, TaskId::new("t2"));
        assert!(modified.changes.parent);
        assert_eq!(modified.task.parent_id, Some(TaskId::new("t1")));
    }

    #[test]
    fn empty_description_is_skipped() {
        let result = scan("- [ ] #ticktick", "a.md", &CacheData::default(), &config());
        assert!(result.new_tasks.is_empty());
    }

    #[test]
    fn tracked_tasks_lists_known_items_in_order() {
        let mut parent = cached("t1", "Trip");
        parent.items = vec![ChecklistItem { id: ItemId::new("i1"), title: "a".into(), status: TaskStatus::Open }];
        let cache = cache_with(vec![parent], "a.md");
        let doc = "- [ ] Trip #ticktick %%[ticktick_id:: t1]%%\n\t- [ ] a %%i1%%\n\t- [ ] b %%ghost%%";
        assert_eq!(tracked_tasks(doc, "#ticktick", &cache), vec![TrackedTask {
            task_id: TaskId::new("t1"),
            item_ids: vec![ItemId::new("i1")],
        }]);
    }
}
