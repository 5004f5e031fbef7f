//! Domain types for ticksync: remote tasks, checklist items and the line
//! grammar that embeds them in Markdown documents.

/// Identifier types.
pub mod id;
/// Line parser and the identity markers embedded in document text.
pub mod line;

pub use crate::id::{ItemId, ProjectId, TaskId};

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use time::{Date, OffsetDateTime};

/// Completion state shared by tasks and checklist items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskStatus {
    /// Not done yet.
    #[default]
    Open,
    /// Done.
    Completed,
    /// Closed without being done.
    WontDo,
}

impl TaskStatus {
    /// Returns true for any closed variant.
    #[must_use]
    pub const fn is_closed(self) -> bool {
        !matches!(self, Self::Open)
    }

    /// Character rendered between the checkbox brackets.
    #[must_use]
    pub const fn checkbox(self) -> char {
        match self {
            Self::Open => ' ',
            Self::Completed => 'x',
            Self::WontDo => '-',
        }
    }

    /// Parse the character between checkbox brackets.
    #[must_use]
    pub const fn from_checkbox(mark: char) -> Option<Self> {
        match mark {
            ' ' => Some(Self::Open),
            'x' | 'X' => Some(Self::Completed),
            '-' => Some(Self::WontDo),
            _ => None,
        }
    }
}

/// Nested item stored inside its parent task's body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistItem {
    /// Locally generated identifier.
    pub id: ItemId,
    /// Item text.
    pub title: String,
    /// Completion state.
    #[serde(default)]
    pub status: TaskStatus,
}

impl ChecklistItem {
    /// Create an item with a freshly generated id.
    pub fn new(title: impl Into<String>, status: TaskStatus) -> Self {
        Self {
            id: ItemId::generate(),
            title: title.into(),
            status,
        }
    }
}

/// Remote-identified unit of work, as last agreed between document and remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Remote identifier.
    pub id: TaskId,
    /// User-visible title without the back-link.
    pub title: String,
    /// Owning project.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<ProjectId>,
    /// Parent task, when nested under another tracked task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<TaskId>,
    /// Completion state.
    #[serde(default)]
    pub status: TaskStatus,
    /// 0 none, 1 low, 3 medium, 5 high.
    #[serde(default)]
    pub priority: u8,
    /// Tags without the leading `#`.
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Due date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<Date>,
    /// Last modification time reported by the remote service.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub modified_time: Option<OffsetDateTime>,
    /// Checklist items, in document order.
    #[serde(default)]
    pub items: Vec<ChecklistItem>,
    /// Document last known to contain the task. Never sent remotely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Task {
    /// Create an open task with no optional fields set.
    pub fn new(id: TaskId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            project_id: None,
            parent_id: None,
            status: TaskStatus::Open,
            priority: 0,
            tags: BTreeSet::new(),
            due_date: None,
            modified_time: None,
            items: Vec::new(),
            path: None,
        }
    }

    /// Copy of the task suitable for the remote service: no cache-local path,
    /// title carrying the optional back-link.
    #[must_use]
    pub fn for_remote(&self, locator: Option<&str>) -> Self {
        let mut remote = self.clone();
        remote.path = None;
        if let Some(locator) = locator {
            remote.title = line::render_back_link(&self.title, locator);
        }
        remote
    }

    /// Look up a checklist item by id.
    #[must_use]
    pub fn item(&self, id: &ItemId) -> Option<&ChecklistItem> {
        self.items.iter().find(|item| &item.id == id)
    }

    /// Mutable lookup of a checklist item by id.
    pub fn item_mut(&mut self, id: &ItemId) -> Option<&mut ChecklistItem> {
        self.items.iter_mut().find(|item| &item.id == id)
    }

    /// Copy the fields flagged in `changes` from `source`.
    pub fn apply_changes(&mut self, source: &Self, changes: TaskChanges) {
        if changes.title {
            self.title.clone_from(&source.title);
        }
        if changes.tags {
            self.tags.clone_from(&source.tags);
        }
        if changes.project {
            self.project_id.clone_from(&source.project_id);
        }
        if changes.due_date {
            self.due_date = source.due_date;
        }
        if changes.parent {
            self.parent_id.clone_from(&source.parent_id);
        }
        if changes.priority {
            self.priority = source.priority;
        }
        if changes.status {
            self.status = source.status;
        }
    }
}

/// Field-level difference between a task read from a document and its cached copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct TaskChanges {
    /// Title differs.
    pub title: bool,
    /// Tag set differs.
    pub tags: bool,
    /// Project differs.
    pub project: bool,
    /// Due date differs.
    pub due_date: bool,
    /// Parent differs.
    pub parent: bool,
    /// Priority differs.
    pub priority: bool,
    /// Completion state differs.
    pub status: bool,
}

impl TaskChanges {
    /// Compare `local` (freshly parsed) against `cached`.
    #[must_use]
    pub fn between(local: &Task, cached: &Task) -> Self {
        Self {
            title: local.title.trim() != cached.title.trim(),
            tags: local.tags != cached.tags,
            project: local.project_id != cached.project_id,
            due_date: local.due_date != cached.due_date,
            parent: local.parent_id != cached.parent_id,
            priority: local.priority != cached.priority,
            status: local.status != cached.status,
        }
    }

    /// No field differs.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        !self.content_changed() && !self.status
    }

    /// Any field other than status differs; these go through `update_task`.
    #[must_use]
    pub const fn content_changed(&self) -> bool {
        self.title || self.tags || self.project || self.due_date || self.parent || self.priority
    }

    /// Short human-readable summary used in notices.
    #[must_use]
    pub fn describe(&self) -> String {
        let parts = [
            (self.title, "Content was changed."),
            (self.status, "Status was changed."),
            (self.due_date, "Due date was changed."),
            (self.tags, "Tags were changed."),
            (self.project, "Project was changed."),
            (self.parent, "Parent was changed."),
            (self.priority, "Priority was changed."),
        ];
        parts
            .iter()
            .filter(|(flag, _)| *flag)
            .map(|(_, text)| *text)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Remote project (task list).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Remote identifier.
    pub id: ProjectId,
    /// Display name.
    pub name: String,
}

/// Entry of the remote deletion log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedTask {
    /// Deleted task.
    pub task_id: TaskId,
    /// Project the task belonged to.
    #[serde(default)]
    pub project_id: Option<ProjectId>,
}
