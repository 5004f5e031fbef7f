//! Text edits applied to whole documents.
//!
//! Everything here works on the document as a list of lines split on `\n`,
//! so joining the lines back restores the original text byte for byte.

use ticksync_core::line::{
    indent_level, parse_line, render_item_line, render_tag, render_task_line, task_id_of,
    with_status,
};
use ticksync_core::{Task, TaskId, TaskStatus};

/// Replacement of one line, located again by content if the index went stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineEdit {
    /// Line index at scan time.
    pub line: usize,
    /// Text the line had at scan time.
    pub original: String,
    /// New text.
    pub replacement: String,
}

impl LineEdit {
    /// Edit replacing `original` at `line`.
    pub fn new(line: usize, original: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self {
            line,
            original: original.into(),
            replacement: replacement.into(),
        }
    }
}

/// Split a document into lines.
#[must_use]
pub fn split_lines(content: &str) -> Vec<String> {
    content.split('\n').map(str::to_owned).collect()
}

/// Apply edits and return the new text with the number of edits applied.
///
/// An edit whose line no longer holds `original` is applied to the first line
/// that does; an edit whose original text vanished is dropped.
#[must_use]
pub fn apply_edits(content: &str, edits: &[LineEdit]) -> (String, usize) {
    let mut lines = split_lines(content);
    let mut applied = 0;
    for edit in edits {
        let target = if lines.get(edit.line) == Some(&edit.original) {
            Some(edit.line)
        } else {
            lines.iter().position(|line| line == &edit.original)
        };
        if let Some(idx) = target {
            lines[idx].clone_from(&edit.replacement);
            applied += 1;
        }
    }
    (lines.join("\n"), applied)
}

/// Index of the line carrying `id`'s marker.
#[must_use]
pub fn find_task_line(lines: &[String], id: &TaskId) -> Option<usize> {
    lines
        .iter()
        .position(|line| task_id_of(line).as_ref() == Some(id))
}

/// Index just past the lines nested under `start`.
#[must_use]
pub fn block_end(lines: &[String], start: usize) -> usize {
    let Some(first) = lines.get(start) else {
        return start;
    };
    let indent = indent_level(first);
    let mut end = start + 1;
    while let Some(line) = lines.get(end) {
        if line.trim().is_empty() || indent_level(line) <= indent {
            break;
        }
        end += 1;
    }
    end
}

/// Checklist item lines belonging to the task at `start`.
///
/// Items under a nested tagged task belong to that task and are skipped.
#[must_use]
pub fn item_lines(lines: &[String], start: usize, tag: &str) -> Vec<usize> {
    let end = block_end(lines, start);
    let mut found = Vec::new();
    let mut idx = start + 1;
    while idx < end {
        let parsed = parse_line(&lines[idx], tag);
        if parsed.is_task && parsed.has_tag {
            idx = block_end(lines, idx);
            continue;
        }
        if parsed.is_checklist_item {
            found.push(idx);
        }
        idx += 1;
    }
    found
}

/// Nearest tagged task line above `idx` with a smaller indent.
///
/// Untagged task lines are stepped over; any other line ends the search.
#[must_use]
pub fn parent_of(lines: &[String], idx: usize, tag: &str) -> Option<usize> {
    let indent = indent_level(lines.get(idx)?);
    if indent == 0 {
        return None;
    }
    for candidate in (0..idx).rev() {
        let parsed = parse_line(&lines[candidate], tag);
        if !parsed.is_task {
            return None;
        }
        if parsed.indent_level < indent && parsed.has_tag {
            return Some(candidate);
        }
    }
    None
}

fn render_block(task: &Task, indent: usize, tag: &str) -> Vec<String> {
    let mut block = Vec::with_capacity(task.items.len() + 1);
    block.push(render_task_line(task, indent, tag));
    block.extend(
        task.items
            .iter()
            .map(|item| render_item_line(item, indent + 1)),
    );
    block
}

/// Insert a task pulled from the remote side.
///
/// A task whose parent line is present goes at the end of the parent's block,
/// one level deeper. Anything else is appended to the document.
#[must_use]
pub fn insert_task(content: &str, task: &Task, tag: &str) -> String {
    let mut lines = split_lines(content);
    let parent = task
        .parent_id
        .as_ref()
        .and_then(|parent| find_task_line(&lines, parent));
    let (at, indent) = match parent {
        Some(idx) => (block_end(&lines, idx), indent_level(&lines[idx]) + 1),
        None => {
            let at = if lines.last().is_some_and(String::is_empty) {
                lines.len() - 1
            } else {
                lines.len()
            };
            (at, 0)
        }
    };
    let at = at.min(lines.len());
    lines.splice(at..at, render_block(task, indent, tag));
    lines.join("\n")
}

/// Rewrite a task's line and checklist items, keeping its indent.
///
/// Returns `None` when the task is not in the document.
#[must_use]
pub fn replace_task_block(content: &str, task: &Task, tag: &str) -> Option<String> {
    let lines = split_lines(content);
    let idx = find_task_line(&lines, &task.id)?;
    let items = item_lines(&lines, idx, tag);
    let indent = indent_level(&lines[idx]);

    let mut out = Vec::with_capacity(lines.len() + task.items.len());
    out.extend_from_slice(&lines[..idx]);
    out.extend(render_block(task, indent, tag));
    out.extend(
        lines
            .iter()
            .enumerate()
            .skip(idx + 1)
            .filter(|(i, _)| !items.contains(i))
            .map(|(_, line)| line.clone()),
    );
    Some(out.join("\n"))
}

/// Remove a task's line and its checklist items. Nested tagged tasks stay.
#[must_use]
pub fn remove_task_block(content: &str, id: &TaskId, tag: &str) -> Option<String> {
    let lines = split_lines(content);
    let idx = find_task_line(&lines, id)?;
    let items = item_lines(&lines, idx, tag);
    let kept: Vec<&str> = lines
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != idx && !items.contains(i))
        .map(|(_, line)| line.as_str())
        .collect();
    Some(kept.join("\n"))
}

/// Rewrite the checkbox of a task's line.
#[must_use]
pub fn set_task_status(content: &str, id: &TaskId, status: TaskStatus) -> Option<String> {
    let mut lines = split_lines(content);
    let idx = find_task_line(&lines, id)?;
    lines[idx] = with_status(&lines[idx], status);
    Some(lines.join("\n"))
}

/// Add the tracking tag to top-level task lines lacking it.
#[must_use]
pub fn tag_untagged_tasks(content: &str, tag: &str) -> Vec<LineEdit> {
    content
        .split('\n')
        .enumerate()
        .filter_map(|(idx, line)| {
            let parsed = parse_line(line, tag);
            let untagged =
                parsed.is_task && !parsed.has_tag && parsed.indent_level == 0;
            (untagged && !parsed.description.is_empty())
                .then(|| LineEdit::new(idx, line, render_tag(line, tag)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use super::*;
    use ticksync_core::line::DEFAULT_TAG;
    use ticksync_core::{ChecklistItem, ItemId};

    const DOC: &str = "# Shopping\n\
- [ ] Buy milk #ticktick %%[ticktick_id:: t1]%%\n\
\t- [ ] oat %%i1%%\n\
\t- [ ] Nested #ticktick %%[ticktick_id:: t2]%%\n\
\t\t- [ ] nested item %%i2%%\n\
\t- [x] soy %%i3%%\n\
- [ ] Other #ticktick %%[ticktick_id:: t3]%%\n";

    fn lines() -> Vec<String> {
        split_lines(DOC)
    }

    #[test]
    fn split_and_join_preserve_text() {
        assert_eq!(lines().join("\n"), DOC);
    }

    #[test]
    fn item_lines_skip_nested_task_items() {
        let lines = lines();
        assert_eq!(item_lines(&lines, 1, DEFAULT_TAG), vec![2, 5]);
        assert_eq!(item_lines(&lines, 3, DEFAULT_TAG), vec![4]);
        assert!(item_lines(&lines, 6, DEFAULT_TAG).is_empty());
    }

    #[test]
    fn parent_of_finds_nearest_tagged_ancestor() {
        let lines = lines();
        assert_eq!(parent_of(&lines, 2, DEFAULT_TAG), Some(1));
        assert_eq!(parent_of(&lines, 4, DEFAULT_TAG), Some(3));
        assert_eq!(parent_of(&lines, 5, DEFAULT_TAG), Some(1));
        assert_eq!(parent_of(&lines, 6, DEFAULT_TAG), None);
    }

    #[test]
    fn parent_search_stops_at_prose() {
        let lines = split_lines("- [ ] A #ticktick\nsome text\n\t- [ ] item");
        assert_eq!(parent_of(&lines, 2, DEFAULT_TAG), None);
    }

    #[test]
    fn apply_edits_relocates_shifted_lines() {
        let content = "intro\n- [ ] Buy milk #ticktick";
        let edit = LineEdit::new(0, "- [ ] Buy milk #ticktick", "- [ ] Buy milk #ticktick %%[ticktick_id:: a]%%");
        let (out, applied) = apply_edits(content, &[edit]);
        assert_eq!(applied, 1);
        assert_eq!(out, "intro\n- [ ] Buy milk #ticktick %%[ticktick_id:: a]%%");

        let stale = LineEdit::new(0, "gone", "x");
        assert_eq!(apply_edits(content, &[stale]), (content.to_owned(), 0));
    }

    #[test]
    fn insert_task_appends_before_trailing_newline() {
        let task = Task::new(TaskId::new("r1"), "Call mom");
        let out = insert_task("# Inbox\n", &task, DEFAULT_TAG);
        assert_eq!(out, "# Inbox\n- [ ] Call mom #ticktick %%[ticktick_id:: r1]%%\n");

        let out = insert_task("", &task, DEFAULT_TAG);
        assert_eq!(out, "- [ ] Call mom #ticktick %%[ticktick_id:: r1]%%\n");
    }

    #[test]
    fn insert_task_nests_under_parent_block() {
        let mut task = Task::new(TaskId::new("r1"), "Sub");
        task.parent_id = Some(TaskId::new("t1"));
        task.items.push(ChecklistItem {
            id: ItemId::new("i9"),
            title: "step".into(),
            status: TaskStatus::Open,
        });
        let out = split_lines(&insert_task(DOC, &task, DEFAULT_TAG));
        assert_eq!(out[6], "\t- [ ] Sub #ticktick %%[ticktick_id:: r1]%%");
        assert_eq!(out[7], "\t\t- [ ] step %%i9%%");
        assert_eq!(out[8], "- [ ] Other #ticktick %%[ticktick_id:: t3]%%");
    }

    #[test]
    fn replace_task_block_rewrites_line_and_items_only() {
        let mut task = Task::new(TaskId::new("t1"), "Buy oat milk");
        task.items.push(ChecklistItem {
            id: ItemId::new("i1"),
            title: "oat".into(),
            status: TaskStatus::Completed,
        });
        let out = replace_task_block(DOC, &task, DEFAULT_TAG).expect("task is present");
        let out = split_lines(&out);
        assert_eq!(out[1], "- [ ] Buy oat milk #ticktick %%[ticktick_id:: t1]%%");
        assert_eq!(out[2], "\t- [x] oat %%i1%%");
        assert_eq!(out[3], "\t- [ ] Nested #ticktick %%[ticktick_id:: t2]%%");
        assert!(!out.iter().any(|line| line.contains("soy")));
        assert!(replace_task_block(DOC, &Task::new(TaskId::new("zz"), "x"), DEFAULT_TAG).is_none());
    }

    #[test]
    fn remove_task_block_keeps_nested_tasks() {
        let out = remove_task_block(DOC, &TaskId::new("t1"), DEFAULT_TAG).expect("task is present");
        assert!(!out.contains("t1"));
        assert!(!out.contains("oat"));
        assert!(out.contains("Nested"));
        assert!(out.contains("nested item"));
    }

    #[test]
    fn set_task_status_touches_only_checkbox() {
        let out = set_task_status(DOC, &TaskId::new("t3"), TaskStatus::Completed).expect("task is present");
        assert!(out.contains("- [x] Other #ticktick %%[ticktick_id:: t3]%%"));
    }

    #[test]
    fn tag_untagged_tasks_only_top_level() {
        let edits = tag_untagged_tasks("- [ ] a\n\t- [ ] b\n- [ ] c #ticktick\n- [ ]", DEFAULT_TAG);
        assert_eq!(edits, vec![LineEdit::new(0, "- [ ] a", "- [ ] a #ticktick")]);
    }
}
