//! Conversion between one line of Markdown and a task or checklist item.
//!
//! A task line is a list item with a checkbox:
//!
//! ```text
//! - [ ] Buy milk #groceries 🔼 📅 2024-05-01 #ticktick %%[ticktick_id:: 65a1f0c2]%%
//!     - [x] oat milk %%0190b0c4d2a07c3e8f4b5a6d7e8f9012%%
//! ```
//!
//! The task id and item id markers are Obsidian comments, so they never show
//! up in rendered previews. Every function here is pure and never fails: a
//! malformed marker is treated as absent.

use std::collections::BTreeSet;

use time::Date;
use time::macros::format_description;

use crate::{ChecklistItem, ItemId, Task, TaskId, TaskStatus};

/// Tag marking a line as tracked when no other tag is configured.
pub const DEFAULT_TAG: &str = "#ticktick";

/// No priority.
pub const PRIORITY_NONE: u8 = 0;
/// Low priority, rendered as `🔽`.
pub const PRIORITY_LOW: u8 = 1;
/// Medium priority, rendered as `🔼`.
pub const PRIORITY_MEDIUM: u8 = 3;
/// High priority, rendered as `⏫`.
pub const PRIORITY_HIGH: u8 = 5;

const TASK_ID_OPEN: &str = "%%[ticktick_id::";
const TASK_ID_CLOSE: &str = "]%%";
const COMMENT: &str = "%%";
const BACK_LINK_LABEL: &str = "ticksync";
const DUE_MARK: char = '📅';
const SPACES_PER_LEVEL: usize = 4;

/// Everything the parser extracts from one line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedLine {
    /// List item with a checkbox.
    pub is_task: bool,
    /// Indented task line without tag or task id.
    pub is_checklist_item: bool,
    /// Nesting depth; a tab or four spaces per level.
    pub indent_level: usize,
    /// Text with markers, tags, priority and due date removed.
    pub description: String,
    /// Checkbox state.
    pub status: TaskStatus,
    /// Priority, see the `PRIORITY_*` constants.
    pub priority: u8,
    /// Tags without `#`, lowercased, excluding the tracking tag.
    pub tags: BTreeSet<String>,
    /// Due date.
    pub due_date: Option<Date>,
    /// Carries the tracking tag.
    pub has_tag: bool,
    /// Remote task id from the id marker.
    pub embedded_task_id: Option<TaskId>,
    /// Checklist item id from the item marker.
    pub embedded_item_id: Option<ItemId>,
}

impl ParsedLine {
    /// Tagged task line that already carries a remote id.
    #[must_use]
    pub const fn is_tracked_task(&self) -> bool {
        self.is_task && self.has_tag && self.embedded_task_id.is_some()
    }

    /// Tagged task line without a remote id yet.
    #[must_use]
    pub const fn is_new_task(&self) -> bool {
        self.is_task && self.has_tag && self.embedded_task_id.is_none()
    }

    /// Task fields as they would be sent to the remote service.
    ///
    /// Project and parent are resolved by the caller, since they depend on
    /// the surrounding document and the cached project list.
    #[must_use]
    pub fn to_task(&self, id: TaskId) -> Task {
        let mut task = Task::new(id, self.description.clone());
        task.status = self.status;
        task.priority = self.priority;
        task.tags.clone_from(&self.tags);
        task.due_date = self.due_date;
        task
    }
}

/// Parse one line of document text.
#[must_use]
pub fn parse_line(text: &str, tag: &str) -> ParsedLine {
    let (indent_level, rest) = split_indent(text);
    let mut parsed = ParsedLine {
        indent_level,
        ..ParsedLine::default()
    };

    let Some((status, body)) = split_checkbox(rest) else {
        parsed.description = rest.trim().to_owned();
        return parsed;
    };
    parsed.is_task = true;
    parsed.status = status;

    let (body, task_id) = take_task_id(body);
    let body = strip_back_link(&body);
    let (body, item_id) = take_item_id(&body);
    parsed.embedded_task_id = task_id;
    parsed.embedded_item_id = item_id;

    let tag_lower = tag.trim_start_matches('#').to_lowercase();
    let mut words = Vec::new();
    let mut tokens = body.split_whitespace().peekable();
    while let Some(token) = tokens.next() {
        if let Some(name) = tag_name(token) {
            let name = name.to_lowercase();
            if name == tag_lower {
                parsed.has_tag = true;
            } else {
                parsed.tags.insert(name);
            }
            continue;
        }
        if let Some(priority) = priority_from_token(token) {
            parsed.priority = priority;
            continue;
        }
        if let Some(rest) = token.strip_prefix(DUE_MARK) {
            let value = if rest.is_empty() {
                tokens.peek().copied()
            } else {
                Some(rest)
            };
            if let Some(date) = value.and_then(parse_date) {
                if rest.is_empty() {
                    tokens.next();
                }
                parsed.due_date = Some(date);
                continue;
            }
        }
        words.push(token);
    }

    parsed.description = words.join(" ");
    parsed.is_checklist_item =
        parsed.indent_level > 0 && !parsed.has_tag && parsed.embedded_task_id.is_none();
    parsed
}

/// Append the task id marker unless the line already carries one.
#[must_use]
pub fn render_task_link(text: &str, id: &TaskId) -> String {
    if text.contains(TASK_ID_OPEN) {
        return text.to_owned();
    }
    format!("{} {TASK_ID_OPEN} {id}{TASK_ID_CLOSE}", text.trim_end())
}

/// Append the item id marker unless the line already carries one.
#[must_use]
pub fn render_item_link(text: &str, id: &ItemId) -> String {
    let (_, existing) = take_item_id(text);
    if existing.is_some() {
        return text.to_owned();
    }
    format!("{} {COMMENT}{id}{COMMENT}", text.trim_end())
}

/// Append a back-reference to the originating document, once.
#[must_use]
pub fn render_back_link(title: &str, locator: &str) -> String {
    if title.contains(&format!("]({locator})")) {
        return title.to_owned();
    }
    format!("{} [{BACK_LINK_LABEL}]({locator})", title.trim_end())
}

/// Remove a trailing back-reference added by [`render_back_link`].
#[must_use]
pub fn strip_back_link(title: &str) -> String {
    let needle = format!("[{BACK_LINK_LABEL}](");
    let Some(start) = title.rfind(&needle) else {
        return title.to_owned();
    };
    let after = &title[start + needle.len()..];
    let Some(close) = after.find(')') else {
        return title.to_owned();
    };
    let tail = &after[close + 1..];
    let mut out = title[..start].trim_end().to_owned();
    if !tail.trim().is_empty() {
        out.push(' ');
        out.push_str(tail.trim_start());
    }
    out
}

/// Collapse whitespace and drop the back-link and id markers from a remote title.
#[must_use]
pub fn normalize_title(title: &str) -> String {
    let (title, _) = take_task_id(&strip_back_link(title));
    let (title, _) = take_item_id(&title);
    title.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// The task as its canonical line reads back.
///
/// Tags, priority glyphs and due dates written inside a remote title are
/// grammar on a document line, so they move into the matching fields. A task
/// passed through here survives [`render_task_line`] and [`parse_line`]
/// unchanged.
#[must_use]
pub fn canonical_task(task: &Task, tag: &str) -> Task {
    let parsed = parse_line(&render_task_line(task, 0, tag), tag);
    let mut canonical = task.clone();
    canonical.title = parsed.description;
    canonical.tags = parsed.tags;
    canonical.priority = parsed.priority;
    canonical.due_date = parsed.due_date;
    for item in &mut canonical.items {
        item.title = parse_line(&render_item_line(item, 1), tag).description;
    }
    canonical
}

/// Add the tracking tag to a task line that lacks it.
#[must_use]
pub fn render_tag(text: &str, tag: &str) -> String {
    if parse_line(text, tag).has_tag {
        return text.to_owned();
    }
    let (body, id) = take_task_id(text);
    let mut out = format!("{} {tag}", body.trim_end());
    if let Some(id) = id {
        out = render_task_link(&out, &id);
    }
    out
}

/// Rewrite only the checkbox of a task line. Non-task lines are returned as is.
#[must_use]
pub fn with_status(text: &str, status: TaskStatus) -> String {
    let (_, rest) = split_indent(text);
    if split_checkbox(rest).is_none() {
        return text.to_owned();
    }
    let offset = text.len() - rest.len();
    // list marker + space + '['
    let mark_at = offset + 3;
    let mut out = String::with_capacity(text.len());
    out.push_str(&text[..mark_at]);
    out.push(status.checkbox());
    if let Some(after) = text.get(mark_at..).and_then(|s| s.char_indices().nth(1)) {
        out.push_str(&text[mark_at + after.0..]);
    }
    out
}

/// Canonical line for a task pulled from the remote side.
///
/// Re-parsing the result yields the task's title, status, priority, tags,
/// due date and id.
#[must_use]
pub fn render_task_line(task: &Task, indent_level: usize, tag: &str) -> String {
    let mut line = format!(
        "{}- [{}] {}",
        "\t".repeat(indent_level),
        task.status.checkbox(),
        normalize_title(&task.title)
    );
    for name in &task.tags {
        line.push_str(" #");
        line.push_str(name);
    }
    if let Some(mark) = priority_mark(task.priority) {
        line.push(' ');
        line.push(mark);
    }
    if let Some(date) = task.due_date.and_then(format_date) {
        line.push(' ');
        line.push(DUE_MARK);
        line.push(' ');
        line.push_str(&date);
    }
    line.push(' ');
    line.push_str(tag);
    render_task_link(&line, &task.id)
}

/// Canonical line for a checklist item.
#[must_use]
pub fn render_item_line(item: &ChecklistItem, indent_level: usize) -> String {
    let line = format!(
        "{}- [{}] {}",
        "\t".repeat(indent_level),
        item.status.checkbox(),
        normalize_title(&item.title)
    );
    render_item_link(&line, &item.id)
}

/// Read the task id marker of a line without parsing the rest.
#[must_use]
pub fn task_id_of(text: &str) -> Option<TaskId> {
    take_task_id(text).1
}

/// Snap a remote priority onto the values the line grammar can express.
#[must_use]
pub const fn normalize_priority(priority: u8) -> u8 {
    match priority {
        PRIORITY_NONE => PRIORITY_NONE,
        1..=2 => PRIORITY_LOW,
        3..=4 => PRIORITY_MEDIUM,
        _ => PRIORITY_HIGH,
    }
}

/// Nesting depth of a line, whether or not it is a task.
#[must_use]
pub fn indent_level(text: &str) -> usize {
    split_indent(text).0
}

fn split_indent(text: &str) -> (usize, &str) {
    let mut columns = 0usize;
    let mut consumed = 0usize;
    for (idx, ch) in text.char_indices() {
        match ch {
            '\t' => columns += SPACES_PER_LEVEL,
            ' ' => columns += 1,
            _ => {
                consumed = idx;
                break;
            }
        }
        consumed = idx + ch.len_utf8();
    }
    (columns.div_ceil(SPACES_PER_LEVEL), &text[consumed..])
}

fn split_checkbox(rest: &str) -> Option<(TaskStatus, &str)> {
    let mut chars = rest.chars();
    let marker = chars.next()?;
    if !matches!(marker, '-' | '*' | '+') || chars.next()? != ' ' || chars.next()? != '[' {
        return None;
    }
    let mark = chars.next()?;
    let status = TaskStatus::from_checkbox(mark)?;
    if chars.next()? != ']' {
        return None;
    }
    let consumed = 4 + mark.len_utf8();
    let body = &rest[consumed..];
    if body.is_empty() {
        return Some((status, body));
    }
    body.strip_prefix(' ').map(|body| (status, body))
}

fn take_task_id(text: &str) -> (String, Option<TaskId>) {
    let Some(start) = text.find(TASK_ID_OPEN) else {
        return (text.to_owned(), None);
    };
    let value_start = start + TASK_ID_OPEN.len();
    let Some(len) = text[value_start..].find(TASK_ID_CLOSE) else {
        return (text.to_owned(), None);
    };
    let value = text[value_start..value_start + len].trim();
    if value.is_empty() || value.contains(char::is_whitespace) {
        return (text.to_owned(), None);
    }
    let end = value_start + len + TASK_ID_CLOSE.len();
    let mut stripped = text[..start].trim_end().to_owned();
    let tail = text[end..].trim();
    if !tail.is_empty() {
        stripped.push(' ');
        stripped.push_str(tail);
    }
    (stripped, Some(TaskId::new(value)))
}

fn take_item_id(text: &str) -> (String, Option<ItemId>) {
    let mut search_from = 0usize;
    while let Some(found) = text[search_from..].find(COMMENT) {
        let open = search_from + found;
        let inner_start = open + COMMENT.len();
        let Some(len) = text[inner_start..].find(COMMENT) else {
            break;
        };
        let token = &text[inner_start..inner_start + len];
        if ItemId::is_valid_token(token) {
            let end = inner_start + len + COMMENT.len();
            let mut stripped = text[..open].trim_end().to_owned();
            let tail = text[end..].trim();
            if !tail.is_empty() {
                stripped.push(' ');
                stripped.push_str(tail);
            }
            return (stripped, Some(ItemId::new(token)));
        }
        search_from = inner_start;
    }
    (text.to_owned(), None)
}

fn tag_name(token: &str) -> Option<&str> {
    let name = token.strip_prefix('#')?;
    let first = name.chars().next()?;
    if first == '#' || first.is_whitespace() {
        return None;
    }
    Some(name)
}

fn priority_from_token(token: &str) -> Option<u8> {
    match token {
        "⏫" => Some(PRIORITY_HIGH),
        "🔼" => Some(PRIORITY_MEDIUM),
        "🔽" => Some(PRIORITY_LOW),
        _ => None,
    }
}

const fn priority_mark(priority: u8) -> Option<char> {
    match priority {
        PRIORITY_NONE => None,
        1..=2 => Some('🔽'),
        3..=4 => Some('🔼'),
        _ => Some('⏫'),
    }
}

fn parse_date(value: &str) -> Option<Date> {
    Date::parse(value, format_description!("[year]-[month]-[day]")).ok()
}

fn format_date(date: Date) -> Option<String> {
    date.format(format_description!("[year]-[month]-[day]")).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn plain_text_is_not_a_task() {
        let parsed = parse_line("just some prose #ticktick", DEFAULT_TAG);
        assert!(!parsed.is_task);
        assert!(!parsed.has_tag);
    }

    #[test]
    fn new_tagged_task_has_no_id() {
        let parsed = parse_line("- [ ] Buy milk #ticktick", DEFAULT_TAG);
        assert!(parsed.is_new_task());
        assert_eq!(parsed.description, "Buy milk");
        assert_eq!(parsed.status, TaskStatus::Open);
        assert!(parsed.tags.is_empty());
    }

    #[test]
    fn tracked_task_extracts_every_field() {
        let line = "- [x] Buy milk #Groceries ⏫ 📅 2024-05-01 #TickTick %%[ticktick_id:: 65a1f0c2]%%";
        let parsed = parse_line(line, DEFAULT_TAG);
        assert!(parsed.is_tracked_task());
        assert_eq!(parsed.embedded_task_id, Some(TaskId::new("65a1f0c2")));
        assert_eq!(parsed.status, TaskStatus::Completed);
        assert_eq!(parsed.priority, PRIORITY_HIGH);
        assert_eq!(parsed.due_date, Some(date!(2024 - 05 - 01)));
        assert_eq!(parsed.tags, BTreeSet::from(["groceries".to_owned()]));
        assert_eq!(parsed.description, "Buy milk");
    }

    #[test]
    fn malformed_markers_degrade_to_absent() {
        let parsed = parse_line("- [ ] Buy milk #ticktick %%[ticktick_id:: ", DEFAULT_TAG);
        assert!(parsed.embedded_task_id.is_none());
        let parsed = parse_line("- [ ] Buy milk 📅 someday", DEFAULT_TAG);
        assert!(parsed.due_date.is_none());
        assert_eq!(parsed.description, "Buy milk 📅 someday");
    }

    #[test]
    fn indented_untagged_task_is_checklist_item() {
        let parsed = parse_line("\t- [ ] oat milk %%0190b0c4d2a0%%", DEFAULT_TAG);
        assert!(parsed.is_checklist_item);
        assert_eq!(parsed.indent_level, 1);
        assert_eq!(parsed.embedded_item_id, Some(ItemId::new("0190b0c4d2a0")));
        assert_eq!(parsed.description, "oat milk");
    }

    #[test]
    fn space_indentation_counts_levels() {
        assert_eq!(parse_line("    - [ ] a", DEFAULT_TAG).indent_level, 1);
        assert_eq!(parse_line("  - [ ] a", DEFAULT_TAG).indent_level, 1);
        assert_eq!(parse_line("\t\t- [ ] a", DEFAULT_TAG).indent_level, 2);
        assert_eq!(parse_line("- [ ] a", DEFAULT_TAG).indent_level, 0);
    }

    #[test]
    fn indented_tagged_task_is_not_checklist_item() {
        let parsed = parse_line("\t- [ ] subtask #ticktick", DEFAULT_TAG);
        assert!(!parsed.is_checklist_item);
        assert!(parsed.is_new_task());
    }

    #[test]
    fn custom_tag_is_respected() {
        let parsed = parse_line("- [ ] Buy milk #sync #ticktick", "#sync");
        assert!(parsed.has_tag);
        assert!(parsed.tags.contains("ticktick"));
    }

    #[test]
    fn render_task_link_is_idempotent() {
        let id = TaskId::new("abc");
        let once = render_task_link("- [ ] Buy milk #ticktick", &id);
        assert_eq!(once, "- [ ] Buy milk #ticktick %%[ticktick_id:: abc]%%");
        assert_eq!(render_task_link(&once, &id), once);
    }

    #[test]
    fn render_item_link_is_idempotent() {
        let id = ItemId::new("0190b0c4");
        let once = render_item_link("\t- [ ] oat milk", &id);
        assert_eq!(once, "\t- [ ] oat milk %%0190b0c4%%");
        assert_eq!(render_item_link(&once, &id), once);
    }

    #[test]
    fn back_link_round_trip() {
        let linked = render_back_link("Buy milk", "obsidian://open?file=a.md");
        assert_eq!(linked, "Buy milk [ticksync](obsidian://open?file=a.md)");
        assert_eq!(render_back_link(&linked, "obsidian://open?file=a.md"), linked);
        assert_eq!(strip_back_link(&linked), "Buy milk");
        assert_eq!(strip_back_link("Buy milk"), "Buy milk");
    }

    #[test]
    fn with_status_rewrites_checkbox_only() {
        let line = "\t- [ ] Buy milk #ticktick %%[ticktick_id:: abc]%%";
        assert_eq!(
            with_status(line, TaskStatus::Completed),
            "\t- [x] Buy milk #ticktick %%[ticktick_id:: abc]%%"
        );
        assert_eq!(with_status("not a task", TaskStatus::Completed), "not a task");
    }

    #[test]
    fn render_tag_keeps_id_marker_last() {
        assert_eq!(
            render_tag("- [ ] Buy milk", DEFAULT_TAG),
            "- [ ] Buy milk #ticktick"
        );
        assert_eq!(
            render_tag("- [ ] Buy milk #ticktick", DEFAULT_TAG),
            "- [ ] Buy milk #ticktick"
        );
    }

    #[test]
    fn rendered_task_line_parses_back_to_same_fields() {
        let mut task = Task::new(TaskId::new("r1"), "Call   mom [ticksync](obsidian://x)");
        task.status = TaskStatus::Completed;
        task.priority = PRIORITY_MEDIUM;
        task.tags.insert("family".into());
        task.due_date = Some(date!(2024 - 06 - 30));

        let line = render_task_line(&task, 0, DEFAULT_TAG);
        let parsed = parse_line(&line, DEFAULT_TAG);
        assert!(parsed.is_tracked_task());
        assert_eq!(parsed.embedded_task_id, Some(TaskId::new("r1")));
        assert_eq!(parsed.description, "Call mom");
        assert_eq!(parsed.status, TaskStatus::Completed);
        assert_eq!(parsed.priority, PRIORITY_MEDIUM);
        assert_eq!(parsed.tags, task.tags);
        assert_eq!(parsed.due_date, task.due_date);
    }

    #[test]
    fn grammar_in_remote_title_moves_into_fields() {
        let mut task = Task::new(TaskId::new("t1"), "Fix #123 crash ⏫ %%[ticktick_id:: zz]%%");
        task.tags.insert("work".into());

        let canonical = canonical_task(&task, DEFAULT_TAG);
        assert_eq!(canonical.title, "Fix crash");
        assert_eq!(
            canonical.tags,
            BTreeSet::from(["123".to_owned(), "work".to_owned()])
        );
        assert_eq!(canonical.priority, PRIORITY_HIGH);

        let parsed = parse_line(&render_task_line(&canonical, 0, DEFAULT_TAG), DEFAULT_TAG);
        assert_eq!(parsed.embedded_task_id, Some(TaskId::new("t1")));
        assert_eq!(parsed.description, canonical.title);
        assert_eq!(parsed.tags, canonical.tags);
        assert_eq!(parsed.priority, canonical.priority);
    }

    #[test]
    fn rendered_item_line_parses_back() {
        let item = ChecklistItem {
            id: ItemId::new("0190abcd"),
            title: "oat milk".into(),
            status: TaskStatus::Completed,
        };
        let parsed = parse_line(&render_item_line(&item, 1), DEFAULT_TAG);
        assert!(parsed.is_checklist_item);
        assert_eq!(parsed.embedded_item_id, Some(item.id));
        assert_eq!(parsed.description, "oat milk");
        assert_eq!(parsed.status, TaskStatus::Completed);
    }

    #[test]
    fn priorities_snap_to_renderable_values() {
        assert_eq!(normalize_priority(0), PRIORITY_NONE);
        assert_eq!(normalize_priority(2), PRIORITY_LOW);
        assert_eq!(normalize_priority(4), PRIORITY_MEDIUM);
        assert_eq!(normalize_priority(9), PRIORITY_HIGH);
    }

    #[test]
    fn empty_checkbox_line_is_task_with_empty_description() {
        let parsed = parse_line("\t- [ ]", DEFAULT_TAG);
        assert!(parsed.is_task);
        assert!(parsed.description.is_empty());
    }
}
