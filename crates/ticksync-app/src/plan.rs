//! Id-set classification of remote state against the cache.

use std::collections::{BTreeMap, BTreeSet};

use ticksync_core::{DeletedTask, Task, TaskId};

/// What a remote pass should do with each task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemotePlan {
    /// Remote-only tasks to write into documents.
    pub pull_new: Vec<Task>,
    /// Cached tasks confirmed deleted remotely.
    pub delete_local: Vec<Task>,
    /// Remote copy is newer; overwrite document and cache.
    pub remote_newer: Vec<Task>,
    /// Cached copy is newer; push it remotely.
    pub local_newer: Vec<Task>,
    /// Cached tasks missing remotely without a deletion record; left alone.
    pub unconfirmed: Vec<TaskId>,
}

impl RemotePlan {
    /// Classify remote tasks, cached tasks and the deletion log.
    ///
    /// A missing modification time is older than any timestamp.
    #[must_use]
    pub fn classify(remote: Vec<Task>, cached: &[Task], deleted: &[DeletedTask]) -> Self {
        let deleted: BTreeSet<&TaskId> = deleted.iter().map(|entry| &entry.task_id).collect();
        let cached_by_id: BTreeMap<&TaskId, &Task> =
            cached.iter().map(|task| (&task.id, task)).collect();
        let remote_ids: BTreeSet<TaskId> = remote.iter().map(|task| task.id.clone()).collect();

        let mut plan = Self::default();
        for task in remote {
            match cached_by_id.get(&task.id) {
                None => plan.pull_new.push(task),
                Some(local) if task.modified_time > local.modified_time => {
                    plan.remote_newer.push(task);
                }
                Some(local) if task.modified_time < local.modified_time => {
                    plan.local_newer.push((*local).clone());
                }
                Some(_) => {}
            }
        }
        for task in cached.iter().filter(|task| !remote_ids.contains(&task.id)) {
            if deleted.contains(&task.id) {
                plan.delete_local.push(task.clone());
            } else {
                plan.unconfirmed.push(task.id.clone());
            }
        }
        plan
    }

    /// No task needs work.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.pull_new.is_empty()
            && self.delete_local.is_empty()
            && self.remote_newer.is_empty()
            && self.local_newer.is_empty()
    }
}
