// SPDX-License-Identifier: AGPL-3.0-only

//! A hash-bucketed collection of tasks, keyed by name.
//!
//! The original C `tsd_tset` chains tasks by the first byte of their
//! hash across a fixed 256-bucket array and supports look-ahead-safe
//! iteration so a caller can delete the current task mid-walk. A
//! `HashMap` gets the same O(1) lookup without hand-rolled chaining;
//! look-ahead safety is recovered by snapshotting the key list before
//! iterating, so a callback may freely remove entries from the set.

use {super::{state::State, task::Task}, tsdfx_hash::TaskName, std::collections::HashMap};

/// A named collection of tasks with a running-child counter, per §3
/// "Task set".
#[derive(Default)]
pub struct TaskSet
{
    tasks: HashMap<TaskName, Task>,
    nrunning: usize,
}

/// Failure inserting into a [`TaskSet`].
#[derive(Debug, thiserror::Error)]
#[error("duplicate task name")]
pub struct DuplicateName;

impl TaskSet
{
    /// An empty set.
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Number of tasks currently running, mirrored by every owning queue's
    /// own counter per the universal invariant.
    pub fn nrunning(&self) -> usize
    {
        self.nrunning
    }

    /// Total number of tasks held.
    pub fn len(&self) -> usize
    {
        self.tasks.len()
    }

    /// Whether the set holds no tasks.
    pub fn is_empty(&self) -> bool
    {
        self.tasks.is_empty()
    }

    /// Insert a task; fails if a task with the same name already exists.
    pub fn insert(&mut self, task: Task) -> Result<(), DuplicateName>
    {
        if self.tasks.contains_key(&task.name()) {
            return Err(DuplicateName);
        }
        self.tasks.insert(task.name(), task);
        Ok(())
    }

    /// Remove and return a task by name.
    pub fn remove(&mut self, name: TaskName) -> Option<Task>
    {
        let task = self.tasks.remove(&name)?;
        if task.state() == State::Running {
            self.nrunning -= 1;
        }
        Some(task)
    }

    /// Look up a task by name.
    pub fn get(&self, name: TaskName) -> Option<&Task>
    {
        self.tasks.get(&name)
    }

    /// Look up a task by name, mutably.
    pub fn get_mut(&mut self, name: TaskName) -> Option<&mut Task>
    {
        self.tasks.get_mut(&name)
    }

    /// Call `f` once per task currently in the set, tolerating `f`
    /// removing the task it was just given (or any other) from the set.
    ///
    /// Before and after each call, the set's `nrunning` counter is kept in
    /// sync with the task's actual state, satisfying the universal
    /// invariant that `state == Running` iff counted in `nrunning`.
    pub fn for_each_mut(&mut self, mut f: impl FnMut(&mut Task))
    {
        let names: Vec<TaskName> = self.tasks.keys().copied().collect();
        for name in names {
            let Some(task) = self.tasks.get_mut(&name) else { continue };
            let was_running = task.state() == State::Running;
            f(task);
            // The task may have been removed by `f`; re-look-up.
            if let Some(task) = self.tasks.get(&name) {
                let is_running = task.state() == State::Running;
                if was_running && !is_running {
                    self.nrunning -= 1;
                } else if !was_running && is_running {
                    self.nrunning += 1;
                }
            } else if was_running {
                self.nrunning -= 1;
            }
        }
    }

    /// Record that a task just transitioned into `Running` (called by the
    /// scheduler right after a successful `start`, so the counter tracks
    /// state changes the set didn't itself cause).
    pub fn note_started(&mut self)
    {
        self.nrunning += 1;
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::runtime::stdio::Stdio;

    fn task(path: &str) -> Task
    {
        Task::new(TaskName::scan(path), Stdio::piped_output())
    }

    #[test]
    fn insert_rejects_duplicate_names()
    {
        let mut set = TaskSet::new();
        set.insert(task("/a")).unwrap();
        assert!(set.insert(task("/a")).is_err());
    }

    #[test]
    fn remove_returns_the_task()
    {
        let mut set = TaskSet::new();
        let name = task("/a").name();
        set.insert(task("/a")).unwrap();
        assert!(set.remove(name).is_some());
        assert!(set.is_empty());
    }

    #[test]
    fn for_each_mut_visits_every_task_once()
    {
        let mut set = TaskSet::new();
        set.insert(task("/a")).unwrap();
        set.insert(task("/b")).unwrap();
        let mut seen = 0;
        set.for_each_mut(|_| seen += 1);
        assert_eq!(seen, 2);
    }
}
