// SPDX-License-Identifier: AGPL-3.0-only

//! A FIFO of task names with a `max_running` cap, per §3 "Task queue".

use {super::{set::TaskSet, state::State, error::TaskError, spawn::ExecSpec}, tsdfx_hash::TaskName, std::collections::VecDeque};

/// A FIFO scheduling queue. Tasks live in a [`TaskSet`]; the queue only
/// holds names and a concurrency cap, so a task belongs to at most one
/// queue by construction (nothing stops a caller from enqueuing the same
/// name in two queues, but nothing in this system ever does).
pub struct TaskQueue
{
    max_running: usize,
    nrunning: usize,
    pending: VecDeque<TaskName>,
}

impl TaskQueue
{
    /// A new queue with the given concurrency cap.
    pub fn new(max_running: usize) -> Self
    {
        Self{max_running, nrunning: 0, pending: VecDeque::new()}
    }

    /// Number of tasks from this queue currently running.
    pub fn nrunning(&self) -> usize
    {
        self.nrunning
    }

    /// The concurrency cap.
    pub fn max_running(&self) -> usize
    {
        self.max_running
    }

    /// Append a task name to the tail.
    pub fn push(&mut self, name: TaskName)
    {
        self.pending.push_back(name);
    }

    /// Remove a task name from the queue, wherever it is.
    pub fn remove(&mut self, name: TaskName)
    {
        self.pending.retain(|&n| n != name);
    }

    /// A single forward pass: start idle tasks from the head of the queue
    /// until `nrunning == max_running`. Tasks that finish are expected to
    /// have already been popped by the caller (via [`Self::on_stopped`]);
    /// tasks not yet resolved (still running/queued) are left at the
    /// front, since a FIFO reorder on every tick would starve the tail.
    pub fn schedule(
        &mut self,
        set: &mut TaskSet,
        exec_for: impl Fn(TaskName) -> ExecSpec,
    ) -> Result<(), TaskError>
    {
        let mut started = Vec::new();
        for &name in &self.pending {
            if self.nrunning >= self.max_running {
                break;
            }
            let Some(task) = set.get_mut(name) else { continue };
            if task.state() != State::Idle {
                continue;
            }
            let exec = exec_for(name);
            task.start(&exec)?;
            set.note_started();
            self.nrunning += 1;
            started.push(name);
        }
        let _ = started; // tasks stay enqueued; removed explicitly on completion
        Ok(())
    }

    /// Called once a task previously started from this queue has left
    /// `Running` (stopped/failed/dead). Decrements the running counter and
    /// drops it from the pending list, since its slot is now free.
    pub fn on_stopped(&mut self, name: TaskName)
    {
        if self.nrunning > 0 {
            self.nrunning -= 1;
        }
        self.remove(name);
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn respects_max_running_on_push()
    {
        let q = TaskQueue::new(2);
        assert_eq!(q.max_running(), 2);
        assert_eq!(q.nrunning(), 0);
    }

    #[test]
    fn on_stopped_frees_a_slot()
    {
        let mut q = TaskQueue::new(1);
        q.nrunning = 1;
        let name = TaskName::scan("/a");
        q.push(name);
        q.on_stopped(name);
        assert_eq!(q.nrunning(), 0);
        assert!(q.pending.is_empty());
    }
}
