// SPDX-License-Identifier: AGPL-3.0-only

//! A single task: identity, credentials, child process, and pipes.

use {
    super::{
        credentials::Credentials,
        error::TaskError,
        spawn::{self, ExecSpec, Spawned},
        state::State,
        stdio::Stdio,
    },
    tsdfx_hash::TaskName,
    tsdfx_os as os,
    std::{fs::File, os::unix::process::ExitStatusExt, process::ExitStatus, time::{Duration, Instant}},
};

/// Signals sent, in order, by [`Task::stop`], matching the governing
/// spec's escalation sequence with a poll between each.
const STOP_SIGNALS: [libc::c_int; 3] = [os::SIGCONT, os::SIGTERM, libc::SIGKILL];

/// How long [`Task::stop`] waits between escalations.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A task: a named, stateful handle to a child process.
pub struct Task
{
    name: TaskName,
    state: State,
    credentials: Credentials,
    stdio: Stdio,
    pid: Option<os::pid_t>,
    exit_status: Option<ExitStatus>,
    pub(crate) stdin: Option<File>,
    pub(crate) stdout: Option<File>,
    pub(crate) stderr: Option<File>,
}

impl Task
{
    /// Create a new idle task with no credentials set.
    pub fn new(name: TaskName, stdio: Stdio) -> Self
    {
        Self{
            name,
            state: State::Idle,
            credentials: Credentials::default(),
            stdio,
            pid: None,
            exit_status: None,
            stdin: None,
            stdout: None,
            stderr: None,
        }
    }

    /// This task's name.
    pub fn name(&self) -> TaskName
    {
        self.name
    }

    /// This task's current state.
    pub fn state(&self) -> State
    {
        self.state
    }

    /// Set credentials. Callable only while `Idle`.
    pub fn set_credentials(&mut self, credentials: Credentials) -> Result<(), TaskError>
    {
        if self.state != State::Idle {
            return Err(TaskError::NotIdle);
        }
        self.credentials = credentials;
        Ok(())
    }

    /// Fork and exec, per §4.1 "Start". Requires `Idle`; transitions
    /// through `Starting` to `Running` on success, `Dead` on failure.
    pub fn start(&mut self, exec: &ExecSpec) -> Result<(), TaskError>
    {
        if self.state != State::Idle {
            return Err(TaskError::NotIdle);
        }
        self.state.transition(State::Starting);

        match spawn::spawn(exec, &self.credentials, self.stdio) {
            Ok(Spawned{pid, stdin, stdout, stderr}) => {
                self.pid = Some(pid);
                self.stdin = stdin;
                self.stdout = stdout;
                self.stderr = stderr;
                self.state.transition(State::Running);
                Ok(())
            },
            Err(error) => {
                self.state.transition(State::Dead);
                Err(TaskError::Spawn(error))
            },
        }
    }

    /// Non-blocking wait; see §4.1 "Poll".
    ///
    /// Returns `true` if the task just transitioned out of `Running`.
    pub fn poll(&mut self) -> Result<bool, TaskError>
    {
        if !matches!(self.state, State::Running | State::Stopping) {
            return Ok(false);
        }
        let pid = self.pid.expect("running task has a pid");
        match os::waitpid(pid, os::WNOHANG) {
            Ok((0, _)) => Ok(false), // still running
            Ok((_, status)) => {
                self.reap(status);
                Ok(true)
            },
            Err(e) => {
                tracing::warn!(pid, error = %e, "waitpid");
                self.reap(ExitStatus::from_raw(-1));
                Err(TaskError::Wait(e))
            },
        }
    }

    fn reap(&mut self, status: ExitStatus)
    {
        self.exit_status = Some(status);
        let next = match status.code() {
            Some(0) => State::Stopped,
            Some(_) => State::Failed,
            None => State::Dead,
        };
        self.state.transition(next);
        self.pid = None;
        self.stdin = None;
        self.stdout = None;
        self.stderr = None;
    }

    /// The parent's read end of the child's stdout, if piped and running.
    pub fn stdout_mut(&mut self) -> Option<&mut File>
    {
        self.stdout.as_mut()
    }

    /// The parent's read end of the child's stderr, if piped and running.
    pub fn stderr_mut(&mut self) -> Option<&mut File>
    {
        self.stderr.as_mut()
    }

    /// The parent's write end of the child's stdin, if piped and running.
    pub fn stdin_mut(&mut self) -> Option<&mut File>
    {
        self.stdin.as_mut()
    }

    /// The exit status of the last completed run, if any.
    pub fn exit_status(&self) -> Option<ExitStatus>
    {
        self.exit_status
    }

    /// Send a signal to a running task's child; a no-op otherwise.
    pub fn signal(&self, sig: libc::c_int)
    {
        if let Some(pid) = self.pid {
            let _ = os::kill(pid, sig);
        }
    }

    /// Escalate `[CONT, TERM, KILL]` with a ~100ms poll between each,
    /// per §4.1 "Stop". Gives up and forces `Dead` after the third.
    pub fn stop(&mut self)
    {
        if self.state != State::Running {
            return;
        }
        self.state.transition(State::Stopping);

        for &sig in &STOP_SIGNALS {
            if self.poll().unwrap_or(true) {
                return;
            }
            self.signal(sig);
            self.signal(os::SIGCONT);
            std::thread::sleep(STOP_POLL_INTERVAL);
        }

        tracing::warn!(name = %self.name, "gave up waiting for child to stop");
        self.state.transition(State::Dead);
        self.pid = None;
        self.stdin = None;
        self.stdout = None;
        self.stderr = None;
    }

    /// Reset a terminated task back to `Idle` so it can be started again.
    pub fn reset(&mut self)
    {
        if self.state == State::Idle {
            return;
        }
        if self.state == State::Running {
            self.stop();
        }
        self.state.transition(State::Idle);
        self.exit_status = None;
    }

    /// Mark the task `Invalid`: its underlying resource is gone and it
    /// cannot be started again without being recreated.
    pub fn invalidate(&mut self)
    {
        if self.state == State::Running {
            self.stop();
        }
        self.state.transition(State::Invalid);
    }

    /// Mark a long-lived task `Finished` after it completed a unit of
    /// work cleanly (used by the scan subsystem, which reuses the same
    /// child across poll ticks rather than exiting after one run — see
    /// `tsdfx_supervisor::scan`).
    pub fn finish(&mut self)
    {
        self.state.transition(State::Finished);
    }

    /// Reclassify a task that just stopped as `Failed` (a protocol
    /// violation, e.g. a truncated final line) rather than `Finished`.
    pub fn mark_failed(&mut self)
    {
        self.state.transition(State::Failed);
    }
}

/// Wall-clock helper for scheduling; kept separate from `Task` itself so
/// that tests can construct a `Task` without wiring up a clock.
#[derive(Clone, Copy, Debug)]
pub struct Schedule
{
    /// When this task may next run.
    pub next_run: Instant,
    /// Interval between runs once idle.
    pub interval: Duration,
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn task() -> Task
    {
        Task::new(TaskName::scan("/tmp"), Stdio::piped_output())
    }

    #[test]
    fn new_task_is_idle()
    {
        assert_eq!(task().state(), State::Idle);
    }

    #[test]
    fn credentials_rejected_outside_idle()
    {
        let mut t = task();
        t.state.transition(State::Starting);
        assert!(matches!(t.set_credentials(Credentials::default()), Err(TaskError::NotIdle)));
    }

    #[test]
    fn reset_on_idle_is_a_no_op()
    {
        let mut t = task();
        t.reset();
        assert_eq!(t.state(), State::Idle);
    }

    #[test]
    fn invalidate_from_idle()
    {
        let mut t = task();
        t.invalidate();
        assert_eq!(t.state(), State::Invalid);
    }
}
