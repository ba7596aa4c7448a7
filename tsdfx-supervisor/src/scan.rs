// SPDX-License-Identifier: AGPL-3.0-only

//! The scan subsystem: one long-lived scanner child per active map
//! entry, its stdout/stderr stream processing, and its scheduling.
//! Per spec.md §4.3.

use {
    crate::map::Entry,
    std::{
        collections::HashMap,
        io::{ErrorKind, Read},
        os::unix::fs::MetadataExt,
        path::PathBuf,
        time::{Duration, Instant},
    },
    tsdfx_hash::TaskName,
    tsdfx_task::{exec_spec, Credentials, DuplicateName, ExecSpec, State, Stdio, Task, TaskSet},
};

/// Default interval between scans of an idle, healthy entry.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(300);

/// Longest line this subsystem will buffer before declaring a scan task's
/// output a protocol violation.
pub const MAX_LINE_LEN: usize = libc::PATH_MAX as usize;

struct Meta
{
    entry_name: String,
    srcdir: PathBuf,
    stdout_buf: Vec<u8>,
    next_run: Instant,
    interval: Duration,
    reset_interval: Duration,
    reset_eligible_at: Option<Instant>,
}

/// All scan tasks across every active map entry.
pub struct Subsystem
{
    set: TaskSet,
    meta: HashMap<TaskName, Meta>,
    scanner_path: PathBuf,
    max_running: usize,
}

/// A scan task failed to be created.
#[derive(Debug, thiserror::Error)]
pub enum CreateError
{
    #[error(transparent)]
    Duplicate(#[from] DuplicateName),

    #[error("cannot determine source owner: {0}")]
    Owner(#[source] std::io::Error),

    #[error(transparent)]
    Task(#[from] tsdfx_task::TaskError),
}

impl Subsystem
{
    /// A subsystem with no scan tasks yet.
    pub fn new(scanner_path: PathBuf, max_running: usize) -> Self
    {
        Self{set: TaskSet::new(), meta: HashMap::new(), scanner_path, max_running}
    }

    /// Number of scan tasks currently tracked.
    pub fn len(&self) -> usize
    {
        self.set.len()
    }

    /// Whether any scan task is currently running (used by the one-shot
    /// exit check in `run::main_loop`).
    pub fn nrunning(&self) -> usize
    {
        self.set.nrunning()
    }

    /// Create a scan task for a newly active map entry, running as the
    /// source directory's owner, scheduled to run on the next tick.
    pub fn create(&mut self, entry: &Entry) -> Result<(), CreateError>
    {
        let name = TaskName::scan(entry.src.to_string_lossy().as_ref());
        let stat = std::fs::metadata(&entry.src).map_err(CreateError::Owner)?;
        let credentials = Credentials::from_uid_gids(stat.uid(), &[stat.gid()])
            .unwrap_or_default();

        let mut task = Task::new(name, Stdio::piped_output());
        task.set_credentials(credentials)?;
        self.set.insert(task)?;
        self.meta.insert(name, Meta{
            entry_name: entry.name.clone(),
            srcdir: entry.src.clone(),
            stdout_buf: Vec::new(),
            next_run: Instant::now(),
            interval: DEFAULT_INTERVAL,
            reset_interval: DEFAULT_INTERVAL * 3,
            reset_eligible_at: None,
        });
        Ok(())
    }

    /// Stop (if running) and forget a map entry's scan task.
    pub fn destroy(&mut self, entry: &Entry)
    {
        let name = TaskName::scan(entry.src.to_string_lossy().as_ref());
        if let Some(task) = self.set.get_mut(name) {
            task.stop();
        }
        self.set.remove(name);
        self.meta.remove(&name);
    }

    /// Mark an entry's scan task to run on the very next tick.
    pub fn rush(&mut self, entry: &Entry)
    {
        let name = TaskName::scan(entry.src.to_string_lossy().as_ref());
        if let Some(meta) = self.meta.get_mut(&name) {
            if self.set.get(name).map(Task::state) == Some(State::Idle) {
                meta.next_run = Instant::now();
            }
        }
    }

    /// One scheduler tick: start due idle tasks, poll running ones,
    /// drain their pipes, and reclassify/reset terminal ones. `on_path`
    /// is the scan stream processor's dispatch hook (spec.md §4.3); it
    /// receives the owning entry's name and a validated relative path.
    /// `on_error` receives stderr lines and protocol-violation notices.
    pub fn tick(
        &mut self,
        now: Instant,
        mut on_path: impl FnMut(&str, &str),
        mut on_error: impl FnMut(&str, &str),
    )
    {
        let names: Vec<TaskName> = self.meta.keys().copied().collect();
        for name in names {
            self.tick_one(name, now, &mut on_path, &mut on_error);
        }
    }

    fn tick_one(
        &mut self,
        name: TaskName,
        now: Instant,
        on_path: &mut impl FnMut(&str, &str),
        on_error: &mut impl FnMut(&str, &str),
    )
    {
        let Some(state) = self.set.get(name).map(Task::state) else { return };

        match state {
            State::Idle => {
                let due = self.meta.get(&name).map(|m| m.next_run <= now).unwrap_or(false);
                let gated = self.meta.get(&name)
                    .and_then(|m| m.reset_eligible_at)
                    .map(|at| at > now)
                    .unwrap_or(false);
                if due && !gated && self.set.nrunning() < self.max_running {
                    let exec = {
                        let meta = self.meta.get(&name).expect("meta exists for scanned task");
                        build_exec(&self.scanner_path, &meta.srcdir)
                    };
                    let Some(task) = self.set.get_mut(name) else { return };
                    if task.start(&exec).is_ok() {
                        self.set.note_started();
                    }
                }
            },
            State::Running => {
                self.drain(name, on_path, on_error);
                let reaped = self.set.get_mut(name).map(|t| t.poll().unwrap_or(false)).unwrap_or(false);
                if reaped {
                    self.finalize(name, on_error);
                }
            },
            State::Finished | State::Failed | State::Dead | State::Invalid => {
                self.maybe_reset(name, now, state);
            },
            State::Queued | State::Starting | State::Stopping | State::Stopped => (),
        }
    }

    fn drain(&mut self, name: TaskName, on_path: &mut impl FnMut(&str, &str), on_error: &mut impl FnMut(&str, &str))
    {
        let Some(meta) = self.meta.get_mut(&name) else { return };
        let entry_name = meta.entry_name.clone();
        let Some(task) = self.set.get_mut(name) else { return };

        if let Some(stdout) = task.stdout_mut() {
            let mut chunk = [0u8; 65536];
            loop {
                match stdout.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => self.meta.get_mut(&name).unwrap().stdout_buf.extend_from_slice(&chunk[.. n]),
                    Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(_) => break,
                }
            }
        }
        if let Some(stderr) = task.stderr_mut() {
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                match stderr.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => buf.extend_from_slice(&chunk[.. n]),
                    Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(_) => break,
                }
            }
            for line in String::from_utf8_lossy(&buf).lines() {
                on_error(&entry_name, line);
            }
        }

        let meta = self.meta.get_mut(&name).expect("meta present");
        while let Some(idx) = meta.stdout_buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = meta.stdout_buf.drain(.. idx + 1).collect();
            let line = &line[.. line.len() - 1];
            if tsdfx_pathname::validate_scan_line(line) {
                on_path(&entry_name, &String::from_utf8_lossy(line));
            } else {
                on_error(&entry_name, &format!("invalid scan line: {}", String::from_utf8_lossy(line)));
            }
        }
        if meta.stdout_buf.len() > MAX_LINE_LEN {
            if let Some(task) = self.set.get_mut(name) {
                task.stop();
            }
        }
    }

    fn finalize(&mut self, name: TaskName, on_error: &mut impl FnMut(&str, &str))
    {
        let Some(meta) = self.meta.get_mut(&name) else { return };
        let truncated = !meta.stdout_buf.is_empty();
        let entry_name = meta.entry_name.clone();
        meta.next_run = Instant::now() + meta.interval;
        meta.reset_eligible_at = Some(Instant::now() + meta.reset_interval);

        let Some(task) = self.set.get_mut(name) else { return };
        if task.state() != State::Stopped {
            return; // dead/failed from waitpid already final
        }
        if truncated {
            on_error(&entry_name, "scan output ended with a truncated line");
            task.mark_failed();
        } else {
            task.finish();
        }
    }

    fn maybe_reset(&mut self, name: TaskName, now: Instant, state: State)
    {
        let eligible = match state {
            State::Finished => true,
            _ => self.meta.get(&name).and_then(|m| m.reset_eligible_at).map(|at| at <= now).unwrap_or(true),
        };
        if !eligible {
            return;
        }
        if let Some(task) = self.set.get_mut(name) {
            task.reset();
        }
        if let Some(meta) = self.meta.get_mut(&name) {
            meta.stdout_buf.clear();
            meta.next_run = now;
        }
    }
}

fn build_exec(scanner_path: &std::path::Path, srcdir: &std::path::Path) -> ExecSpec
{
    exec_spec(
        scanner_path,
        &[&scanner_path.to_string_lossy(), &srcdir.to_string_lossy()],
    )
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn create_rejects_missing_source()
    {
        let mut sub = Subsystem::new(PathBuf::from("/bin/true"), 4);
        let entry = Entry{name: "x".into(), src: PathBuf::from("/nonexistent-xyz"), dst: PathBuf::from("/tmp")};
        assert!(matches!(sub.create(&entry), Err(CreateError::Owner(_))));
    }

    #[test]
    fn rush_only_affects_idle_tasks()
    {
        let dir = tempfile::tempdir().unwrap();
        let mut sub = Subsystem::new(PathBuf::from("/bin/true"), 4);
        let entry = Entry{name: "x".into(), src: dir.path().to_path_buf(), dst: dir.path().to_path_buf()};
        sub.create(&entry).unwrap();
        assert_eq!(sub.len(), 1);
        sub.rush(&entry);
    }
}
