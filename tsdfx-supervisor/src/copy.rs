// SPDX-License-Identifier: AGPL-3.0-only

//! The copy dispatcher: one task set, two size-partitioned queues, and
//! the `copy_new`/`copy_wrap`/`copy_sched` entry points. Per spec.md
//! §4.5 "Copy dispatcher".

use {
    crate::recentlog::RecentLog,
    std::{
        collections::HashMap,
        os::unix::fs::{MetadataExt, PermissionsExt},
        path::{Path, PathBuf},
    },
    tsdfx_hash::TaskName,
    tsdfx_task::{exec_spec, Credentials, State, Stdio, Task, TaskQueue, TaskSet},
};

/// Source size at or under which a copy task goes to the `small` queue.
pub const SMALL_MAX_SIZE: u64 = 1024 * 1024;

/// `small` queue concurrency cap.
pub const SMALL_CONCURRENCY: usize = 8;

/// `large` queue concurrency cap.
pub const LARGE_CONCURRENCY: usize = 4;

/// Which queue a copy task was placed in.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum QueueId
{
    Small,
    Large,
}

/// CLI-level knobs forwarded to every copier child.
#[derive(Clone)]
pub struct Options
{
    pub dry_run: bool,
    pub verbose: bool,
    pub max_size: Option<u64>,
}

/// The copy subsystem.
pub struct Dispatcher
{
    set: TaskSet,
    small: TaskQueue,
    large: TaskQueue,
    membership: HashMap<TaskName, QueueId>,
    paths: HashMap<TaskName, (PathBuf, PathBuf)>,
    copier_path: PathBuf,
    opts: Options,
}

/// A hard failure creating or routing a copy task.
#[derive(Debug, thiserror::Error)]
pub enum CopyError
{
    #[error("path too long")]
    NameTooLong,

    #[error("insufficient free space")]
    WouldBlock,

    #[error(transparent)]
    Task(#[from] tsdfx_task::TaskError),
}

impl Dispatcher
{
    /// A dispatcher with empty queues.
    pub fn new(copier_path: PathBuf, opts: Options) -> Self
    {
        Self{
            set: TaskSet::new(),
            small: TaskQueue::new(SMALL_CONCURRENCY),
            large: TaskQueue::new(LARGE_CONCURRENCY),
            membership: HashMap::new(),
            paths: HashMap::new(),
            copier_path,
            opts,
        }
    }

    /// Total copy tasks currently tracked (any state).
    pub fn len(&self) -> usize
    {
        self.set.len()
    }

    /// Copy tasks currently running, across both queues.
    pub fn nrunning(&self) -> usize
    {
        self.set.nrunning()
    }

    /// Create (or no-op if already present) a copy task for `(src, dst)`,
    /// choosing a queue by source size and credentials by source owner.
    pub fn copy_new(&mut self, src: &Path, dst: &Path) -> Result<(), CopyError>
    {
        let name = TaskName::copy(&src.to_string_lossy(), &dst.to_string_lossy());
        if self.set.get(name).is_some() {
            return Ok(());
        }

        let stat = std::fs::symlink_metadata(src).map_err(|_| CopyError::NameTooLong)?;
        let credentials = Credentials::from_uid_gids(stat.uid(), &[stat.gid()]).unwrap_or_default();

        let queue_id = if stat.size() <= SMALL_MAX_SIZE { QueueId::Small } else { QueueId::Large };

        let mut task = Task::new(name, Stdio::piped_output());
        task.set_credentials(credentials)?;
        self.set.insert(task).map_err(|_| CopyError::NameTooLong)?;
        self.membership.insert(name, queue_id);
        self.paths.insert(name, (src.to_path_buf(), dst.to_path_buf()));
        match queue_id {
            QueueId::Small => self.small.push(name),
            QueueId::Large => self.large.push(name),
        }
        Ok(())
    }

    /// The scan stream processor's per-line entry point: joins `relpath`
    /// onto both endpoint directories, normalizes permissions upward,
    /// checks for a short-circuit skip, checks free space, and finally
    /// calls [`Self::copy_new`].
    pub fn copy_wrap(
        &mut self,
        srcdir: &Path,
        dstdir: &Path,
        relpath: &str,
        recentlog: &mut RecentLog,
    ) -> Result<(), CopyError>
    {
        if srcdir.as_os_str().len() + relpath.len() + 1 > libc::PATH_MAX as usize {
            return Err(CopyError::NameTooLong);
        }
        let src = srcdir.join(relpath);
        let dst = dstdir.join(relpath);

        let Ok(src_meta) = std::fs::symlink_metadata(&src) else {
            let _ = recentlog.log(format!("{}: vanished before copy", src.display()));
            return Ok(());
        };

        let wanted_mode = if src_meta.is_dir() { 0o750 } else { 0o640 };
        if src_meta.mode() & 0o7777 & !wanted_mode != 0 {
            let _ = std::fs::set_permissions(&src, std::fs::Permissions::from_mode(wanted_mode | (src_meta.mode() & wanted_mode)));
        }

        if let Ok(dst_meta) = std::fs::symlink_metadata(&dst) {
            let same_type = dst_meta.is_dir() == src_meta.is_dir();
            let unchanged = same_type
                && (src_meta.is_dir() || (src_meta.size() == dst_meta.size() && src_meta.mtime() == dst_meta.mtime()));
            if unchanged {
                return Ok(());
            }
            if same_type && !src_meta.is_dir() && src_meta.size() > dst_meta.size() {
                if let Ok(dst_file) = std::fs::File::open(&dst) {
                    if let Ok(vfs) = tsdfx_os::fstatvfs(&dst_file) {
                        let available = vfs.f_bavail as u64 * vfs.f_bsize as u64;
                        if available < src_meta.size() - dst_meta.size() {
                            return Err(CopyError::WouldBlock);
                        }
                    }
                }
            }
        }

        self.copy_new(&src, &dst)
    }

    /// One scheduler tick: fill both queues up to their caps, poll
    /// running tasks, and reclaim terminal ones.
    pub fn copy_sched(&mut self)
    {
        let copier_path = self.copier_path.clone();
        let opts = self.opts.clone();
        let paths = &self.paths;

        let _ = self.small.schedule(&mut self.set, |n| build_exec(&copier_path, &opts, paths.get(&n)));
        let _ = self.large.schedule(&mut self.set, |n| build_exec(&copier_path, &opts, paths.get(&n)));

        let membership = &self.membership;
        let (mut small, mut large) = (&mut self.small, &mut self.large);
        let mut done = Vec::new();
        self.set.for_each_mut(|task| {
            if task.state() == State::Running {
                if task.poll().unwrap_or(true) {
                    done.push(task.name());
                }
            } else if task.state().is_terminal() {
                done.push(task.name());
            }
        });
        for name in done {
            match membership.get(&name) {
                Some(QueueId::Small) => small.on_stopped(name),
                Some(QueueId::Large) => large.on_stopped(name),
                None => (),
            }
            self.set.remove(name);
            self.membership.remove(&name);
            self.paths.remove(&name);
        }
    }
}

/// Build the copier child's argv per spec.md §4.5: `[-n] [-v] [-m MAXSIZE]
/// SRC DST`. `paths` is looked up from the dispatcher's own `src`/`dst`
/// bookkeeping, since a [`TaskName`] is a one-way hash and can't be
/// inverted back into its endpoints.
fn build_exec(copier_path: &Path, opts: &Options, paths: Option<&(PathBuf, PathBuf)>) -> tsdfx_task::ExecSpec
{
    let mut argv: Vec<String> = vec![copier_path.to_string_lossy().into_owned()];
    if opts.dry_run {
        argv.push("-n".into());
    }
    if opts.verbose {
        argv.push("-v".into());
    }
    if let Some(max_size) = opts.max_size {
        argv.push("-m".into());
        argv.push(max_size.to_string());
    }
    if let Some((src, dst)) = paths {
        argv.push(src.to_string_lossy().into_owned());
        argv.push(dst.to_string_lossy().into_owned());
    }
    let argv_refs: Vec<&str> = argv.iter().map(String::as_str).collect();
    exec_spec(copier_path, &argv_refs)
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn opts() -> Options
    {
        Options{dry_run: false, verbose: false, max_size: None}
    }

    #[test]
    fn copy_new_is_idempotent_by_name()
    {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a");
        std::fs::write(&src, b"x").unwrap();
        let dst = dir.path().join("b");

        let mut dispatcher = Dispatcher::new(PathBuf::from("/bin/true"), opts());
        dispatcher.copy_new(&src, &dst).unwrap();
        let before = dispatcher.len();
        dispatcher.copy_new(&src, &dst).unwrap();
        assert_eq!(dispatcher.len(), before);
    }

    #[test]
    fn small_files_go_to_the_small_queue()
    {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a");
        std::fs::write(&src, b"tiny").unwrap();
        let dst = dir.path().join("b");

        let mut dispatcher = Dispatcher::new(PathBuf::from("/bin/true"), opts());
        dispatcher.copy_new(&src, &dst).unwrap();
        let name = TaskName::copy(&src.to_string_lossy(), &dst.to_string_lossy());
        assert_eq!(dispatcher.membership.get(&name), Some(&QueueId::Small));
    }
}
