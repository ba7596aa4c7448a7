// SPDX-License-Identifier: AGPL-3.0-only

//! Depth-first directory walk driven by an explicit FIFO worklist, per
//! §4.2 "Scanner worker".

use {
    std::{
        collections::VecDeque,
        fs, io,
        os::unix::fs::FileTypeExt,
        path::{Path, PathBuf},
    },
    tsdfx_pathname::{classify_entry_name, FilenameError},
};

/// One line the walk wants written to stdout.
pub enum Emission
{
    /// A regular file, printed as `RELPATH`.
    File(String),
    /// A directory, printed as `RELPATH/` and descended into.
    Directory(String),
}

/// A non-fatal per-entry problem, logged to the user-error channel and
/// skipped.
pub enum SkipReason
{
    Reflexive,
    Hidden,
    NonPortable,
    Newline,
    Symlink,
    OtherType,
    Transient(io::Error),
}

impl From<FilenameError> for SkipReason
{
    fn from(e: FilenameError) -> Self
    {
        match e {
            FilenameError::Reflexive   => SkipReason::Reflexive,
            FilenameError::Hidden      => SkipReason::Hidden,
            FilenameError::NonPortable => SkipReason::NonPortable,
            FilenameError::Newline     => SkipReason::Newline,
        }
    }
}

impl std::fmt::Display for SkipReason
{
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result
    {
        match self {
            SkipReason::Reflexive   => write!(f, "reflexive entry"),
            SkipReason::Hidden      => write!(f, "hidden entry"),
            SkipReason::NonPortable => write!(f, "non-portable name"),
            SkipReason::Newline     => write!(f, "name contains newline"),
            SkipReason::Symlink     => write!(f, "symbolic link"),
            SkipReason::OtherType   => write!(f, "not a regular file or directory"),
            SkipReason::Transient(e) => write!(f, "{e}"),
        }
    }
}

/// A hard failure: propagates as a non-zero exit per §4.2.
#[derive(Debug, thiserror::Error)]
pub enum WalkError
{
    #[error("too many entries (limit {0})")]
    TooManyEntries(u64),

    #[error("{path}: {source}")]
    Io{path: PathBuf, #[source] source: io::Error},
}

/// Walk `root`, calling `on_emit` for every accepted entry and
/// `on_skip` for every rejected one. Returns once the worklist is
/// exhausted or `max_files` is reached.
pub fn walk(
    root: &Path,
    max_files: Option<u64>,
    mut on_emit: impl FnMut(Emission),
    mut on_skip: impl FnMut(&Path, SkipReason),
) -> Result<(), WalkError>
{
    let mut worklist: VecDeque<PathBuf> = VecDeque::new();
    worklist.push_back(PathBuf::new());
    let mut emitted: u64 = 0;

    while let Some(reldir) = worklist.pop_front() {
        let absdir = root.join(&reldir);
        let entries = fs::read_dir(&absdir).map_err(|e| WalkError::Io{path: absdir.clone(), source: e})?;

        for entry in entries {
            let entry = match entry {
                Ok(e) => e,
                Err(e) if is_transient(&e) => {
                    on_skip(&absdir, SkipReason::Transient(e));
                    continue;
                },
                Err(e) => return Err(WalkError::Io{path: absdir.clone(), source: e}),
            };

            let name = entry.file_name();
            let name = name.to_string_lossy().into_owned();
            let relpath = if reldir.as_os_str().is_empty() {
                name.clone()
            } else {
                format!("{}/{}", reldir.display(), name)
            };

            if let Err(reason) = classify_entry_name(&name) {
                if !matches!(reason, FilenameError::Reflexive) {
                    on_skip(&entry.path(), reason.into());
                }
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) if is_transient(&e) => {
                    on_skip(&entry.path(), SkipReason::Transient(e));
                    continue;
                },
                Err(e) => return Err(WalkError::Io{path: entry.path(), source: e}),
            };

            let file_type = metadata.file_type();
            if file_type.is_symlink() {
                on_skip(&entry.path(), SkipReason::Symlink);
                continue;
            } else if file_type.is_dir() {
                emitted += 1;
                if let Some(max) = max_files {
                    if emitted > max {
                        return Err(WalkError::TooManyEntries(max));
                    }
                }
                on_emit(Emission::Directory(relpath.clone()));
                worklist.push_back(PathBuf::from(relpath));
            } else if file_type.is_file() {
                emitted += 1;
                if let Some(max) = max_files {
                    if emitted > max {
                        return Err(WalkError::TooManyEntries(max));
                    }
                }
                on_emit(Emission::File(relpath));
            } else if file_type.is_block_device()
                || file_type.is_char_device()
                || file_type.is_fifo()
                || file_type.is_socket()
            {
                on_skip(&entry.path(), SkipReason::OtherType);
            } else {
                on_skip(&entry.path(), SkipReason::OtherType);
            }
        }
    }
    Ok(())
}

fn is_transient(e: &io::Error) -> bool
{
    matches!(
        e.raw_os_error(),
        Some(code) if code == libc::ENOENT || code == libc::EACCES || code == libc::EPERM
    )
}

#[cfg(test)]
mod tests
{
    use super::*;
    use std::{fs::{create_dir, File}, os::unix::fs::symlink};

    #[test]
    fn walks_files_and_directories_depth_first()
    {
        let dir = tempfile::tempdir().unwrap();
        create_dir(dir.path().join("sub")).unwrap();
        File::create(dir.path().join("a.txt")).unwrap();
        File::create(dir.path().join("sub/b.txt")).unwrap();

        let mut files = Vec::new();
        let mut dirs = Vec::new();
        walk(dir.path(), None, |e| match e {
            Emission::File(p) => files.push(p),
            Emission::Directory(p) => dirs.push(p),
        }, |_, _| {}).unwrap();

        assert!(files.contains(&"a.txt".to_string()));
        assert!(files.contains(&"sub/b.txt".to_string()));
        assert!(dirs.contains(&"sub".to_string()));
    }

    #[test]
    fn skips_hidden_and_symlinked_entries()
    {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join(".hidden")).unwrap();
        File::create(dir.path().join("real.txt")).unwrap();
        symlink(dir.path().join("real.txt"), dir.path().join("link")).unwrap();

        let mut files = Vec::new();
        let mut skipped = 0;
        walk(dir.path(), None, |e| {
            if let Emission::File(p) = e { files.push(p); }
        }, |_, _| skipped += 1).unwrap();

        assert_eq!(files, vec!["real.txt".to_string()]);
        assert_eq!(skipped, 2);
    }

    #[test]
    fn aborts_when_max_files_exceeded()
    {
        let dir = tempfile::tempdir().unwrap();
        for i in 0 .. 5 {
            File::create(dir.path().join(format!("f{i}.txt"))).unwrap();
        }
        let result = walk(dir.path(), Some(2), |_| {}, |_, _| {});
        assert!(matches!(result, Err(WalkError::TooManyEntries(2))));
    }
}
