// SPDX-License-Identifier: AGPL-3.0-only

//! The supervisor's pid file: written on startup, advisory-locked for the
//! life of the process, removed on clean exit. Per spec.md §6 "Pid file".

use {
    nix::fcntl::{flock, FlockArg},
    std::{
        fs::OpenOptions,
        io::Write,
        os::unix::{fs::OpenOptionsExt, io::AsRawFd},
        path::{Path, PathBuf},
    },
};

/// Default pid file path.
pub const DEFAULT_PATH: &str = "/var/run/tsdfx.pid";

/// A held pid file; removed when dropped.
pub struct PidFile
{
    path: PathBuf,
    file: std::fs::File,
}

/// Failure acquiring the pid file.
#[derive(Debug, thiserror::Error)]
pub enum PidFileError
{
    #[error("{path}: {source}")]
    Io{path: PathBuf, #[source] source: std::io::Error},

    #[error("{path}: already locked by another process")]
    AlreadyRunning{path: PathBuf},
}

impl PidFile
{
    /// Create (or open), lock, and write the current pid to `path`.
    pub fn acquire(path: &Path) -> Result<Self, PidFileError>
    {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .mode(0o644)
            .open(path)
            .map_err(|source| PidFileError::Io{path: path.to_owned(), source})?;

        flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock)
            .map_err(|_| PidFileError::AlreadyRunning{path: path.to_owned()})?;

        file.set_len(0).map_err(|source| PidFileError::Io{path: path.to_owned(), source})?;
        write!(file, "{}\n", std::process::id())
            .map_err(|source| PidFileError::Io{path: path.to_owned(), source})?;
        file.sync_all().map_err(|source| PidFileError::Io{path: path.to_owned(), source})?;

        Ok(Self{path: path.to_owned(), file})
    }
}

impl Drop for PidFile
{
    fn drop(&mut self)
    {
        let _ = flock(self.file.as_raw_fd(), FlockArg::Unlock);
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn acquire_writes_current_pid()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tsdfx.pid");
        let _pidfile = PidFile::acquire(&path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.trim(), std::process::id().to_string());
    }

    #[test]
    fn dropping_removes_the_file()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tsdfx.pid");
        {
            let _pidfile = PidFile::acquire(&path).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }
}
