// SPDX-License-Identifier: AGPL-3.0-only

//! Wrappers for various system calls.
//!
//! The wrappers retain the original names and behaviors of the system calls,
//! making it easy to look up their exact behavior in the man pages.
//! However, there are a few trivial differences for ease of use:
//!
//!  - Errors are reported via using [`Result`] instead of `errno`.
//!  - New file descriptors are returned using [`OwnedFd`].
//!  - `*_CLOEXEC` is passed to file handle creation functions by default,
//!    as setting this flag in a separate call incurs a race condition.
//!  - String arguments and array arguments are passed in a memory-safe way.
//!    The exact ways in which this is done are ad-hoc for some functions.
//!
//! These functions do not allocate memory except:
//!
//!  - When they call a trait method that allocates memory.
//!  - When otherwise noted.

#![warn(missing_docs)]

use {
    crate::cstr::{CStringArr, WithCStr},
    std::{
        ffi::CString,
        io::{Error, Result},
        os::unix::{io::{AsRawFd, FromRawFd, OwnedFd}, process::ExitStatusExt},
        process::ExitStatus,
    },
};

pub use libc::{
    AT_FDCWD,
    EAGAIN,
    ENOENT,
    F_GETFL,
    F_SETFL,
    O_CREAT,
    O_DIRECTORY,
    O_NONBLOCK,
    O_PATH,
    O_RDONLY,
    O_RDWR,
    O_TRUNC,
    O_WRONLY,
    POLLHUP,
    POLLIN,
    SEEK_DATA,
    SEEK_HOLE,
    SIGCHLD,
    SIGCONT,
    SIGKILL,
    SIGTERM,
    WNOHANG,
    gid_t,
    mode_t,
    off_t,
    pid_t,
    pollfd,
    uid_t,
};

pub mod cstr;

/// _exit(2).
pub fn _exit(status: libc::c_int) -> !
{
    unsafe {
        libc::_exit(status);
    }
}

/// chdir(2).
pub fn chdir(path: impl WithCStr) -> Result<()>
{
    path.with_cstr(|path| {
        unsafe {
            match libc::chdir(path.as_ptr()) {
                -1 => Err(Error::last_os_error()),
                _  => Ok(()),
            }
        }
    })
}

/// close(2).
///
/// # Safety
///
/// `fd` must not be in use by an [`OwnedFd`] or similar owner elsewhere.
pub unsafe fn close(fd: libc::c_int) -> Result<()>
{
    match libc::close(fd) {
        -1 => Err(Error::last_os_error()),
        _  => Ok(()),
    }
}

/// dup2(2).
pub fn dup2(oldfd: libc::c_int, newfd: libc::c_int) -> Result<()>
{
    unsafe {
        match libc::dup2(oldfd, newfd) {
            -1 => Err(Error::last_os_error()),
            _  => Ok(()),
        }
    }
}

/// execve(2).
pub fn execve(
    pathname: impl WithCStr,
    argv:     &CStringArr,
    envp:     &CStringArr,
) -> Error
{
    let result: Result<!> = pathname.with_cstr(|pathname| {
        unsafe {
            libc::execve(pathname.as_ptr(), argv.as_ptr(), envp.as_ptr());
        }
        Err(Error::last_os_error())
    });
    match result {
        Ok(never) => match never {},
        Err(error) => error,
    }
}

/// fchmod(2).
pub fn fchmod(fd: &impl AsRawFd, mode: mode_t) -> Result<()>
{
    unsafe {
        match libc::fchmod(fd.as_raw_fd(), mode) {
            -1 => Err(Error::last_os_error()),
            _  => Ok(()),
        }
    }
}

/// fork(2).
///
/// Returns `0` in the child, the child's pid in the parent.
///
/// # Safety
///
/// The child process runs with a single thread and a copy of the parent's
/// memory; only async-signal-safe operations are sound between `fork` and
/// the next `execve` or `_exit`.
pub unsafe fn fork() -> Result<pid_t>
{
    match libc::fork() {
        -1  => Err(Error::last_os_error()),
        pid => Ok(pid),
    }
}

/// fstatvfs(2).
pub fn fstatvfs(fd: &impl AsRawFd) -> Result<libc::statvfs>
{
    unsafe {
        let mut buf: libc::statvfs = std::mem::zeroed();
        match libc::fstatvfs(fd.as_raw_fd(), &mut buf) {
            -1 => Err(Error::last_os_error()),
            _  => Ok(buf),
        }
    }
}

/// fcntl(2), `F_GETFL`/`F_SETFL`.
pub fn set_nonblocking(fd: &impl AsRawFd, nonblocking: bool) -> Result<()>
{
    unsafe {
        let flags = libc::fcntl(fd.as_raw_fd(), libc::F_GETFL);
        if flags == -1 {
            return Err(Error::last_os_error());
        }
        let flags = if nonblocking { flags | libc::O_NONBLOCK } else { flags & !libc::O_NONBLOCK };
        match libc::fcntl(fd.as_raw_fd(), libc::F_SETFL, flags) {
            -1 => Err(Error::last_os_error()),
            _  => Ok(()),
        }
    }
}

/// ftruncate(2).
pub fn ftruncate(fd: &impl AsRawFd, length: off_t) -> Result<()>
{
    unsafe {
        match libc::ftruncate(fd.as_raw_fd(), length) {
            -1 => Err(Error::last_os_error()),
            _  => Ok(()),
        }
    }
}

/// getgid(2).
pub fn getgid() -> gid_t
{
    unsafe {
        libc::getgid()
    }
}

/// getuid(2).
pub fn getuid() -> uid_t
{
    unsafe {
        libc::getuid()
    }
}

/// geteuid(2).
pub fn geteuid() -> uid_t
{
    unsafe {
        libc::geteuid()
    }
}

/// Look up a user's primary/supplementary credentials by name.
///
/// Mimics `getpwnam(3)` followed by `getgrouplist(3)`, the combination the
/// original task runtime uses to populate a task's credentials from a user
/// name.
pub fn lookup_user(name: &str) -> Result<Credentials>
{
    let cname = CString::new(name).map_err(|_| Error::from_raw_os_error(libc::EINVAL))?;
    unsafe {
        let pwd = libc::getpwnam(cname.as_ptr());
        if pwd.is_null() {
            return Err(Error::from_raw_os_error(libc::ENOENT));
        }
        let uid = (*pwd).pw_uid;
        let primary_gid = (*pwd).pw_gid;

        let mut ngroups: libc::c_int = 32;
        let mut groups = vec![0 as gid_t; ngroups as usize];
        let ret = libc::getgrouplist(
            cname.as_ptr(),
            primary_gid,
            groups.as_mut_ptr(),
            &mut ngroups,
        );
        if ret < 0 {
            // Buffer was too small; getgrouplist updated ngroups with the
            // real count on Linux. Retry once with that size.
            groups.resize(ngroups as usize, 0);
            let ret = libc::getgrouplist(
                cname.as_ptr(),
                primary_gid,
                groups.as_mut_ptr(),
                &mut ngroups,
            );
            if ret < 0 {
                return Err(Error::from_raw_os_error(libc::ERANGE));
            }
        }
        groups.truncate(ngroups.max(1) as usize);
        Ok(Credentials{uid, gids: groups})
    }
}

/// Resolved process credentials: a uid plus an ordered gid list whose first
/// element is the primary group.
#[derive(Clone, Debug)]
pub struct Credentials
{
    /// Target user id.
    pub uid: uid_t,
    /// Target group ids; `gids[0]` is the primary group.
    pub gids: Vec<gid_t>,
}

/// kill(2).
pub fn kill(pid: pid_t, sig: libc::c_int) -> Result<()>
{
    unsafe {
        match libc::kill(pid, sig) {
            -1 => Err(Error::last_os_error()),
            _  => Ok(())
        }
    }
}

/// lseek(2).
pub fn lseek(fd: &impl AsRawFd, offset: off_t, whence: libc::c_int) -> Result<off_t>
{
    unsafe {
        match libc::lseek(fd.as_raw_fd(), offset, whence) {
            -1  => Err(Error::last_os_error()),
            pos => Ok(pos),
        }
    }
}

/// mkdirat(2).
pub fn mkdirat(
    dirfd:    &impl AsRawFd,
    pathname: impl WithCStr,
    mode:     mode_t,
) -> Result<()>
{
    pathname.with_cstr(|pathname| {
        unsafe {
            match libc::mkdirat(dirfd.as_raw_fd(), pathname.as_ptr(), mode) {
                -1 => Err(Error::last_os_error()),
                _  => Ok(()),
            }
        }
    })
}

/// open(2).
pub fn open(
    pathname:  impl WithCStr,
    mut flags: libc::c_int,
    mode:      mode_t,
) -> Result<OwnedFd>
{
    flags |= libc::O_CLOEXEC;
    pathname.with_cstr(|pathname| {
        unsafe {
            match libc::open(pathname.as_ptr(), flags, mode) {
                -1 => Err(Error::last_os_error()),
                fd => Ok(OwnedFd::from_raw_fd(fd)),
            }
        }
    })
}

/// pipe2(2).
pub fn pipe2(mut flags: libc::c_int) -> Result<[OwnedFd; 2]>
{
    flags |= libc::O_CLOEXEC;
    unsafe {
        let mut pipefd = [0, 0];
        match libc::pipe2(pipefd.as_mut_ptr(), flags) {
            -1 => Err(Error::last_os_error()),
            _  => Ok(pipefd.map(|fd| OwnedFd::from_raw_fd(fd))),
        }
    }
}

/// poll(2).
pub fn poll(fds: &mut [pollfd], timeout: libc::c_int) -> Result<usize>
{
    unsafe {
        match libc::poll(fds.as_mut_ptr(), fds.len() as u64, timeout) {
            -1 => Err(Error::last_os_error()),
            n  => Ok(n as usize),
        }
    }
}

/// setgid(2).
pub fn setgid(gid: gid_t) -> Result<()>
{
    unsafe {
        match libc::setgid(gid) {
            -1 => Err(Error::last_os_error()),
            _  => Ok(()),
        }
    }
}

/// setgroups(2).
pub fn setgroups(gids: &[gid_t]) -> Result<()>
{
    unsafe {
        match libc::setgroups(gids.len() as libc::size_t, gids.as_ptr()) {
            -1 => Err(Error::last_os_error()),
            _  => Ok(()),
        }
    }
}

/// setuid(2).
pub fn setuid(uid: uid_t) -> Result<()>
{
    unsafe {
        match libc::setuid(uid) {
            -1 => Err(Error::last_os_error()),
            _  => Ok(()),
        }
    }
}

/// umask(2).
pub fn umask(mask: mode_t) -> mode_t
{
    unsafe {
        libc::umask(mask)
    }
}

/// unlink(2).
pub fn unlink(path: impl WithCStr) -> Result<()>
{
    path.with_cstr(|path| {
        unsafe {
            match libc::unlink(path.as_ptr()) {
                -1 => Err(Error::last_os_error()),
                _  => Ok(()),
            }
        }
    })
}

/// utimes(2): set access and modification time of a path.
pub fn utimes(path: impl WithCStr, atime: libc::time_t, mtime: libc::time_t) -> Result<()>
{
    path.with_cstr(|path| {
        unsafe {
            let times = [
                libc::timeval{tv_sec: atime, tv_usec: 0},
                libc::timeval{tv_sec: mtime, tv_usec: 0},
            ];
            match libc::utimes(path.as_ptr(), times.as_ptr()) {
                -1 => Err(Error::last_os_error()),
                _  => Ok(()),
            }
        }
    })
}

/// waitpid(2).
pub fn waitpid(pid: pid_t, options: libc::c_int)
    -> Result<(pid_t, ExitStatus)>
{
    unsafe {
        let mut wstatus = 0;
        match libc::waitpid(pid, &mut wstatus, options) {
            -1  => Err(Error::last_os_error()),
            pid => Ok((pid, ExitStatus::from_raw(wstatus))),
        }
    }
}
