// SPDX-License-Identifier: AGPL-3.0-only

//! Fork/exec, privilege drop, and stdio pipe plumbing for a single task.
//!
//! Grounded on the teacher's `container::spawn`: a pipe carries pre-execve
//! errors from child to parent, closing on successful `execve` because
//! every fd this crate opens is `O_CLOEXEC` by default (`tsdfx-os`'s
//! standing convention), so there is no need for the original C's
//! `closefrom(3)`/`getdtablesize` loop — descriptors the child doesn't
//! explicitly `dup2` just vanish at `execve` on their own.

use {
    super::{
        credentials::Credentials,
        error::{Error, ResultExt},
        stdio::{Disposition, Stdio},
    },
    tsdfx_os::{self as os, cstr::CStringArray},
    std::{
        ffi::CString,
        fs::File,
        io::{Read, Write},
        os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd},
    },
};

/// What to `execve` into once the child has dropped privileges.
pub struct ExecSpec
{
    /// Path to the executable.
    pub pathname: CString,
    /// `argv`, including `argv[0]`.
    pub argv: CStringArray,
    /// `envp`.
    pub envp: CStringArray,
}

/// A freshly spawned child: its pid and whichever pipe ends the parent
/// asked to keep.
pub struct Spawned
{
    /// Child pid.
    pub pid: os::pid_t,
    /// Parent's write end of the child's stdin, if piped.
    pub stdin: Option<File>,
    /// Parent's read end of the child's stdout, if piped.
    pub stdout: Option<File>,
    /// Parent's read end of the child's stderr, if piped.
    pub stderr: Option<File>,
}

/// Build an [`ExecSpec`] for `path` with the given `argv` (including
/// `argv[0]`), inheriting the calling process's environment.
pub fn exec_spec(path: &std::path::Path, argv: &[&str]) -> ExecSpec
{
    let pathname = CString::new(path.as_os_str().to_string_lossy().into_owned())
        .expect("path has no interior NUL");
    let argv = argv.iter()
        .map(|a| CString::new(*a).expect("argument has no interior NUL"))
        .collect();
    let envp = std::env::vars_os()
        .map(|(k, v)| {
            let mut s = k.to_string_lossy().into_owned();
            s.push('=');
            s.push_str(&v.to_string_lossy());
            CString::new(s).expect("environment variable has no interior NUL")
        })
        .collect();
    ExecSpec{pathname, argv, envp}
}

/// Fork, wire up stdio, drop privileges, and `execve`.
pub fn spawn(
    exec:        &ExecSpec,
    credentials: &Credentials,
    stdio:       Stdio,
) -> Result<Spawned, Error>
{
    let devnull = if [stdio.stdin, stdio.stdout, stdio.stderr].contains(&Disposition::Null) {
        Some(os::open(c_str("/dev/null"), os::O_RDWR, 0).context("open /dev/null")?)
    } else {
        None
    };

    let stdin_pipe  = make_pipe(stdio.stdin)?;
    let stdout_pipe = make_pipe(stdio.stdout)?;
    let stderr_pipe = make_pipe(stdio.stderr)?;

    let [err_r, err_w] = os::pipe2(0).context("pipe2: error channel")?;
    let mut err_r = File::from(err_r);
    let mut err_w = File::from(err_w);

    // fflush equivalent: nothing buffered on our side (we don't use stdio FILE*s).

    // SAFETY: the child only performs async-signal-safe operations before
    // _exit or execve.
    let pid = unsafe { os::fork() }.context("fork")?;

    if pid == 0 {
        drop(err_r);
        let child_stdin  = stdin_pipe.as_ref().map(|(r, _)| r.as_raw_fd());
        let child_stdout = stdout_pipe.as_ref().map(|(_, w)| w.as_raw_fd());
        let child_stderr = stderr_pipe.as_ref().map(|(_, w)| w.as_raw_fd());
        let devnull_fd = devnull.as_ref().map(|fd| fd.as_raw_fd());

        let error = child_pre_execve(
            exec, credentials, stdio,
            devnull_fd, child_stdin, child_stdout, child_stderr,
        );

        let errno = error.inner.raw_os_error().unwrap_or(-1);
        let _ = err_w.write_all(&errno.to_ne_bytes());
        let _ = err_w.write_all(error.context.as_bytes());
        os::_exit(1);
    }

    // Parent: close our copies of the child-side fds.
    drop(devnull);
    let stdin_pipe  = stdin_pipe.map(|(r, w)| { drop(r); w });
    let stdout_pipe = stdout_pipe.map(|(r, w)| { drop(w); r });
    let stderr_pipe = stderr_pipe.map(|(r, w)| { drop(w); r });
    drop(err_w);

    let mut buf = Vec::new();
    match err_r.read_to_end(&mut buf).context("read: error channel")? {
        0 => {
            let to_nonblocking = |f: Option<File>| -> Result<Option<File>, Error> {
                if let Some(f) = &f {
                    os::set_nonblocking(f, true).context("set_nonblocking")?;
                }
                Ok(f)
            };
            Ok(Spawned{
                pid,
                stdin:  to_nonblocking(stdin_pipe.map(File::from))?,
                stdout: to_nonblocking(stdout_pipe.map(File::from))?,
                stderr: to_nonblocking(stderr_pipe.map(File::from))?,
            })
        },
        n if n >= 4 => {
            let errno = i32::from_ne_bytes([buf[0], buf[1], buf[2], buf[3]]);
            let context = String::from_utf8_lossy(&buf[4..]).into_owned();
            let _ = os::waitpid(pid, 0);
            Err(Error{
                inner: std::io::Error::from_raw_os_error(errno),
                context: context.into(),
            })
        },
        _ => {
            let _ = os::waitpid(pid, 0);
            Err(Error{
                inner: std::io::Error::other("short error packet"),
                context: "child_pre_execve".into(),
            })
        },
    }
}

/// Create a pipe for a `Pipe` disposition; returns `(read_end, write_end)`
/// for the child to dup2 from, with CLOEXEC so neither end survives into
/// grandchildren by accident.
fn make_pipe(disposition: Disposition) -> Result<Option<(OwnedFd, OwnedFd)>, Error>
{
    match disposition {
        Disposition::Pipe => {
            let [r, w] = os::pipe2(0).context("pipe2")?;
            Ok(Some((r, w)))
        },
        Disposition::Inherit | Disposition::Null => Ok(None),
    }
}

/// Everything that runs in the child between `fork` and `execve`.
///
/// Must be async-signal-safe: no allocations, no panics.
fn child_pre_execve(
    exec:        &ExecSpec,
    credentials: &Credentials,
    stdio:       Stdio,
    devnull:     Option<RawFd>,
    stdin:       Option<RawFd>,
    stdout:      Option<RawFd>,
    stderr:      Option<RawFd>,
) -> Error
{
    if let Err(e) = adjust_fd(0, stdio.stdin, devnull, stdin) { return e; }
    if let Err(e) = adjust_fd(1, stdio.stdout, devnull, stdout) { return e; }
    if let Err(e) = adjust_fd(2, stdio.stderr, devnull, stderr) { return e; }

    if let (Some(uid), Some(gids)) = (credentials.uid(), credentials.gids()) {
        if os::geteuid() == 0 {
            if let Err(e) = os::setgid(gids[0]).context("setgid") { return e; }
            if let Err(e) = os::setgroups(gids).context("setgroups") { return e; }
            if let Err(e) = os::setuid(uid).context("setuid") { return e; }
        }
    }

    let error = os::execve(&exec.pathname, &exec.argv, &exec.envp);
    Error{inner: error, context: "execve".into()}
}

/// Wire up one of the child's 0/1/2 descriptors according to disposition.
fn adjust_fd(
    target:      RawFd,
    disposition: Disposition,
    devnull:     Option<RawFd>,
    piped:       Option<RawFd>,
) -> Result<(), Error>
{
    match disposition {
        Disposition::Inherit => Ok(()),
        Disposition::Null => os::dup2(devnull.expect("devnull opened"), target).context("dup2 devnull"),
        Disposition::Pipe => os::dup2(piped.expect("pipe opened"), target).context("dup2 pipe"),
    }
}

fn c_str(s: &'static str) -> &'static std::ffi::CStr
{
    // All call sites pass fixed, NUL-free literals.
    std::ffi::CStr::from_bytes_with_nul(match s {
        "/dev/null" => b"/dev/null\0",
        _ => unreachable!(),
    }).unwrap()
}
