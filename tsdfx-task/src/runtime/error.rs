// SPDX-License-Identifier: AGPL-3.0-only

use std::{borrow::Cow, error, fmt, io};

/// Error from the fork/exec machinery, with the step it failed in attached.
///
/// Mirrors the container crate's error type this module is grounded on:
/// it wraps [`io::Error`] with a static or owned context string and can be
/// constructed without allocating, which matters for the handful of these
/// that might be built between `fork` and `execve`.
#[derive(Debug)]
pub struct Error
{
    /// Which error ultimately occurred.
    pub inner: io::Error,
    /// Which step the error comes from.
    pub context: Cow<'static, str>,
}

impl Error
{
    /// Mimics [`io::Error::last_os_error`].
    pub fn last_os_error<C>(context: C) -> Self
        where C: Into<Cow<'static, str>>
    {
        Self{inner: io::Error::last_os_error(), context: context.into()}
    }
}

impl error::Error for Error {}

impl fmt::Display for Error
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        write!(f, "{}: {}", self.context, self.inner)
    }
}

/// Adds `.context(...)` to any `io::Result`.
pub trait ResultExt
{
    /// The success type being carried through.
    type Ok;

    /// Attach a step name to an I/O error.
    fn context<C>(self, context: C) -> Result<Self::Ok, Error>
        where C: Into<Cow<'static, str>>;
}

impl<T> ResultExt for Result<T, io::Error>
{
    type Ok = T;

    fn context<C>(self, context: C) -> Result<T, Error>
        where C: Into<Cow<'static, str>>
    {
        self.map_err(|inner| Error{inner, context: context.into()})
    }
}

/// Errors surfaced by [`super::task::Task`] operations.
#[derive(Debug, thiserror::Error)]
pub enum TaskError
{
    /// The task name exceeded 64 bytes.
    #[error("task name too long")]
    NameTooLong,

    /// An operation that requires `Idle` was attempted in another state.
    #[error("task is not idle")]
    NotIdle,

    /// Fork/exec failed.
    #[error("{0}")]
    Spawn(#[from] Error),

    /// `waitpid` itself failed (not the same as the child exiting badly).
    #[error("waitpid: {0}")]
    Wait(#[source] io::Error),
}
