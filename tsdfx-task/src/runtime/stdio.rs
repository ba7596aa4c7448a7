// SPDX-License-Identifier: AGPL-3.0-only

//! Per-descriptor stdio disposition, independent for stdin/stdout/stderr.

/// How a task's child should have one standard descriptor set up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition
{
    /// Leave the descriptor as inherited from the supervisor.
    Inherit,
    /// Redirect to `/dev/null`.
    Null,
    /// Create a pipe; the parent keeps a non-blocking end.
    Pipe,
}

/// Stdio dispositions for a task, one choice per descriptor.
#[derive(Clone, Copy, Debug)]
pub struct Stdio
{
    /// Disposition of the child's stdin.
    pub stdin: Disposition,
    /// Disposition of the child's stdout.
    pub stdout: Disposition,
    /// Disposition of the child's stderr.
    pub stderr: Disposition,
}

impl Stdio
{
    /// stdin = null, stdout and stderr = pipe: the disposition every scan
    /// and copy task in this system actually uses.
    pub fn piped_output() -> Self
    {
        Self{stdin: Disposition::Null, stdout: Disposition::Pipe, stderr: Disposition::Pipe}
    }
}
