// SPDX-License-Identifier: AGPL-3.0-only

//! The task runtime: identity, lifecycle state machine, privilege-dropping
//! fork/exec, stdio pipe plumbing, and the set/queue concurrency
//! primitives tasks live in.

pub mod credentials;
pub mod error;
pub mod queue;
pub mod set;
pub mod spawn;
pub mod state;
pub mod stdio;
pub mod task;

pub use {
    credentials::Credentials,
    error::TaskError,
    queue::TaskQueue,
    set::{DuplicateName, TaskSet},
    spawn::{exec_spec, ExecSpec},
    state::State,
    stdio::{Disposition, Stdio},
    task::Task,
};
