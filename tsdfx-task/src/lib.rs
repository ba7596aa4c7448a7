// SPDX-License-Identifier: AGPL-3.0-only

#![warn(missing_docs)]

//! The task runtime shared by the supervisor: task identity, the lifecycle
//! state machine, privilege-dropping fork/exec, stdio pipe plumbing, and
//! the set/queue concurrency primitives.

pub mod runtime;

pub use runtime::*;
