// SPDX-License-Identifier: AGPL-3.0-only

//! The supervisor: binary location, the map file and its reload
//! algorithm, the scan and copy dispatchers, the per-map recent-error
//! log, the pid file, logging setup, and the main loop that ties them
//! together. Per spec.md §4.3, §4.5, §4.6, §4.7.

pub mod binpath;
pub mod copy;
pub mod logging;
pub mod map;
pub mod pidfile;
pub mod recentlog;
pub mod run;
pub mod scan;
