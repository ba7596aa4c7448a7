// SPDX-License-Identifier: AGPL-3.0-only

//! Supervisor-side logging setup. Per spec.md §6 "Log spec", every line
//! is `YYYY-MM-DD HH:MM:SS UTC [PID] LEVEL: FILE:LINE FUNC msg`; the
//! concrete backend is `tracing` + `tracing_subscriber`, matching
//! `wormhole`'s and `jmalicki-arsync`'s usage in the pack.

use {
    std::fmt,
    tracing_subscriber::fmt::{format::Writer, time::FormatTime},
    tsdfx_logline::LogSpec,
};

struct SpecTimer;

impl FormatTime for SpecTimer
{
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result
    {
        write!(w, "{}", tsdfx_logline::timestamp())
    }
}

/// Install the global `tracing` subscriber. `logspec` selects the sink;
/// `verbose` lowers the minimum level from INFO to DEBUG.
pub fn init(logspec: &LogSpec, verbose: bool)
{
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let filter = tracing_subscriber::filter::LevelFilter::from_level(level);

    let builder = tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_timer(SpecTimer)
        .with_target(true)
        .with_ansi(false);

    match logspec {
        LogSpec::Stderr | LogSpec::Syslog => {
            builder.with_writer(std::io::stderr).init();
        },
        LogSpec::User(path) | LogSpec::File(path) => {
            match std::fs::OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => {
                    builder.with_writer(std::sync::Mutex::new(file)).init();
                },
                Err(e) => {
                    builder.with_writer(std::io::stderr).init();
                    tracing::error!(%e, path = %path.display(), "cannot open log file, falling back to stderr");
                },
            }
        },
    }
}
